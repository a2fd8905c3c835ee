//! flowmeshd — the FlowMesh global controller daemon.
//!
//! Single binary that assembles the control plane:
//! - the shared dataflow graph, loaded from a JSON snapshot
//! - the cluster listener runtimes register with
//! - the telemetry-driven autoscaler
//! - a line-oriented operator console on stdin
//!
//! # Usage
//!
//! ```text
//! flowmeshd --graph webserver.json --scale-type 11 --scale-type 12
//! ```

mod commands;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use flowmesh_autoscale::{Autoscaler, AutoscalerConfig};
use flowmesh_cluster::{ClusterServer, TcpRuntimeSender};
use flowmesh_dfg::shared::SharedDfg;
use flowmesh_dfg::snapshot;
use flowmesh_stats::StatRegistry;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "flowmeshd", about = "FlowMesh global controller")]
struct Cli {
    /// Path to the initial dataflow graph snapshot (JSON).
    #[arg(long, default_value = "dfg.json")]
    graph: PathBuf,

    /// Override the listen port from the snapshot.
    #[arg(long)]
    port: Option<u16>,

    /// MSU type id the autoscaler may scale. Repeatable.
    #[arg(long = "scale-type")]
    scale_types: Vec<u32>,

    /// Queue-length samples per scaling decision window.
    #[arg(long, default_value = "10")]
    window: usize,

    /// Seconds between clone decisions for one type.
    #[arg(long, default_value = "5")]
    clone_cooldown: u64,

    /// Seconds between unclone decisions for one type.
    #[arg(long, default_value = "20")]
    unclone_cooldown: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowmeshd=debug,flowmesh=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let mut dfg = snapshot::load_file(&cli.graph)?;
    if let Some(port) = cli.port {
        dfg.controller_port = port;
    }
    let addr = SocketAddr::new(dfg.controller_ip, dfg.controller_port);
    info!(app = %dfg.application_name, "controller graph loaded");

    // ── Assemble subsystems ────────────────────────────────────────

    let shared = SharedDfg::new(dfg);
    let stats = Arc::new(Mutex::new(StatRegistry::new()));
    let sender = Arc::new(TcpRuntimeSender::new());
    let autoscaler = Arc::new(Mutex::new(Autoscaler::new(AutoscalerConfig {
        types: cli.scale_types,
        window: cli.window,
        clone_cooldown: Duration::from_secs(cli.clone_cooldown),
        unclone_cooldown: Duration::from_secs(cli.unclone_cooldown),
    })));

    let server = Arc::new(ClusterServer::new(
        shared.clone(),
        Arc::clone(&stats),
        Arc::clone(&sender),
        autoscaler,
    ));
    let listener = TcpListener::bind(addr).await?;
    tokio::spawn(server.serve(listener));

    // ── Operator console ───────────────────────────────────────────

    let ctx = commands::CommandContext {
        dfg: shared,
        stats,
        sender,
    };
    tokio::task::spawn_blocking(move || commands::run_loop(&ctx)).await??;

    info!("operator input closed, shutting down");
    Ok(())
}
