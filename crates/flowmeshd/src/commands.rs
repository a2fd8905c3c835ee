//! The operator console: line-oriented commands over stdin.
//!
//! Each command maps onto one core operation under the graph lock. A
//! failing command prints one error line and the loop continues.

use std::io::{self, BufRead};
use std::sync::{Arc, Mutex};

use flowmesh_dfg::error::{DfgError, DfgResult};
use flowmesh_dfg::shared::SharedDfg;
use flowmesh_dfg::snapshot;
use flowmesh_dfg::types::{BlockingMode, ThreadMode, VertexKind};
use flowmesh_proto::RuntimeSender;
use flowmesh_stats::StatRegistry;
use tracing::info;

pub struct CommandContext {
    pub dfg: SharedDfg,
    pub stats: Arc<Mutex<StatRegistry>>,
    pub sender: Arc<dyn RuntimeSender>,
}

const HELP: &str = "\
commands:
  add msu <id> <type> <runtime> <thread> <blocking> [vertex] [init_data]
  rm msu <id>
  add route <runtime> <type>
  rm route <id>
  add endpoint <route> <msu> [key]
  rm endpoint <route> <msu>
  mod endpoint <route> <msu> <key>
  attach route <msu> <route>
  add thread <runtime> <thread> <pinned|unpinned>
  clone msu <id>
  unclone msu <id>
  show
  help";

fn parse_u32(token: Option<&str>, what: &str) -> DfgResult<u32> {
    let token =
        token.ok_or_else(|| DfgError::InvalidState(format!("missing argument: {what}")))?;
    token
        .parse()
        .map_err(|_| DfgError::InvalidState(format!("invalid {what}: {token}")))
}

/// Run one command line against the graph. Returns the text to print.
pub fn dispatch(ctx: &CommandContext, line: &str) -> DfgResult<String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or("");
    let noun = parts.next().unwrap_or("");
    let sender = ctx.sender.as_ref();

    match (verb, noun) {
        ("add", "msu") => {
            let msu_id = parse_u32(parts.next(), "msu id")?;
            let type_id = parse_u32(parts.next(), "type id")?;
            let runtime_id = parse_u32(parts.next(), "runtime id")?;
            let thread_id = parse_u32(parts.next(), "thread id")?;
            let blocking_label = parts.next().unwrap_or("blocking");
            let blocking = BlockingMode::from_label(blocking_label).ok_or_else(|| {
                DfgError::InvalidState(format!("invalid blocking mode: {blocking_label}"))
            })?;
            let vertex = VertexKind::from_label(parts.next().unwrap_or("nop"));
            let init_data = parts.next().unwrap_or("");

            let mut dfg = ctx.dfg.lock()?;
            let mut stats = ctx.stats.lock().map_err(|_| DfgError::LockPoisoned)?;
            flowmesh_scheduler::add_msu(
                &mut dfg, &mut stats, sender, msu_id, type_id, init_data, vertex, blocking,
                runtime_id, thread_id,
            )?;
            Ok(format!("msu {msu_id} added"))
        }
        ("rm", "msu") => {
            let msu_id = parse_u32(parts.next(), "msu id")?;
            let mut dfg = ctx.dfg.lock()?;
            let mut stats = ctx.stats.lock().map_err(|_| DfgError::LockPoisoned)?;
            flowmesh_scheduler::remove_msu(&mut dfg, &mut stats, sender, msu_id)?;
            Ok(format!("msu {msu_id} removed"))
        }
        ("add", "route") => {
            let runtime_id = parse_u32(parts.next(), "runtime id")?;
            let type_id = parse_u32(parts.next(), "type id")?;
            let mut dfg = ctx.dfg.lock()?;
            let route_id = flowmesh_routing::create_route(&mut dfg, sender, runtime_id, type_id)?;
            Ok(format!("route {route_id} created"))
        }
        ("rm", "route") => {
            let route_id = parse_u32(parts.next(), "route id")?;
            let mut dfg = ctx.dfg.lock()?;
            flowmesh_routing::delete_route(&mut dfg, sender, route_id)?;
            Ok(format!("route {route_id} deleted"))
        }
        ("add", "endpoint") => {
            let route_id = parse_u32(parts.next(), "route id")?;
            let msu_id = parse_u32(parts.next(), "msu id")?;
            let key = match parts.next() {
                Some(tok) => Some(parse_u32(Some(tok), "key")?),
                None => None,
            };
            let mut dfg = ctx.dfg.lock()?;
            let key = flowmesh_routing::add_endpoint(&mut dfg, sender, route_id, msu_id, key)?;
            Ok(format!("endpoint for msu {msu_id} added with key {key}"))
        }
        ("rm", "endpoint") => {
            let route_id = parse_u32(parts.next(), "route id")?;
            let msu_id = parse_u32(parts.next(), "msu id")?;
            let mut dfg = ctx.dfg.lock()?;
            flowmesh_routing::del_endpoint(&mut dfg, sender, route_id, msu_id)?;
            Ok(format!("endpoint for msu {msu_id} removed"))
        }
        ("mod", "endpoint") => {
            let route_id = parse_u32(parts.next(), "route id")?;
            let msu_id = parse_u32(parts.next(), "msu id")?;
            let key = parse_u32(parts.next(), "key")?;
            let mut dfg = ctx.dfg.lock()?;
            flowmesh_routing::mod_endpoint(&mut dfg, sender, route_id, msu_id, key)?;
            Ok(format!("endpoint for msu {msu_id} moved to key {key}"))
        }
        ("attach", "route") => {
            let msu_id = parse_u32(parts.next(), "msu id")?;
            let route_id = parse_u32(parts.next(), "route id")?;
            let mut dfg = ctx.dfg.lock()?;
            flowmesh_routing::attach_route(&mut dfg, sender, msu_id, route_id)?;
            Ok(format!("route {route_id} attached to msu {msu_id}"))
        }
        ("add", "thread") => {
            let runtime_id = parse_u32(parts.next(), "runtime id")?;
            let thread_id = parse_u32(parts.next(), "thread id")?;
            let mode_label = parts.next().unwrap_or("pinned");
            let mode = ThreadMode::from_label(mode_label).ok_or_else(|| {
                DfgError::InvalidState(format!("invalid thread mode: {mode_label}"))
            })?;
            let mut dfg = ctx.dfg.lock()?;
            flowmesh_scheduler::create_worker_thread(&mut dfg, sender, runtime_id, thread_id, mode)?;
            Ok(format!("thread {thread_id} created on runtime {runtime_id}"))
        }
        ("clone", "msu") => {
            let msu_id = parse_u32(parts.next(), "msu id")?;
            let mut dfg = ctx.dfg.lock()?;
            let mut stats = ctx.stats.lock().map_err(|_| DfgError::LockPoisoned)?;
            let clone_id = flowmesh_scheduler::clone_msu(&mut dfg, &mut stats, sender, msu_id)?;
            Ok(format!("msu {msu_id} cloned as {clone_id}"))
        }
        ("unclone", "msu") => {
            let msu_id = parse_u32(parts.next(), "msu id")?;
            let mut dfg = ctx.dfg.lock()?;
            let mut stats = ctx.stats.lock().map_err(|_| DfgError::LockPoisoned)?;
            flowmesh_scheduler::unclone_msu(&mut dfg, &mut stats, sender, msu_id)?;
            Ok(format!("msu {msu_id} uncloned"))
        }
        ("show", _) => {
            let dfg = ctx.dfg.lock()?;
            snapshot::to_json(&dfg)
        }
        ("help", _) | ("", _) => Ok(HELP.to_string()),
        _ => Err(DfgError::InvalidState(format!(
            "unknown command: {verb} {noun} (try `help`)"
        ))),
    }
}

/// Read operator commands until stdin closes.
pub fn run_loop(ctx: &CommandContext) -> anyhow::Result<()> {
    info!("operator console ready (type `help`)");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match dispatch(ctx, &line) {
            Ok(output) => println!("{output}"),
            Err(err) => println!("error: {err}"),
        }
    }
    Ok(())
}
