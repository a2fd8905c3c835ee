//! Runtime registration and telemetry ingestion.
//!
//! The accept loop is async; each accepted connection is handed to a
//! blocking task that reads length-prefixed JSON frames with plain
//! blocking reads. The first frame must be a hello naming the runtime;
//! after that the connection carries telemetry batches, and every
//! batch triggers an autoscaling pass.

use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};

use flowmesh_autoscale::Autoscaler;
use flowmesh_dfg::error::{DfgError, DfgResult};
use flowmesh_dfg::shared::SharedDfg;
use flowmesh_dfg::types::{RuntimeId, RuntimeNode};
use flowmesh_proto::{ControlMessage, RuntimeFrame, RuntimeHello, TelemetryBatch, frame, send_logged};
use flowmesh_routing::manager::MAIN_THREAD;
use flowmesh_stats::StatRegistry;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::client::{TcpRuntimeSender, split_accepted};

pub struct ClusterServer {
    dfg: SharedDfg,
    stats: Arc<Mutex<StatRegistry>>,
    sender: Arc<TcpRuntimeSender>,
    autoscaler: Arc<Mutex<Autoscaler>>,
}

impl ClusterServer {
    pub fn new(
        dfg: SharedDfg,
        stats: Arc<Mutex<StatRegistry>>,
        sender: Arc<TcpRuntimeSender>,
        autoscaler: Arc<Mutex<Autoscaler>>,
    ) -> Self {
        Self {
            dfg,
            stats,
            sender,
            autoscaler,
        }
    }

    /// Accept runtime connections forever.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "cluster listener up");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::task::spawn_blocking(move || match split_accepted(stream) {
                Ok((read_half, write_half)) => {
                    if let Err(err) = server.handle_runtime(read_half, write_half, peer) {
                        warn!(%peer, %err, "runtime connection closed with error");
                    }
                }
                Err(err) => warn!(%peer, %err, "could not adopt runtime socket"),
            });
        }
    }

    /// Serve one runtime connection to completion.
    fn handle_runtime(
        &self,
        mut read_half: TcpStream,
        write_half: TcpStream,
        peer: SocketAddr,
    ) -> DfgResult<()> {
        let hello = match frame::read_frame::<_, RuntimeFrame>(&mut read_half) {
            Ok(RuntimeFrame::Hello(hello)) => hello,
            Ok(_) => {
                return Err(DfgError::InvalidState(format!(
                    "{peer}: first frame was not a hello"
                )));
            }
            Err(err) => {
                return Err(DfgError::CommunicationFailure {
                    runtime: 0,
                    reason: format!("{peer}: {err}"),
                });
            }
        };
        let runtime_id = hello.runtime_id;
        self.register_runtime(&hello, write_half)?;
        info!(runtime_id, %peer, "runtime registered");

        loop {
            match frame::read_frame::<_, RuntimeFrame>(&mut read_half) {
                Ok(RuntimeFrame::Telemetry(batch)) => {
                    if let Err(err) = self.ingest_telemetry(runtime_id, batch) {
                        warn!(runtime_id, %err, "telemetry batch dropped");
                    }
                }
                Ok(RuntimeFrame::Hello(_)) => {
                    warn!(runtime_id, "unexpected second hello ignored");
                }
                Err(err) => {
                    self.sender.unregister(runtime_id);
                    info!(runtime_id, %err, "runtime disconnected");
                    return Ok(());
                }
            }
        }
    }

    /// Record the runtime in the graph, keep its send handle, and tell
    /// every other connected runtime to open a data-plane connection
    /// to it.
    fn register_runtime(&self, hello: &RuntimeHello, write_half: TcpStream) -> DfgResult<()> {
        if !self.sender.register(hello.runtime_id, write_half)? {
            return Err(DfgError::AlreadyExists("runtime", hello.runtime_id));
        }

        {
            let mut dfg = self.dfg.lock()?;
            match dfg.runtimes.get_mut(&hello.runtime_id) {
                Some(rt) => {
                    // Pre-declared in the snapshot; the hello wins for
                    // address and core count.
                    rt.ip = hello.ip;
                    rt.port = hello.port;
                    rt.n_cores = hello.n_cores;
                }
                None => {
                    dfg.runtimes.insert(
                        hello.runtime_id,
                        RuntimeNode::new(hello.runtime_id, hello.ip, hello.port, hello.n_cores),
                    );
                }
            }
        }

        for peer_id in self.sender.connected() {
            if peer_id == hello.runtime_id {
                continue;
            }
            let result = send_logged(
                self.sender.as_ref(),
                peer_id,
                MAIN_THREAD,
                ControlMessage::ConnectToRuntime {
                    runtime_id: hello.runtime_id,
                    ip: hello.ip,
                    port: hello.port,
                },
            );
            if let Err(err) = result {
                warn!(peer_id, %err, "peer notification failed");
            }
        }
        Ok(())
    }

    /// Append one telemetry batch and run the scaling pass it funds.
    fn ingest_telemetry(&self, runtime_id: RuntimeId, batch: TelemetryBatch) -> DfgResult<()> {
        debug!(runtime_id, samples = batch.samples.len(), "telemetry batch");
        {
            let mut stats = self.stats.lock().map_err(|_| DfgError::LockPoisoned)?;
            for sample in &batch.samples {
                stats.append(sample);
            }
        }

        let mut scaler = self
            .autoscaler
            .lock()
            .map_err(|_| DfgError::LockPoisoned)?;
        let mut dfg = self.dfg.lock()?;
        let mut stats = self.stats.lock().map_err(|_| DfgError::LockPoisoned)?;
        scaler.tick(&mut dfg, &mut stats, self.sender.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_autoscale::AutoscalerConfig;
    use flowmesh_dfg::types::Dfg;
    use flowmesh_proto::{StatKind, StatSample, TimedValue};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn hello(runtime_id: u32) -> RuntimeFrame {
        RuntimeFrame::Hello(RuntimeHello {
            runtime_id,
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9000 + runtime_id as u16,
            n_cores: 4,
        })
    }

    async fn start_server() -> (Arc<ClusterServer>, SocketAddr) {
        let server = Arc::new(ClusterServer::new(
            SharedDfg::new(Dfg::new("test-app", 0)),
            Arc::new(Mutex::new(StatRegistry::new())),
            Arc::new(TcpRuntimeSender::new()),
            Arc::new(Mutex::new(Autoscaler::new(AutoscalerConfig::default()))),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&server).serve(listener));
        (server, addr)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn hello_registers_the_runtime() {
        let (server, addr) = start_server().await;

        let mut conn = TcpStream::connect(addr).unwrap();
        frame::write_frame(&mut conn, &hello(1)).unwrap();

        let dfg = server.dfg.clone();
        let sender = Arc::clone(&server.sender);
        wait_until(move || {
            sender.is_connected(1) && dfg.lock().unwrap().runtimes.contains_key(&1)
        })
        .await;
    }

    #[tokio::test]
    async fn duplicate_runtime_id_is_dropped() {
        let (server, addr) = start_server().await;

        let mut first = TcpStream::connect(addr).unwrap();
        frame::write_frame(&mut first, &hello(1)).unwrap();
        let sender = Arc::clone(&server.sender);
        wait_until(move || sender.is_connected(1)).await;

        let mut second = TcpStream::connect(addr).unwrap();
        frame::write_frame(&mut second, &hello(1)).unwrap();

        // The duplicate is rejected; the original handle survives.
        use std::io::Read;
        second
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).unwrap_or(0), 0);
        assert!(server.sender.is_connected(1));
    }

    #[tokio::test]
    async fn telemetry_lands_in_the_registry() {
        let (server, addr) = start_server().await;
        server.stats.lock().unwrap().register_item(10);

        let mut conn = TcpStream::connect(addr).unwrap();
        frame::write_frame(&mut conn, &hello(1)).unwrap();
        frame::write_frame(
            &mut conn,
            &RuntimeFrame::Telemetry(TelemetryBatch {
                samples: vec![StatSample {
                    kind: StatKind::QueueLength,
                    item_id: 10,
                    values: vec![TimedValue {
                        secs: 100,
                        nanos: 0,
                        value: 6.0,
                    }],
                }],
            }),
        )
        .unwrap();

        let stats = Arc::clone(&server.stats);
        wait_until(move || {
            stats
                .lock()
                .unwrap()
                .series(StatKind::QueueLength, 10)
                .is_some_and(|ts| ts.latest().is_some_and(|s| s.value == 6.0))
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn new_peer_is_announced_to_connected_runtimes() {
        let (_server, addr) = start_server().await;

        let mut first = TcpStream::connect(addr).unwrap();
        frame::write_frame(&mut first, &hello(1)).unwrap();
        // Make sure runtime 1 is fully registered before runtime 2
        // arrives.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut second = TcpStream::connect(addr).unwrap();
        frame::write_frame(&mut second, &hello(2)).unwrap();

        first
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let env: flowmesh_proto::ControlEnvelope = frame::read_frame(&mut first).unwrap();
        assert!(matches!(
            env.message,
            ControlMessage::ConnectToRuntime { runtime_id: 2, .. }
        ));
    }
}
