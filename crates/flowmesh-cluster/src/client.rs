//! TCP transport for control messages.

use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use flowmesh_dfg::types::{RuntimeId, ThreadId};
use flowmesh_proto::frame;
use flowmesh_proto::sender::envelope;
use flowmesh_proto::{AckStatus, CommError, ControlMessage, Delivery, RuntimeSender};
use tracing::{debug, info};

/// Sends control messages over the sockets runtimes connected with.
///
/// Writes are blocking and serialized per send through the connection
/// table lock; a successful write yields an [`AckStatus::Assumed`]
/// delivery, trusting the runtime to apply messages in order.
#[derive(Default)]
pub struct TcpRuntimeSender {
    seq: AtomicU64,
    connections: Mutex<HashMap<RuntimeId, TcpStream>>,
}

impl TcpRuntimeSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<std::sync::MutexGuard<'_, HashMap<RuntimeId, TcpStream>>, CommError> {
        self.connections
            .lock()
            .map_err(|_| CommError::Encode("connection table poisoned".into()))
    }

    /// Register the write handle for a runtime. Returns `false` when
    /// the runtime is already connected; the caller decides what that
    /// means.
    pub fn register(&self, runtime_id: RuntimeId, stream: TcpStream) -> Result<bool, CommError> {
        let mut table = self.table()?;
        if table.contains_key(&runtime_id) {
            return Ok(false);
        }
        table.insert(runtime_id, stream);
        info!(runtime_id, "runtime send handle registered");
        Ok(true)
    }

    pub fn unregister(&self, runtime_id: RuntimeId) {
        if let Ok(mut table) = self.table() {
            if table.remove(&runtime_id).is_some() {
                info!(runtime_id, "runtime send handle dropped");
            }
        }
    }

    pub fn is_connected(&self, runtime_id: RuntimeId) -> bool {
        self.table()
            .map(|t| t.contains_key(&runtime_id))
            .unwrap_or(false)
    }

    /// Currently connected runtimes, in id order.
    pub fn connected(&self) -> Vec<RuntimeId> {
        let mut ids: Vec<RuntimeId> = self
            .table()
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

impl RuntimeSender for TcpRuntimeSender {
    fn send(
        &self,
        runtime_id: RuntimeId,
        thread_id: ThreadId,
        message: ControlMessage,
    ) -> Result<Delivery, CommError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let env = envelope(seq, thread_id, message);

        let table = self.table()?;
        let stream = table
            .get(&runtime_id)
            .ok_or(CommError::NotConnected(runtime_id))?;
        let mut writer: &TcpStream = stream;
        frame::write_frame(&mut writer, &env).map_err(|source| CommError::Io {
            runtime: runtime_id,
            source,
        })?;
        debug!(runtime_id, seq, "control frame written");
        Ok(Delivery {
            seq,
            ack: AckStatus::Assumed,
        })
    }
}

impl std::fmt::Debug for TcpRuntimeSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpRuntimeSender")
            .field("connected", &self.connected())
            .finish()
    }
}

/// Convert an accepted async socket into the blocking handles the
/// reader task and the sender share.
pub(crate) fn split_accepted(
    stream: tokio::net::TcpStream,
) -> io::Result<(TcpStream, TcpStream)> {
    let read_half = stream.into_std()?;
    read_half.set_nonblocking(false)?;
    let write_half = read_half.try_clone()?;
    Ok((read_half, write_half))
}
