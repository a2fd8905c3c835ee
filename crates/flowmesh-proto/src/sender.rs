//! The send contract between the core scheduling logic and the cluster
//! transport.
//!
//! Core operations mutate the controller's graph first and then hand a
//! [`ControlMessage`] to a [`RuntimeSender`]. The returned [`Delivery`]
//! carries a sequence number and an acknowledgment status; callers log
//! it but never block waiting for the runtime to act.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use flowmesh_dfg::error::DfgError;
use flowmesh_dfg::types::{RuntimeId, ThreadId};
use thiserror::Error;

use crate::messages::{ControlEnvelope, ControlMessage, MessageKind};

#[derive(Debug, Error)]
pub enum CommError {
    #[error("runtime {0} is not connected")]
    NotConnected(RuntimeId),
    #[error("send to runtime {runtime} failed: {source}")]
    Io {
        runtime: RuntimeId,
        #[source]
        source: std::io::Error,
    },
    #[error("message encoding failed: {0}")]
    Encode(String),
}

impl From<CommError> for DfgError {
    fn from(err: CommError) -> Self {
        let runtime = match err {
            CommError::NotConnected(rt) | CommError::Io { runtime: rt, .. } => rt,
            CommError::Encode(_) => 0,
        };
        DfgError::CommunicationFailure {
            runtime,
            reason: err.to_string(),
        }
    }
}

/// How sure we are the runtime received a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// The bytes were written to a healthy connection; the runtime is
    /// assumed to apply the message in order.
    Assumed,
    /// The transport observed an explicit acknowledgment.
    Confirmed,
}

/// Receipt for a sent control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub seq: u64,
    pub ack: AckStatus,
}

/// Transport used by placement, routing, and cloning to notify runtimes.
///
/// Implementations must be usable from multiple threads; the graph lock
/// is typically held across calls, so sends must not block indefinitely.
pub trait RuntimeSender: Send + Sync {
    fn send(
        &self,
        runtime_id: RuntimeId,
        thread_id: ThreadId,
        message: ControlMessage,
    ) -> Result<Delivery, CommError>;
}

/// In-memory sender for tests: records every message and confirms it.
#[derive(Default)]
pub struct RecordingSender {
    seq: AtomicU64,
    sent: Mutex<Vec<(RuntimeId, ThreadId, ControlMessage)>>,
    /// Runtimes that refuse delivery, for failure-path tests.
    unreachable: Mutex<Vec<RuntimeId>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unreachable(&self, runtime_id: RuntimeId) {
        self.unreachable.lock().unwrap().push(runtime_id);
    }

    pub fn sent(&self) -> Vec<(RuntimeId, ThreadId, ControlMessage)> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages sent to one runtime, in order.
    pub fn sent_to(&self, runtime_id: RuntimeId) -> Vec<ControlMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(rt, _, _)| *rt == runtime_id)
            .map(|(_, _, msg)| msg.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl RuntimeSender for RecordingSender {
    fn send(
        &self,
        runtime_id: RuntimeId,
        thread_id: ThreadId,
        message: ControlMessage,
    ) -> Result<Delivery, CommError> {
        if self.unreachable.lock().unwrap().contains(&runtime_id) {
            return Err(CommError::NotConnected(runtime_id));
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.sent
            .lock()
            .unwrap()
            .push((runtime_id, thread_id, message));
        Ok(Delivery {
            seq,
            ack: AckStatus::Confirmed,
        })
    }
}

/// Send a message and log the delivery receipt. The receipt is never
/// awaited beyond the send itself.
pub fn send_logged(
    sender: &dyn RuntimeSender,
    runtime_id: RuntimeId,
    thread_id: ThreadId,
    message: ControlMessage,
) -> Result<Delivery, CommError> {
    let label = message.label();
    let delivery = sender.send(runtime_id, thread_id, message)?;
    tracing::debug!(
        runtime_id,
        seq = delivery.seq,
        ack = ?delivery.ack,
        message = label,
        "runtime notified"
    );
    Ok(delivery)
}

/// Build the envelope a transport puts on the wire.
pub fn envelope(seq: u64, thread_id: ThreadId, message: ControlMessage) -> ControlEnvelope {
    ControlEnvelope {
        seq,
        kind: MessageKind::Action,
        thread_id,
        message,
    }
}
