//! Error taxonomy for DFG operations.
//!
//! Every control-plane operation reports failures through `DfgError`;
//! callers (CLI, autoscaler, telemetry handler) log and continue. There
//! are no compensating transactions: a failure partway through a
//! multi-step mutation leaves the earlier steps applied.

use thiserror::Error;

use crate::types::{MsuId, MsuTypeId, RuntimeId};

/// Result type alias for DFG operations.
pub type DfgResult<T> = Result<T, DfgError>;

/// Errors that can occur while querying or mutating the dataflow graph.
#[derive(Debug, Error)]
pub enum DfgError {
    #[error("{0} {1} not found")]
    NotFound(&'static str, u32),

    #[error("{0} {1} already exists")]
    AlreadyExists(&'static str, u32),

    #[error("no free worker thread on runtime {0}")]
    NoCapacity(RuntimeId),

    #[error("msu type {0} is not cloneable")]
    NotCloneable(MsuTypeId),

    #[error("msu {0} is the last instance of type {1}")]
    LastInstance(MsuId, MsuTypeId),

    #[error("communication with runtime {runtime} failed: {reason}")]
    CommunicationFailure { runtime: RuntimeId, reason: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("dfg lock poisoned")]
    LockPoisoned,
}
