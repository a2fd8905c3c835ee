//! The shared DFG context: one coarse mutex over the whole graph.
//!
//! Every top-level placement/route/cloning operation locks the graph for
//! its full duration. Operations from different sources (operator
//! command, autoscaling tick, telemetry handling) are serialized here.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::error;

use crate::error::{DfgError, DfgResult};
use crate::types::Dfg;

/// Handle to the graph shared between the cluster server, the operator
/// loop, and the autoscaler.
#[derive(Clone)]
pub struct SharedDfg {
    inner: Arc<Mutex<Dfg>>,
}

impl SharedDfg {
    pub fn new(dfg: Dfg) -> Self {
        Self {
            inner: Arc::new(Mutex::new(dfg)),
        }
    }

    /// Acquire the DFG lock. Failure to acquire (poisoning) is fatal to
    /// the calling operation; there is no retry.
    pub fn lock(&self) -> DfgResult<MutexGuard<'_, Dfg>> {
        self.inner.lock().map_err(|_| {
            error!("dfg lock poisoned, aborting operation");
            DfgError::LockPoisoned
        })
    }
}
