//! flowmesh-autoscale — feedback control over instance counts.
//!
//! One pass runs per ingested telemetry batch. For each configured
//! type the pass reads a short window of queue-length samples from
//! every live instance and computes two aggregates:
//!
//! - min-of-mins: the smallest value any instance ever dropped to. A
//!   strictly positive value means every instance stayed backed up
//!   through its emptiest moment, so the type is persistently
//!   saturated and a clone is warranted.
//! - min-of-maxes: the busiest moment of the least busy instance. Zero
//!   means at least one instance was idle for the whole window, so an
//!   instance can be retired.
//!
//! Per-type cooldowns (longer for unclone) keep decisions from
//! flapping; the instance count recorded at the first pass is a floor
//! uncloning never goes below. Every failure is a logged no-op for the
//! tick; the next batch retries naturally.

pub mod scaler;

pub use scaler::{Autoscaler, AutoscalerConfig};
