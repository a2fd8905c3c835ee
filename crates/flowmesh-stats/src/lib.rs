//! flowmesh-stats — the controller-side telemetry store.
//!
//! Each registered (statistic, MSU) pair owns a fixed-capacity ring of
//! timestamped samples. Scaling decisions read short windows off the
//! most recent samples; nothing here persists across restarts.

pub mod registry;
pub mod timeseries;

pub use registry::StatRegistry;
pub use timeseries::TimeSeries;
