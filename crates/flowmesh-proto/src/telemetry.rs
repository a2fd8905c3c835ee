//! Frames sent from runtimes up to the controller.

use std::net::IpAddr;

use flowmesh_dfg::types::RuntimeId;
use serde::{Deserialize, Serialize};

/// Statistic ids reported per MSU instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatKind {
    QueueLength,
    ItemsProcessed,
    ErrorCount,
    NumStates,
}

impl StatKind {
    /// Every statistic the controller tracks per MSU.
    pub const ALL: [StatKind; 4] = [
        StatKind::QueueLength,
        StatKind::ItemsProcessed,
        StatKind::ErrorCount,
        StatKind::NumStates,
    ];
}

/// One timestamped measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    /// Seconds since the epoch; zero marks an unset slot and is
    /// dropped on ingestion.
    pub secs: i64,
    pub nanos: u32,
    pub value: f64,
}

/// A run of measurements for one statistic of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatSample {
    pub kind: StatKind,
    /// MSU id the samples belong to.
    pub item_id: u32,
    pub values: Vec<TimedValue>,
}

/// One telemetry report from a runtime.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryBatch {
    #[serde(default)]
    pub samples: Vec<StatSample>,
}

/// First frame on a runtime connection: who is calling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeHello {
    pub runtime_id: RuntimeId,
    /// Address peers should dial for data-plane traffic.
    pub ip: IpAddr,
    pub port: u16,
    pub n_cores: u32,
}

/// Everything a runtime may send on its controller connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuntimeFrame {
    Hello(RuntimeHello),
    Telemetry(TelemetryBatch),
}
