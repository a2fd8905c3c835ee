//! Registry of timeseries, keyed by statistic kind and MSU id.
//!
//! MSUs are registered when placed and unregistered when removed;
//! telemetry for an unregistered item is dropped with a warning rather
//! than creating series implicitly, so stale reports from a runtime
//! that has not yet applied a removal cannot resurrect an MSU's stats.

use std::collections::BTreeMap;

use flowmesh_proto::{StatKind, StatSample};
use tracing::{debug, warn};

use crate::timeseries::TimeSeries;

#[derive(Debug, Default)]
pub struct StatRegistry {
    series: BTreeMap<(StatKind, u32), TimeSeries>,
}

impl StatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tracked statistic for an item. Idempotent; an
    /// already-registered series keeps its samples.
    pub fn register_item(&mut self, item_id: u32) {
        for kind in StatKind::ALL {
            self.series
                .entry((kind, item_id))
                .or_insert_with(TimeSeries::default);
        }
        debug!(item_id, "stat item registered");
    }

    /// Drop every series for an item.
    pub fn unregister_item(&mut self, item_id: u32) {
        self.series.retain(|(_, id), _| *id != item_id);
        debug!(item_id, "stat item unregistered");
    }

    pub fn is_registered(&self, item_id: u32) -> bool {
        StatKind::ALL
            .iter()
            .any(|kind| self.series.contains_key(&(*kind, item_id)))
    }

    /// Ingest one reported sample run.
    pub fn append(&mut self, sample: &StatSample) {
        match self.series.get_mut(&(sample.kind, sample.item_id)) {
            Some(ts) => ts.append_all(sample.values.iter().copied()),
            None => {
                warn!(
                    kind = ?sample.kind,
                    item_id = sample.item_id,
                    "telemetry for unregistered item dropped"
                );
            }
        }
    }

    pub fn series(&self, kind: StatKind, item_id: u32) -> Option<&TimeSeries> {
        self.series.get(&(kind, item_id))
    }
}
