//! Inverse-load-weighted key-range rebalancing.
//!
//! Each endpoint's share of the incoming key space shrinks as its
//! downstream queue length grows: busier destinations get fewer keys
//! routed at them. Downstream queue length is the instance's own most
//! recent queue-length sample plus the same summed recursively over
//! everything reachable through its outgoing routes.

use std::collections::BTreeSet;

use flowmesh_dfg::error::DfgResult;
use flowmesh_dfg::types::*;
use flowmesh_proto::{ControlMessage, RuntimeSender, StatKind};
use flowmesh_stats::StatRegistry;
use tracing::{debug, warn};

use crate::manager::{MAIN_THREAD, notify};

/// Width of the key space distributed per route.
pub const REBALANCE_SCALE: f64 = 100.0;

/// Queue lengths are clamped to this floor so an idle endpoint still
/// claims a share and division stays well-behaved.
pub const LOAD_FLOOR: f64 = 1.0;

/// Queue length downstream of one MSU. The visited set caps traversal
/// on cyclic graphs.
fn downstream_load(
    dfg: &Dfg,
    stats: &StatRegistry,
    msu_id: MsuId,
    visited: &mut BTreeSet<MsuId>,
) -> f64 {
    if !visited.insert(msu_id) {
        return 0.0;
    }
    let mut total = stats
        .series(StatKind::QueueLength, msu_id)
        .and_then(|ts| ts.latest())
        .map_or(0.0, |sample| sample.value);

    let Ok(msu) = dfg.msu(msu_id) else {
        return total;
    };
    for route_id in &msu.scheduling.routes {
        let Ok(route) = dfg.route(*route_id) else {
            continue;
        };
        for ep in &route.endpoints {
            total += downstream_load(dfg, stats, ep.msu_id, visited);
        }
    }
    total
}

/// Re-partition one route's endpoint keys by inverse downstream load.
///
/// Skipped for routes whose destination type opts out and for routes
/// with fewer than two endpoints. Returns the number of endpoints whose
/// key changed; only those are pushed to the runtime.
pub fn fix_route_ranges(
    dfg: &mut Dfg,
    stats: &StatRegistry,
    sender: &dyn RuntimeSender,
    route_id: RouteId,
) -> DfgResult<usize> {
    let route = dfg.route(route_id)?;
    if dfg.msu_type(route.msu_type_id)?.fixed_key_ranges || route.endpoints.len() < 2 {
        return Ok(0);
    }

    let loads: Vec<f64> = route
        .endpoints
        .iter()
        .map(|ep| {
            downstream_load(dfg, stats, ep.msu_id, &mut BTreeSet::new()).max(LOAD_FLOOR)
        })
        .collect();
    let total: f64 = loads.iter().sum();

    // Cumulative inverse-share keys, each width at least 1 so ordering
    // stays strict.
    let mut offset = 0u32;
    let mut changes: Vec<(MsuId, u32)> = Vec::new();
    let new_keys: Vec<u32> = loads
        .iter()
        .map(|load| {
            let width = (((1.0 - load / total) * REBALANCE_SCALE) as u32).max(1);
            offset += width;
            offset
        })
        .collect();
    for (ep, new_key) in route.endpoints.iter().zip(&new_keys) {
        if ep.key != *new_key {
            changes.push((ep.msu_id, *new_key));
        }
    }
    if changes.is_empty() {
        return Ok(0);
    }

    let route_runtime = route.runtime_id;
    let route_type = route.msu_type_id;
    let route = dfg.route_mut(route_id)?;
    for (ep, new_key) in route.endpoints.iter_mut().zip(&new_keys) {
        ep.key = *new_key;
    }
    debug!(route_id, changed = changes.len(), "route ranges rebalanced");

    for (msu_id, key) in &changes {
        notify(
            sender,
            route_runtime,
            MAIN_THREAD,
            ControlMessage::ModEndpoint {
                route_id,
                type_id: route_type,
                msu_id: *msu_id,
                key: *key,
            },
        )?;
    }
    Ok(changes.len())
}

/// Rebalance every route in the system. Per-route failures are logged
/// and do not stop the sweep.
pub fn fix_all_route_ranges(
    dfg: &mut Dfg,
    stats: &StatRegistry,
    sender: &dyn RuntimeSender,
) -> usize {
    let route_ids: Vec<RouteId> = dfg
        .runtimes
        .values()
        .flat_map(|rt| rt.routes.keys().copied())
        .collect();

    let mut changed = 0;
    for route_id in route_ids {
        match fix_route_ranges(dfg, stats, sender, route_id) {
            Ok(n) => changed += n,
            Err(err) => warn!(route_id, %err, "route rebalance failed"),
        }
    }
    changed
}
