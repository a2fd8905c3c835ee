//! Topological ordering of newly created MSUs for wiring.
//!
//! Within one clone pass, an MSU must be wired after every MSU it
//! routes to: if A's type lists B's type as a destination, B comes
//! first. Kahn's algorithm over that relation; exit-marked sinks fall
//! out first naturally, ties break on ascending id so the order is
//! deterministic.

use std::collections::{BTreeMap, BTreeSet};

use flowmesh_dfg::error::{DfgError, DfgResult};
use flowmesh_dfg::types::{Dfg, MsuId};

/// Order `msu_ids` so consumers precede their producers.
///
/// A dependency cycle among the given MSUs' types cannot be wired in
/// any safe order and is surfaced as an error.
pub fn wiring_order(dfg: &Dfg, msu_ids: &[MsuId]) -> DfgResult<Vec<MsuId>> {
    let ids: BTreeSet<MsuId> = msu_ids.iter().copied().collect();

    // in_degree[a] = number of MSUs in the set that a routes to and
    // which therefore must be wired before a.
    let mut in_degree: BTreeMap<MsuId, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut blocks: BTreeMap<MsuId, Vec<MsuId>> = BTreeMap::new();
    for a in &ids {
        let a_type = dfg.msu_type(dfg.msu(*a)?.type_id)?;
        for b in &ids {
            if a == b {
                continue;
            }
            let b_type_id = dfg.msu(*b)?.type_id;
            if a_type.meta_routing.dst_types.contains(&b_type_id) {
                blocks.entry(*b).or_default().push(*a);
                *in_degree.get_mut(a).unwrap() += 1;
            }
        }
    }

    let mut ready: BTreeSet<MsuId> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(ids.len());
    while let Some(next) = ready.iter().next().copied() {
        ready.remove(&next);
        order.push(next);
        for blocked in blocks.get(&next).into_iter().flatten() {
            let deg = in_degree.get_mut(blocked).unwrap();
            *deg -= 1;
            if *deg == 0 {
                ready.insert(*blocked);
            }
        }
    }

    if order.len() != ids.len() {
        return Err(DfgError::InvalidState(
            "dependency cycle among newly created msus".into(),
        ));
    }
    Ok(order)
}
