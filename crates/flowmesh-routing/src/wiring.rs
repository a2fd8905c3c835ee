//! Wiring a newly placed MSU into the graph.
//!
//! After placement, the new MSU must be able to reach the live
//! instances of every destination type its meta-routing declares, and
//! existing instances of its source types must be able to reach it.
//! Wiring is idempotent per pair: route creation, endpoint addition,
//! and attachment each happen only when missing.

use flowmesh_dfg::error::{DfgError, DfgResult};
use flowmesh_dfg::types::*;
use flowmesh_proto::RuntimeSender;
use tracing::debug;

use crate::manager;

/// Whether a (source runtime, destination runtime) pair satisfies the
/// locality constraint declared between two types. No declared
/// dependency means either locality is accepted.
fn locality_allows(
    src_type: &MsuType,
    dst_type: &MsuType,
    src_runtime: RuntimeId,
    dst_runtime: RuntimeId,
) -> bool {
    let constraint = src_type
        .dependencies
        .iter()
        .find(|d| d.type_id == dst_type.id)
        .or_else(|| {
            dst_type
                .dependencies
                .iter()
                .find(|d| d.type_id == src_type.id)
        });
    match constraint.map(|d| d.locality) {
        Some(Locality::Local) => src_runtime == dst_runtime,
        Some(Locality::Remote) => src_runtime != dst_runtime,
        None => true,
    }
}

/// Ensure `src` can route to `dst`: a route for `dst`'s type exists on
/// `src`'s runtime, `dst` is one of its endpoints, and the route is
/// attached to `src`.
fn ensure_wired(
    dfg: &mut Dfg,
    sender: &dyn RuntimeSender,
    src_id: MsuId,
    src_runtime: RuntimeId,
    dst_id: MsuId,
    dst_type_id: MsuTypeId,
) -> DfgResult<()> {
    let route_id = match dfg.runtime(src_runtime)?.route_by_type(dst_type_id) {
        Some(route) => route.id,
        None => manager::create_route(dfg, sender, src_runtime, dst_type_id)?,
    };

    if dfg.route(route_id)?.endpoint(dst_id).is_none() {
        manager::add_endpoint(dfg, sender, route_id, dst_id, None)?;
    }

    if !dfg.msu(src_id)?.has_route(route_id) {
        manager::attach_route(dfg, sender, src_id, route_id)?;
    }
    Ok(())
}

/// Wire a placed MSU to its declared neighbors, downstream first.
///
/// Runs once per newly placed MSU, including each dependency spawned
/// during placement closure. Cost is linear in the live instances of
/// each related type.
pub fn wire_msu(dfg: &mut Dfg, sender: &dyn RuntimeSender, msu_id: MsuId) -> DfgResult<()> {
    let msu = dfg.msu(msu_id)?;
    let Some(placement) = msu.scheduling.placement else {
        return Err(DfgError::InvalidState(format!(
            "msu {msu_id} is not placed, cannot be wired"
        )));
    };
    let ty = dfg.msu_type(msu.type_id)?.clone();

    // This MSU sends to instances of its destination types.
    for dst_type_id in &ty.meta_routing.dst_types {
        let Ok(dst_type) = dfg.msu_type(*dst_type_id) else {
            continue;
        };
        let dst_type = dst_type.clone();
        for dst_id in &dst_type.instances {
            let dst = dfg.msu(*dst_id)?;
            let Some(dst_placement) = dst.scheduling.placement else {
                continue;
            };
            if !locality_allows(&ty, &dst_type, placement.runtime_id, dst_placement.runtime_id) {
                continue;
            }
            ensure_wired(
                dfg,
                sender,
                msu_id,
                placement.runtime_id,
                *dst_id,
                *dst_type_id,
            )?;
        }
    }

    // Instances of its source types send to this MSU.
    for src_type_id in &ty.meta_routing.src_types {
        let Ok(src_type) = dfg.msu_type(*src_type_id) else {
            continue;
        };
        let src_type = src_type.clone();
        for src_id in &src_type.instances {
            let src = dfg.msu(*src_id)?;
            let Some(src_placement) = src.scheduling.placement else {
                continue;
            };
            if !locality_allows(&src_type, &ty, src_placement.runtime_id, placement.runtime_id) {
                continue;
            }
            ensure_wired(
                dfg,
                sender,
                *src_id,
                src_placement.runtime_id,
                msu_id,
                ty.id,
            )?;
        }
    }

    debug!(msu_id, type_id = ty.id, "msu wired");
    Ok(())
}
