//! Thread selection and MSU placement.

use std::collections::BTreeSet;

use flowmesh_dfg::error::{DfgError, DfgResult};
use flowmesh_dfg::types::*;
use flowmesh_proto::{ControlMessage, RuntimeSender, send_logged};
use flowmesh_stats::StatRegistry;
use tracing::{debug, info};

/// Whether a thread can take one more instance of `ty`.
///
/// A thread qualifies when it is empty, or when every MSU it hosts
/// belongs to the same non-zero colocation group as `ty` and none of
/// them is an instance of `ty` itself.
fn thread_fits(dfg: &Dfg, thread: &WorkerThread, ty: &MsuType, mode: ThreadMode) -> bool {
    if thread.mode != mode {
        return false;
    }
    if thread.msus.is_empty() {
        return true;
    }
    if ty.colocation_group == 0 {
        return false;
    }
    thread.msus.iter().all(|id| {
        let Ok(hosted) = dfg.msu(*id) else {
            return false;
        };
        if hosted.type_id == ty.id {
            return false;
        }
        dfg.msu_type(hosted.type_id)
            .is_ok_and(|t| t.colocation_group == ty.colocation_group)
    })
}

/// First thread on a runtime that can host an instance of a type in
/// the given mode.
pub fn find_unused_thread(
    dfg: &Dfg,
    runtime_id: RuntimeId,
    type_id: MsuTypeId,
    mode: ThreadMode,
) -> Option<ThreadId> {
    find_unused_thread_except(dfg, runtime_id, type_id, mode, &BTreeSet::new())
}

/// As [`find_unused_thread`], excluding threads already claimed earlier
/// in the same placement or dry-run pass.
pub fn find_unused_thread_except(
    dfg: &Dfg,
    runtime_id: RuntimeId,
    type_id: MsuTypeId,
    mode: ThreadMode,
    except: &BTreeSet<ThreadId>,
) -> Option<ThreadId> {
    let rt = dfg.runtimes.get(&runtime_id)?;
    let ty = dfg.msu_types.get(&type_id)?;
    rt.threads
        .iter()
        .find(|t| !except.contains(&t.id) && thread_fits(dfg, t, ty, mode))
        .map(|t| t.id)
}

/// Place one MSU on a runtime.
///
/// On success the MSU's placement record and the thread's MSU list are
/// both updated, the MSU is registered for statistics, and the runtime
/// is told to create it. The create message is fire-and-forget.
pub fn place_on_runtime(
    dfg: &mut Dfg,
    stats: &mut StatRegistry,
    sender: &dyn RuntimeSender,
    runtime_id: RuntimeId,
    msu_id: MsuId,
    claimed: &mut BTreeSet<ThreadId>,
) -> DfgResult<()> {
    dfg.runtime(runtime_id)?;
    let msu = dfg.msu(msu_id)?;
    let type_id = msu.type_id;
    let init_data = msu.init_data.clone();
    let mode = msu.blocking.required_thread_mode();

    let thread_id = find_unused_thread_except(dfg, runtime_id, type_id, mode, claimed)
        .ok_or(DfgError::NoCapacity(runtime_id))?;

    dfg.msu_mut(msu_id)?.scheduling.placement = Some(Placement {
        runtime_id,
        thread_id,
    });
    let rt = dfg.runtime_mut(runtime_id)?;
    if let Some(thread) = rt.thread_mut(thread_id) {
        thread.msus.push(msu_id);
    }
    claimed.insert(thread_id);
    stats.register_item(msu_id);
    info!(msu_id, type_id, runtime_id, thread_id, "msu placed");

    send_logged(
        sender,
        runtime_id,
        thread_id,
        ControlMessage::CreateMsu {
            msu_id,
            type_id,
            init_data,
        },
    )?;
    Ok(())
}

fn schedule_inner(
    dfg: &mut Dfg,
    stats: &mut StatRegistry,
    sender: &dyn RuntimeSender,
    msu_id: MsuId,
    runtime_id: RuntimeId,
    placed: &mut Vec<MsuId>,
    claimed: &mut BTreeSet<ThreadId>,
) -> DfgResult<()> {
    place_on_runtime(dfg, stats, sender, runtime_id, msu_id, claimed)?;
    placed.push(msu_id);

    let type_id = dfg.msu(msu_id)?.type_id;
    let deps = dfg.msu_type(type_id)?.dependencies.clone();
    for dep in deps {
        if dep.locality != Locality::Local {
            continue;
        }
        if dfg
            .instance_of_type_on_runtime(runtime_id, dep.type_id)
            .is_some()
        {
            continue;
        }
        // No local instance of the dependency; spawn one from the
        // type's first live instance as template.
        let template_id =
            dfg.msu_type(dep.type_id)?
                .instances
                .first()
                .copied()
                .ok_or_else(|| {
                    DfgError::InvalidState(format!(
                        "dependency type {} has no instance to clone from",
                        dep.type_id
                    ))
                })?;
        let dep_id = dfg.generate_msu_id();
        let dep_msu = dfg.msu(template_id)?.clone_with_id(dep_id);
        dfg.insert_msu(dep_msu)?;
        debug!(
            msu_id = dep_id,
            template = template_id,
            type_id = dep.type_id,
            runtime_id,
            "local dependency spawned"
        );
        schedule_inner(dfg, stats, sender, dep_id, runtime_id, placed, claimed)?;
    }
    Ok(())
}

/// Place an MSU and close over its LOCAL dependencies on one runtime.
///
/// Returns every MSU placed in the pass: the target first, then any
/// dependency instances spawned for it. Failure partway leaves earlier
/// placements in effect; the caller sees the error and the partial
/// list is discarded.
pub fn schedule_msu(
    dfg: &mut Dfg,
    stats: &mut StatRegistry,
    sender: &dyn RuntimeSender,
    msu_id: MsuId,
    runtime_id: RuntimeId,
) -> DfgResult<Vec<MsuId>> {
    let mut placed = Vec::new();
    let mut claimed = BTreeSet::new();
    schedule_inner(dfg, stats, sender, msu_id, runtime_id, &mut placed, &mut claimed)?;
    Ok(placed)
}

fn type_fits_on_runtime(
    dfg: &Dfg,
    runtime_id: RuntimeId,
    type_id: MsuTypeId,
    claimed: &mut BTreeSet<ThreadId>,
    checked: &mut BTreeSet<MsuTypeId>,
) -> bool {
    if !checked.insert(type_id) {
        return true;
    }
    let Ok(ty) = dfg.msu_type(type_id) else {
        return false;
    };
    let Some(template_id) = ty.instances.first() else {
        return false;
    };
    let Ok(template) = dfg.msu(*template_id) else {
        return false;
    };

    let mode = template.blocking.required_thread_mode();
    let Some(thread_id) = find_unused_thread_except(dfg, runtime_id, type_id, mode, claimed) else {
        return false;
    };
    claimed.insert(thread_id);

    for dep in &ty.dependencies {
        if dep.locality != Locality::Local {
            continue;
        }
        if dfg
            .instance_of_type_on_runtime(runtime_id, dep.type_id)
            .is_some()
        {
            continue;
        }
        if !type_fits_on_runtime(dfg, runtime_id, dep.type_id, claimed, checked) {
            return false;
        }
    }
    true
}

/// Dry-run feasibility check: could one more instance of the type,
/// plus any missing LOCAL dependencies, fit on some runtime?
///
/// Nothing is mutated; tentatively claimed threads are tracked so two
/// dependencies cannot double-book one thread.
pub fn could_clone_type(dfg: &Dfg, type_id: MsuTypeId) -> bool {
    dfg.runtimes.keys().any(|rt_id| {
        let mut claimed = BTreeSet::new();
        let mut checked = BTreeSet::new();
        type_fits_on_runtime(dfg, *rt_id, type_id, &mut claimed, &mut checked)
    })
}
