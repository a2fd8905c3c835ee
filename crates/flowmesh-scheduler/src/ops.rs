//! Operator-level graph operations.
//!
//! These back the daemon's command loop: explicit MSU and thread
//! management where the operator names the exact placement, as opposed
//! to the cloning paths that pick one.

use flowmesh_dfg::error::{DfgError, DfgResult};
use flowmesh_dfg::types::*;
use flowmesh_proto::{ControlMessage, RuntimeSender, send_logged};
use flowmesh_routing::manager::MAIN_THREAD;
use flowmesh_routing::wire_msu;
use flowmesh_stats::StatRegistry;
use tracing::info;

use crate::cloner::tear_down_msu;

/// Create an MSU on an explicit runtime and thread, then wire it to
/// the live instances of its related types.
#[allow(clippy::too_many_arguments)]
pub fn add_msu(
    dfg: &mut Dfg,
    stats: &mut StatRegistry,
    sender: &dyn RuntimeSender,
    msu_id: MsuId,
    type_id: MsuTypeId,
    init_data: &str,
    vertex: VertexKind,
    blocking: BlockingMode,
    runtime_id: RuntimeId,
    thread_id: ThreadId,
) -> DfgResult<()> {
    if dfg.msu(msu_id).is_ok() {
        return Err(DfgError::AlreadyExists("msu", msu_id));
    }
    dfg.msu_type(type_id)?;
    let rt = dfg.runtime(runtime_id)?;
    let Some(thread) = rt.thread(thread_id) else {
        return Err(DfgError::NotFound("thread", thread_id));
    };
    if thread.mode != blocking.required_thread_mode() {
        return Err(DfgError::InvalidState(format!(
            "thread {thread_id} is {:?}, msu {msu_id} requires {:?}",
            thread.mode,
            blocking.required_thread_mode()
        )));
    }

    let mut msu = Msu::new(msu_id, type_id, vertex, blocking, init_data);
    msu.scheduling.placement = Some(Placement {
        runtime_id,
        thread_id,
    });
    dfg.insert_msu(msu)?;
    if let Some(thread) = dfg.runtime_mut(runtime_id)?.thread_mut(thread_id) {
        thread.msus.push(msu_id);
    }
    stats.register_item(msu_id);
    info!(msu_id, type_id, runtime_id, thread_id, "msu added");

    send_logged(
        sender,
        runtime_id,
        thread_id,
        ControlMessage::CreateMsu {
            msu_id,
            type_id,
            init_data: init_data.to_string(),
        },
    )?;
    wire_msu(dfg, sender, msu_id)
}

/// Remove an MSU regardless of instance count (operator override of
/// the unclone guard).
pub fn remove_msu(
    dfg: &mut Dfg,
    stats: &mut StatRegistry,
    sender: &dyn RuntimeSender,
    msu_id: MsuId,
) -> DfgResult<()> {
    tear_down_msu(dfg, stats, sender, msu_id)?;
    info!(msu_id, "msu removed");
    Ok(())
}

/// Create a worker thread on a runtime and tell the runtime to spawn
/// it.
pub fn create_worker_thread(
    dfg: &mut Dfg,
    sender: &dyn RuntimeSender,
    runtime_id: RuntimeId,
    thread_id: ThreadId,
    mode: ThreadMode,
) -> DfgResult<()> {
    dfg.create_thread(runtime_id, thread_id, mode)?;
    send_logged(
        sender,
        runtime_id,
        MAIN_THREAD,
        ControlMessage::CreateThread { thread_id, mode },
    )?;
    info!(runtime_id, thread_id, ?mode, "worker thread created");
    Ok(())
}
