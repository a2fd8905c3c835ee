//! Route and endpoint CRUD.
//!
//! Every operation mutates the controller's graph first and then
//! notifies the runtime that owns the route. Notifications are
//! fire-and-forget; the delivery receipt is logged, never awaited. A
//! failed send leaves the graph mutation in place and surfaces the
//! failure to the caller.

use flowmesh_dfg::error::{DfgError, DfgResult};
use flowmesh_dfg::types::*;
use flowmesh_proto::{ControlMessage, RuntimeSender, send_logged};
use tracing::{debug, info};

/// Control messages not addressed to a specific worker thread go to the
/// runtime's main thread.
pub const MAIN_THREAD: ThreadId = 0;

pub(crate) fn notify(
    sender: &dyn RuntimeSender,
    runtime_id: RuntimeId,
    thread_id: ThreadId,
    message: ControlMessage,
) -> DfgResult<()> {
    send_logged(sender, runtime_id, thread_id, message)?;
    Ok(())
}

/// Create an empty route for a destination type on a runtime and notify
/// the runtime. Returns the allocated route id.
pub fn create_route(
    dfg: &mut Dfg,
    sender: &dyn RuntimeSender,
    runtime_id: RuntimeId,
    type_id: MsuTypeId,
) -> DfgResult<RouteId> {
    dfg.msu_type(type_id)?;
    let route_id = dfg.generate_route_id()?;

    let rt = dfg.runtime_mut(runtime_id)?;
    rt.routes.insert(
        route_id,
        Route {
            id: route_id,
            msu_type_id: type_id,
            runtime_id,
            endpoints: Vec::new(),
        },
    );
    info!(route_id, runtime_id, type_id, "route created");

    notify(
        sender,
        runtime_id,
        MAIN_THREAD,
        ControlMessage::CreateRoute { route_id, type_id },
    )?;
    Ok(route_id)
}

/// Delete a route. Refused while any MSU still lists it as an outgoing
/// route.
pub fn delete_route(dfg: &mut Dfg, sender: &dyn RuntimeSender, route_id: RouteId) -> DfgResult<()> {
    let route = dfg.route(route_id)?.clone();

    if let Some(msu) = dfg.msus.values().find(|m| m.has_route(route_id)) {
        return Err(DfgError::InvalidState(format!(
            "route {route_id} is still attached to msu {}",
            msu.id
        )));
    }

    let rt = dfg.runtime_mut(route.runtime_id)?;
    rt.routes.remove(&route_id);
    info!(route_id, runtime_id = route.runtime_id, "route deleted");

    notify(
        sender,
        route.runtime_id,
        MAIN_THREAD,
        ControlMessage::DeleteRoute {
            route_id,
            type_id: route.msu_type_id,
        },
    )
}

/// Add a destination endpoint to a route, keeping keys strictly
/// ascending. `key = None` assigns the next free key past the current
/// maximum.
pub fn add_endpoint(
    dfg: &mut Dfg,
    sender: &dyn RuntimeSender,
    route_id: RouteId,
    msu_id: MsuId,
    key: Option<u32>,
) -> DfgResult<u32> {
    let msu = dfg.msu(msu_id)?;
    let msu_type_id = msu.type_id;
    let Some(placement) = msu.scheduling.placement else {
        return Err(DfgError::InvalidState(format!(
            "msu {msu_id} is not placed, cannot be a route endpoint"
        )));
    };

    let route = dfg.route(route_id)?;
    if route.msu_type_id != msu_type_id {
        return Err(DfgError::InvalidState(format!(
            "route {route_id} serves type {}, msu {msu_id} has type {msu_type_id}",
            route.msu_type_id
        )));
    }
    if route.endpoint(msu_id).is_some() {
        return Err(DfgError::AlreadyExists("endpoint", msu_id));
    }
    let key = key.unwrap_or_else(|| Dfg::generate_endpoint_key(route));
    if route.endpoints.iter().any(|ep| ep.key == key) {
        return Err(DfgError::InvalidState(format!(
            "route {route_id} already has an endpoint with key {key}"
        )));
    }
    let route_runtime = route.runtime_id;
    let route_type = route.msu_type_id;

    let route = dfg.route_mut(route_id)?;
    let pos = route.endpoints.partition_point(|ep| ep.key < key);
    route.endpoints.insert(pos, Endpoint { msu_id, key });
    debug!(route_id, msu_id, key, "endpoint added");

    notify(
        sender,
        route_runtime,
        MAIN_THREAD,
        ControlMessage::AddEndpoint {
            route_id,
            type_id: route_type,
            msu_id,
            key,
            msu_runtime_id: placement.runtime_id,
        },
    )?;
    Ok(key)
}

/// Remove the endpoint referencing an MSU from a route.
pub fn del_endpoint(
    dfg: &mut Dfg,
    sender: &dyn RuntimeSender,
    route_id: RouteId,
    msu_id: MsuId,
) -> DfgResult<()> {
    let route = dfg.route_mut(route_id)?;
    if route.endpoint(msu_id).is_none() {
        return Err(DfgError::NotFound("endpoint", msu_id));
    }
    route.endpoints.retain(|ep| ep.msu_id != msu_id);
    let route_runtime = route.runtime_id;
    let route_type = route.msu_type_id;
    debug!(route_id, msu_id, "endpoint removed");

    notify(
        sender,
        route_runtime,
        MAIN_THREAD,
        ControlMessage::DelEndpoint {
            route_id,
            type_id: route_type,
            msu_id,
        },
    )
}

/// Change the key of an existing endpoint in place, with a single
/// notification to the runtime.
pub fn mod_endpoint(
    dfg: &mut Dfg,
    sender: &dyn RuntimeSender,
    route_id: RouteId,
    msu_id: MsuId,
    key: u32,
) -> DfgResult<()> {
    let route = dfg.route_mut(route_id)?;
    if route
        .endpoints
        .iter()
        .any(|ep| ep.msu_id != msu_id && ep.key == key)
    {
        return Err(DfgError::InvalidState(format!(
            "route {route_id} already has an endpoint with key {key}"
        )));
    }
    let Some(ep) = route.endpoints.iter_mut().find(|ep| ep.msu_id == msu_id) else {
        return Err(DfgError::NotFound("endpoint", msu_id));
    };
    ep.key = key;
    route.endpoints.sort_by_key(|ep| ep.key);
    let route_runtime = route.runtime_id;
    let route_type = route.msu_type_id;
    debug!(route_id, msu_id, key, "endpoint key changed");

    notify(
        sender,
        route_runtime,
        MAIN_THREAD,
        ControlMessage::ModEndpoint {
            route_id,
            type_id: route_type,
            msu_id,
            key,
        },
    )
}

/// Attach a route to an MSU's outgoing route set. The route must live
/// on the MSU's runtime, and an MSU carries at most one route per
/// destination type.
pub fn attach_route(
    dfg: &mut Dfg,
    sender: &dyn RuntimeSender,
    msu_id: MsuId,
    route_id: RouteId,
) -> DfgResult<()> {
    let route = dfg.route(route_id)?.clone();
    let msu = dfg.msu(msu_id)?;
    let Some(placement) = msu.scheduling.placement else {
        return Err(DfgError::InvalidState(format!(
            "msu {msu_id} is not placed, cannot attach a route"
        )));
    };
    if placement.runtime_id != route.runtime_id {
        return Err(DfgError::InvalidState(format!(
            "route {route_id} lives on runtime {}, msu {msu_id} on runtime {}",
            route.runtime_id, placement.runtime_id
        )));
    }
    if msu.has_route(route_id) {
        return Err(DfgError::AlreadyExists("route", route_id));
    }
    for existing in &msu.scheduling.routes {
        if dfg
            .route(*existing)
            .is_ok_and(|r| r.msu_type_id == route.msu_type_id)
        {
            return Err(DfgError::AlreadyExists("route to type", route.msu_type_id));
        }
    }

    dfg.msu_mut(msu_id)?.scheduling.routes.push(route_id);
    debug!(msu_id, route_id, "route attached");

    notify(
        sender,
        placement.runtime_id,
        placement.thread_id,
        ControlMessage::AttachRoute { msu_id, route_id },
    )
}
