//! Control messages pushed from the controller to runtimes.

use std::net::IpAddr;

use flowmesh_dfg::types::{MsuId, MsuTypeId, RouteId, RuntimeId, ThreadId, ThreadMode};
use serde::{Deserialize, Serialize};

/// Direction/role of a message on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Controller asks the runtime to act and report back.
    Request,
    /// Runtime's reply to a request.
    Response,
    /// One-way instruction; no reply expected.
    Action,
}

/// An action delivered to one runtime.
///
/// Each variant corresponds to a mutation the controller has already
/// applied to its own graph; the runtime is told after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Instantiate an MSU on the named worker thread.
    CreateMsu {
        msu_id: MsuId,
        type_id: MsuTypeId,
        init_data: String,
    },
    /// Tear down an MSU instance.
    DeleteMsu { msu_id: MsuId, type_id: MsuTypeId },
    /// Create an empty route serving a destination type.
    CreateRoute { route_id: RouteId, type_id: MsuTypeId },
    /// Delete a route. Must already be detached from all sources.
    DeleteRoute { route_id: RouteId, type_id: MsuTypeId },
    /// Add a destination endpoint to a route.
    AddEndpoint {
        route_id: RouteId,
        type_id: MsuTypeId,
        msu_id: MsuId,
        key: u32,
        /// Runtime hosting the destination MSU; lets the receiving
        /// runtime decide between a local and a remote delivery path.
        msu_runtime_id: RuntimeId,
    },
    /// Remove a destination endpoint from a route.
    DelEndpoint {
        route_id: RouteId,
        type_id: MsuTypeId,
        msu_id: MsuId,
    },
    /// Change the key of an existing endpoint in place.
    ModEndpoint {
        route_id: RouteId,
        type_id: MsuTypeId,
        msu_id: MsuId,
        key: u32,
    },
    /// Attach a route to a source MSU's outgoing route set.
    AttachRoute { msu_id: MsuId, route_id: RouteId },
    /// Spawn a worker thread on the runtime.
    CreateThread { thread_id: ThreadId, mode: ThreadMode },
    /// Announce a peer runtime so the receiver can open a direct
    /// data-plane connection to it.
    ConnectToRuntime {
        runtime_id: RuntimeId,
        ip: IpAddr,
        port: u16,
    },
}

impl ControlMessage {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ControlMessage::CreateMsu { .. } => "create_msu",
            ControlMessage::DeleteMsu { .. } => "delete_msu",
            ControlMessage::CreateRoute { .. } => "create_route",
            ControlMessage::DeleteRoute { .. } => "delete_route",
            ControlMessage::AddEndpoint { .. } => "add_endpoint",
            ControlMessage::DelEndpoint { .. } => "del_endpoint",
            ControlMessage::ModEndpoint { .. } => "mod_endpoint",
            ControlMessage::AttachRoute { .. } => "attach_route",
            ControlMessage::CreateThread { .. } => "create_thread",
            ControlMessage::ConnectToRuntime { .. } => "connect_to_runtime",
        }
    }
}

/// The framed unit on the control channel: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    /// Monotonic per-connection sequence number, assigned by the sender.
    pub seq: u64,
    pub kind: MessageKind,
    /// Worker thread the message is addressed to; 0 is the runtime's
    /// main thread.
    pub thread_id: ThreadId,
    pub message: ControlMessage,
}
