//! Domain types for the dataflow graph.
//!
//! All types are serializable so the whole graph can be snapshotted to
//! JSON (and the initial graph loaded from a snapshot file at startup).

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Globally unique identifier of an MSU instance.
pub type MsuId = u32;

/// Identifier of an MSU type (template).
pub type MsuTypeId = u32;

/// Identifier of a runtime process.
pub type RuntimeId = u32;

/// Identifier of a route, unique within its owning runtime.
pub type RouteId = u32;

/// Identifier of a worker thread within a runtime.
pub type ThreadId = u32;

// ── MSU types ──────────────────────────────────────────────────────

/// Whether a dependency must be co-resident with its dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    /// Must live on the same runtime as the dependent MSU.
    Local,
    /// Must live on a different runtime.
    Remote,
}

/// A declared dependency of one MSU type on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub type_id: MsuTypeId,
    pub locality: Locality,
}

/// Declared producer/consumer relationships of an MSU type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRouting {
    /// Types whose instances send messages to this type.
    #[serde(default)]
    pub src_types: Vec<MsuTypeId>,
    /// Types this type sends messages to.
    #[serde(default)]
    pub dst_types: Vec<MsuTypeId>,
}

/// An MSU type: the template all instances of the type are built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsuType {
    pub id: MsuTypeId,
    pub name: String,
    #[serde(default)]
    pub meta_routing: MetaRouting,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Whether the autoscaler / cloning controller may add instances.
    #[serde(default)]
    pub cloneable: bool,
    /// Types sharing a non-zero group may share one worker thread.
    /// Group 0 means instances require an otherwise-empty thread.
    #[serde(default)]
    pub colocation_group: u32,
    /// Opt out of queue-length-driven key-range rebalancing for routes
    /// that carry this type.
    #[serde(default)]
    pub fixed_key_ranges: bool,
    /// Live instances of this type. Mirrors the MSU map exactly.
    #[serde(default)]
    pub instances: Vec<MsuId>,
}

// ── MSU instances ──────────────────────────────────────────────────

/// Entry/exit role of an MSU in the dataflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexKind {
    /// Messages enter the dataflow at this MSU.
    #[serde(default)]
    pub entry: bool,
    /// Messages leave the dataflow at this MSU.
    #[serde(default)]
    pub exit: bool,
}

impl VertexKind {
    /// Parse from a label such as "entry", "exit", "entry/exit", "nop".
    pub fn from_label(label: &str) -> Self {
        Self {
            entry: label.contains("entry"),
            exit: label.contains("exit"),
        }
    }
}

/// Whether an MSU may block its worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMode {
    Blocking,
    NonBlocking,
}

impl BlockingMode {
    /// The worker-thread mode an MSU of this blocking mode requires.
    pub fn required_thread_mode(self) -> ThreadMode {
        match self {
            BlockingMode::Blocking => ThreadMode::Pinned,
            BlockingMode::NonBlocking => ThreadMode::Unpinned,
        }
    }

    /// Parse from a label such as "blocking" or "non-blocking".
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "blocking" => Some(BlockingMode::Blocking),
            "nonblocking" | "non-blocking" => Some(BlockingMode::NonBlocking),
            _ => None,
        }
    }
}

/// Physical placement of an MSU. Runtime and thread are always assigned
/// together; an unplaced MSU carries no placement at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub runtime_id: RuntimeId,
    pub thread_id: ThreadId,
}

/// Scheduling state of an MSU: where it runs and which routes messages
/// leaving it may be sent on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduling {
    #[serde(default)]
    pub placement: Option<Placement>,
    #[serde(default)]
    pub routes: Vec<RouteId>,
}

/// A placed, addressable unit of application logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Msu {
    pub id: MsuId,
    pub type_id: MsuTypeId,
    #[serde(default)]
    pub vertex: VertexKind,
    pub blocking: BlockingMode,
    /// Opaque initialization blob forwarded to the runtime on create.
    #[serde(default)]
    pub init_data: String,
    #[serde(default)]
    pub scheduling: Scheduling,
}

impl Msu {
    /// Build an unplaced instance of a type from explicit properties.
    pub fn new(id: MsuId, type_id: MsuTypeId, vertex: VertexKind, blocking: BlockingMode, init_data: impl Into<String>) -> Self {
        Self {
            id,
            type_id,
            vertex,
            blocking,
            init_data: init_data.into(),
            scheduling: Scheduling::default(),
        }
    }

    /// A fresh clone of this MSU: same template properties, new id,
    /// no placement, empty route list.
    pub fn clone_with_id(&self, id: MsuId) -> Self {
        Self {
            id,
            type_id: self.type_id,
            vertex: self.vertex,
            blocking: self.blocking,
            init_data: self.init_data.clone(),
            scheduling: Scheduling::default(),
        }
    }

    pub fn is_placed(&self) -> bool {
        self.scheduling.placement.is_some()
    }

    pub fn has_route(&self, route_id: RouteId) -> bool {
        self.scheduling.routes.contains(&route_id)
    }
}

// ── Runtimes, threads, routes ──────────────────────────────────────

/// Scheduling mode of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMode {
    /// Pinned to a core; may host blocking MSUs.
    Pinned,
    /// Unpinned; hosts non-blocking MSUs only.
    Unpinned,
}

impl ThreadMode {
    /// Parse from a label such as "pinned" or "unpinned".
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "pinned" => Some(ThreadMode::Pinned),
            "unpinned" => Some(ThreadMode::Unpinned),
            _ => None,
        }
    }
}

/// A scheduling slot within a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerThread {
    pub id: ThreadId,
    pub mode: ThreadMode,
    /// MSUs currently assigned to this thread.
    #[serde(default)]
    pub msus: Vec<MsuId>,
}

/// An `(msu, key)` entry in a route. `key` is the inclusive upper bound
/// of the routing-key range directed to that MSU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub msu_id: MsuId,
    pub key: u32,
}

/// A per-runtime fan-out table directing messages to instances of one
/// destination type. Endpoints are kept sorted by strictly ascending key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub msu_type_id: MsuTypeId,
    pub runtime_id: RuntimeId,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl Route {
    /// Find the endpoint referencing an MSU, if present.
    pub fn endpoint(&self, msu_id: MsuId) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.msu_id == msu_id)
    }
}

/// A remote worker process hosting MSU instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeNode {
    pub id: RuntimeId,
    pub ip: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub n_cores: u32,
    /// Worker threads in declaration order (thread selection is
    /// first-fit over this order).
    #[serde(default)]
    pub threads: Vec<WorkerThread>,
    /// Routes whose source MSUs live on this runtime, keyed by id.
    #[serde(default)]
    pub routes: BTreeMap<RouteId, Route>,
}

impl RuntimeNode {
    pub fn new(id: RuntimeId, ip: IpAddr, port: u16, n_cores: u32) -> Self {
        Self {
            id,
            ip,
            port,
            n_cores,
            threads: Vec::new(),
            routes: BTreeMap::new(),
        }
    }

    pub fn thread(&self, id: ThreadId) -> Option<&WorkerThread> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> Option<&mut WorkerThread> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    /// The route on this runtime carrying the given destination type.
    pub fn route_by_type(&self, type_id: MsuTypeId) -> Option<&Route> {
        self.routes.values().find(|r| r.msu_type_id == type_id)
    }
}

// ── The graph ──────────────────────────────────────────────────────

/// The whole dataflow graph: the controller's model of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dfg {
    pub application_name: String,
    pub controller_ip: IpAddr,
    pub controller_port: u16,
    #[serde(default)]
    pub msu_types: BTreeMap<MsuTypeId, MsuType>,
    #[serde(default)]
    pub msus: BTreeMap<MsuId, Msu>,
    #[serde(default)]
    pub runtimes: BTreeMap<RuntimeId, RuntimeNode>,
}

impl Dfg {
    pub fn new(application_name: impl Into<String>, controller_port: u16) -> Self {
        Self {
            application_name: application_name.into(),
            controller_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            controller_port,
            msu_types: BTreeMap::new(),
            msus: BTreeMap::new(),
            runtimes: BTreeMap::new(),
        }
    }
}
