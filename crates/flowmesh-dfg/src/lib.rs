//! flowmesh-dfg — the controller's dataflow graph.
//!
//! The DFG is the authoritative model of the running application: which
//! MSU types exist, where each MSU instance lives (runtime + worker
//! thread), and how messages are routed between instances. Every other
//! FlowMesh crate mutates the graph through this one.
//!
//! # Architecture
//!
//! ```text
//! SharedDfg (single coarse mutex)
//!   └── Dfg
//!       ├── MsuType   (template: dependencies, meta-routing, cloneable)
//!       ├── Msu       (instance: placement + outgoing routes)
//!       └── RuntimeNode
//!           ├── WorkerThread (pinned/unpinned scheduling slot)
//!           └── Route        (per-destination-type endpoint table)
//! ```
//!
//! Mutation is coarse-grained: callers acquire the DFG lock for the
//! duration of a top-level operation rather than locking per entity.

pub mod error;
pub mod shared;
pub mod snapshot;
pub mod store;
pub mod types;

pub use error::{DfgError, DfgResult};
pub use shared::SharedDfg;
pub use types::*;
