//! flowmesh-scheduler — the cloning controller and operator-level
//! graph operations.
//!
//! Cloning places a new instance of a type (plus any missing LOCAL
//! dependencies) somewhere in the fleet and wires everything created
//! in the pass in topological order, consumers before producers, so a
//! producer never routes into an endpoint that does not exist yet.
//! Uncloning removes an instance together with dependency instances
//! that only existed to serve it.

pub mod cloner;
pub mod ops;
pub mod topo;

pub use cloner::{clone_msu, unclone_msu};
pub use ops::{add_msu, create_worker_thread, remove_msu};
pub use topo::wiring_order;
