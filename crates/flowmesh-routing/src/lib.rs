//! flowmesh-routing — route and endpoint management.
//!
//! A route lives on one runtime and fans messages out to the instances
//! of one destination type. Endpoints partition the routing-key space:
//! each endpoint's key is the inclusive upper bound of its range, and
//! keys are kept strictly ascending.
//!
//! Three layers build on each other:
//!
//! - [`manager`]: route/endpoint CRUD, each mutation followed by one
//!   notification to the owning runtime.
//! - [`wiring`]: connecting a newly placed MSU to the live instances of
//!   its declared upstream and downstream types.
//! - [`rebalance`]: inverse-load-weighted re-partitioning of endpoint
//!   key ranges from queue-length telemetry.

pub mod manager;
pub mod rebalance;
pub mod wiring;

pub use manager::{
    add_endpoint, attach_route, create_route, del_endpoint, delete_route, mod_endpoint,
};
pub use rebalance::{fix_all_route_ranges, fix_route_ranges};
pub use wiring::wire_msu;
