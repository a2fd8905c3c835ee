//! flowmesh-cluster — the controller's face toward runtime processes.
//!
//! Runtimes dial the controller, introduce themselves with a hello
//! frame, and then stream telemetry batches up the same connection.
//! The controller pushes control messages down over the socket it
//! accepted: [`client::TcpRuntimeSender`] keeps one write handle per
//! connected runtime and performs blocking, length-prefixed JSON
//! writes. Each accepted connection is read on a blocking task so
//! control sends never contend with the async accept loop.

pub mod client;
pub mod server;

pub use client::TcpRuntimeSender;
pub use server::ClusterServer;
