//! flowmesh-proto — messages exchanged between the controller and
//! runtime processes.
//!
//! The byte-level wire encoding is not owned by the control plane;
//! frames here are typed structs carried as length-prefixed JSON. What
//! this crate pins down is the *contract*:
//!
//! - [`ControlMessage`]: actions the controller pushes down to runtimes
//!   (create/delete MSU, route and endpoint operations, thread creation,
//!   peer announcements).
//! - [`RuntimeFrame`]: what runtimes send up (registration hello,
//!   telemetry batches).
//! - [`RuntimeSender`]: the send contract the core scheduling logic
//!   depends on, with a typed delivery acknowledgment that is logged
//!   but never awaited.

pub mod frame;
pub mod messages;
pub mod sender;
pub mod telemetry;

pub use messages::{ControlEnvelope, ControlMessage, MessageKind};
pub use sender::{AckStatus, CommError, Delivery, RecordingSender, RuntimeSender, send_logged};
pub use telemetry::{RuntimeFrame, RuntimeHello, StatKind, StatSample, TelemetryBatch, TimedValue};
