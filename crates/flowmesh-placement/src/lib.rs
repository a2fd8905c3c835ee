//! flowmesh-placement — deciding where MSU instances run.
//!
//! Placement is constrained bin-packing over a runtime's worker
//! threads: blocking MSUs need pinned threads, a thread is shared only
//! within a non-zero colocation group, and no thread hosts two
//! instances of the same type. On top of single-MSU placement sits the
//! local dependency closure (placing an MSU drags its LOCAL
//! dependencies onto the same runtime) and a non-mutating dry run the
//! autoscaler uses before committing to a clone.

pub mod placer;

pub use placer::{
    could_clone_type, find_unused_thread, find_unused_thread_except, place_on_runtime,
    schedule_msu,
};
