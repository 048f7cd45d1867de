//! Implementations of field translation traits over the kernel passes of a worker.
pub mod source;
pub mod source_to_target;
pub mod target;
