//! Distributed multipole tree: expansion kernels, the coordinator and its workers.
pub mod builder;
pub mod constants;
pub mod coordinator;
pub mod direct;
pub mod expansions;
pub mod fft;
pub mod field_translation;
pub mod harmonic;
pub mod helpers;
pub mod lennard_jones;
pub mod macroscopic;
pub mod transfer;
pub mod types;
pub mod worker;

pub use types::Settings;
