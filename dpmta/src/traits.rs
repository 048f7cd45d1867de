//! Trait definitions
pub mod comm;
pub mod fmm;
pub mod kernel;
pub mod tree;
pub mod types;
