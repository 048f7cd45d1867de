//! Utility types for trait definitions.
use std::time::Duration;

use thiserror::Error;

/// Type to handle FMM related errors
#[derive(Debug, Clone, Error)]
pub enum FmmError {
    /// Invalid configuration, detected before any computation starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A particle could not be placed in the simulation volume, aborts the timestep.
    #[error("geometry error at particle {index}: {reason}")]
    Geometry {
        /// Index of the offending particle in the input slice.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Processes disagree about the cell table or the message sequence, results can not be trusted.
    #[error("synchronization error: {0}")]
    Synchronization(String),

    /// Transport failure in the communication layer.
    #[error("communication error: {0}")]
    Communication(String),

    /// Failure to run some business logic
    #[error("failed: {0}")]
    Failed(String),
}

/// The seven coordinator phases, executed in this order once per timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Master scatters particles to the owners of their leaf cells.
    Distribute,
    /// Workers index particles and allocate expansions.
    Build,
    /// Multipole creation and aggregation towards the root.
    Upward,
    /// Multipole expansions sent to the owners of cells whose interaction lists need them.
    Exchange,
    /// Multipole to local transfers and local expansion distribution towards the leaves.
    Downward,
    /// Exact near field summation.
    Direct,
    /// Local expansion evaluation and result collection at the master.
    Gather,
}

/// Wall clock time the coordinator spent in a phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTime {
    /// Phase measured.
    pub phase: Phase,

    /// Time elapsed between the phase's start and its trailing barrier.
    pub time: Duration,
}
