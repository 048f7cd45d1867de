//! Crate wide constants

/// Largest supported expansion order. Translation operators use irregular harmonics up to three times this degree.
pub const MAX_EXPANSION_ORDER: usize = 24;

/// Default expansion order.
pub const DEFAULT_EXPANSION_ORDER: usize = 8;

/// Default number of tree levels, counting the root.
pub const DEFAULT_LEVELS: u32 = 3;

/// Default number of cells separating a cell from its far field.
pub const DEFAULT_WELL_SEPARATION: u32 = 1;

/// Default multipole acceptance ratio for converting a group of eight siblings into their parent.
pub const DEFAULT_MAC_THETA: f64 = 0.5;

/// Default number of supercell levels in the periodic lattice sum.
pub const DEFAULT_MACROSCOPIC_LEVELS: usize = 8;

/// Default number of target cells sharing a batch of spectral accumulators in the FFT M2L.
pub const DEFAULT_FFT_BLOCKING_FACTOR: usize = 8;

/// Consecutive rebuilds of the cell table after which resizing is reported as thrashing.
pub const RESIZE_WARNING_STREAK: usize = 3;

/// Relative padding added to each side of a volume fitted to particles.
pub const DOMAIN_PADDING: f64 = 0.005;

/// Rank of the coordinating process.
pub const MASTER_RANK: usize = 0;

/// Net charge of a periodic unit cell below which it is treated as neutral.
pub const NET_CHARGE_TOLERANCE: f64 = 1e-10;
