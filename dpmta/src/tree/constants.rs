//! Constants of the cell hierarchy.

/// Deepest supported level. Owner tables hold `8^level` entries per level so this bounds their size.
pub const DEEPEST_LEVEL: u32 = 7;

/// Number of children of a cell.
pub const NCHILDREN: usize = 8;

/// Largest number of processes a cell table can distribute cells over.
pub const MAX_RANKS: usize = u32::MAX as usize;
