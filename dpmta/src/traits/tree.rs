//! Traits for the cell hierarchy.
use std::fmt::Debug;

/// Strategy assigning cells to the processes of a group. Consumed by the cell table when it is built, and through the
/// table by every routing decision of the communication layer.
pub trait OwnershipPolicy: Send + Sync + Debug {
    /// Rank that owns a cell.
    ///
    /// # Arguments
    /// * `level` - Level of the cell, the level holds `2^level` cells along each axis.
    /// * `anchor` - Integer coordinates of the cell within its level.
    /// * `nranks` - Number of processes cells are distributed over.
    fn owner(&self, level: u32, anchor: &[u64; 3], nranks: usize) -> usize;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
