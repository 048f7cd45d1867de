//! Data structures for the cell hierarchy.
use std::sync::Arc;

use crate::traits::tree::OwnershipPolicy;

/// A box shaped simulation volume.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Domain {
    /// The lower left corner of the volume.
    pub origin: [f64; 3],

    /// Side length along each axis.
    pub side_length: [f64; 3],
}

/// A cell of the hierarchy: its level and the Morton encoding of its integer anchor within that level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CellIndex {
    /// Level, the root is level 0 and level `l` holds `2^l` cells along each axis.
    pub level: u32,

    /// Interleaved bits of the anchor, x in the lowest position.
    pub morton: u64,
}

/// Versioned record of which process owns every cell at every level.
///
/// A table is never patched, when the volume or the process count changes a new one with a later generation replaces
/// it wholesale, and every cache derived from the old one is dropped with it.
#[derive(Clone, Debug, PartialEq)]
pub struct CellTable {
    /// Generation counter, increases with every rebuild.
    pub generation: u64,

    /// Volume covered by the root cell.
    pub domain: Domain,

    /// Number of levels, counting the root. The leaf level is `levels - 1`.
    pub levels: u32,

    /// Whether the root cell is the unit of a periodic lattice.
    pub periodic: bool,

    /// Number of processes owning cells.
    pub nranks: usize,

    /// Owner of each cell, indexed by level then Morton index.
    pub owners: Vec<Vec<u32>>,
}

/// One far field contributor of a cell, in relative form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interaction {
    /// 0 for a cell on the target's level, 1 for a parent level cell replacing eight siblings.
    pub level_delta: u32,

    /// Anchor offset from the target's ancestor at the source level, in cells of that level.
    pub offset: [i64; 3],
}

/// Interaction and direct lists in relative form, one far field list per shape class.
///
/// A cell's shape class is its octant within its parent, two cells of the same class see identical lists of offsets
/// so lists are generated once and reused by translation at every level.
#[derive(Clone, Debug, PartialEq)]
pub struct InteractionLists {
    /// Cells within this many cells of a target, along every axis, are near.
    pub well_separation: u32,

    /// Whether complete groups of eight siblings were converted into their parent.
    pub parent_conversion: bool,

    /// Far field list for each octant.
    pub far: [Vec<Interaction>; 8],

    /// Offsets of the direct list, the target itself included.
    pub near: Vec<[i64; 3]>,
}

/// Shared handle to a cell table.
pub type SharedCellTable = Arc<CellTable>;

/// Shared handle to an ownership strategy.
pub type SharedPolicy = Arc<dyn OwnershipPolicy>;
