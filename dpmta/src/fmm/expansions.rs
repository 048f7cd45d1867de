//! Arena of fixed length coefficient vectors, one slot per cell.
use std::ops::Range;

use num::Zero;

use crate::tree::types::CellIndex;

/// Expansions of a set of cells, stored contiguously in (level, Morton) order so that each level is a contiguous
/// range that can be iterated in parallel.
#[derive(Clone, Debug)]
pub struct ExpansionStore<T> {
    ncoeffs: usize,
    cells: Vec<CellIndex>,
    data: Vec<T>,
}

impl<T: Copy + Zero> ExpansionStore<T> {
    /// Allocate zeroed expansions.
    ///
    /// # Arguments
    /// * `cells` - Cells to hold expansions for, duplicates are ignored.
    /// * `ncoeffs` - Length of each expansion.
    pub fn new(cells: impl IntoIterator<Item = CellIndex>, ncoeffs: usize) -> Self {
        let mut cells = cells.into_iter().collect::<Vec<_>>();
        cells.sort();
        cells.dedup();
        let data = vec![T::zero(); cells.len() * ncoeffs];
        Self {
            ncoeffs,
            cells,
            data,
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the store holds no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn position(&self, cell: &CellIndex) -> Option<usize> {
        self.cells.binary_search(cell).ok()
    }

    /// Whether a cell has a slot.
    pub fn contains(&self, cell: &CellIndex) -> bool {
        self.position(cell).is_some()
    }

    /// Expansion of a cell.
    pub fn get(&self, cell: &CellIndex) -> Option<&[T]> {
        self.position(cell)
            .map(|i| &self.data[i * self.ncoeffs..(i + 1) * self.ncoeffs])
    }

    /// Mutable expansion of a cell.
    pub fn get_mut(&mut self, cell: &CellIndex) -> Option<&mut [T]> {
        let n = self.ncoeffs;
        self.position(cell).map(move |i| &mut self.data[i * n..(i + 1) * n])
    }

    fn level_range(&self, level: u32) -> Range<usize> {
        let start = self.cells.partition_point(|c| c.level < level);
        let end = self.cells.partition_point(|c| c.level <= level);
        start..end
    }

    /// Cells of a level and their expansions.
    pub fn level(&self, level: u32) -> (&[CellIndex], &[T]) {
        let range = self.level_range(level);
        let n = self.ncoeffs;
        (
            &self.cells[range.clone()],
            &self.data[range.start * n..range.end * n],
        )
    }

    /// Cells of a level and their mutable expansions.
    pub fn level_mut(&mut self, level: u32) -> (&[CellIndex], &mut [T]) {
        let range = self.level_range(level);
        let n = self.ncoeffs;
        (
            &self.cells[range.clone()],
            &mut self.data[range.start * n..range.end * n],
        )
    }
}
