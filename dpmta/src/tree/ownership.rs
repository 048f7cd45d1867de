//! Strategies assigning cells to processes.
use crate::{
    traits::tree::OwnershipPolicy,
    tree::{
        hilbert::hilbert_index,
        morton::{cells_per_axis, ncells},
    },
};

/// Split `n` cells along an axis into `parts` contiguous blocks and return the block of cell `i`.
fn block(i: u64, n: u64, parts: usize) -> usize {
    ((i as u128 * parts as u128) / n as u128) as usize
}

/// Row/column ordering. Cells are partitioned along one or two spatial axes, provided mainly as a baseline to compare
/// the space filling ordering against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowColumn {
    /// Slabs perpendicular to z.
    Slabs,

    /// Columns parallel to x, on a near square grid of processes over z and y.
    Columns,
}

impl RowColumn {
    /// Factorise `nranks` into a `(z, y)` process grid as close to square as possible.
    pub fn process_grid(nranks: usize) -> (usize, usize) {
        let mut pz = (nranks as f64).sqrt().floor() as usize;
        while pz > 1 && nranks % pz != 0 {
            pz -= 1;
        }
        let pz = pz.max(1);
        (pz, nranks / pz)
    }
}

impl OwnershipPolicy for RowColumn {
    fn owner(&self, level: u32, anchor: &[u64; 3], nranks: usize) -> usize {
        let n = cells_per_axis(level);
        match self {
            RowColumn::Slabs => block(anchor[2], n, nranks),
            RowColumn::Columns => {
                let (pz, py) = Self::process_grid(nranks);
                block(anchor[2], n, pz) * py + block(anchor[1], n, py)
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            RowColumn::Slabs => "slabs",
            RowColumn::Columns => "columns",
        }
    }
}

/// Space filling ordering. Cells are ordered along a Hilbert curve and split into contiguous chunks of equal length,
/// which keeps spatially adjacent cells on the same or nearby processes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct HilbertCurve;

impl OwnershipPolicy for HilbertCurve {
    fn owner(&self, level: u32, anchor: &[u64; 3], nranks: usize) -> usize {
        let h = hilbert_index(anchor, level);
        ((h as u128 * nranks as u128) / ncells(level) as u128) as usize
    }

    fn name(&self) -> &'static str {
        "hilbert"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tree::morton::decode_key;

    fn counts(policy: &dyn OwnershipPolicy, level: u32, nranks: usize) -> Vec<usize> {
        let mut counts = vec![0; nranks];
        for morton in 0..ncells(level) as u64 {
            let owner = policy.owner(level, &decode_key(morton), nranks);
            assert!(owner < nranks);
            counts[owner] += 1;
        }
        counts
    }

    #[test]
    fn test_balanced() {
        for policy in [
            &RowColumn::Slabs as &dyn OwnershipPolicy,
            &RowColumn::Columns,
            &HilbertCurve,
        ] {
            let counts = counts(policy, 3, 4);
            assert!(counts.iter().all(|&c| c == 128), "{} {:?}", policy.name(), counts);
        }
    }

    #[test]
    fn test_more_ranks_than_cells() {
        let counts = counts(&HilbertCurve, 1, 16);
        assert_eq!(counts.iter().sum::<usize>(), 8);
        assert!(counts.iter().all(|&c| c <= 1));
    }

    #[test]
    fn test_process_grid() {
        assert_eq!(RowColumn::process_grid(1), (1, 1));
        assert_eq!(RowColumn::process_grid(4), (2, 2));
        assert_eq!(RowColumn::process_grid(6), (2, 3));
        assert_eq!(RowColumn::process_grid(7), (1, 7));
    }

    #[test]
    fn test_slabs_follow_z() {
        for morton in 0..ncells(2) as u64 {
            let anchor = decode_key(morton);
            assert_eq!(RowColumn::Slabs.owner(2, &anchor, 2), (anchor[2] / 2) as usize);
        }
    }

    #[test]
    fn test_hilbert_ranks_are_compact() {
        // Cells owned by one rank out of eight at level 2 fill exactly one level 1 cell
        let level = 2;
        for rank in 0..8 {
            let parents: std::collections::HashSet<_> = (0..ncells(level) as u64)
                .map(decode_key)
                .filter(|a| HilbertCurve.owner(level, a, 8) == rank)
                .map(|a| [a[0] >> 1, a[1] >> 1, a[2] >> 1])
                .collect();
            assert_eq!(parents.len(), 1);
        }
    }
}
