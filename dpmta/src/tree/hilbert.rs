//! Position of a cell along a three dimensional Hilbert curve.
//!
//! Uses Skilling's transpose formulation: the anchor is transformed in place into the transposed Hilbert index, whose
//! bits are then interleaved. Consecutive indices always belong to face adjacent cells, and the curve at a level
//! refines the curve of its parent level, so contiguous index ranges describe compact groups of cells.
//!
//! Skilling, J. (2004). Programming the Hilbert curve. AIP Conference Proceedings, 707(1), 381-387.

/// Index of a cell along the Hilbert curve filling its level.
///
/// # Arguments
/// * `anchor` - Integer coordinates of the cell.
/// * `level` - Level of the cell, the curve visits `8^level` cells.
pub fn hilbert_index(anchor: &[u64; 3], level: u32) -> u64 {
    if level == 0 {
        return 0;
    }

    let mut x = *anchor;
    let m: u64 = 1 << (level - 1);

    // Inverse undo
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..3 {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // Gray encode
    x[1] ^= x[0];
    x[2] ^= x[1];
    let mut t = 0;
    let mut q = m;
    while q > 1 {
        if x[2] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for xi in x.iter_mut() {
        *xi ^= t;
    }

    let mut index = 0;
    for bit in (0..level).rev() {
        for xi in x.iter() {
            index = (index << 1) | ((xi >> bit) & 1);
        }
    }
    index
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tree::morton::{cells_per_axis, ncells};
    use itertools::iproduct;

    fn curve(level: u32) -> Vec<[u64; 3]> {
        let n = cells_per_axis(level);
        let mut cells = vec![None; ncells(level)];
        for (x, y, z) in iproduct!(0..n, 0..n, 0..n) {
            let h = hilbert_index(&[x, y, z], level) as usize;
            assert!(cells[h].is_none(), "index {h} visited twice");
            cells[h] = Some([x, y, z]);
        }
        cells.into_iter().map(|c| c.unwrap()).collect()
    }

    #[test]
    fn test_hilbert_is_a_permutation_of_adjacent_steps() {
        for level in 1..=4 {
            let cells = curve(level);
            for pair in cells.windows(2) {
                let step: u64 = (0..3).map(|i| pair[0][i].abs_diff(pair[1][i])).sum();
                assert_eq!(step, 1, "cells {:?} and {:?} are not adjacent", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn test_hilbert_refines_parent_curve() {
        // Each group of eight consecutive indices at a level fills a single parent cell
        let level = 3;
        let cells = curve(level);
        for chunk in cells.chunks(8) {
            let parent = [chunk[0][0] >> 1, chunk[0][1] >> 1, chunk[0][2] >> 1];
            for cell in chunk {
                assert_eq!([cell[0] >> 1, cell[1] >> 1, cell[2] >> 1], parent);
            }
        }
    }
}
