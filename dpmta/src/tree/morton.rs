//! Morton encoding of cell anchors, and navigation of the hierarchy.
use crate::tree::{
    constants::NCHILDREN,
    types::{CellIndex, Domain},
};

/// Spread the lowest 21 bits of `a` so that two zero bits separate consecutive bits.
fn split_by_three(a: u64) -> u64 {
    let mut x = a & 0x1f_ffff;
    x = (x | x << 32) & 0x001f_0000_0000_ffff;
    x = (x | x << 16) & 0x001f_0000_ff00_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}

/// Inverse of `split_by_three`.
fn compact_by_three(a: u64) -> u64 {
    let mut x = a & 0x1249_2492_4924_9249;
    x = (x ^ (x >> 2)) & 0x10c3_0c30_c30c_30c3;
    x = (x ^ (x >> 4)) & 0x100f_00f0_0f00_f00f;
    x = (x ^ (x >> 8)) & 0x001f_0000_ff00_00ff;
    x = (x ^ (x >> 16)) & 0x001f_0000_0000_ffff;
    x = (x ^ (x >> 32)) & 0x1f_ffff;
    x
}

/// Encode an anchor.
///
/// # Arguments
/// * `anchor` - Integer coordinates of a cell within its level.
pub fn encode_anchor(anchor: &[u64; 3]) -> u64 {
    split_by_three(anchor[0]) | (split_by_three(anchor[1]) << 1) | (split_by_three(anchor[2]) << 2)
}

/// Decode a Morton index to the anchor it encodes.
pub fn decode_key(morton: u64) -> [u64; 3] {
    [
        compact_by_three(morton),
        compact_by_three(morton >> 1),
        compact_by_three(morton >> 2),
    ]
}

/// Number of cells along each axis at a level.
pub fn cells_per_axis(level: u32) -> u64 {
    1 << level
}

/// Number of cells at a level.
pub fn ncells(level: u32) -> usize {
    1 << (3 * level)
}

impl CellIndex {
    /// The root cell.
    pub fn root() -> Self {
        Self { level: 0, morton: 0 }
    }

    /// Construct from the anchor at a given level.
    pub fn from_anchor(anchor: &[u64; 3], level: u32) -> Self {
        Self {
            level,
            morton: encode_anchor(anchor),
        }
    }

    /// The cell at `level` enclosing `point`. Points outside the domain, or on its upper faces, are clamped into the
    /// boundary cells.
    pub fn from_point(point: &[f64; 3], domain: &Domain, level: u32) -> Self {
        Self::from_anchor(&domain.anchor(point, level), level)
    }

    /// Integer coordinates within the level.
    pub fn anchor(&self) -> [u64; 3] {
        decode_key(self.morton)
    }

    /// Position of this cell within its parent, `x | y << 1 | z << 2`.
    pub fn octant(&self) -> usize {
        (self.morton & 7) as usize
    }

    /// The enclosing cell one level up.
    pub fn parent(&self) -> Self {
        Self {
            level: self.level.saturating_sub(1),
            morton: self.morton >> 3,
        }
    }

    /// The ancestor at a coarser level.
    pub fn ancestor(&self, level: u32) -> Self {
        let delta = self.level.saturating_sub(level);
        Self {
            level: self.level - delta,
            morton: self.morton >> (3 * delta),
        }
    }

    /// The eight children, in octant order.
    pub fn children(&self) -> [CellIndex; NCHILDREN] {
        let mut children = [CellIndex::default(); NCHILDREN];
        for (octant, child) in children.iter_mut().enumerate() {
            *child = Self {
                level: self.level + 1,
                morton: (self.morton << 3) | octant as u64,
            };
        }
        children
    }

    /// Side lengths of the cell.
    pub fn diameter(&self, domain: &Domain) -> [f64; 3] {
        domain.cell_size(self.level)
    }

    /// Centre of the cell.
    pub fn centre(&self, domain: &Domain) -> [f64; 3] {
        let anchor = self.anchor();
        let diameter = self.diameter(domain);
        let mut centre = [0f64; 3];
        for i in 0..3 {
            centre[i] = domain.origin[i] + (anchor[i] as f64 + 0.5) * diameter[i];
        }
        centre
    }

    /// The cell at a relative anchor offset on the same level.
    ///
    /// Returns the cell together with the lattice image it was found in, which is always zero without periodic
    /// wrapping, or `None` when the offset leaves an open domain.
    ///
    /// # Arguments
    /// * `offset` - Anchor offset in cells of this level.
    /// * `periodic` - Whether offsets wrap around the domain.
    pub fn offset(&self, offset: &[i64; 3], periodic: bool) -> Option<(CellIndex, [i64; 3])> {
        let n = cells_per_axis(self.level) as i64;
        let anchor = self.anchor();
        let mut wrapped = [0u64; 3];
        let mut image = [0i64; 3];
        for i in 0..3 {
            let a = anchor[i] as i64 + offset[i];
            if periodic {
                image[i] = a.div_euclid(n);
                wrapped[i] = a.rem_euclid(n) as u64;
            } else if a < 0 || a >= n {
                return None;
            } else {
                wrapped[i] = a as u64;
            }
        }
        Some((CellIndex::from_anchor(&wrapped, self.level), image))
    }

    /// Anchor difference `other - self` of two cells on the same level.
    #[cfg(test)]
    pub fn anchor_offset(&self, other: &CellIndex) -> [i64; 3] {
        let a = self.anchor();
        let b = other.anchor();
        [
            b[0] as i64 - a[0] as i64,
            b[1] as i64 - a[1] as i64,
            b[2] as i64 - a[2] as i64,
        ]
    }

    /// All cells of a level, in Morton order.
    #[cfg(test)]
    pub fn level_cells(level: u32) -> impl Iterator<Item = CellIndex> {
        (0..ncells(level) as u64).map(move |morton| CellIndex { level, morton })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode_decode() {
        for anchor in [[0, 0, 0], [1, 0, 0], [0, 1, 0], [0, 0, 1], [5, 9, 3], [127, 64, 1]] {
            assert_eq!(decode_key(encode_anchor(&anchor)), anchor);
        }

        // x occupies the lowest bit of each triple
        assert_eq!(encode_anchor(&[1, 0, 0]), 1);
        assert_eq!(encode_anchor(&[0, 1, 0]), 2);
        assert_eq!(encode_anchor(&[0, 0, 1]), 4);
        assert_eq!(encode_anchor(&[3, 3, 3]), 63);
    }

    #[test]
    fn test_parent_children() {
        let cell = CellIndex::from_anchor(&[5, 2, 7], 3);
        let parent = cell.parent();
        assert_eq!(parent.anchor(), [2, 1, 3]);
        assert_eq!(parent.level, 2);
        assert!(parent.children().contains(&cell));
        assert_eq!(parent.children()[cell.octant()], cell);
        assert_eq!(cell.octant(), 5);
        assert_eq!(cell.ancestor(0), CellIndex::root());

        for (octant, child) in parent.children().iter().enumerate() {
            let a = child.anchor();
            assert_eq!(a[0] & 1, (octant & 1) as u64);
            assert_eq!(a[1] & 1, ((octant >> 1) & 1) as u64);
            assert_eq!(a[2] & 1, ((octant >> 2) & 1) as u64);
            assert_eq!(child.parent(), parent);
        }
    }

    #[test]
    fn test_offset() {
        let cell = CellIndex::from_anchor(&[0, 3, 1], 2);

        assert_eq!(cell.offset(&[-1, 0, 0], false), None);
        assert_eq!(cell.offset(&[0, 1, 0], false), None);
        let (neighbour, image) = cell.offset(&[1, -1, 2], false).unwrap();
        assert_eq!(neighbour.anchor(), [1, 2, 3]);
        assert_eq!(image, [0, 0, 0]);

        let (wrapped, image) = cell.offset(&[-1, 1, -6], true).unwrap();
        assert_eq!(wrapped.anchor(), [3, 0, 3]);
        assert_eq!(image, [-1, 1, -2]);
    }

    #[test]
    fn test_centre() {
        let domain = Domain::new(&[-1.0, 0.0, 0.0], &[2.0, 4.0, 8.0]);
        let cell = CellIndex::from_anchor(&[1, 0, 1], 1);
        assert_eq!(cell.centre(&domain), [0.5, 1.0, 6.0]);
        assert_eq!(cell.diameter(&domain), [1.0, 2.0, 4.0]);
        assert_eq!(CellIndex::root().centre(&domain), [0.0, 2.0, 4.0]);
    }
}
