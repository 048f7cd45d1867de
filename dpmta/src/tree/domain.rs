//! Constructor and geometry of a simulation volume.
use crate::{
    fmm::constants::DOMAIN_PADDING,
    tree::{morton::cells_per_axis, types::Domain},
};

impl Domain {
    /// Compute the cubic domain enclosing a set of points. The domain is padded on each side such that no points lie on
    /// its faces.
    ///
    /// # Arguments
    /// * `points` - Point coordinates.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f64; 3]>) -> Option<Domain> {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        let mut empty = true;

        for point in points {
            empty = false;
            for i in 0..3 {
                min[i] = min[i].min(point[i]);
                max[i] = max[i].max(point[i]);
            }
        }

        if empty {
            return None;
        }

        // Want a cubic box to place everything in
        let side_length = (0..3).map(|i| max[i] - min[i]).fold(0f64, f64::max);

        // A single point, or coincident points, still need a box of finite size
        let side_length = if side_length > 0.0 { side_length } else { 1.0 };

        let err = side_length * DOMAIN_PADDING;
        let side_length = side_length + 2.0 * err;

        Some(Domain {
            origin: [min[0] - err, min[1] - err, min[2] - err],
            side_length: [side_length; 3],
        })
    }

    /// Construct a domain from a user specified origin and side lengths.
    ///
    /// # Arguments
    /// * `origin` - The lower left corner.
    /// * `side_length` - The extent along each axis.
    pub fn new(origin: &[f64; 3], side_length: &[f64; 3]) -> Self {
        Domain {
            origin: *origin,
            side_length: *side_length,
        }
    }

    /// Centre of the volume.
    pub fn centre(&self) -> [f64; 3] {
        [
            self.origin[0] + 0.5 * self.side_length[0],
            self.origin[1] + 0.5 * self.side_length[1],
            self.origin[2] + 0.5 * self.side_length[2],
        ]
    }

    /// Whether a point lies inside the volume, faces included.
    pub fn contains(&self, point: &[f64; 3]) -> bool {
        (0..3).all(|i| {
            self.origin[i] <= point[i] && point[i] <= self.origin[i] + self.side_length[i]
        })
    }

    /// Side lengths of a cell at a level.
    pub fn cell_size(&self, level: u32) -> [f64; 3] {
        let n = cells_per_axis(level) as f64;
        [
            self.side_length[0] / n,
            self.side_length[1] / n,
            self.side_length[2] / n,
        ]
    }

    /// Map a point into the periodic unit cell, the lower faces are included and the upper faces are not.
    pub fn wrap(&self, point: &[f64; 3]) -> [f64; 3] {
        let mut wrapped = *point;
        for i in 0..3 {
            let l = self.side_length[i];
            let mut x = (point[i] - self.origin[i]).rem_euclid(l);
            // rem_euclid can round up to l for tiny negative inputs
            if x >= l {
                x = 0.0;
            }
            wrapped[i] = self.origin[i] + x;
        }
        wrapped
    }

    /// Anchor of the cell enclosing a point at a level. Coordinates are clamped into the boundary cells, so points
    /// exactly on the upper faces belong to the last cell along that axis.
    pub fn anchor(&self, point: &[f64; 3], level: u32) -> [u64; 3] {
        let n = cells_per_axis(level);
        let size = self.cell_size(level);
        let mut anchor = [0u64; 3];
        for i in 0..3 {
            let a = ((point[i] - self.origin[i]) / size[i]).floor();
            anchor[i] = if a <= 0.0 {
                0
            } else if a >= (n - 1) as f64 {
                n - 1
            } else {
                a as u64
            };
        }
        anchor
    }

    /// Whether the domain describes a usable volume.
    pub fn is_valid(&self) -> bool {
        self.origin.iter().all(|o| o.is_finite())
            && self.side_length.iter().all(|l| l.is_finite() && *l > 0.0)
    }
}
