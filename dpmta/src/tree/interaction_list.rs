//! Far field and direct lists in relative, translation invariant form.
use itertools::iproduct;

use crate::tree::{
    constants::NCHILDREN,
    types::{CellIndex, Interaction, InteractionLists},
};

/// Circumscribing radius of a unit cube.
const UNIT_RADIUS: f64 = 0.866_025_403_784_438_6;

/// Integer position of an octant within its parent.
fn octant_coordinates(octant: usize) -> [i64; 3] {
    [
        (octant & 1) as i64,
        ((octant >> 1) & 1) as i64,
        ((octant >> 2) & 1) as i64,
    ]
}

fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

impl InteractionLists {
    /// Generate the lists of every shape class.
    ///
    /// # Arguments
    /// * `well_separation` - Cells within this many cells along every axis are near.
    /// * `parent_conversion` - Replace complete groups of eight far siblings by their parent when the parent passes the
    ///   acceptance test.
    /// * `mac_theta` - Acceptance ratio, a parent is accepted when the sum of the circumscribing radii of the target
    ///   and the parent is at most `mac_theta` times the distance between their centres.
    /// * `sort` - Order each list by increasing centre distance.
    pub fn new(well_separation: u32, parent_conversion: bool, mac_theta: f64, sort: bool) -> Self {
        let ws = well_separation as i64;

        let far = std::array::from_fn(|octant| {
            let oc = octant_coordinates(octant);
            let mut entries = Vec::new();

            for (pz, py, px) in iproduct!(-ws..=ws, -ws..=ws, -ws..=ws) {
                let p = [px, py, pz];

                let children = (0..NCHILDREN)
                    .map(|child| {
                        let cc = octant_coordinates(child);
                        [
                            2 * p[0] + cc[0] - oc[0],
                            2 * p[1] + cc[1] - oc[1],
                            2 * p[2] + cc[2] - oc[2],
                        ]
                    })
                    .filter(|d| d.iter().any(|x| x.abs() > ws))
                    .collect::<Vec<_>>();

                let parent = Interaction {
                    level_delta: 1,
                    offset: p,
                };

                let accepted = || {
                    let d = norm(&Self::displacement(octant, &parent));
                    3.0 * UNIT_RADIUS <= mac_theta * d
                };

                if parent_conversion && children.len() == NCHILDREN && accepted() {
                    entries.push(parent);
                } else {
                    entries.extend(children.into_iter().map(|offset| Interaction {
                        level_delta: 0,
                        offset,
                    }));
                }
            }

            if sort {
                entries.sort_by(|a, b| {
                    norm(&Self::displacement(octant, a)).total_cmp(&norm(&Self::displacement(octant, b)))
                });
            }

            entries
        });

        let near = iproduct!(-ws..=ws, -ws..=ws, -ws..=ws)
            .map(|(z, y, x)| [x, y, z])
            .collect();

        Self {
            well_separation,
            parent_conversion,
            far,
            near,
        }
    }

    /// Far field list of a cell's shape class.
    pub fn far(&self, target: &CellIndex) -> &[Interaction] {
        &self.far[target.octant()]
    }

    /// Centre of the target minus centre of the source, in cells of the target's level.
    ///
    /// # Arguments
    /// * `octant` - Shape class of the target.
    /// * `interaction` - Relative position of the source.
    pub fn displacement(octant: usize, interaction: &Interaction) -> [f64; 3] {
        let oc = octant_coordinates(octant);
        let mut d = [0f64; 3];
        for i in 0..3 {
            d[i] = match interaction.level_delta {
                0 => -interaction.offset[i] as f64,
                _ => oc[i] as f64 - 2.0 * interaction.offset[i] as f64 - 0.5,
            };
        }
        d
    }

    /// Source cell of an interaction and the lattice image it is seen in, `None` when it lies outside an open domain.
    ///
    /// # Arguments
    /// * `target` - Target cell.
    /// * `interaction` - Relative position of the source.
    /// * `periodic` - Whether offsets wrap around the domain.
    pub fn resolve(
        target: &CellIndex,
        interaction: &Interaction,
        periodic: bool,
    ) -> Option<(CellIndex, [i64; 3])> {
        if interaction.level_delta > target.level {
            return None;
        }
        target
            .ancestor(target.level - interaction.level_delta)
            .offset(&interaction.offset, periodic)
    }

    /// Far field sources of a cell, with their lattice images.
    pub fn far_sources<'a>(
        &'a self,
        target: &'a CellIndex,
        periodic: bool,
    ) -> impl Iterator<Item = (&'a Interaction, CellIndex, [i64; 3])> + 'a {
        self.far(target).iter().filter_map(move |interaction| {
            Self::resolve(target, interaction, periodic).map(|(source, image)| (interaction, source, image))
        })
    }

    /// Direct list of a leaf, itself included, with lattice images.
    pub fn near_sources<'a>(
        &'a self,
        target: &'a CellIndex,
        periodic: bool,
    ) -> impl Iterator<Item = (CellIndex, [i64; 3])> + 'a {
        self.near
            .iter()
            .filter_map(move |offset| target.offset(offset, periodic))
    }
}
