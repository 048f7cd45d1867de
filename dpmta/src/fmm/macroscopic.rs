//! Lattice sum of a periodic system beyond the images resolved by the tree.
//!
//! The tree resolves the unit cell's interactions with every image within `well_separation` unit cells. The rest of
//! the lattice is swept with supercells: with `b = 2 ws + 1`, the level `k` supercell is a block of `b^k` images
//! along each axis, its multipole formed by translating `b^3` copies of the level `k - 1` supercell to a common
//! centre. At level `k` the unit cell receives the field of every level `k` supercell within `ws` cells of the next
//! level's neighbourhood that is not itself in the neighbourhood of this level, so successive levels tile the
//! lattice in disjoint shells.
//!
//! The copy and shell operators are lattice sums of harmonics over integer offsets, computed once for the unit cell
//! and rescaled by degree at every level.
use itertools::iproduct;
use log::{debug, warn};
use num::Zero;

use crate::{
    fmm::{
        constants::{MAX_EXPANSION_ORDER, NET_CHARGE_TOLERANCE},
        harmonic::{
            contract_irregular, gradient, index, irregular, ncoeffs, regular, shift_multipole, C64,
        },
        types::MacroscopicMode,
    },
    traits::{fmm::LatticeCorrection, types::FmmError},
    tree::types::Domain,
};

/// Operators of one supercell level.
#[derive(Clone, Debug)]
struct SupercellLevel {
    /// `Σ_u R(u)` over the copies forming the next level.
    copies: Vec<C64>,

    /// `Σ_u u_a R(u)` for each axis `a`.
    copy_moments: [Vec<C64>; 3],

    /// `Σ_s I(-s)` over the shell.
    shell: Vec<C64>,

    /// `Σ_s s_a I(-s)` for each axis `a`.
    shell_moments: [Vec<C64>; 3],
}

/// Periodic lattice correction of the Coulomb kernel.
#[derive(Clone, Debug)]
pub struct Macroscopic {
    expansion_order: usize,
    supercell_order: usize,
    mode: MacroscopicMode,
    levels: Vec<SupercellLevel>,
}

type HarmonicFn = fn(&[f64; 3], usize, &mut [C64]);

/// Sums of harmonics of `sign * offset ⊙ side_length` over a set of offsets, plain and weighted by each coordinate
/// of `offset ⊙ side_length`.
fn lattice_sums(
    offsets: &[[i64; 3]],
    side_length: &[f64; 3],
    sign: f64,
    degree: usize,
    harmonic: HarmonicFn,
) -> (Vec<C64>, [Vec<C64>; 3]) {
    let n = ncoeffs(degree);
    let mut plain = vec![C64::zero(); n];
    let mut moments: [Vec<C64>; 3] = std::array::from_fn(|_| vec![C64::zero(); n]);
    let mut h = vec![C64::zero(); n];

    for offset in offsets.iter() {
        let r = [
            offset[0] as f64 * side_length[0],
            offset[1] as f64 * side_length[1],
            offset[2] as f64 * side_length[2],
        ];
        harmonic(&[sign * r[0], sign * r[1], sign * r[2]], degree, &mut h);

        for (p, x) in plain.iter_mut().zip(h.iter()) {
            *p += x;
        }
        for (moment, w) in moments.iter_mut().zip(r) {
            for (p, x) in moment.iter_mut().zip(h.iter()) {
                *p += x * w;
            }
        }
    }

    (plain, moments)
}

/// Multiply the coefficients of each degree `n` by `factor(n)`.
fn scaled(tensor: &[C64], degree: usize, factor: impl Fn(i32) -> f64) -> Vec<C64> {
    let mut out = tensor.to_vec();
    for n in 0..=degree {
        let f = factor(n as i32);
        for m in 0..=n {
            out[index(n, m)] *= f;
        }
    }
    out
}

impl Macroscopic {
    /// Constructor
    ///
    /// # Arguments
    /// * `expansion_order` - Order of the root expansions.
    /// * `domain` - Unit cell of the lattice.
    /// * `well_separation` - Images within this many unit cells along every axis are resolved by the tree.
    /// * `levels` - Number of supercell levels summed, zero disables the correction.
    /// * `mode` - Truncation of the supercell multipoles.
    pub fn new(
        expansion_order: usize,
        domain: &Domain,
        well_separation: u32,
        levels: usize,
        mode: MacroscopicMode,
    ) -> Result<Self, FmmError> {
        if expansion_order > MAX_EXPANSION_ORDER {
            return Err(FmmError::Configuration(format!(
                "expansion order {expansion_order} exceeds the maximum of {MAX_EXPANSION_ORDER}"
            )));
        }

        if well_separation == 0 {
            return Err(FmmError::Configuration(
                "periodic lattice sums need a well separation of at least one cell".to_string(),
            ));
        }

        if !domain.is_valid() {
            return Err(FmmError::Configuration(format!(
                "invalid periodic domain {domain:?}"
            )));
        }

        let p = expansion_order;
        let q = match mode {
            MacroscopicMode::Legacy => p,
            MacroscopicMode::Refined => 2 * p,
        };

        let ws = well_separation as i64;
        let b = 2 * ws + 1;
        let reach = ws * (b + 1);

        let copies = iproduct!(-ws..=ws, -ws..=ws, -ws..=ws)
            .map(|(z, y, x)| [x, y, z])
            .collect::<Vec<_>>();
        let shell = iproduct!(-reach..=reach, -reach..=reach, -reach..=reach)
            .map(|(z, y, x)| [x, y, z])
            .filter(|s| s.iter().any(|c| c.abs() > ws))
            .collect::<Vec<_>>();

        let (c0, e0) = lattice_sums(&copies, &domain.side_length, 1.0, q, regular);
        let (g0, h0) = lattice_sums(&shell, &domain.side_length, -1.0, p + q, irregular);

        let b = b as f64;
        let levels = (0..levels)
            .map(|k| {
                let s = b.powi(k as i32);
                SupercellLevel {
                    copies: scaled(&c0, q, |j| s.powi(j)),
                    copy_moments: std::array::from_fn(|a| scaled(&e0[a], q, |j| s.powi(j + 1))),
                    shell: scaled(&g0, p + q, |n| s.powi(-(n + 1))),
                    shell_moments: std::array::from_fn(|a| scaled(&h0[a], p + q, |n| s.powi(-n))),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "macroscopic expansion: {} levels of {} copies and {} shell cells, supercell order {q}",
            levels.len(),
            copies.len(),
            shell.len()
        );

        Ok(Self {
            expansion_order,
            supercell_order: q,
            mode,
            levels,
        })
    }

    /// Number of supercell levels summed.
    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    /// Truncation of the supercell multipoles.
    pub fn mode(&self) -> MacroscopicMode {
        self.mode
    }
}

impl LatticeCorrection<C64> for Macroscopic {
    fn apply(&self, root_multipole: &[C64], root_local: &mut [C64], virial: bool) -> [[f64; 3]; 3] {
        let p = self.expansion_order;
        let q = self.supercell_order;
        let nq = ncoeffs(q);
        let mut result = [[0f64; 3]; 3];

        let charge = root_multipole[0].re;
        if charge.abs() > NET_CHARGE_TOLERANCE {
            warn!("periodic unit cell carries net charge {charge:e}, its monopole is excluded from the lattice sum");
        }

        // Supercell multipole, and its first moments along each axis for the virial
        let mut multipole = vec![C64::zero(); nq];
        multipole[..ncoeffs(p)].copy_from_slice(&root_multipole[..ncoeffs(p)]);
        multipole[0] = C64::zero();
        let mut moments: [Vec<C64>; 3] = std::array::from_fn(|_| vec![C64::zero(); nq]);

        let mut local = vec![C64::zero(); ncoeffs(p)];

        for (k, level) in self.levels.iter().enumerate() {
            contract_irregular(&multipole, q, &level.shell, p, root_local);

            if virial {
                for (a, row) in result.iter_mut().enumerate() {
                    local.iter_mut().for_each(|l| *l = C64::zero());
                    contract_irregular(&multipole, q, &level.shell_moments[a], p, &mut local);
                    contract_irregular(&moments[a], q, &level.shell, p, &mut local);
                    let g = gradient(&local, root_multipole, p);
                    for (w, gb) in row.iter_mut().zip(g) {
                        *w += 0.5 * gb;
                    }
                }
            }

            if k + 1 < self.levels.len() {
                let mut next = vec![C64::zero(); nq];
                shift_multipole(&multipole, q, &level.copies, q, &mut next);

                if virial {
                    let mut next_moments: [Vec<C64>; 3] =
                        std::array::from_fn(|_| vec![C64::zero(); nq]);
                    for a in 0..3 {
                        shift_multipole(&moments[a], q, &level.copies, q, &mut next_moments[a]);
                        shift_multipole(&multipole, q, &level.copy_moments[a], q, &mut next_moments[a]);
                    }
                    moments = next_moments;
                }

                multipole = next;
            }
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        fmm::{
            harmonic::Coulomb,
            types::{M2lMethod, Particle},
        },
        traits::kernel::ExpansionKernel,
    };

    fn cell() -> Vec<Particle> {
        vec![
            Particle::new([0.42, 0.47, 0.55], 1.0),
            Particle::new([0.58, 0.51, 0.44], -1.0),
            Particle::new([0.49, 0.59, 0.41], 0.5),
            Particle::new([0.53, 0.43, 0.57], -0.5),
        ]
    }

    fn targets() -> Vec<[f64; 3]> {
        vec![[0.5, 0.5, 0.5], [0.45, 0.55, 0.52], [0.56, 0.46, 0.47]]
    }

    /// Images with `ws < max |n| <= reach`, the region covered by the shells of the supercell levels.
    fn images(ws: i64, reach: i64) -> Vec<[i64; 3]> {
        iproduct!(-reach..=reach, -reach..=reach, -reach..=reach)
            .map(|(x, y, z)| [x, y, z])
            .filter(|n| n.iter().any(|c| c.abs() > ws))
            .collect()
    }

    fn direct_potential(
        particles: &[Particle],
        images: &[[i64; 3]],
        side: &[f64; 3],
        x: &[f64; 3],
    ) -> f64 {
        let mut potential = 0.0;
        for n in images.iter() {
            for p in particles.iter() {
                let r = [
                    x[0] - p.position[0] - n[0] as f64 * side[0],
                    x[1] - p.position[1] - n[1] as f64 * side[1],
                    x[2] - p.position[2] - n[2] as f64 * side[2],
                ];
                potential += p.charge / (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
            }
        }
        potential
    }

    fn lattice_local(
        kernel: &Coulomb,
        domain: &Domain,
        particles: &[Particle],
        levels: usize,
        mode: MacroscopicMode,
    ) -> (Vec<C64>, Vec<C64>, [[f64; 3]; 3]) {
        let macroscopic = Macroscopic::new(kernel.expansion_order(), domain, 1, levels, mode).unwrap();
        let mut multipole = vec![C64::zero(); kernel.ncoeffs()];
        kernel.p2m(particles, &domain.centre(), &mut multipole);
        let mut local = vec![C64::zero(); kernel.ncoeffs()];
        let virial = macroscopic.apply(&multipole, &mut local, true);
        (multipole, local, virial)
    }

    fn potential(kernel: &Coulomb, local: &[C64], domain: &Domain, x: &[f64; 3]) -> f64 {
        kernel.l2p(local, &domain.centre(), &Particle::new(*x, 1.0)).potential
    }

    #[test]
    fn test_first_shell() {
        // One level of a rectangular lattice covers the images out to ws (b + 1) = 4
        let kernel = Coulomb::new(10, M2lMethod::Dense).unwrap();
        let side = [1.0, 1.2, 0.9];
        let domain = Domain::new(&[0.0, 0.0, 0.0], &side);
        let particles = cell()
            .iter()
            .map(|p| {
                let mut p = *p;
                for i in 0..3 {
                    p.position[i] *= side[i];
                }
                p
            })
            .collect::<Vec<_>>();

        let (_, local, _) = lattice_local(&kernel, &domain, &particles, 1, MacroscopicMode::Legacy);
        let region = images(1, 4);

        for x in targets() {
            let x = [x[0] * side[0], x[1] * side[1], x[2] * side[2]];
            let expected = direct_potential(&particles, &region, &side, &x);
            let found = potential(&kernel, &local, &domain, &x);
            assert!((expected - found).abs() < 1e-6, "{expected} {found}");
        }
    }

    #[test]
    fn test_supercell_levels() {
        // Two levels reach the images out to 13 unit cells
        let kernel = Coulomb::new(10, M2lMethod::Dense).unwrap();
        let side = [1.0; 3];
        let domain = Domain::new(&[0.0, 0.0, 0.0], &side);
        let particles = cell();
        let region = images(1, 13);

        let (_, refined, _) = lattice_local(&kernel, &domain, &particles, 2, MacroscopicMode::Refined);
        let (_, legacy, _) = lattice_local(&kernel, &domain, &particles, 2, MacroscopicMode::Legacy);

        for x in targets() {
            let expected = direct_potential(&particles, &region, &side, &x);
            let found = potential(&kernel, &refined, &domain, &x);
            assert!((expected - found).abs() < 1e-5, "{expected} {found}");

            let found = potential(&kernel, &legacy, &domain, &x);
            assert!((expected - found).abs() < 1e-3, "{expected} {found}");
        }
    }

    #[test]
    fn test_virial() {
        let kernel = Coulomb::new(10, M2lMethod::Dense).unwrap();
        let side = [1.0; 3];
        let domain = Domain::new(&[0.0, 0.0, 0.0], &side);
        let particles = cell();
        let (_, _, found) = lattice_local(&kernel, &domain, &particles, 2, MacroscopicMode::Refined);

        // -1/2 Σ_n n (x) F_n, with F_n the force of image n on the unit cell
        let mut expected = [[0f64; 3]; 3];
        for n in images(1, 13) {
            let mut force = [0f64; 3];
            for t in particles.iter() {
                for s in particles.iter() {
                    let r = [
                        t.position[0] - s.position[0] - n[0] as f64,
                        t.position[1] - s.position[1] - n[1] as f64,
                        t.position[2] - s.position[2] - n[2] as f64,
                    ];
                    let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
                    let scale = t.charge * s.charge / (r2 * r2.sqrt());
                    for i in 0..3 {
                        force[i] += scale * r[i];
                    }
                }
            }
            for a in 0..3 {
                for b in 0..3 {
                    expected[a][b] -= 0.5 * n[a] as f64 * force[b];
                }
            }
        }

        let size = expected.iter().flatten().fold(0f64, |m, x| m.max(x.abs()));
        for a in 0..3 {
            for b in 0..3 {
                assert!(
                    (expected[a][b] - found[a][b]).abs() < 1e-6 * size.max(1.0),
                    "{a} {b} {} {}",
                    expected[a][b],
                    found[a][b]
                );
            }
        }
    }

    #[test]
    fn test_net_charge_excluded() {
        let kernel = Coulomb::new(6, M2lMethod::Dense).unwrap();
        let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0; 3]);
        let mut particles = cell();
        particles.push(Particle::new([0.5, 0.5, 0.5], 2.0));

        let macroscopic = Macroscopic::new(6, &domain, 1, 3, MacroscopicMode::Refined).unwrap();
        let mut multipole = vec![C64::zero(); kernel.ncoeffs()];
        kernel.p2m(&particles, &domain.centre(), &mut multipole);

        let mut charged = vec![C64::zero(); kernel.ncoeffs()];
        macroscopic.apply(&multipole, &mut charged, false);

        multipole[0] = C64::zero();
        let mut neutral = vec![C64::zero(); kernel.ncoeffs()];
        let virial = macroscopic.apply(&multipole, &mut neutral, false);

        assert_eq!(charged, neutral);
        assert!(charged.iter().all(|c| c.re.is_finite() && c.im.is_finite()));
        assert_eq!(virial, [[0.0; 3]; 3]);
    }

    #[test]
    fn test_disabled_and_invalid() {
        let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0; 3]);
        let macroscopic = Macroscopic::new(4, &domain, 1, 0, MacroscopicMode::Legacy).unwrap();
        assert_eq!(macroscopic.levels(), 0);

        let multipole = vec![C64::new(1.0, 0.0); ncoeffs(4)];
        let mut local = vec![C64::zero(); ncoeffs(4)];
        macroscopic.apply(&multipole, &mut local, true);
        assert!(local.iter().all(|c| c.is_zero()));

        assert!(Macroscopic::new(MAX_EXPANSION_ORDER + 1, &domain, 1, 2, MacroscopicMode::Legacy).is_err());
        assert!(Macroscopic::new(4, &domain, 0, 2, MacroscopicMode::Legacy).is_err());
    }
}
