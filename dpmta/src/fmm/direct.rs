//! Reference summation over all pairs, for validation of the multipole engine.
use itertools::iproduct;
use rayon::prelude::*;

use crate::{
    fmm::{
        harmonic::Coulomb,
        helpers::{add_scaled, image_shift, outer, sub},
        lennard_jones::LennardJones,
        types::{Energies, FmmResult, Interactions, M2lMethod, Particle, ParticleResult},
    },
    traits::{kernel::ExpansionKernel, types::FmmError},
    tree::types::Domain,
};

/// Sum every pair of an open system directly.
///
/// # Arguments
/// * `particles` - Particles, results are returned in the same order.
/// * `interactions` - Kernels to sum.
/// * `virial` - Whether to accumulate the virial tensor.
pub fn evaluate(
    particles: &[Particle],
    interactions: Interactions,
    virial: bool,
) -> Result<FmmResult, FmmError> {
    sum(particles, interactions, &[[0.0; 3]], virial)
}

/// Sum every pair of a periodic system directly, over the images within `reach` unit cells along every axis.
///
/// # Arguments
/// * `particles` - Particles of the unit cell, results are returned in the same order.
/// * `interactions` - Kernels to sum.
/// * `domain` - Unit cell.
/// * `reach` - Largest image index summed along each axis.
/// * `virial` - Whether to accumulate the virial tensor.
pub fn evaluate_periodic(
    particles: &[Particle],
    interactions: Interactions,
    domain: &Domain,
    reach: u32,
    virial: bool,
) -> Result<FmmResult, FmmError> {
    let reach = reach as i64;
    let shifts = iproduct!(-reach..=reach, -reach..=reach, -reach..=reach)
        .map(|(z, y, x)| image_shift(&[x, y, z], domain))
        .collect::<Vec<_>>();
    sum(particles, interactions, &shifts, virial)
}

fn sum(
    particles: &[Particle],
    interactions: Interactions,
    shifts: &[[f64; 3]],
    virial: bool,
) -> Result<FmmResult, FmmError> {
    let coulomb = Coulomb::new(0, M2lMethod::Dense)?;
    let lennard_jones = LennardJones::new(0)?;

    let per_target = particles
        .par_iter()
        .enumerate()
        .map(|(i, target)| {
            let mut result = ParticleResult::default();
            let mut energies = [0f64; 2];
            let mut w = [[0f64; 3]; 3];

            for shift in shifts.iter() {
                let zero_shift = shift.iter().all(|s| *s == 0.0);
                for (j, source) in particles.iter().enumerate() {
                    if zero_shift && i == j {
                        continue;
                    }

                    let mut pair = [0f64; 3];
                    if interactions.coulomb {
                        let e = coulomb.p2p(target, source, shift);
                        result.potential += e.potential;
                        energies[0] += 0.5 * e.energy;
                        pair = e.force;
                    }
                    if interactions.lennard_jones {
                        let e = lennard_jones.p2p(target, source, shift);
                        energies[1] += 0.5 * e.energy;
                        for (p, f) in pair.iter_mut().zip(e.force) {
                            *p += f;
                        }
                    }

                    for (f, p) in result.force.iter_mut().zip(pair) {
                        *f += p;
                    }

                    if virial {
                        let r = sub(&sub(&target.position, &source.position), shift);
                        add_scaled(&mut w, &outer(&r, &pair), 0.5);
                    }
                }
            }

            result.energy = energies[0] + energies[1];
            (result, energies, w)
        })
        .collect::<Vec<_>>();

    let mut energy = Energies::default();
    let mut w = [[0f64; 3]; 3];
    let mut results = Vec::with_capacity(particles.len());
    for (result, energies, wi) in per_target {
        energy.coulomb += energies[0];
        energy.lennard_jones += energies[1];
        add_scaled(&mut w, &wi, 1.0);
        results.push(result);
    }
    energy.total = energy.coulomb + energy.lennard_jones;

    Ok(FmmResult {
        particles: results,
        energy,
        virial: virial.then_some(w),
        ..Default::default()
    })
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;
    use crate::fmm::types::LennardJonesParameters;

    #[test]
    fn test_pair() {
        let particles = vec![
            Particle::new([0.0, 0.0, 0.0], 1.0),
            Particle::new([2.0, 0.0, 0.0], -1.0),
        ];
        let result = evaluate(&particles, Interactions::default(), true).unwrap();

        assert_relative_eq!(result.energy.coulomb, -0.5);
        assert_relative_eq!(result.particles[0].force[0], 0.25);
        assert_relative_eq!(result.particles[1].force[0], -0.25);
        assert_relative_eq!(result.particles[0].potential, -0.5);
        assert_relative_eq!(result.particles[0].energy, -0.25);

        // For an isolated pair the virial trace equals the Coulomb energy
        let w = result.virial.unwrap();
        assert_relative_eq!(w[0][0] + w[1][1] + w[2][2], result.energy.coulomb, epsilon = 1e-14);
    }

    #[test]
    fn test_lennard_jones_minimum() {
        let epsilon = 0.3;
        let sigma = 1.1;
        let r_min = 2f64.powf(1.0 / 6.0) * sigma;
        let parameters = LennardJonesParameters::from_epsilon_sigma(epsilon, sigma);
        let particles = vec![
            Particle::new([0.0, 0.0, 0.0], 0.0).with_lennard_jones(parameters),
            Particle::new([0.0, r_min, 0.0], 0.0).with_lennard_jones(parameters),
            Particle::new([5.0, 5.0, 5.0], 0.0),
        ];
        let interactions = Interactions {
            coulomb: false,
            lennard_jones: true,
        };
        let result = evaluate(&particles, interactions, false).unwrap();

        assert_relative_eq!(result.energy.lennard_jones, -epsilon, epsilon = 1e-12);
        assert!(result.particles[0].force[1].abs() < 1e-10);
        assert_eq!(result.particles[2].energy, 0.0);
        assert!(result.virial.is_none());
    }

    #[test]
    fn test_periodic_images() {
        // A single charge sees only its own images, whose forces cancel by symmetry
        let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
        let particles = vec![Particle::new([0.3, 0.6, 0.2], 1.0)];
        let result = evaluate_periodic(&particles, Interactions::default(), &domain, 2, true).unwrap();

        for f in result.particles[0].force {
            assert!(f.abs() < 1e-12);
        }
        assert!(result.energy.coulomb > 0.0);
    }
}
