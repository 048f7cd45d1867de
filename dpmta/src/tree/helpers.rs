//! Particle and point generators used in testing and benchmarking.
use rand::prelude::*;

use crate::fmm::types::{LennardJonesParameters, Particle};

/// Points fixture for testing, uniformly samples in each axis from min to max.
///
/// # Arguments
/// * `n_points` - The number of points to sample.
/// * `min` - The minimum coordinate value along each axis, defaults to 0.
/// * `max` - The maximum coordinate value along each axis, defaults to 1.
/// * `seed` - Random seed, defaults to 0.
pub fn points_fixture(
    n_points: usize,
    min: Option<f64>,
    max: Option<f64>,
    seed: Option<u64>,
) -> Vec<[f64; 3]> {
    let seed = seed.unwrap_or(0);
    let mut range = StdRng::seed_from_u64(seed);

    let between = if let (Some(min), Some(max)) = (min, max) {
        rand::distributions::Uniform::from(min..max)
    } else {
        rand::distributions::Uniform::from(0.0..1.0)
    };

    (0..n_points)
        .map(|_| {
            [
                between.sample(&mut range),
                between.sample(&mut range),
                between.sample(&mut range),
            ]
        })
        .collect()
}

/// Charged particles at uniformly sampled positions, with charges drawn from [-1, 1).
///
/// # Arguments
/// * `n_particles` - The number of particles.
/// * `seed` - Random seed.
pub fn particles_fixture(n_particles: usize, seed: u64) -> Vec<Particle> {
    let points = points_fixture(n_particles, None, None, Some(seed));
    let mut range = StdRng::seed_from_u64(seed.wrapping_add(1));
    let between = rand::distributions::Uniform::from(-1.0..1.0);

    points
        .into_iter()
        .map(|position| Particle::new(position, between.sample(&mut range)))
        .collect()
}

/// Neutral particles on a jittered simple cubic grid, carrying Lennard-Jones parameters.
///
/// # Arguments
/// * `n_per_axis` - Grid points along each axis.
/// * `spacing` - Grid spacing.
/// * `seed` - Random seed for the jitter, which never exceeds a tenth of the spacing.
pub fn lennard_jones_fixture(n_per_axis: usize, spacing: f64, seed: u64) -> Vec<Particle> {
    let mut range = StdRng::seed_from_u64(seed);
    let jitter = rand::distributions::Uniform::from(-0.1 * spacing..0.1 * spacing);
    let parameters = LennardJonesParameters::from_epsilon_sigma(1.0, 0.3 * spacing);

    let mut particles = Vec::with_capacity(n_per_axis.pow(3));
    for k in 0..n_per_axis {
        for j in 0..n_per_axis {
            for i in 0..n_per_axis {
                let position = [
                    (i as f64 + 0.5) * spacing + jitter.sample(&mut range),
                    (j as f64 + 0.5) * spacing + jitter.sample(&mut range),
                    (k as f64 + 0.5) * spacing + jitter.sample(&mut range),
                ];
                particles.push(Particle::new(position, 0.0).with_lennard_jones(parameters));
            }
        }
    }
    particles
}

/// Rock salt lattice of unit charges, `n_per_axis` ions along each axis with nearest neighbour distance `spacing`.
/// Ions sit at the centres of a periodic cube of side `n_per_axis * spacing` starting at the origin.
pub fn rock_salt_fixture(n_per_axis: usize, spacing: f64) -> Vec<Particle> {
    let mut particles = Vec::with_capacity(n_per_axis.pow(3));
    for k in 0..n_per_axis {
        for j in 0..n_per_axis {
            for i in 0..n_per_axis {
                let charge = if (i + j + k) % 2 == 0 { 1.0 } else { -1.0 };
                let position = [
                    (i as f64 + 0.5) * spacing,
                    (j as f64 + 0.5) * spacing,
                    (k as f64 + 0.5) * spacing,
                ];
                particles.push(Particle::new(position, charge));
            }
        }
    }
    particles
}
