//! End to end scenarios through the public coordinator, checked against direct summation.
use approx::assert_relative_eq;
use rand::prelude::*;

use dpmta::{
    fmm::direct,
    tree::{
        helpers::{lennard_jones_fixture, particles_fixture, rock_salt_fixture},
        ownership::RowColumn,
    },
    Boundary, Domain, DpmtaBuilder, FmmResult, Interactions, M2lMethod, MacroscopicMode, Particle, Topology,
    VirialMode,
};

/// Madelung constant of the rock salt structure, referred to the nearest neighbour distance.
const MADELUNG_NACL: f64 = 1.747_564_594_633;

fn builder(expansion_order: usize, levels: u32, topology: Topology) -> DpmtaBuilder {
    DpmtaBuilder::new()
        .expansion_order(expansion_order)
        .unwrap()
        .levels(levels)
        .unwrap()
        .topology(topology)
        .unwrap()
}

fn energy_error(found: &FmmResult, expected: &FmmResult) -> f64 {
    ((found.energy.total - expected.energy.total) / expected.energy.total).abs()
}

fn net_force(result: &FmmResult) -> ([f64; 3], f64) {
    let mut total = [0f64; 3];
    let mut magnitude = 0f64;
    for particle in result.particles.iter() {
        for i in 0..3 {
            total[i] += particle.force[i];
            magnitude += particle.force[i].abs();
        }
    }
    (total, magnitude)
}

#[test]
fn test_error_shrinks_with_order() {
    let particles = particles_fixture(500, 0);
    let expected = direct::evaluate(&particles, Interactions::default(), false).unwrap();

    let errors = [3, 6, 9]
        .into_iter()
        .map(|order| {
            let mut fmm = builder(order, 3, Topology::WorkerGroup(2)).build().unwrap();
            let found = fmm.evaluate(&particles).unwrap();

            let force_error = found
                .particles
                .iter()
                .zip(expected.particles.iter())
                .flat_map(|(f, e)| (0..3).map(move |i| (f.force[i] - e.force[i]).powi(2)))
                .sum::<f64>()
                .sqrt();
            force_error
        })
        .collect::<Vec<_>>();

    assert!(errors[1] < errors[0]);
    assert!(errors[2] < errors[1]);
}

#[test]
fn test_unit_charges_row_column() {
    // 1000 unit charges in a cube of side 10
    let mut rng = StdRng::seed_from_u64(1);
    let particles = (0..1000)
        .map(|_| Particle::new([10.0 * rng.gen::<f64>(), 10.0 * rng.gen::<f64>(), 10.0 * rng.gen::<f64>()], 1.0))
        .collect::<Vec<_>>();

    let mut fmm = builder(6, 3, Topology::WorkerGroup(4))
        .ownership(RowColumn::Columns)
        .build()
        .unwrap();
    let found = fmm.evaluate(&particles).unwrap();
    let expected = direct::evaluate(&particles, Interactions::default(), false).unwrap();

    assert!(energy_error(&found, &expected) < 1e-4);

    let (total, magnitude) = net_force(&found);
    for t in total {
        assert!(t.abs() < 1e-3 * magnitude);
    }
}

#[test]
fn test_one_particle_per_leaf() {
    let levels = 4;
    let n = 1 << (levels - 1);
    let h = 1.0 / n as f64;
    let mut rng = StdRng::seed_from_u64(2);

    let mut particles = Vec::new();
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let centre = [(i as f64 + 0.5) * h, (j as f64 + 0.5) * h, (k as f64 + 0.5) * h];
                particles.push(Particle::new(centre, rng.gen_range(-1.0..1.0)));
            }
        }
    }

    let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
    let mut fmm = builder(8, levels, Topology::WorkerGroup(3))
        .boundary(Boundary::Fixed(domain))
        .unwrap()
        .build()
        .unwrap();
    let found = fmm.evaluate(&particles).unwrap();
    let expected = direct::evaluate(&particles, Interactions::default(), false).unwrap();

    assert_eq!(found.particles.len(), n * n * n);
    for (f, e) in found.particles.iter().zip(expected.particles.iter()) {
        assert_relative_eq!(f.potential, e.potential, epsilon = 1e-3, max_relative = 1e-3);
    }
}

#[test]
fn test_worker_count_independence() {
    let particles = particles_fixture(400, 3);
    let results = [Topology::SingleProcess, Topology::WorkerGroup(2), Topology::WorkerGroup(5)]
        .into_iter()
        .map(|topology| builder(6, 4, topology).build().unwrap().evaluate(&particles).unwrap())
        .collect::<Vec<_>>();

    for other in results[1..].iter() {
        assert_relative_eq!(results[0].energy.total, other.energy.total, max_relative = 1e-10);
        for (a, b) in results[0].particles.iter().zip(other.particles.iter()) {
            for i in 0..3 {
                assert_relative_eq!(a.force[i], b.force[i], epsilon = 1e-10, max_relative = 1e-9);
            }
        }
    }
}

#[test]
fn test_repeated_steps_are_identical() {
    let particles = particles_fixture(300, 4);
    let mut fmm = builder(6, 3, Topology::WorkerGroup(3)).build().unwrap();

    let first = fmm.evaluate(&particles).unwrap();
    let second = fmm.evaluate(&particles).unwrap();
    assert_eq!(first.generation, second.generation);
    assert_eq!(first.particles, second.particles);
    assert_eq!(first.energy, second.energy);
}

#[test]
fn test_rock_salt_madelung() {
    let n = 4;
    let spacing = 1.0;
    let particles = rock_salt_fixture(n, spacing);
    let side = n as f64 * spacing;
    let domain = Domain::new(&[0.0, 0.0, 0.0], &[side, side, side]);

    let mut fmm = builder(8, 3, Topology::WorkerGroup(2))
        .boundary(Boundary::Periodic(domain))
        .unwrap()
        .macroscopic(MacroscopicMode::Refined, 8)
        .virial(Some(VirialMode::Refined))
        .build()
        .unwrap();
    let found = fmm.evaluate(&particles).unwrap();

    // Every ion sits at a centre of symmetry
    for particle in found.particles.iter() {
        for f in particle.force {
            assert!(f.abs() < 1e-3);
        }
    }

    let expected = -(particles.len() as f64) * MADELUNG_NACL / (2.0 * spacing);
    assert_relative_eq!(found.energy.coulomb, expected, max_relative = 1e-4);

    // Without a dipole the trace of the virial equals the Coulomb energy
    let w = found.virial.unwrap();
    assert_relative_eq!(w[0][0] + w[1][1] + w[2][2], found.energy.coulomb, max_relative = 1e-3);
}

#[test]
fn test_virial_modes_agree_when_open() {
    let particles = particles_fixture(300, 5);
    let expected = direct::evaluate(&particles, Interactions::default(), true).unwrap();

    let virials = [VirialMode::Legacy, VirialMode::Refined]
        .into_iter()
        .map(|mode| {
            builder(8, 3, Topology::WorkerGroup(2))
                .virial(Some(mode))
                .build()
                .unwrap()
                .evaluate(&particles)
                .unwrap()
                .virial
                .unwrap()
        })
        .collect::<Vec<_>>();

    let w = expected.virial.unwrap();
    let scale = (0..3).map(|i| w[i][i].abs()).fold(0f64, f64::max);
    for i in 0..3 {
        for j in 0..3 {
            assert_eq!(virials[0][i][j], virials[1][i][j]);
            assert!((virials[0][i][j] - w[i][j]).abs() < 1e-3 * scale);
        }
    }
}

#[test]
fn test_fft_matches_dense() {
    let particles = particles_fixture(500, 6);
    let evaluate = |method| {
        builder(6, 4, Topology::WorkerGroup(2))
            .m2l(method)
            .fft_blocking_factor(3)
            .unwrap()
            .build()
            .unwrap()
            .evaluate(&particles)
            .unwrap()
    };

    let dense = evaluate(M2lMethod::Dense);
    let fft = evaluate(M2lMethod::Fft);
    assert_relative_eq!(dense.energy.total, fft.energy.total, max_relative = 1e-10);
    for (d, f) in dense.particles.iter().zip(fft.particles.iter()) {
        assert_relative_eq!(d.potential, f.potential, epsilon = 1e-10, max_relative = 1e-8);
    }
}

#[test]
fn test_lennard_jones_matches_direct() {
    let particles = lennard_jones_fixture(8, 0.125, 7);
    let interactions = Interactions {
        coulomb: false,
        lennard_jones: true,
    };
    let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);

    let mut fmm = builder(6, 3, Topology::WorkerGroup(2))
        .interactions(interactions)
        .unwrap()
        .boundary(Boundary::Fixed(domain))
        .unwrap()
        .build()
        .unwrap();
    let found = fmm.evaluate(&particles).unwrap();
    let expected = direct::evaluate(&particles, interactions, false).unwrap();

    assert_eq!(found.energy.coulomb, 0.0);
    assert_relative_eq!(found.energy.lennard_jones, expected.energy.lennard_jones, max_relative = 1e-3);
    for (f, e) in found.particles.iter().zip(expected.particles.iter()) {
        for i in 0..3 {
            assert_relative_eq!(f.force[i], e.force[i], epsilon = 1e-3, max_relative = 1e-2);
        }
    }
}

#[test]
fn test_periodic_wrapping() {
    // Positions one lattice vector apart are the same particle
    let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
    let mut particles = particles_fixture(100, 8);
    let net = particles.iter().map(|p| p.charge).sum::<f64>() / particles.len() as f64;
    particles.iter_mut().for_each(|p| p.charge -= net);

    let mut fmm = builder(6, 3, Topology::WorkerGroup(2))
        .boundary(Boundary::Periodic(domain))
        .unwrap()
        .build()
        .unwrap();
    let inside = fmm.evaluate(&particles).unwrap();

    let shifted = particles
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut p = *p;
            p.position[i % 3] += if i % 2 == 0 { 1.0 } else { -2.0 };
            p
        })
        .collect::<Vec<_>>();
    let outside = fmm.evaluate(&shifted).unwrap();

    assert_eq!(inside.generation, outside.generation);
    assert_relative_eq!(inside.energy.total, outside.energy.total, max_relative = 1e-9);
}
