use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use dpmta::fmm::direct;
use dpmta::tree::helpers::particles_fixture;
use dpmta::{DpmtaBuilder, Interactions, M2lMethod, Topology};

fn coulomb_forces_f64(c: &mut Criterion) {
    // Setup random charges in the unit cube
    let nparticles = 20000;
    let particles = particles_fixture(nparticles, 0);

    // FMM parameters
    let expansion_order = 6;
    let levels = 5;

    let mut fmm_dense = DpmtaBuilder::new()
        .expansion_order(expansion_order)
        .unwrap()
        .levels(levels)
        .unwrap()
        .topology(Topology::WorkerGroup(4))
        .unwrap()
        .m2l(M2lMethod::Dense)
        .build()
        .unwrap();

    let mut fmm_fft = DpmtaBuilder::new()
        .expansion_order(expansion_order)
        .unwrap()
        .levels(levels)
        .unwrap()
        .topology(Topology::WorkerGroup(4))
        .unwrap()
        .m2l(M2lMethod::Fft)
        .build()
        .unwrap();

    let mut fmm_serial = DpmtaBuilder::new()
        .expansion_order(expansion_order)
        .unwrap()
        .levels(levels)
        .unwrap()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("Coulomb Forces f64");
    group
        .sample_size(10)
        .measurement_time(Duration::from_secs(15));

    group.bench_function(format!("M2L=Dense, workers=4, N={nparticles}"), |b| {
        b.iter(|| fmm_dense.evaluate(&particles).unwrap())
    });

    group.bench_function(format!("M2L=FFT, workers=4, N={nparticles}"), |b| {
        b.iter(|| fmm_fft.evaluate(&particles).unwrap())
    });

    group.bench_function(format!("M2L=Dense, serial, N={nparticles}"), |b| {
        b.iter(|| fmm_serial.evaluate(&particles).unwrap())
    });
}

fn direct_forces_f64(c: &mut Criterion) {
    let nparticles = 2000;
    let particles = particles_fixture(nparticles, 1);

    let mut group = c.benchmark_group("Direct Forces f64");
    group
        .sample_size(10)
        .measurement_time(Duration::from_secs(5));

    group.bench_function(format!("N={nparticles}"), |b| {
        b.iter(|| direct::evaluate(&particles, Interactions::default(), false).unwrap())
    });
}

criterion_group!(coulomb_f64, coulomb_forces_f64, direct_forces_f64);
criterion_main!(coulomb_f64);
