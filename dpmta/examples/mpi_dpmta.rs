#[cfg(feature = "mpi")]
fn main() {
    use dpmta::{
        comm::MpiCommunicator,
        fmm::direct,
        tree::{helpers::particles_fixture, ownership::RowColumn},
        DpmtaBuilder, Interactions, VirialMode,
    };

    let (universe, _threading) = mpi::initialize_with_threading(mpi::Threading::Funneled).unwrap();
    let world = universe.world();
    let (world, peers) = MpiCommunicator::world_and_peers(&world);

    // Fmm parameters, identical on every rank
    let builder = DpmtaBuilder::new()
        .expansion_order(6)
        .unwrap()
        .levels(4)
        .unwrap()
        .ownership(RowColumn::Columns)
        .virial(Some(VirialMode::Refined));

    match peers {
        // Rank 0 coordinates
        None => {
            let particles = particles_fixture(10000, 0);
            let mut fmm = builder.build_with_communicator(world).unwrap();

            for step in 0..3 {
                let result = fmm.evaluate(&particles).unwrap();
                println!(
                    "step {step}: energy {:.6e}, generation {}",
                    result.energy.total, result.generation
                );
                for time in result.times.iter() {
                    println!("  {:?} {:?}", time.phase, time.time);
                }
            }

            let sample = &particles[..1000];
            let expected = direct::evaluate(sample, Interactions::default(), false).unwrap();
            let found = fmm.evaluate(sample).unwrap();
            println!(
                "relative energy error {:.3e}",
                ((found.energy.total - expected.energy.total) / expected.energy.total).abs()
            );
        }

        // Every other rank is a worker
        Some(peers) => builder.serve(world, peers).unwrap(),
    }
}

#[cfg(not(feature = "mpi"))]
fn main() {}
