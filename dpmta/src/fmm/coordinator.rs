//! The master process: validation and distribution of particles, and reassembly of the workers' results.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    thread::JoinHandle,
    time::Instant,
};

use log::{debug, info, warn};

use crate::{
    comm::{
        wire::{Message, WorkerResults},
        LocalCommunicator,
    },
    fmm::{
        constants::{MASTER_RANK, RESIZE_WARNING_STREAK},
        helpers::add_scaled,
        types::{Boundary, Energies, FmmResult, Particle, ParticleResult, Settings, Topology},
        worker::Worker,
    },
    traits::{
        comm::Communicator,
        types::{FmmError, Phase, PhaseTime},
    },
    tree::types::{CellIndex, CellTable, Domain, InteractionLists, SharedCellTable},
};

/// Where the workers of a coordinator run.
enum Backend<C: Communicator> {
    /// The master runs a worker of a group of one itself.
    Serial(Box<Worker<LocalCommunicator>>),

    /// Workers are ranks `1..` of the world communicator, optionally threads of this process.
    Group {
        world: C,
        handles: Vec<JoinHandle<Result<(), FmmError>>>,
    },
}

/// Distributed parallel multipole tree engine, evaluated once per timestep.
///
/// The cell table is rebuilt whenever the volume changes, every worker replaces its operators along with it.
pub struct Dpmta<C: Communicator = LocalCommunicator> {
    settings: Settings,
    backend: Backend<C>,
    lists: InteractionLists,
    nworkers: usize,
    table: Option<SharedCellTable>,
    resize_streak: usize,
    lost: Option<String>,
}

impl Dpmta<LocalCommunicator> {
    /// Coordinator of an in-process topology.
    pub(crate) fn local(settings: Settings, topology: Topology) -> Result<Self, FmmError> {
        match topology {
            Topology::SingleProcess => {
                let world = group_member(1)?;
                let peers = group_member(1)?;
                let worker = Worker::new(settings.clone(), world, peers)?;
                Ok(Self::new(settings, Backend::Serial(Box::new(worker)), 1))
            }

            Topology::WorkerGroup(nworkers) => {
                let mut world = LocalCommunicator::group(nworkers + 1).into_iter();
                let master = world.next().ok_or_else(|| {
                    FmmError::Configuration("empty communicator group".to_string())
                })?;

                // Workers are constructed here so that a configuration error surfaces before any thread starts
                let workers = world
                    .zip(LocalCommunicator::group(nworkers))
                    .map(|(world, peers)| Worker::new(settings.clone(), world, peers))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut handles = Vec::with_capacity(nworkers);
                for worker in workers {
                    let handle = std::thread::Builder::new()
                        .name(format!("dpmta-worker-{}", worker.rank()))
                        .spawn(move || worker.serve())
                        .map_err(|e| FmmError::Failed(format!("failed to start a worker thread: {e}")))?;
                    handles.push(handle);
                }

                Ok(Self::new(
                    settings,
                    Backend::Group {
                        world: master,
                        handles,
                    },
                    nworkers,
                ))
            }
        }
    }
}

fn group_member(size: usize) -> Result<LocalCommunicator, FmmError> {
    LocalCommunicator::group(size)
        .into_iter()
        .next()
        .ok_or_else(|| FmmError::Configuration("empty communicator group".to_string()))
}

impl<C: Communicator> Dpmta<C> {
    fn new(settings: Settings, backend: Backend<C>, nworkers: usize) -> Self {
        let lists = InteractionLists::new(
            settings.well_separation,
            settings.parent_conversion,
            settings.mac_theta,
            settings.sort_lists,
        );
        Self {
            settings,
            backend,
            lists,
            nworkers,
            table: None,
            resize_streak: 0,
            lost: None,
        }
    }

    /// Coordinator driving the worker ranks of an existing communicator, which must all be serving.
    ///
    /// # Arguments
    /// * `settings` - Settings, identical to those of every worker.
    /// * `world` - Communicator in which this process is the master rank and every other rank a worker.
    pub(crate) fn with_communicator(settings: Settings, world: C) -> Result<Self, FmmError> {
        if world.rank() != MASTER_RANK {
            return Err(FmmError::Configuration(format!(
                "the coordinator must be rank {MASTER_RANK}, found rank {}",
                world.rank()
            )));
        }
        if world.size() < 2 {
            return Err(FmmError::Configuration(
                "a communicator of at least two ranks is needed to hold the master and a worker".to_string(),
            ));
        }
        let nworkers = world.size() - 1;
        Ok(Self::new(
            settings,
            Backend::Group {
                world,
                handles: Vec::new(),
            },
            nworkers,
        ))
    }

    /// Settings the coordinator was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of worker processes.
    pub fn nworkers(&self) -> usize {
        self.nworkers
    }

    /// The current cell table, available after the first timestep.
    pub fn table(&self) -> Option<&CellTable> {
        self.table.as_deref()
    }

    /// Compute forces, potentials, energies and optionally the virial of one timestep.
    ///
    /// # Arguments
    /// * `particles` - Particles of the timestep, results are returned in the same order.
    pub fn evaluate(&mut self, particles: &[Particle]) -> Result<FmmResult, FmmError> {
        if let Some(lost) = &self.lost {
            return Err(FmmError::Failed(format!("the worker group stopped in an earlier timestep: {lost}")));
        }

        let mut times = Vec::new();
        let start = Instant::now();

        // Distribute
        let particles = self.prepare(particles)?;
        let table = self.update_table(&particles)?;
        let (owned, ghosts) = self.partition(&table, &particles);
        times.push(PhaseTime {
            phase: Phase::Distribute,
            time: start.elapsed(),
        });
        debug!(
            "distributed {} particles over {} workers, generation {}",
            particles.len(),
            self.nworkers,
            table.generation
        );

        let results = match &mut self.backend {
            Backend::Serial(worker) => {
                let (owned, ghosts) = (owned.into_iter().next(), ghosts.into_iter().next());
                let (results, worker_times) = worker.step(
                    table.generation,
                    owned.unwrap_or_default(),
                    ghosts.unwrap_or_default(),
                )?;
                times.extend(worker_times);
                vec![(table.generation, results)]
            }

            Backend::Group { world, .. } => {
                match exchange(world, table.generation, owned, ghosts, &mut times) {
                    Ok(results) => results,
                    Err(e) => {
                        self.lost = Some(e.to_string());
                        return Err(e);
                    }
                }
            }
        };

        let mut result = self.assemble(&table, &particles, results)?;
        result.times = times;
        Ok(result)
    }

    /// Validate the input and place it in the volume, assigning identifiers.
    fn prepare(&self, particles: &[Particle]) -> Result<Vec<Particle>, FmmError> {
        particles
            .iter()
            .enumerate()
            .map(|(index, particle)| {
                if !particle.position.iter().all(|x| x.is_finite()) {
                    return Err(FmmError::Geometry {
                        index,
                        reason: format!("non finite position {:?}", particle.position),
                    });
                }
                if !particle.charge.is_finite() {
                    return Err(FmmError::Geometry {
                        index,
                        reason: format!("non finite charge {}", particle.charge),
                    });
                }
                if let Some(lj) = particle.lennard_jones {
                    let admissible = |x: f64| x.is_finite() && x >= 0.0;
                    if !admissible(lj.repulsion) || !admissible(lj.dispersion) {
                        return Err(FmmError::Geometry {
                            index,
                            reason: format!(
                                "Lennard-Jones parameters must be finite and non negative, found A = {} and B = {}",
                                lj.repulsion, lj.dispersion
                            ),
                        });
                    }
                }

                let mut particle = *particle;
                particle.id = index;
                match self.settings.boundary {
                    Boundary::Periodic(domain) => particle.position = domain.wrap(&particle.position),
                    Boundary::Fixed(domain) if !domain.contains(&particle.position) => {
                        return Err(FmmError::Geometry {
                            index,
                            reason: format!(
                                "position {:?} lies outside the fixed volume {:?}",
                                particle.position, domain
                            ),
                        })
                    }
                    _ => {}
                }
                Ok(particle)
            })
            .collect()
    }

    /// The table of this timestep, rebuilt and sent to every worker when the volume changed.
    fn update_table(&mut self, particles: &[Particle]) -> Result<SharedCellTable, FmmError> {
        let domain = match (self.settings.boundary, self.table.as_ref()) {
            (Boundary::Periodic(domain) | Boundary::Fixed(domain), _) => domain,
            (Boundary::Open, Some(table)) if particles.iter().all(|p| table.domain.contains(&p.position)) => {
                table.domain
            }
            (Boundary::Open, _) => Domain::from_points(particles.iter().map(|p| &p.position))
                .unwrap_or_else(|| Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0])),
        };

        if let Some(table) = self.table.as_ref().filter(|t| t.domain == domain) {
            self.resize_streak = 0;
            return Ok(table.clone());
        }

        let generation = match self.table.as_ref() {
            Some(previous) => {
                self.resize_streak += 1;
                if self.resize_streak == RESIZE_WARNING_STREAK {
                    warn!(
                        "cell table rebuilt on {} consecutive timesteps, consider a fixed volume",
                        self.resize_streak
                    );
                }
                previous.generation + 1
            }
            None => 1,
        };

        let table = CellTable::new(
            generation,
            domain,
            self.settings.levels,
            self.settings.boundary.is_periodic(),
            self.nworkers,
            self.settings.policy.as_ref(),
        )?;

        match &mut self.backend {
            Backend::Serial(worker) => worker.install(table.clone())?,
            Backend::Group { world, .. } => {
                if let Err(e) = world.broadcast(MASTER_RANK, Some(Message::CellTable(table.clone()).encode())) {
                    self.lost = Some(e.to_string());
                    return Err(e);
                }
            }
        }
        info!("installed cell table generation {generation} on {} workers", self.nworkers);

        let table = Arc::new(table);
        self.table = Some(table.clone());
        Ok(table)
    }

    /// Particles owned by each worker, and the ghosts each needs for its direct lists.
    fn partition(&self, table: &CellTable, particles: &[Particle]) -> (Vec<Vec<Particle>>, Vec<Vec<Particle>>) {
        let leaf_level = table.leaf_level();
        let mut leaves: BTreeMap<CellIndex, Vec<Particle>> = BTreeMap::new();
        for particle in particles {
            let leaf = CellIndex::from_point(&particle.position, &table.domain, leaf_level);
            leaves.entry(leaf).or_default().push(*particle);
        }

        let mut owned = vec![Vec::new(); self.nworkers];
        let mut ghosts = vec![Vec::new(); self.nworkers];
        for (leaf, resident) in leaves {
            let owner = table.owner(&leaf);

            // Direct lists are symmetric, the leaves listing this one are those it lists
            let neighbours = self
                .lists
                .near_sources(&leaf, table.periodic)
                .map(|(cell, _)| table.owner(&cell))
                .filter(|&rank| rank != owner)
                .collect::<BTreeSet<_>>();

            for rank in neighbours {
                ghosts[rank].extend_from_slice(&resident);
            }
            owned[owner].extend(resident);
        }
        (owned, ghosts)
    }

    /// Check every worker's results against the distributed particles and reassemble them in input order.
    fn assemble(
        &self,
        table: &CellTable,
        distributed: &[Particle],
        results: Vec<(u64, WorkerResults)>,
    ) -> Result<FmmResult, FmmError> {
        let leaf_level = table.leaf_level();
        let leaves = distributed
            .iter()
            .map(|p| CellIndex::from_point(&p.position, &table.domain, leaf_level))
            .collect::<BTreeSet<_>>();

        let mut particles = vec![None; distributed.len()];
        let mut energy = Energies::default();
        let mut virial = [[0f64; 3]; 3];

        for (rank, (generation, results)) in results.into_iter().enumerate() {
            if let Some(fault) = results.fault {
                return Err(FmmError::Synchronization(format!("worker {rank}: {fault}")));
            }

            if generation != table.generation {
                return Err(FmmError::Synchronization(format!(
                    "worker {rank} returned results of generation {generation}, expected {}",
                    table.generation
                )));
            }

            let expected = table.occupied(rank, leaves.iter().copied());
            if results.occupied_cells != expected {
                return Err(FmmError::Synchronization(format!(
                    "worker {rank} indexed particles in {:?} cells per level, {:?} were sent to it",
                    results.occupied_cells, expected
                )));
            }

            for record in results.records {
                let slot = particles.get_mut(record.id as usize).ok_or_else(|| {
                    FmmError::Synchronization(format!(
                        "worker {rank} returned unknown particle {}",
                        record.id
                    ))
                })?;
                if slot.replace(record.result()).is_some() {
                    return Err(FmmError::Synchronization(format!(
                        "particle {} returned twice",
                        record.id
                    )));
                }
            }

            energy.coulomb += results.energies[0];
            energy.lennard_jones += results.energies[1];
            add_scaled(&mut virial, &results.virial, 1.0);
        }
        energy.total = energy.coulomb + energy.lennard_jones;

        let particles = particles
            .into_iter()
            .enumerate()
            .map(|(id, result)| {
                result.ok_or_else(|| FmmError::Synchronization(format!("no result for particle {id}")))
            })
            .collect::<Result<Vec<ParticleResult>, _>>()?;

        Ok(FmmResult {
            particles,
            energy,
            virial: self.settings.virial.map(|_| virial),
            generation: table.generation,
            times: Vec::new(),
        })
    }
}

/// Scatter the particles of one timestep over the worker ranks, follow them through the phase barriers and gather
/// their results. Any error leaves the group unusable.
fn exchange<C: Communicator>(
    world: &C,
    generation: u64,
    owned: Vec<Vec<Particle>>,
    ghosts: Vec<Vec<Particle>>,
    times: &mut Vec<PhaseTime>,
) -> Result<Vec<(u64, WorkerResults)>, FmmError> {
    for (rank, (owned, ghosts)) in owned.into_iter().zip(ghosts).enumerate() {
        let message = Message::Particles {
            generation,
            owned,
            ghosts,
        };
        world.send(rank + 1, message.encode())?;
    }

    let mut clock = Instant::now();
    for phase in [Phase::Build, Phase::Upward, Phase::Exchange, Phase::Downward, Phase::Direct] {
        world
            .barrier()
            .map_err(|e| FmmError::Failed(format!("phase {phase:?} did not complete: {e}")))?;
        times.push(PhaseTime {
            phase,
            time: clock.elapsed(),
        });
        clock = Instant::now();
        debug!("phase {phase:?} complete");
    }

    let nworkers = world.size() - 1;
    let mut results = Vec::with_capacity(nworkers);
    for rank in 1..=nworkers {
        match Message::decode(&world.receive(rank)?)? {
            Message::Results {
                generation,
                results: r,
            } => results.push((generation, r)),
            other => {
                return Err(FmmError::Synchronization(format!(
                    "expected results from worker {}, found {}",
                    rank - 1,
                    other.name()
                )))
            }
        }
    }
    times.push(PhaseTime {
        phase: Phase::Gather,
        time: clock.elapsed(),
    });
    Ok(results)
}

impl<C: Communicator> Drop for Dpmta<C> {
    fn drop(&mut self) {
        if let Backend::Group { world, handles } = &mut self.backend {
            for rank in 1..world.size() {
                if let Err(e) = world.send(rank, Message::Shutdown.encode()) {
                    warn!("failed to shut down worker {}: {e}", rank - 1);
                }
            }
            for handle in handles.drain(..) {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("worker exited with an error: {e}"),
                    Err(_) => warn!("worker thread panicked"),
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        fmm::{
            builder::DpmtaBuilder,
            direct,
            types::{Interactions, LennardJonesParameters},
        },
        tree::helpers::particles_fixture,
    };

    fn build(topology: Topology) -> Dpmta {
        DpmtaBuilder::new()
            .expansion_order(8)
            .unwrap()
            .levels(3)
            .unwrap()
            .topology(topology)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_serial_matches_direct() {
        let particles = particles_fixture(200, 10);
        let mut fmm = build(Topology::SingleProcess);
        let result = fmm.evaluate(&particles).unwrap();
        let expected = direct::evaluate(&particles, Interactions::default(), false).unwrap();

        assert_eq!(result.particles.len(), particles.len());
        assert_relative_eq!(result.energy.coulomb, expected.energy.coulomb, max_relative = 1e-3);
        assert_eq!(result.generation, 1);
        assert_eq!(result.times.len(), 7);
        assert!(result.virial.is_none());
    }

    #[test]
    fn test_worker_group_matches_serial() {
        let particles = particles_fixture(300, 11);
        let serial = build(Topology::SingleProcess).evaluate(&particles).unwrap();
        let group = build(Topology::WorkerGroup(3)).evaluate(&particles).unwrap();

        assert_relative_eq!(serial.energy.total, group.energy.total, max_relative = 1e-10);
        for (s, g) in serial.particles.iter().zip(group.particles.iter()) {
            for i in 0..3 {
                assert_relative_eq!(s.force[i], g.force[i], epsilon = 1e-10, max_relative = 1e-9);
            }
        }
        assert_eq!(group.times.len(), 7);
    }

    #[test]
    fn test_table_reuse_and_resize() {
        let mut particles = particles_fixture(50, 12);
        let mut fmm = build(Topology::WorkerGroup(2));

        assert_eq!(fmm.evaluate(&particles).unwrap().generation, 1);
        assert_eq!(fmm.evaluate(&particles).unwrap().generation, 1);

        particles[0].position = [3.0, 0.5, 0.5];
        let result = fmm.evaluate(&particles).unwrap();
        assert_eq!(result.generation, 2);
        assert!(fmm.table().unwrap().domain.contains(&[3.0, 0.5, 0.5]));
    }

    #[test]
    fn test_geometry_errors() {
        let mut fmm = build(Topology::WorkerGroup(2));
        let particles = vec![
            Particle::new([0.0, 0.0, 0.0], 1.0),
            Particle::new([f64::NAN, 0.0, 0.0], 1.0),
        ];
        assert!(matches!(
            fmm.evaluate(&particles),
            Err(FmmError::Geometry { index: 1, .. })
        ));

        // The protocol is intact after a rejected timestep
        let particles = particles_fixture(20, 13);
        assert!(fmm.evaluate(&particles).is_ok());

        let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
        let mut fixed = DpmtaBuilder::new()
            .boundary(Boundary::Fixed(domain))
            .unwrap()
            .build()
            .unwrap();
        let outside = vec![Particle::new([0.5, 0.5, 0.5], 1.0), Particle::new([1.5, 0.5, 0.5], 1.0)];
        assert!(matches!(
            fixed.evaluate(&outside),
            Err(FmmError::Geometry { index: 1, .. })
        ));
    }

    #[test]
    fn test_lennard_jones_parameter_errors() {
        let interactions = Interactions {
            coulomb: true,
            lennard_jones: true,
        };
        let mut fmm = DpmtaBuilder::new().interactions(interactions).unwrap().build().unwrap();

        let well = LennardJonesParameters::from_epsilon_sigma(1.0, 0.1);
        let rejected = [
            LennardJonesParameters {
                repulsion: -1.0,
                dispersion: well.dispersion,
            },
            LennardJonesParameters {
                repulsion: well.repulsion,
                dispersion: f64::INFINITY,
            },
            LennardJonesParameters {
                repulsion: f64::NAN,
                dispersion: well.dispersion,
            },
        ];

        for parameters in rejected {
            let particles = vec![
                Particle::new([0.2, 0.2, 0.2], 1.0).with_lennard_jones(well),
                Particle::new([0.8, 0.8, 0.8], -1.0).with_lennard_jones(parameters),
            ];
            assert!(matches!(
                fmm.evaluate(&particles),
                Err(FmmError::Geometry { index: 1, .. })
            ));
        }

        // Zero coefficients switch a channel off
        let silent = LennardJonesParameters {
            repulsion: 0.0,
            dispersion: 0.0,
        };
        let particles = vec![
            Particle::new([0.2, 0.2, 0.2], 1.0).with_lennard_jones(well),
            Particle::new([0.8, 0.8, 0.8], -1.0).with_lennard_jones(silent),
        ];
        let result = fmm.evaluate(&particles).unwrap();
        assert_eq!(result.energy.lennard_jones, 0.0);
    }

    #[test]
    fn test_lost_worker_fails_the_timestep() {
        let open = DpmtaBuilder::new().expansion_order(4).unwrap().levels(2).unwrap();
        let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
        let periodic = open.clone().boundary(Boundary::Periodic(domain)).unwrap();

        // The second worker disagrees with the coordinator's boundary and rejects the first cell table
        let mut world = LocalCommunicator::group(3).into_iter();
        let master = world.next().unwrap();
        let handles = world
            .zip(LocalCommunicator::group(2))
            .zip([open.clone(), periodic])
            .map(|((world, peers), builder)| thread::spawn(move || builder.serve(world, peers)))
            .collect::<Vec<_>>();

        let mut fmm = open.build_with_communicator(master).unwrap();
        let particles = particles_fixture(40, 15);
        assert!(fmm.evaluate(&particles).is_err());
        assert!(matches!(fmm.evaluate(&particles), Err(FmmError::Failed(_))));

        // Dropping the coordinator releases the surviving worker
        drop(fmm);
        let outcomes = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();
        assert!(outcomes[0].is_err());
        assert!(matches!(outcomes[1], Err(FmmError::Configuration(_))));
    }

    #[test]
    fn test_empty_input() {
        let mut fmm = build(Topology::WorkerGroup(2));
        let result = fmm.evaluate(&[]).unwrap();
        assert!(result.particles.is_empty());
        assert_eq!(result.energy.total, 0.0);
    }

    #[test]
    fn test_occupied_cell_mismatch() {
        let fmm = build(Topology::WorkerGroup(2));
        let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
        let table = CellTable::new(1, domain, 3, false, 2, fmm.settings.policy.as_ref()).unwrap();
        let particles = fmm.prepare(&particles_fixture(30, 16)).unwrap();
        let leaves = particles
            .iter()
            .map(|p| CellIndex::from_point(&p.position, &domain, 2))
            .collect::<Vec<_>>();

        let honest = |rank: usize| {
            let results = WorkerResults {
                occupied_cells: table.occupied(rank, leaves.iter().copied()),
                ..Default::default()
            };
            (1, results)
        };

        // Worker 1 indexed its particles in one leaf more than it was sent
        let mut skewed = honest(1);
        skewed.1.occupied_cells[2] += 1;
        let error = fmm.assemble(&table, &particles, vec![honest(0), skewed]).unwrap_err();
        assert!(matches!(error, FmmError::Synchronization(ref e) if e.starts_with("worker 1 indexed")));

        // Matching bookkeeping gets as far as the missing particle results
        let error = fmm.assemble(&table, &particles, vec![honest(0), honest(1)]).unwrap_err();
        assert!(matches!(error, FmmError::Synchronization(ref e) if e.starts_with("no result")));
    }

    #[test]
    fn test_partition_ghosts() {
        let fmm = build(Topology::WorkerGroup(2));
        let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
        let table = CellTable::new(1, domain, 3, false, 2, fmm.settings.policy.as_ref()).unwrap();
        let particles = fmm.prepare(&particles_fixture(100, 14)).unwrap();

        let (owned, ghosts) = fmm.partition(&table, &particles);
        assert_eq!(owned.iter().map(Vec::len).sum::<usize>(), particles.len());

        for (rank, ghosts) in ghosts.iter().enumerate() {
            for ghost in ghosts {
                let leaf = CellIndex::from_point(&ghost.position, &domain, 2);
                assert_ne!(table.owner(&leaf), rank);
                assert!(fmm
                    .lists
                    .near_sources(&leaf, false)
                    .any(|(cell, _)| table.owner(&cell) == rank));
            }
        }
    }
}
