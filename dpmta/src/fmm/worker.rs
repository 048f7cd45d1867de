//! Worker processes: cell ownership state that persists between timesteps, and the phases of one timestep.
use std::{ops::Range, sync::Arc, time::Instant};

use log::{debug, warn};

use crate::{
    comm::wire::{coefficients_from_wire, coefficients_to_wire, Message, ResultRecord, WorkerResults},
    fmm::{
        constants::MASTER_RANK,
        expansions::ExpansionStore,
        harmonic::Coulomb,
        lennard_jones::LennardJones,
        macroscopic::Macroscopic,
        transfer::TransferCache,
        types::{Evaluation, Particle, Settings},
    },
    traits::{
        comm::Communicator,
        fmm::{LatticeCorrection, SourceToTargetTranslation, SourceTranslation, TargetTranslation},
        kernel::ExpansionKernel,
        types::{FmmError, Phase, PhaseTime},
    },
    tree::types::{CellIndex, CellTable, InteractionLists, SharedCellTable},
};

/// Particles resident on a worker, owned and ghost, grouped by leaf in Morton order.
#[derive(Clone, Debug, Default)]
pub struct ParticleIndex {
    particles: Vec<Particle>,
    leaves: Vec<CellIndex>,
    ranges: Vec<Range<usize>>,
}

impl ParticleIndex {
    /// Index the particles received in a timestep.
    ///
    /// # Arguments
    /// * `table` - Current cell table.
    /// * `rank` - Peer rank of the receiving worker.
    /// * `owned` - Particles whose leaves the worker owns.
    /// * `ghosts` - Particles of adjacent leaves owned elsewhere.
    pub fn new(
        table: &CellTable,
        rank: usize,
        owned: Vec<Particle>,
        ghosts: Vec<Particle>,
    ) -> Result<Self, FmmError> {
        let leaf_level = table.leaf_level();
        let mut keyed = Vec::with_capacity(owned.len() + ghosts.len());

        for (is_owned, particle) in owned
            .into_iter()
            .map(|p| (true, p))
            .chain(ghosts.into_iter().map(|p| (false, p)))
        {
            let leaf = CellIndex::from_point(&particle.position, &table.domain, leaf_level);
            if (table.owner(&leaf) == rank) != is_owned {
                return Err(FmmError::Synchronization(format!(
                    "particle {} in leaf {:?} owned by rank {} was sent to rank {rank} as {}",
                    particle.id,
                    leaf,
                    table.owner(&leaf),
                    if is_owned { "owned" } else { "ghost" }
                )));
            }
            keyed.push((leaf, particle));
        }

        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.id.cmp(&b.1.id)));

        let mut leaves = Vec::new();
        let mut ranges: Vec<Range<usize>> = Vec::new();
        for (i, (leaf, _)) in keyed.iter().enumerate() {
            match leaves.last() {
                Some(last) if last == leaf => {
                    if let Some(range) = ranges.last_mut() {
                        range.end = i + 1;
                    }
                }
                _ => {
                    leaves.push(*leaf);
                    ranges.push(i..i + 1);
                }
            }
        }

        Ok(Self {
            particles: keyed.into_iter().map(|(_, p)| p).collect(),
            leaves,
            ranges,
        })
    }

    /// All resident particles.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Number of resident particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Whether no particles are resident.
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Position of a leaf's particles in [`ParticleIndex::particles`], empty for leaves holding none.
    pub fn range(&self, leaf: &CellIndex) -> Range<usize> {
        self.leaves
            .binary_search(leaf)
            .map(|i| self.ranges[i].clone())
            .unwrap_or(0..0)
    }

    /// Occupied leaves, owned and ghost, in Morton order.
    pub fn leaves(&self) -> &[CellIndex] {
        &self.leaves
    }

    /// Particles of a leaf.
    pub fn get(&self, leaf: &CellIndex) -> &[Particle] {
        &self.particles[self.range(leaf)]
    }
}

/// State shared by the kernel passes of one timestep.
pub struct StepContext<'a, C: Communicator> {
    /// Peer rank of this worker.
    pub rank: usize,

    /// Cell table of the timestep.
    pub table: &'a CellTable,

    /// Interaction lists.
    pub lists: &'a InteractionLists,

    /// Resident particles.
    pub particles: &'a ParticleIndex,

    /// Communicator of the workers.
    pub peers: &'a C,

    /// Settings.
    pub settings: &'a Settings,
}

/// Operators of a kernel tied to a cell table generation.
pub struct GenerationCache<K: ExpansionKernel> {
    /// Multipole to local operators.
    pub transfers: TransferCache<K>,

    /// Periodic lattice correction.
    pub lattice: Option<Box<dyn LatticeCorrection<K::Coefficient>>>,
}

/// A kernel and its cached operators.
pub struct KernelState<K: ExpansionKernel> {
    /// Expansion arithmetic.
    pub kernel: K,

    /// Operators of the installed cell table.
    pub cache: Option<GenerationCache<K>>,
}

impl<K: ExpansionKernel> KernelState<K> {
    fn new(kernel: K) -> Self {
        Self {
            kernel,
            cache: None,
        }
    }
}

/// Expansions and results of one kernel during one timestep.
pub struct KernelPass<'a, K: ExpansionKernel, C: Communicator> {
    /// Expansion arithmetic.
    pub kernel: &'a K,

    /// Multipole to local operators.
    pub transfers: &'a TransferCache<K>,

    /// Periodic lattice correction, applied by the root's owner.
    pub lattice: Option<&'a dyn LatticeCorrection<K::Coefficient>>,

    /// Shared timestep state.
    pub context: &'a StepContext<'a, C>,

    /// Multipole expansions of the owned cells.
    pub multipoles: ExpansionStore<K::Coefficient>,

    /// Local expansions of the owned cells.
    pub locals: ExpansionStore<K::Coefficient>,

    /// Multipole expansions fetched from other workers.
    pub remote: ExpansionStore<K::Coefficient>,

    /// Far and near field evaluations, aligned with the particle index.
    pub evaluations: Vec<Evaluation>,

    /// Virial contribution.
    pub virial: [[f64; 3]; 3],

    /// First fault met, after which the pass only keeps the message protocol going.
    pub fault: Option<FmmError>,
}

type Batch<T> = (Vec<CellIndex>, Vec<T>);

impl<'a, K: ExpansionKernel, C: Communicator> KernelPass<'a, K, C> {
    /// Allocate zeroed expansions for every owned cell.
    pub fn new(
        state: &'a KernelState<K>,
        context: &'a StepContext<'a, C>,
        fault: Option<FmmError>,
    ) -> Result<Self, FmmError> {
        let table = context.table;
        let cache = state
            .cache
            .as_ref()
            .filter(|cache| cache.transfers.generation() == table.generation)
            .ok_or_else(|| {
                FmmError::Failed(format!(
                    "no {:?} operators for cell table generation {}",
                    state.kernel.kind(),
                    table.generation
                ))
            })?;

        let n = state.kernel.ncoeffs();
        let owned = (0..table.levels)
            .flat_map(|level| table.owned(context.rank, level))
            .collect::<Vec<_>>();

        Ok(Self {
            kernel: &state.kernel,
            transfers: &cache.transfers,
            lattice: cache.lattice.as_deref(),
            context,
            multipoles: ExpansionStore::new(owned.iter().copied(), n),
            locals: ExpansionStore::new(owned, n),
            remote: ExpansionStore::new(std::iter::empty(), n),
            evaluations: vec![Evaluation::default(); context.particles.len()],
            virial: [[0f64; 3]; 3],
            fault,
        })
    }

    /// Record a fault, only the first is kept.
    pub fn record(&mut self, fault: FmmError) {
        warn!(
            "rank {} {:?} pass: {fault}",
            self.context.rank,
            self.kernel.kind()
        );
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    /// Whether a fault has been recorded.
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// Add `values` to the expansion of `cell` in `store`.
    pub fn accumulate(
        store: &mut ExpansionStore<K::Coefficient>,
        cell: &CellIndex,
        values: &[K::Coefficient],
    ) -> Result<(), FmmError> {
        let slot = store.get_mut(cell).ok_or_else(|| {
            FmmError::Synchronization(format!("no expansion slot for cell {cell:?}"))
        })?;
        for (s, v) in slot.iter_mut().zip(values) {
            *s += *v;
        }
        Ok(())
    }

    fn decode_expansions(&self, buffer: &[u8]) -> Result<Batch<K::Coefficient>, FmmError> {
        let generation = self.context.table.generation;
        let kind = self.kernel.kind();

        match Message::decode(buffer)? {
            Message::Expansions {
                generation: g,
                kernel,
                cells,
                coefficients,
            } if g == generation && kernel == kind => {
                let coefficients = coefficients_from_wire::<K::Coefficient>(&coefficients)?;
                if coefficients.len() != cells.len() * self.kernel.ncoeffs() {
                    return Err(FmmError::Synchronization(format!(
                        "{} coefficients for {} cells",
                        coefficients.len(),
                        cells.len()
                    )));
                }
                Ok((cells, coefficients))
            }
            Message::Expansions {
                generation: g,
                kernel,
                ..
            } => Err(FmmError::Synchronization(format!(
                "expected {kind:?} expansions of generation {generation}, found {kernel:?} of generation {g}"
            ))),
            other => Err(FmmError::Synchronization(format!(
                "expected expansions, found {}",
                other.name()
            ))),
        }
    }

    /// Sparse exchange of expansion batches with every peer, `outgoing[r]` goes to rank `r`. A faulted pass sends
    /// empty batches, undecodable batches are recorded as faults and treated as empty.
    pub fn exchange_expansions(
        &mut self,
        outgoing: Vec<Batch<K::Coefficient>>,
    ) -> Result<Vec<Batch<K::Coefficient>>, FmmError> {
        let generation = self.context.table.generation;
        let kind = self.kernel.kind();
        let faulted = self.is_faulted();

        let buffers = outgoing
            .into_iter()
            .map(|(cells, coefficients)| {
                let (cells, coefficients) = if faulted {
                    (Vec::new(), Vec::new())
                } else {
                    (cells, coefficients_to_wire(&coefficients))
                };
                Message::Expansions {
                    generation,
                    kernel: kind,
                    cells,
                    coefficients,
                }
                .encode()
            })
            .collect();

        let incoming = self.context.peers.all_to_all(buffers)?;

        let mut received = Vec::with_capacity(incoming.len());
        for (source, buffer) in incoming.into_iter().enumerate() {
            match self.decode_expansions(&buffer) {
                Ok(batch) => received.push(batch),
                Err(e) => {
                    self.record(FmmError::Synchronization(format!(
                        "expansions from rank {source}: {e}"
                    )));
                    received.push((Vec::new(), Vec::new()));
                }
            }
        }
        Ok(received)
    }

    /// Sparse exchange of cell requests with every peer.
    pub fn exchange_requests(
        &mut self,
        outgoing: Vec<Vec<CellIndex>>,
    ) -> Result<Vec<Vec<CellIndex>>, FmmError> {
        let generation = self.context.table.generation;
        let kind = self.kernel.kind();
        let faulted = self.is_faulted();

        let buffers = outgoing
            .into_iter()
            .map(|cells| {
                Message::Requests {
                    generation,
                    kernel: kind,
                    cells: if faulted { Vec::new() } else { cells },
                }
                .encode()
            })
            .collect();

        let incoming = self.context.peers.all_to_all(buffers)?;

        let mut received = Vec::with_capacity(incoming.len());
        for (source, buffer) in incoming.into_iter().enumerate() {
            match Message::decode(&buffer) {
                Ok(Message::Requests {
                    generation: g,
                    kernel,
                    cells,
                }) if g == generation && kernel == kind => received.push(cells),
                Ok(other) => {
                    self.record(FmmError::Synchronization(format!(
                        "expected {kind:?} requests of generation {generation} from rank {source}, found {}",
                        other.name()
                    )));
                    received.push(Vec::new());
                }
                Err(e) => {
                    self.record(e);
                    received.push(Vec::new());
                }
            }
        }
        Ok(received)
    }
}

/// Phase timer, measuring the time between successive barriers.
struct PhaseClock {
    start: Instant,
    times: Vec<PhaseTime>,
}

impl PhaseClock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            times: Vec::new(),
        }
    }

    fn lap(&mut self, phase: Phase) {
        let now = Instant::now();
        self.times.push(PhaseTime {
            phase,
            time: now - self.start,
        });
        self.start = now;
    }
}

/// Upward, exchange, downward and direct phases of one kernel, each ending in `barrier`.
fn run_pass<K: ExpansionKernel, C: Communicator>(
    pass: &mut Option<KernelPass<'_, K, C>>,
    phase: Phase,
) -> Result<(), FmmError> {
    let Some(pass) = pass.as_mut() else {
        return Ok(());
    };
    let table = pass.context.table;

    match phase {
        Phase::Upward => {
            pass.p2m()?;
            for level in (1..=table.leaf_level()).rev() {
                pass.m2m(level)?;
            }
        }
        Phase::Exchange => pass.exchange()?,
        Phase::Downward => {
            pass.lattice();
            for level in table.first_transfer_level()..=table.leaf_level() {
                pass.m2l(level)?;
            }
            for level in 1..=table.leaf_level() {
                pass.l2l(level)?;
            }
        }
        Phase::Direct => pass.p2p()?,
        Phase::Gather => pass.l2p()?,
        Phase::Distribute | Phase::Build => {}
    }
    Ok(())
}

/// A worker: owner of a share of the cells, driven by the master one timestep at a time.
pub struct Worker<C: Communicator> {
    settings: Settings,
    world: C,
    peers: C,
    lists: InteractionLists,
    table: Option<SharedCellTable>,
    coulomb: Option<KernelState<Coulomb>>,
    lennard_jones: Option<KernelState<LennardJones>>,
}

impl<C: Communicator> Worker<C> {
    /// Constructor
    ///
    /// # Arguments
    /// * `settings` - Settings, identical on every process.
    /// * `world` - Communicator holding the master and every worker.
    /// * `peers` - Communicator of the workers alone.
    pub fn new(settings: Settings, world: C, peers: C) -> Result<Self, FmmError> {
        let lists = InteractionLists::new(
            settings.well_separation,
            settings.parent_conversion,
            settings.mac_theta,
            settings.sort_lists,
        );

        let coulomb = if settings.interactions.coulomb {
            Some(KernelState::new(Coulomb::new(
                settings.expansion_order,
                settings.m2l,
            )?))
        } else {
            None
        };

        let lennard_jones = if settings.interactions.lennard_jones {
            Some(KernelState::new(LennardJones::new(settings.expansion_order)?))
        } else {
            None
        };

        Ok(Self {
            settings,
            world,
            peers,
            lists,
            table: None,
            coulomb,
            lennard_jones,
        })
    }

    /// Peer rank.
    pub fn rank(&self) -> usize {
        self.peers.rank()
    }

    /// Installed cell table.
    pub fn table(&self) -> Option<&SharedCellTable> {
        self.table.as_ref()
    }

    /// Replace the cell table and every operator derived from the previous one.
    pub fn install(&mut self, table: CellTable) -> Result<(), FmmError> {
        table.validate()?;

        if table.nranks != self.peers.size() {
            return Err(FmmError::Configuration(format!(
                "cell table distributes cells over {} ranks, the worker group holds {}",
                table.nranks,
                self.peers.size()
            )));
        }

        if table.periodic != self.settings.boundary.is_periodic() {
            return Err(FmmError::Configuration(format!(
                "cell table generation {} disagrees with the configured boundary {:?}",
                table.generation, self.settings.boundary
            )));
        }

        if let Some(state) = self.coulomb.as_mut() {
            let lattice: Option<Box<dyn LatticeCorrection<_>>> =
                if table.periodic && self.settings.macroscopic_levels > 0 {
                    Some(Box::new(Macroscopic::new(
                        self.settings.expansion_order,
                        &table.domain,
                        self.settings.well_separation,
                        self.settings.macroscopic_levels,
                        self.settings.macroscopic,
                    )?))
                } else {
                    None
                };

            state.cache = Some(GenerationCache {
                transfers: TransferCache::new(&state.kernel, &table, &self.lists),
                lattice,
            });
        }

        if let Some(state) = self.lennard_jones.as_mut() {
            state.cache = Some(GenerationCache {
                transfers: TransferCache::new(&state.kernel, &table, &self.lists),
                lattice: None,
            });
        }

        debug!(
            "rank {} installed cell table generation {}, {} owned cells",
            self.rank(),
            table.generation,
            table.owned_count(self.rank())
        );
        self.table = Some(Arc::new(table));
        Ok(())
    }

    /// Run the phases of one timestep on the particles received from the master.
    ///
    /// A fault is recorded in the results rather than returned, so that every other process can complete the
    /// timestep. Errors are only returned when the message protocol itself has broken down.
    ///
    /// # Arguments
    /// * `generation` - Table generation the master distributed the particles with.
    /// * `owned` - Particles in leaves owned by this worker.
    /// * `ghosts` - Particles in adjacent leaves owned elsewhere.
    pub fn step(
        &self,
        generation: u64,
        owned: Vec<Particle>,
        ghosts: Vec<Particle>,
    ) -> Result<(WorkerResults, Vec<PhaseTime>), FmmError> {
        let table = self.table.clone().ok_or_else(|| {
            FmmError::Synchronization("particles received before a cell table".to_string())
        })?;
        let rank = self.rank();
        let mut clock = PhaseClock::new();

        // Build
        let mut fault = (generation != table.generation).then(|| {
            FmmError::Synchronization(format!(
                "particles of generation {generation} received by rank {rank} holding generation {}",
                table.generation
            ))
        });

        let particles = if fault.is_none() {
            ParticleIndex::new(&table, rank, owned, ghosts).unwrap_or_else(|e| {
                fault = Some(e);
                ParticleIndex::default()
            })
        } else {
            ParticleIndex::default()
        };

        let context = StepContext {
            rank,
            table: &table,
            lists: &self.lists,
            particles: &particles,
            peers: &self.peers,
            settings: &self.settings,
        };

        let mut coulomb = match &self.coulomb {
            Some(state) => Some(KernelPass::new(state, &context, fault.clone())?),
            None => None,
        };
        let mut lennard_jones = match &self.lennard_jones {
            Some(state) => Some(KernelPass::new(state, &context, fault.clone())?),
            None => None,
        };
        self.world.barrier()?;
        clock.lap(Phase::Build);

        for phase in [Phase::Upward, Phase::Exchange, Phase::Downward, Phase::Direct] {
            run_pass(&mut coulomb, phase)?;
            run_pass(&mut lennard_jones, phase)?;
            self.world.barrier()?;
            clock.lap(phase);
        }

        run_pass(&mut coulomb, Phase::Gather)?;
        run_pass(&mut lennard_jones, Phase::Gather)?;

        let results = collect_results(&context, coulomb.as_ref(), lennard_jones.as_ref(), fault);
        clock.lap(Phase::Gather);

        Ok((results, clock.times))
    }

    /// Serve the master until it sends a shutdown message.
    ///
    /// Returns on the first error, dropping this worker's communicators so that the master and the other workers
    /// observe its departure at their next exchange with it.
    pub fn serve(mut self) -> Result<(), FmmError> {
        let served = self.serve_requests();
        if let Err(e) = &served {
            warn!("rank {} stopped serving: {e}", self.rank());
        }
        served
    }

    fn serve_requests(&mut self) -> Result<(), FmmError> {
        loop {
            let buffer = self.world.receive(MASTER_RANK)?;
            match Message::decode(&buffer)? {
                Message::CellTable(table) => self.install(table)?,

                Message::Particles {
                    generation,
                    owned,
                    ghosts,
                } => {
                    let (results, _) = self.step(generation, owned, ghosts)?;
                    let generation = self.table.as_ref().map_or(0, |t| t.generation);
                    self.world.send(
                        MASTER_RANK,
                        Message::Results {
                            generation,
                            results,
                        }
                        .encode(),
                    )?;
                }

                Message::Shutdown => {
                    debug!("rank {} shutting down", self.rank());
                    return Ok(());
                }

                other => {
                    return Err(FmmError::Synchronization(format!(
                        "worker received an unexpected {} message",
                        other.name()
                    )))
                }
            }
        }
    }
}

/// Combine the evaluations of every kernel over the owned particles.
fn collect_results<C: Communicator>(
    context: &StepContext<'_, C>,
    coulomb: Option<&KernelPass<'_, Coulomb, C>>,
    lennard_jones: Option<&KernelPass<'_, LennardJones, C>>,
    fault: Option<FmmError>,
) -> WorkerResults {
    let table = context.table;
    let particles = context.particles.particles();

    let fault = fault
        .or_else(|| coulomb.and_then(|pass| pass.fault.clone()))
        .or_else(|| lennard_jones.and_then(|pass| pass.fault.clone()));

    let mut results = WorkerResults {
        fault: fault.map(|f| f.to_string()),
        occupied_cells: table.occupied(context.rank, context.particles.leaves().iter().copied()),
        ..Default::default()
    };

    if results.fault.is_some() {
        return results;
    }

    for leaf in table.owned(context.rank, table.leaf_level()) {
        let range = context.particles.range(&leaf);
        for i in range {
            let c = coulomb.map(|pass| pass.evaluations[i]).unwrap_or_default();
            let lj = lennard_jones
                .map(|pass| pass.evaluations[i])
                .unwrap_or_default();

            results.energies[0] += 0.5 * c.energy;
            results.energies[1] += 0.5 * lj.energy;
            results.records.push(ResultRecord {
                id: particles[i].id as u64,
                force: [
                    c.force[0] + lj.force[0],
                    c.force[1] + lj.force[1],
                    c.force[2] + lj.force[2],
                ],
                potential: c.potential,
                energy: 0.5 * (c.energy + lj.energy),
            });
        }
    }

    for virial in [coulomb.map(|p| p.virial), lennard_jones.map(|p| p.virial)]
        .into_iter()
        .flatten()
    {
        for (row, v) in results.virial.iter_mut().zip(virial) {
            for (w, x) in row.iter_mut().zip(v) {
                *w += x;
            }
        }
    }

    results
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        comm::LocalCommunicator,
        fmm::types::{Boundary, Interactions, M2lMethod, MacroscopicMode},
        tree::{ownership::HilbertCurve, types::Domain},
    };

    fn settings() -> Settings {
        Settings {
            expansion_order: 6,
            levels: 3,
            boundary: Boundary::Open,
            interactions: Interactions::default(),
            virial: None,
            macroscopic: MacroscopicMode::Refined,
            macroscopic_levels: 0,
            m2l: M2lMethod::Dense,
            fft_blocking_factor: 1,
            well_separation: 1,
            parent_conversion: true,
            mac_theta: 0.5,
            sort_lists: false,
            policy: Arc::new(HilbertCurve),
        }
    }

    fn table(generation: u64, nranks: usize) -> CellTable {
        let domain = Domain::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
        CellTable::new(generation, domain, 3, false, nranks, &HilbertCurve).unwrap()
    }

    fn serial_worker() -> Worker<LocalCommunicator> {
        let world = LocalCommunicator::group(1).remove(0);
        let peers = LocalCommunicator::group(1).remove(0);
        Worker::new(settings(), world, peers).unwrap()
    }

    #[test]
    fn test_particle_index() {
        let table = table(1, 1);
        let particles = vec![
            Particle::new([0.9, 0.9, 0.9], 1.0),
            Particle::new([0.1, 0.1, 0.1], 1.0),
            Particle::new([0.12, 0.1, 0.1], 1.0),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, mut p)| {
            p.id = i;
            p
        })
        .collect::<Vec<_>>();

        let index = ParticleIndex::new(&table, 0, particles.clone(), Vec::new()).unwrap();
        assert_eq!(index.len(), 3);

        let first = CellIndex::from_point(&[0.1, 0.1, 0.1], &table.domain, 2);
        let ids = index.get(&first).iter().map(|p| p.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
        assert!(index.get(&CellIndex::from_point(&[0.5, 0.1, 0.1], &table.domain, 2)).is_empty());

        // Ghosts may not lie in owned leaves
        assert!(ParticleIndex::new(&table, 0, Vec::new(), particles).is_err());
    }

    #[test]
    fn test_empty_step() {
        let mut worker = serial_worker();
        worker.install(table(1, 1)).unwrap();

        let (results, times) = worker.step(1, Vec::new(), Vec::new()).unwrap();
        assert!(results.fault.is_none());
        assert!(results.records.is_empty());
        assert_eq!(results.energies, [0.0, 0.0]);
        assert_eq!(results.occupied_cells, vec![0, 0, 0]);
        assert_eq!(times.len(), 6);
    }

    #[test]
    fn test_generation_mismatch_is_reported() {
        let mut worker = serial_worker();
        worker.install(table(4, 1)).unwrap();

        let particles = vec![Particle::new([0.5, 0.5, 0.5], 1.0)];
        let (results, _) = worker.step(3, particles, Vec::new()).unwrap();
        assert!(results.fault.unwrap().contains("generation"));
        assert!(results.records.is_empty());
    }

    #[test]
    fn test_install_rejects_mismatched_table() {
        let mut worker = serial_worker();
        assert!(matches!(
            worker.install(table(1, 2)),
            Err(FmmError::Configuration(_))
        ));
        assert!(worker.step(1, Vec::new(), Vec::new()).is_err());
    }

    #[test]
    fn test_pair_matches_direct() {
        // Two particles in non adjacent leaves interact through the far field only
        let mut worker = serial_worker();
        worker.install(table(1, 1)).unwrap();

        let mut a = Particle::new([0.1, 0.1, 0.1], 1.0);
        let mut b = Particle::new([0.9, 0.6, 0.8], -2.0);
        a.id = 0;
        b.id = 1;

        let (results, _) = worker.step(1, vec![a, b], Vec::new()).unwrap();
        assert!(results.fault.is_none());
        assert_eq!(results.occupied_cells, vec![1, 2, 2]);

        let r: [f64; 3] = [0.8, 0.5, 0.7];
        let d = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
        let expected = -2.0 / d;
        assert!((results.energies[0] - expected).abs() < 1e-3 * expected.abs());

        let record = results.records.iter().find(|r| r.id == 0).unwrap();
        let scale = -2.0 / (d * d * d);
        for i in 0..3 {
            let f = -scale * r[i];
            assert!((record.force[i] - f).abs() < 1e-2 * f.abs().max(1e-3));
        }
    }
}
