//! Builder object to construct a coordinator, or to serve as a worker.
use std::sync::Arc;

use crate::{
    comm::LocalCommunicator,
    fmm::{
        constants::{
            DEFAULT_EXPANSION_ORDER, DEFAULT_FFT_BLOCKING_FACTOR, DEFAULT_LEVELS, DEFAULT_MACROSCOPIC_LEVELS,
            DEFAULT_MAC_THETA, DEFAULT_WELL_SEPARATION, MAX_EXPANSION_ORDER,
        },
        coordinator::Dpmta,
        types::{Boundary, Interactions, M2lMethod, MacroscopicMode, Settings, Topology, VirialMode},
        worker::Worker,
    },
    traits::{comm::Communicator, tree::OwnershipPolicy, types::FmmError},
    tree::{constants::DEEPEST_LEVEL, ownership::HilbertCurve, types::SharedPolicy},
};

/// Builder for [`Dpmta`].
///
/// Every parameter has a default, setters that take a value which can be invalid check it immediately.
///
/// ```
/// use dpmta::{DpmtaBuilder, FmmError, Topology, VirialMode};
///
/// # fn main() -> Result<(), FmmError> {
/// let fmm = DpmtaBuilder::new()
///     .expansion_order(6)?
///     .levels(3)?
///     .topology(Topology::WorkerGroup(2))?
///     .virial(Some(VirialMode::Refined))
///     .build()?;
/// assert_eq!(fmm.nworkers(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DpmtaBuilder {
    expansion_order: usize,
    levels: u32,
    topology: Topology,
    policy: SharedPolicy,
    boundary: Boundary,
    interactions: Interactions,
    virial: Option<VirialMode>,
    macroscopic: MacroscopicMode,
    macroscopic_levels: usize,
    m2l: M2lMethod,
    fft_blocking_factor: usize,
    well_separation: u32,
    parent_conversion: bool,
    mac_theta: f64,
    sort_lists: bool,
}

impl Default for DpmtaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DpmtaBuilder {
    /// Initialise a builder holding the default parameters.
    pub fn new() -> Self {
        Self {
            expansion_order: DEFAULT_EXPANSION_ORDER,
            levels: DEFAULT_LEVELS,
            topology: Topology::default(),
            policy: Arc::new(HilbertCurve),
            boundary: Boundary::default(),
            interactions: Interactions::default(),
            virial: None,
            macroscopic: MacroscopicMode::default(),
            macroscopic_levels: DEFAULT_MACROSCOPIC_LEVELS,
            m2l: M2lMethod::default(),
            fft_blocking_factor: DEFAULT_FFT_BLOCKING_FACTOR,
            well_separation: DEFAULT_WELL_SEPARATION,
            parent_conversion: true,
            mac_theta: DEFAULT_MAC_THETA,
            sort_lists: false,
        }
    }

    /// Truncation order of the multipole and local expansions.
    pub fn expansion_order(mut self, expansion_order: usize) -> Result<Self, FmmError> {
        if expansion_order > MAX_EXPANSION_ORDER {
            return Err(FmmError::Configuration(format!(
                "expansion order {expansion_order} exceeds the maximum of {MAX_EXPANSION_ORDER}"
            )));
        }
        self.expansion_order = expansion_order;
        Ok(self)
    }

    /// Number of tree levels, counting the root. Particles are held at the deepest level.
    pub fn levels(mut self, levels: u32) -> Result<Self, FmmError> {
        if levels == 0 || levels > DEEPEST_LEVEL + 1 {
            return Err(FmmError::Configuration(format!(
                "number of levels must be between 1 and {}, found {levels}",
                DEEPEST_LEVEL + 1
            )));
        }
        self.levels = levels;
        Ok(self)
    }

    /// Process layout used by [`DpmtaBuilder::build`].
    pub fn topology(mut self, topology: Topology) -> Result<Self, FmmError> {
        if topology == Topology::WorkerGroup(0) {
            return Err(FmmError::Configuration(
                "a worker group needs at least one worker".to_string(),
            ));
        }
        self.topology = topology;
        Ok(self)
    }

    /// Strategy assigning cells to workers.
    pub fn ownership(mut self, policy: impl OwnershipPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Boundary conditions and volume.
    pub fn boundary(mut self, boundary: Boundary) -> Result<Self, FmmError> {
        if let Boundary::Fixed(domain) | Boundary::Periodic(domain) = boundary {
            if !domain.is_valid() {
                return Err(FmmError::Configuration(format!("invalid domain {domain:?}")));
            }
        }
        self.boundary = boundary;
        Ok(self)
    }

    /// Interactions to compute, at least one must be enabled.
    pub fn interactions(mut self, interactions: Interactions) -> Result<Self, FmmError> {
        if !interactions.coulomb && !interactions.lennard_jones {
            return Err(FmmError::Configuration(
                "at least one interaction must be enabled".to_string(),
            ));
        }
        self.interactions = interactions;
        Ok(self)
    }

    /// Virial accumulation, `None` to disable it.
    pub fn virial(mut self, virial: Option<VirialMode>) -> Self {
        self.virial = virial;
        self
    }

    /// Accuracy mode and number of supercell levels of the periodic lattice correction, zero levels disable it.
    pub fn macroscopic(mut self, mode: MacroscopicMode, levels: usize) -> Self {
        self.macroscopic = mode;
        self.macroscopic_levels = levels;
        self
    }

    /// Evaluation of Coulomb multipole to local translations.
    pub fn m2l(mut self, method: M2lMethod) -> Self {
        self.m2l = method;
        self
    }

    /// Number of target cells sharing a batch of accumulators in the FFT multipole to local pass.
    pub fn fft_blocking_factor(mut self, blocking_factor: usize) -> Result<Self, FmmError> {
        if blocking_factor == 0 {
            return Err(FmmError::Configuration(
                "the FFT blocking factor must be positive".to_string(),
            ));
        }
        self.fft_blocking_factor = blocking_factor;
        Ok(self)
    }

    /// Number of cells, along every axis, separating a cell from its far field.
    pub fn well_separation(mut self, well_separation: u32) -> Result<Self, FmmError> {
        if well_separation == 0 {
            return Err(FmmError::Configuration(
                "well separation must be at least one cell".to_string(),
            ));
        }
        self.well_separation = well_separation;
        Ok(self)
    }

    /// Replace complete groups of eight far siblings by their parent when it passes the acceptance test.
    ///
    /// # Arguments
    /// * `enabled` - Whether to convert.
    /// * `mac_theta` - Acceptance ratio, in `(0, 1]`.
    pub fn parent_conversion(mut self, enabled: bool, mac_theta: f64) -> Result<Self, FmmError> {
        if !(mac_theta > 0.0 && mac_theta <= 1.0) {
            return Err(FmmError::Configuration(format!(
                "acceptance ratio must lie in (0, 1], found {mac_theta}"
            )));
        }
        self.parent_conversion = enabled;
        self.mac_theta = mac_theta;
        Ok(self)
    }

    /// Order interaction lists by increasing distance.
    pub fn sort_lists(mut self, sort: bool) -> Self {
        self.sort_lists = sort;
        self
    }

    fn settings(&self) -> Settings {
        Settings {
            expansion_order: self.expansion_order,
            levels: self.levels,
            boundary: self.boundary,
            interactions: self.interactions,
            virial: self.virial,
            macroscopic: self.macroscopic,
            macroscopic_levels: self.macroscopic_levels,
            m2l: self.m2l,
            fft_blocking_factor: self.fft_blocking_factor,
            well_separation: self.well_separation,
            parent_conversion: self.parent_conversion,
            mac_theta: self.mac_theta,
            sort_lists: self.sort_lists,
            policy: self.policy.clone(),
        }
    }

    /// Build a coordinator over the configured in-process topology.
    pub fn build(self) -> Result<Dpmta<LocalCommunicator>, FmmError> {
        Dpmta::local(self.settings(), self.topology)
    }

    /// Build the coordinator of an existing process group, in which it is rank 0 and every other rank runs
    /// [`DpmtaBuilder::serve`] with the same parameters. The configured topology is ignored.
    pub fn build_with_communicator<C: Communicator>(self, world: C) -> Result<Dpmta<C>, FmmError> {
        Dpmta::with_communicator(self.settings(), world)
    }

    /// Serve as a worker of an existing process group until the coordinator shuts down.
    ///
    /// # Arguments
    /// * `world` - Communicator holding the coordinator and every worker.
    /// * `peers` - Communicator of the workers alone.
    pub fn serve<C: Communicator>(self, world: C, peers: C) -> Result<(), FmmError> {
        if world.size() != peers.size() + 1 {
            return Err(FmmError::Configuration(format!(
                "a world of {} ranks must hold the coordinator and {} workers",
                world.size(),
                peers.size()
            )));
        }
        Worker::new(self.settings(), world, peers)?.serve()
    }
}
