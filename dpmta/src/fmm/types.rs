//! Data structures for the distributed FMM.
use crate::traits::types::PhaseTime;
use crate::tree::types::{Domain, SharedPolicy};

/// Lennard-Jones parameters of a particle. Pair coefficients combine geometrically, the pair energy of particles `i`
/// and `j` at distance `r` is `sqrt(A_i A_j) / r^12 - sqrt(B_i B_j) / r^6`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LennardJonesParameters {
    /// Repulsive coefficient `A_i`.
    pub repulsion: f64,

    /// Dispersive coefficient `B_i`.
    pub dispersion: f64,
}

impl LennardJonesParameters {
    /// Parameters reproducing a well of depth `epsilon` at `2^(1/6) sigma` for like pairs.
    pub fn from_epsilon_sigma(epsilon: f64, sigma: f64) -> Self {
        let sigma6 = sigma.powi(6);
        Self {
            repulsion: 4.0 * epsilon * sigma6 * sigma6,
            dispersion: 4.0 * epsilon * sigma6,
        }
    }

    /// Square root weights `(sqrt(A_i), sqrt(B_i))` used as source strengths of the two channels, for non negative
    /// coefficients.
    pub fn weights(&self) -> (f64, f64) {
        (self.repulsion.sqrt(), self.dispersion.sqrt())
    }
}

/// A point particle as supplied by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    /// Identifier, the index of the particle in the driver's input slice.
    pub id: usize,

    /// Cartesian position.
    pub position: [f64; 3],

    /// Charge.
    pub charge: f64,

    /// Optional Lennard-Jones parameters.
    pub lennard_jones: Option<LennardJonesParameters>,
}

impl Particle {
    /// Construct a charged particle without Lennard-Jones parameters.
    pub fn new(position: [f64; 3], charge: f64) -> Self {
        Self {
            id: 0,
            position,
            charge,
            lennard_jones: None,
        }
    }

    /// Attach Lennard-Jones parameters.
    pub fn with_lennard_jones(mut self, parameters: LennardJonesParameters) -> Self {
        self.lennard_jones = Some(parameters);
        self
    }
}

/// Interaction kernels, each held in its own set of expansions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelKind {
    /// `q_i q_j / r` in a solid harmonic basis.
    Coulomb,

    /// `A_ij / r^12 - B_ij / r^6` in a Cartesian Taylor basis.
    LennardJones,
}

impl KernelKind {
    /// Wire tag.
    pub fn tag(&self) -> u64 {
        match self {
            KernelKind::Coulomb => 0,
            KernelKind::LennardJones => 1,
        }
    }

    /// Inverse of [`KernelKind::tag`].
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(KernelKind::Coulomb),
            1 => Some(KernelKind::LennardJones),
            _ => None,
        }
    }
}

/// Which interactions are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interactions {
    /// Coulomb electrostatics.
    pub coulomb: bool,

    /// Lennard-Jones, particles without parameters do not take part.
    pub lennard_jones: bool,
}

impl Default for Interactions {
    fn default() -> Self {
        Self {
            coulomb: true,
            lennard_jones: false,
        }
    }
}

/// How multipole to local translations are evaluated for the Coulomb kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum M2lMethod {
    /// Direct double sum over the coefficients.
    #[default]
    Dense,

    /// Correlation over (degree, order) evaluated with zero padded 2D FFTs, source spectra are computed once per
    /// source cell and target spectra inverted once per target cell.
    Fft,
}

/// Accuracy mode of the periodic lattice correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacroscopicMode {
    /// Supercell multipoles truncated at the working expansion order.
    Legacy,

    /// Supercell multipoles carried to twice the working order before their transfer to the unit cell.
    #[default]
    Refined,
}

/// How the far field contribution to the virial is accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VirialMode {
    /// Far field forces times positions relative to the centre of the volume, exact for open boundaries only.
    Legacy,

    /// As legacy, corrected by the lattice shift of every periodic image interaction.
    #[default]
    Refined,
}

/// Process layout, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// The master runs every phase itself, no cross process exchange.
    #[default]
    SingleProcess,

    /// The master coordinates a fixed number of worker threads in this process.
    WorkerGroup(usize),
}

/// Boundary conditions of the simulation volume.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Boundary {
    /// Open boundaries. With no domain the volume is fitted to the particles and regrown whenever they leave it,
    /// with a fixed domain particles outside it are an error.
    #[default]
    Open,

    /// Open boundaries in a fixed volume.
    Fixed(Domain),

    /// Periodic boundaries, the domain is the repeating unit of the lattice.
    Periodic(Domain),
}

impl Boundary {
    /// Whether the boundary is periodic.
    pub fn is_periodic(&self) -> bool {
        matches!(self, Boundary::Periodic(_))
    }
}

/// Result of evaluating an expansion or a pair interaction at a target particle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Evaluation {
    /// Interaction energy of the target with the sources, counted in full.
    pub energy: f64,

    /// Electrostatic potential at the target, zero for non Coulomb kernels.
    pub potential: f64,

    /// Force on the target.
    pub force: [f64; 3],
}

impl std::ops::AddAssign for Evaluation {
    fn add_assign(&mut self, other: Self) {
        self.energy += other.energy;
        self.potential += other.potential;
        for (f, o) in self.force.iter_mut().zip(other.force) {
            *f += o;
        }
    }
}

/// Output for a single particle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParticleResult {
    /// Total force.
    pub force: [f64; 3],

    /// Electrostatic potential at the particle.
    pub potential: f64,

    /// The particle's share of the total energy, half its interaction energy with all other particles.
    pub energy: f64,
}

/// Aggregate energies.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Energies {
    /// Coulomb energy.
    pub coulomb: f64,

    /// Lennard-Jones energy.
    pub lennard_jones: f64,

    /// Sum of the above.
    pub total: f64,
}

/// Result of one timestep.
#[derive(Debug, Clone, Default)]
pub struct FmmResult {
    /// Per particle results, in input order.
    pub particles: Vec<ParticleResult>,

    /// Aggregate energies.
    pub energy: Energies,

    /// Virial tensor `sum r_ij (x) F_ij` over all pairs, when enabled.
    pub virial: Option<[[f64; 3]; 3]>,

    /// Generation of the cell table used.
    pub generation: u64,

    /// Time spent in each coordinator phase.
    pub times: Vec<PhaseTime>,
}

/// Numerical and structural parameters shared by the coordinator and every worker. Every process of a group must
/// hold identical settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Truncation order of multipole and local expansions.
    pub expansion_order: usize,

    /// Number of tree levels, counting the root.
    pub levels: u32,

    /// Boundary conditions.
    pub boundary: Boundary,

    /// Kernels computed.
    pub interactions: Interactions,

    /// Virial accumulation, `None` when disabled.
    pub virial: Option<VirialMode>,

    /// Accuracy mode of the periodic lattice correction.
    pub macroscopic: MacroscopicMode,

    /// Number of supercell levels of the periodic lattice correction.
    pub macroscopic_levels: usize,

    /// Evaluation of Coulomb multipole to local translations.
    pub m2l: M2lMethod,

    /// Number of target cells sharing an accumulator in the multipole to local pass.
    pub fft_blocking_factor: usize,

    /// Cells within this many cells of a target are near.
    pub well_separation: u32,

    /// Whether groups of eight far siblings are converted into their parent.
    pub parent_conversion: bool,

    /// Multipole acceptance ratio of parental conversion.
    pub mac_theta: f64,

    /// Whether interaction lists are sorted by distance.
    pub sort_lists: bool,

    /// Ownership of cells.
    pub policy: SharedPolicy,
}

impl Settings {
    /// Whether image shift corrections to the virial are computed.
    pub fn refined_virial(&self) -> bool {
        self.virial == Some(VirialMode::Refined)
    }
}
