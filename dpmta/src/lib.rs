//! # Distributed Parallel Multipole Tree Algorithm (DPMTA)
//!
//! A distributed fast multipole engine for the long range interactions of point particles, designed to be called once
//! per timestep by a molecular dynamics driver. Far field contributions are approximated with truncated multipole
//! expansions organised on an octree whose cells are owned by cooperating worker processes.
//!
//! Notable features of this library are:
//! * Coulomb interactions in a solid harmonic basis, with dense or FFT accelerated multipole to local translations.
//! * Lennard-Jones interactions in a Cartesian Taylor basis, held in a separate set of expansions.
//! * Periodic boundaries, with the lattice beyond the nearest images folded in by a macroscopic expansion.
//! * Virial tensor accumulation.
//! * Serial, in-process worker group and MPI topologies behind one coordinator.
//!
//! ## Example
//! ```no_run
//! use dpmta::{DpmtaBuilder, FmmError, Particle, Topology};
//!
//! # fn main() -> Result<(), FmmError> {
//! let particles = vec![
//!     Particle::new([0.1, 0.2, 0.3], 1.0),
//!     Particle::new([0.9, 0.8, 0.7], -1.0),
//! ];
//!
//! let mut fmm = DpmtaBuilder::new()
//!     .expansion_order(8)?
//!     .levels(3)?
//!     .topology(Topology::WorkerGroup(2))?
//!     .build()?;
//!
//! let result = fmm.evaluate(&particles)?;
//! println!("energy {}", result.energy.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## References
//! \[1\] Board, J. A., Hakura, Z. S., Elliott, W. D., & Rankin, W. T. (1995). Scalable variants of multipole-accelerated
//! algorithms for molecular dynamics applications. Proceedings of the Seventh SIAM Conference on Parallel Processing for
//! Scientific Computing.
//!
//! \[2\] Lambert, C. G., Darden, T. A., & Board, J. A. (1996). A multipole-based algorithm for efficient calculation of
//! forces and potentials in macroscopic periodic assemblies of particles. Journal of Computational Physics, 126(2), 274-285.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod comm;
pub mod fmm;
pub mod traits;
pub mod tree;

// Public API
#[doc(inline)]
pub use fmm::builder::DpmtaBuilder;
#[doc(inline)]
pub use fmm::coordinator::Dpmta;
#[doc(inline)]
pub use fmm::types::{
    Boundary, Energies, FmmResult, Interactions, LennardJonesParameters, M2lMethod, MacroscopicMode,
    Particle, ParticleResult, Topology, VirialMode,
};
#[doc(inline)]
pub use traits::types::FmmError;
#[doc(inline)]
pub use tree::types::{CellIndex, CellTable, Domain};
