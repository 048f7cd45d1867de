//! Message passing between the coordinator and its workers.
pub mod local;
pub mod wire;

#[cfg(feature = "mpi")]
pub mod mpi;

pub use local::LocalCommunicator;
#[cfg(feature = "mpi")]
pub use self::mpi::MpiCommunicator;
