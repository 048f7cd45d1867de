//! FMM traits
use super::types::FmmError;

/// Interface for source field translations.
pub trait SourceTranslation {
    /// Particle to multipole translations, applied at leaf level over all owned cells, empty ones included.
    fn p2m(&mut self) -> Result<(), FmmError>;

    /// Multipole to multipole translations, applied during upward pass. Partial parent expansions for parents owned
    /// by another process are sent to, and merged at, the owner.
    ///
    /// # Arguments
    /// * `level` - The child level at which this translation is being applied.
    fn m2m(&mut self, level: u32) -> Result<(), FmmError>;
}

/// Interface for the source to target (multipole to local / M2L) field translations.
pub trait SourceToTargetTranslation {
    /// Fetch the multipole expansions that owned cells' interaction lists refer to from their owners.
    fn exchange(&mut self) -> Result<(), FmmError>;

    /// Interface for multipole to local translation, defined over each level of a tree.
    ///
    /// # Arguments
    /// * `level` - The level of the tree at which this translation is being applied.
    fn m2l(&mut self, level: u32) -> Result<(), FmmError>;
}

/// Interface for target field translations.
pub trait TargetTranslation {
    /// Local to local translations, applied during downward pass. Defined over each level of a tree.
    ///
    /// # Arguments
    /// * `level` - The child level at which this translation is being applied.
    fn l2l(&mut self, level: u32) -> Result<(), FmmError>;

    /// Local to particle translations, applies the local expansion accumulated at each owned leaf to the
    /// particles it contains.
    fn l2p(&mut self) -> Result<(), FmmError>;

    /// Near field particle to particle (direct) contributions from each owned leaf's direct list.
    fn p2p(&mut self) -> Result<(), FmmError>;
}

/// Interface for the contribution of the far lattice to a periodic system, folded into the root local expansion.
pub trait LatticeCorrection<T>: Send + Sync {
    /// Add the field of every lattice image beyond those the tree resolves to the root local expansion.
    ///
    /// # Arguments
    /// * `root_multipole` - Multipole expansion of the unit cell about its centre.
    /// * `root_local` - Local expansion of the unit cell to accumulate into.
    /// * `virial` - Whether to compute the image shift contribution of the lattice to the virial.
    ///
    /// Returns the virial contribution, zero when `virial` is false.
    fn apply(&self, root_multipole: &[T], root_local: &mut [T], virial: bool) -> [[f64; 3]; 3];
}
