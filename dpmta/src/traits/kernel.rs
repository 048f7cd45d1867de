//! Field translation operators of a single interaction kernel, applied cell by cell.
use std::ops::AddAssign;

use bytemuck::Pod;
use num::Zero;

use crate::fmm::types::{Evaluation, KernelKind, Particle};

/// Interface for the expansion arithmetic of one interaction kernel.
///
/// Implementations hold no state beyond tables fixed at construction, so every operation is deterministic given
/// its inputs. Displacements are always taken as `to - from` between expansion centres.
pub trait ExpansionKernel: Send + Sync {
    /// Scalar type of multipole and local coefficients.
    type Coefficient: Pod + Zero + AddAssign + Send + Sync;

    /// Precomputed multipole to local operator for one displacement.
    type Transfer: Send + Sync;

    /// A source multipole expansion prepared for repeated application of transfer operators.
    type Signal: Send + Sync;

    /// Target side accumulator of multipole to local contributions.
    type Accumulator: Send;

    /// Which interaction this kernel computes.
    fn kind(&self) -> KernelKind;

    /// Expansion order.
    fn expansion_order(&self) -> usize;

    /// Number of coefficients in a multipole or local expansion.
    fn ncoeffs(&self) -> usize;

    /// Particle to multipole, adds the expansion about `centre` of `particles` to `multipole`.
    ///
    /// # Arguments
    /// * `particles` - Sources resident in the cell.
    /// * `centre` - Expansion centre.
    /// * `multipole` - Coefficients to accumulate into.
    fn p2m(&self, particles: &[Particle], centre: &[f64; 3], multipole: &mut [Self::Coefficient]);

    /// Multipole to multipole, shifts a child multipole to its parent's centre and adds it to `parent`.
    ///
    /// # Arguments
    /// * `child` - Child multipole expansion.
    /// * `displacement` - Child centre minus parent centre.
    /// * `parent` - Parent multipole to accumulate into.
    fn m2m(
        &self,
        child: &[Self::Coefficient],
        displacement: &[f64; 3],
        parent: &mut [Self::Coefficient],
    );

    /// Compute the multipole to local operator for a pair of cells.
    ///
    /// # Arguments
    /// * `displacement` - Target centre minus source centre.
    fn transfer(&self, displacement: &[f64; 3]) -> Self::Transfer;

    /// Prepare a source multipole for application of transfer operators.
    fn signal(&self, multipole: &[Self::Coefficient]) -> Self::Signal;

    /// A zeroed accumulator for one target cell.
    fn accumulator(&self) -> Self::Accumulator;

    /// Multipole to local, accumulates the contribution of a prepared source.
    ///
    /// # Arguments
    /// * `transfer` - Operator for the source/target displacement.
    /// * `signal` - Prepared source multipole.
    /// * `accumulator` - Target accumulator.
    fn m2l(
        &self,
        transfer: &Self::Transfer,
        signal: &Self::Signal,
        accumulator: &mut Self::Accumulator,
    );

    /// Add the accumulated multipole to local contributions to a local expansion.
    fn finalise(&self, accumulator: &mut Self::Accumulator, local: &mut [Self::Coefficient]);

    /// Local to local, shifts a parent local expansion to a child's centre and adds it to `child`.
    ///
    /// # Arguments
    /// * `parent` - Parent local expansion.
    /// * `displacement` - Child centre minus parent centre.
    /// * `child` - Child local expansion to accumulate into.
    fn l2l(
        &self,
        parent: &[Self::Coefficient],
        displacement: &[f64; 3],
        child: &mut [Self::Coefficient],
    );

    /// Local to particle, evaluates a local expansion about `centre` at a particle.
    fn l2p(&self, local: &[Self::Coefficient], centre: &[f64; 3], particle: &Particle) -> Evaluation;

    /// Particle to particle, exact interaction of `target` with `source` translated by `shift`.
    fn p2p(&self, target: &Particle, source: &Particle, shift: &[f64; 3]) -> Evaluation;

    /// Sum over a cluster of each particle's weight times the field gradient of `local`, computed from the
    /// cluster's own multipole expansion about the same centre. The net force on the cluster is its negation.
    ///
    /// # Arguments
    /// * `local` - Local expansion of the field acting on the cluster.
    /// * `multipole` - Multipole expansion of the cluster.
    fn net_gradient(&self, local: &[Self::Coefficient], multipole: &[Self::Coefficient]) -> [f64; 3];
}
