//! Lennard-Jones kernel, `A_ij / r^12 - B_ij / r^6`, expanded in a Cartesian Taylor basis.
//!
//! With geometric combining `A_ij = a_i a_j`, `B_ij = b_i b_j` where `a_i = sqrt(A_i)` and `b_i = sqrt(B_i)`, the pair
//! energy separates into two channels, a repulsive one with kernel `|R|^-12` and source strengths `a_j`, and a
//! dispersive one with kernel `|R|^-6` and strengths `b_j`. Each channel carries its own expansions over the multi
//! indices `α` with `|α| <= p`:
//! * multipole `M_α = Σ w d^α / α!` for sources at `c + d`,
//! * local `φ(c + y) = Σ L_β y^β`.
use crate::{
    fmm::{
        constants::MAX_EXPANSION_ORDER,
        helpers::{factorial, parity, sub},
        types::{Evaluation, KernelKind, Particle},
    },
    traits::{kernel::ExpansionKernel, types::FmmError},
};

/// Number of multi indices of total degree at most `order`.
pub const fn ntaylor(order: usize) -> usize {
    (order + 1) * (order + 2) * (order + 3) / 6
}

/// Stack scratch large enough for the monomials of any supported expansion order.
const SCRATCH: usize = ntaylor(MAX_EXPANSION_ORDER);

/// Powers `s` of `|R|^2` in the kernel of each channel, and the sign of the channel in the pair energy.
const CHANNELS: [(f64, f64); 2] = [(6.0, 1.0), (3.0, -1.0)];

/// Multi indices of total degree up to some order, graded by degree, so that the indices of degree at most `q` are
/// always the first `ntaylor(q)`.
#[derive(Clone, Debug)]
pub struct MultiIndices {
    order: usize,
    indices: Vec<[usize; 3]>,
    lookup: Vec<usize>,
}

impl MultiIndices {
    /// Constructor
    pub fn new(order: usize) -> Self {
        let stride = order + 1;
        let mut indices = Vec::with_capacity(ntaylor(order));
        let mut lookup = vec![usize::MAX; stride * stride * stride];

        for degree in 0..=order {
            for a in (0..=degree).rev() {
                for b in (0..=(degree - a)).rev() {
                    let alpha = [a, b, degree - a - b];
                    lookup[(alpha[0] * stride + alpha[1]) * stride + alpha[2]] = indices.len();
                    indices.push(alpha);
                }
            }
        }

        Self {
            order,
            indices,
            lookup,
        }
    }

    /// Number of indices.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether there are no indices.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The multi index at a position.
    pub fn get(&self, position: usize) -> [usize; 3] {
        self.indices[position]
    }

    /// Position of a multi index of degree at most the order.
    #[inline]
    pub fn position(&self, alpha: &[usize; 3]) -> usize {
        let stride = self.order + 1;
        self.lookup[(alpha[0] * stride + alpha[1]) * stride + alpha[2]]
    }

    /// First axis along which a non zero multi index has a positive component.
    #[inline]
    fn leading_axis(alpha: &[usize; 3]) -> usize {
        if alpha[0] > 0 {
            0
        } else if alpha[1] > 0 {
            1
        } else {
            2
        }
    }

    /// `x^α / α!` for the first `out.len()` multi indices.
    fn scaled_monomials(&self, x: &[f64; 3], out: &mut [f64]) {
        out[0] = 1.0;
        for i in 1..out.len() {
            let alpha = self.indices[i];
            let d = Self::leading_axis(&alpha);
            let mut lower = alpha;
            lower[d] -= 1;
            out[i] = out[self.position(&lower)] * x[d] / alpha[d] as f64;
        }
    }

    /// Derivatives `∂^α (|R|^2)^-s` for every multi index, by recursion over the derivatives `f_k` of `ρ^-s`,
    /// `∂^{α+e} f_k(|R|^2) = 2 R_e ∂^α f_{k+1} + 2 α_e ∂^{α-e} f_{k+1}`.
    fn kernel_derivatives(&self, r: &[f64; 3], s: f64, out: &mut [f64]) {
        let rho = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
        let mut next = vec![0f64; self.len()];
        let mut current = vec![0f64; self.len()];

        for k in (0..=self.order).rev() {
            // f_k(ρ) = (-1)^k (s)_k ρ^(-s-k)
            let rising = (0..k).fold(1f64, |acc, i| acc * (s + i as f64));
            current[0] = parity(k) * rising * rho.powf(-s - k as f64);

            for i in 1..ntaylor(self.order - k) {
                let alpha = self.indices[i];
                let d = Self::leading_axis(&alpha);
                let mut beta = alpha;
                beta[d] -= 1;

                let mut value = 2.0 * r[d] * next[self.position(&beta)];
                if beta[d] > 0 {
                    let mut lower = beta;
                    lower[d] -= 1;
                    value += 2.0 * beta[d] as f64 * next[self.position(&lower)];
                }
                current[i] = value;
            }

            std::mem::swap(&mut current, &mut next);
        }

        out.copy_from_slice(&next);
    }
}

/// Lennard-Jones interactions between particles carrying parameters, particles without them take no part.
#[derive(Clone, Debug)]
pub struct LennardJones {
    expansion_order: usize,

    /// Indices up to twice the expansion order, as needed by the derivative tensors.
    indices: MultiIndices,

    /// Coefficients per channel.
    nchannel: usize,

    /// `α!` over all indices.
    factorials: Vec<f64>,

    /// `sums[β * nchannel + α]` is the position of `α + β`.
    sums: Vec<usize>,
}

impl LennardJones {
    /// Constructor
    ///
    /// # Arguments
    /// * `expansion_order` - Maximum total degree of the Taylor expansions.
    pub fn new(expansion_order: usize) -> Result<Self, FmmError> {
        if expansion_order > MAX_EXPANSION_ORDER {
            return Err(FmmError::Configuration(format!(
                "expansion order {expansion_order} exceeds the maximum of {MAX_EXPANSION_ORDER}"
            )));
        }

        let indices = MultiIndices::new(2 * expansion_order);
        let nchannel = ntaylor(expansion_order);

        let factorials = (0..indices.len())
            .map(|i| {
                let alpha = indices.get(i);
                factorial(alpha[0]) * factorial(alpha[1]) * factorial(alpha[2])
            })
            .collect();

        let mut sums = Vec::with_capacity(nchannel * nchannel);
        for b in 0..nchannel {
            let beta = indices.get(b);
            for a in 0..nchannel {
                let alpha = indices.get(a);
                sums.push(indices.position(&[
                    alpha[0] + beta[0],
                    alpha[1] + beta[1],
                    alpha[2] + beta[2],
                ]));
            }
        }

        Ok(Self {
            expansion_order,
            indices,
            nchannel,
            factorials,
            sums,
        })
    }

    fn weights(particle: &Particle) -> Option<[f64; 2]> {
        particle.lennard_jones.map(|parameters| {
            let (a, b) = parameters.weights();
            [a, b]
        })
    }

    /// Position of `α - β` when `β <= α` componentwise.
    #[inline]
    fn difference(&self, alpha: &[usize; 3], beta: &[usize; 3]) -> Option<usize> {
        if beta[0] <= alpha[0] && beta[1] <= alpha[1] && beta[2] <= alpha[2] {
            Some(self.indices.position(&[
                alpha[0] - beta[0],
                alpha[1] - beta[1],
                alpha[2] - beta[2],
            ]))
        } else {
            None
        }
    }

    /// Gradient of one channel's local expansion contracted against per index sums of `w x^γ`, given as
    /// `moments[γ] = Σ w x^γ / γ!`.
    fn channel_gradient(&self, local: &[f64], moments: &[f64]) -> [f64; 3] {
        let mut g = [0f64; 3];
        for b in 1..self.nchannel {
            let beta = self.indices.get(b);
            for (d, gd) in g.iter_mut().enumerate() {
                if beta[d] > 0 {
                    let mut lower = beta;
                    lower[d] -= 1;
                    let l = self.indices.position(&lower);
                    // Σ w x^γ = γ! moments[γ]
                    *gd += local[b] * beta[d] as f64 * self.factorials[l] * moments[l];
                }
            }
        }
        g
    }
}

impl ExpansionKernel for LennardJones {
    type Coefficient = f64;
    type Transfer = Vec<f64>;
    type Signal = Vec<f64>;
    type Accumulator = Vec<f64>;

    fn kind(&self) -> KernelKind {
        KernelKind::LennardJones
    }

    fn expansion_order(&self) -> usize {
        self.expansion_order
    }

    fn ncoeffs(&self) -> usize {
        2 * self.nchannel
    }

    fn p2m(&self, particles: &[Particle], centre: &[f64; 3], multipole: &mut [f64]) {
        let n = self.nchannel;
        let mut monomials = [0f64; SCRATCH];

        for particle in particles {
            let Some(weights) = Self::weights(particle) else {
                continue;
            };
            self.indices
                .scaled_monomials(&sub(&particle.position, centre), &mut monomials[..n]);
            for (channel, w) in multipole.chunks_exact_mut(n).zip(weights) {
                for (m, x) in channel.iter_mut().zip(&monomials[..n]) {
                    *m += w * x;
                }
            }
        }
    }

    fn m2m(&self, child: &[f64], displacement: &[f64; 3], parent: &mut [f64]) {
        let n = self.nchannel;
        let mut monomials = [0f64; SCRATCH];
        self.indices
            .scaled_monomials(displacement, &mut monomials[..n]);

        for (source, target) in child.chunks_exact(n).zip(parent.chunks_exact_mut(n)) {
            for (a, t) in target.iter_mut().enumerate() {
                let alpha = self.indices.get(a);
                for (b, m) in source.iter().enumerate().take(a + 1) {
                    if let Some(d) = self.difference(&alpha, &self.indices.get(b)) {
                        *t += m * monomials[d];
                    }
                }
            }
        }
    }

    fn transfer(&self, displacement: &[f64; 3]) -> Vec<f64> {
        let n = self.indices.len();
        let mut tensor = vec![0f64; 2 * n];
        for (channel, (s, _)) in tensor.chunks_exact_mut(n).zip(CHANNELS) {
            self.indices.kernel_derivatives(displacement, s, channel);
        }
        tensor
    }

    fn signal(&self, multipole: &[f64]) -> Vec<f64> {
        let n = self.nchannel;
        let mut signal = multipole.to_vec();
        for channel in signal.chunks_exact_mut(n) {
            for (a, m) in channel.iter_mut().enumerate() {
                let alpha = self.indices.get(a);
                *m *= parity(alpha[0] + alpha[1] + alpha[2]);
            }
        }
        signal
    }

    fn accumulator(&self) -> Vec<f64> {
        vec![0f64; self.ncoeffs()]
    }

    fn m2l(&self, transfer: &Vec<f64>, signal: &Vec<f64>, accumulator: &mut Vec<f64>) {
        let n = self.nchannel;
        let nd = self.indices.len();

        for ((acc, source), tensor) in accumulator
            .chunks_exact_mut(n)
            .zip(signal.chunks_exact(n))
            .zip(transfer.chunks_exact(nd))
        {
            for (b, l) in acc.iter_mut().enumerate() {
                let sums = &self.sums[b * n..(b + 1) * n];
                *l += source
                    .iter()
                    .zip(sums)
                    .map(|(m, &ab)| m * tensor[ab])
                    .sum::<f64>();
            }
        }
    }

    fn finalise(&self, accumulator: &mut Vec<f64>, local: &mut [f64]) {
        let n = self.nchannel;
        for (acc, target) in accumulator.chunks_exact_mut(n).zip(local.chunks_exact_mut(n)) {
            for (b, (a, l)) in acc.iter_mut().zip(target.iter_mut()).enumerate() {
                *l += *a / self.factorials[b];
                *a = 0.0;
            }
        }
    }

    fn l2l(&self, parent: &[f64], displacement: &[f64; 3], child: &mut [f64]) {
        let n = self.nchannel;
        let mut monomials = [0f64; SCRATCH];
        self.indices
            .scaled_monomials(displacement, &mut monomials[..n]);

        for (source, target) in parent.chunks_exact(n).zip(child.chunks_exact_mut(n)) {
            for (g, t) in target.iter_mut().enumerate() {
                let gamma = self.indices.get(g);
                let mut sum = 0.0;
                for (b, l) in source.iter().enumerate().skip(g) {
                    if let Some(d) = self.difference(&self.indices.get(b), &gamma) {
                        sum += l * self.factorials[b] * monomials[d];
                    }
                }
                *t += sum / self.factorials[g];
            }
        }
    }

    fn l2p(&self, local: &[f64], centre: &[f64; 3], particle: &Particle) -> Evaluation {
        let Some(weights) = Self::weights(particle) else {
            return Evaluation::default();
        };

        let n = self.nchannel;
        let mut monomials = [0f64; SCRATCH];
        self.indices
            .scaled_monomials(&sub(&particle.position, centre), &mut monomials[..n]);

        let mut result = Evaluation::default();
        for ((channel, w), (_, sign)) in local.chunks_exact(n).zip(weights).zip(CHANNELS) {
            let phi: f64 = channel
                .iter()
                .zip(&monomials[..n])
                .zip(&self.factorials)
                .map(|((l, x), f)| l * x * f)
                .sum();
            let g = self.channel_gradient(channel, &monomials[..n]);

            result.energy += sign * w * phi;
            for (f, gd) in result.force.iter_mut().zip(g) {
                *f -= sign * w * gd;
            }
        }
        result
    }

    fn p2p(&self, target: &Particle, source: &Particle, shift: &[f64; 3]) -> Evaluation {
        let (Some([at, bt]), Some([as_, bs])) = (Self::weights(target), Self::weights(source)) else {
            return Evaluation::default();
        };

        let r = [
            target.position[0] - source.position[0] - shift[0],
            target.position[1] - source.position[1] - shift[1],
            target.position[2] - source.position[2] - shift[2],
        ];
        let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
        if r2 == 0.0 {
            return Evaluation::default();
        }

        let a = at * as_;
        let b = bt * bs;
        let inv_r2 = 1.0 / r2;
        let inv_r6 = inv_r2 * inv_r2 * inv_r2;
        let scale = (12.0 * a * inv_r6 - 6.0 * b) * inv_r6 * inv_r2;

        Evaluation {
            energy: (a * inv_r6 - b) * inv_r6,
            potential: 0.0,
            force: [scale * r[0], scale * r[1], scale * r[2]],
        }
    }

    fn net_gradient(&self, local: &[f64], multipole: &[f64]) -> [f64; 3] {
        let n = self.nchannel;
        let mut g = [0f64; 3];
        for ((l, m), (_, sign)) in local
            .chunks_exact(n)
            .zip(multipole.chunks_exact(n))
            .zip(CHANNELS)
        {
            let gc = self.channel_gradient(l, m);
            for (a, b) in g.iter_mut().zip(gc) {
                *a += sign * b;
            }
        }
        g
    }
}
