//! Coulomb kernel, `1 / r`, expanded in solid harmonics.
//!
//! Regular harmonics are normalised as `R_n^m = r^n P_n^|m|(cos θ) e^{imφ} / (n + |m|)!` and irregular harmonics as
//! `I_n^m = (n - |m|)! P_n^|m|(cos θ) e^{imφ} / r^{n+1}`, with Legendre functions taken without the Condon-Shortley
//! phase. Both satisfy `X_n^{-m} = (-1)^m conj(X_n^m)`, so only orders `m >= 0` are stored, in triangular layout.
//!
//! With these conventions
//! * a multipole expansion about `c` is `M_n^m = Σ q conj(R_n^m(x - c))`, giving `Φ(x) = Σ M_n^m I_n^m(x - c)`,
//! * a local expansion about `c` is `Φ(c + y) = Σ L_n^m conj(R_n^m(y))`,
//!
//! and every translation is a contraction of coefficients against harmonics of the displacement.
use num::Zero;
use num_complex::Complex;

use crate::{
    fmm::{
        constants::MAX_EXPANSION_ORDER,
        fft::Fft2d,
        helpers::{parity, sub},
        types::{Evaluation, KernelKind, M2lMethod, Particle},
    },
    traits::{kernel::ExpansionKernel, types::FmmError},
};

/// Complex coefficient.
pub type C64 = Complex<f64>;

/// Number of stored coefficients of an expansion of a given order.
pub const fn ncoeffs(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

/// Position of degree `n`, order `m >= 0` in triangular storage.
pub const fn index(n: usize, m: usize) -> usize {
    n * (n + 1) / 2 + m
}

/// Stack scratch large enough for the harmonics of any supported expansion order.
const SCRATCH: usize = ncoeffs(MAX_EXPANSION_ORDER);

/// Read a coefficient of any order from triangular storage, zero when `|m| > n`.
#[inline]
pub fn full(coefficients: &[C64], n: usize, m: i64) -> C64 {
    let am = m.unsigned_abs() as usize;
    if am > n {
        return C64::zero();
    }
    let c = coefficients[index(n, am)];
    if m >= 0 {
        c
    } else if am % 2 == 0 {
        c.conj()
    } else {
        -c.conj()
    }
}

/// Regular solid harmonics of `x` up to degree `order`, written to the front of `out`.
pub fn regular(x: &[f64; 3], order: usize, out: &mut [C64]) {
    let [x, y, z] = *x;
    let r2 = x * x + y * y + z * z;
    let xy = C64::new(x, y);

    out[0] = C64::new(1.0, 0.0);
    for m in 0..=order {
        if m > 0 {
            out[index(m, m)] = out[index(m - 1, m - 1)] * xy / (2 * m) as f64;
        }
        if m < order {
            out[index(m + 1, m)] = out[index(m, m)] * z;
        }
        for n in (m + 1)..order {
            let a = out[index(n, m)] * ((2 * n + 1) as f64 * z);
            let b = out[index(n - 1, m)] * r2;
            out[index(n + 1, m)] = (a - b) / ((n + m + 1) * (n - m + 1)) as f64;
        }
    }
}

/// Irregular solid harmonics of `x` up to degree `order`, written to the front of `out`. `x` must be non zero.
pub fn irregular(x: &[f64; 3], order: usize, out: &mut [C64]) {
    let [x, y, z] = *x;
    let r2 = x * x + y * y + z * z;
    let inv_r2 = 1.0 / r2;
    let xy = C64::new(x, y);

    out[0] = C64::new(inv_r2.sqrt(), 0.0);
    for m in 0..=order {
        if m > 0 {
            out[index(m, m)] = out[index(m - 1, m - 1)] * xy * ((2 * m - 1) as f64 * inv_r2);
        }
        if m < order {
            out[index(m + 1, m)] = out[index(m, m)] * ((2 * m + 1) as f64 * z * inv_r2);
        }
        for n in (m + 1)..order {
            let a = out[index(n, m)] * ((2 * n + 1) as f64 * z);
            let b = out[index(n - 1, m)] * ((n * n - m * m) as f64);
            out[index(n + 1, m)] = (a - b) * inv_r2;
        }
    }
}

/// Translate a multipole expansion with a tensor of regular harmonics, accumulating
/// `out_n^m += Σ_{k,l} M_k^l conj(T_{n-k}^{m-l})` for `n <= target_order`.
///
/// # Arguments
/// * `multipole` - Source coefficients.
/// * `source_order` - Order of `multipole`.
/// * `tensor` - Regular harmonics of the translation, or a sum of them, up to degree `target_order`.
/// * `target_order` - Order of `out`.
/// * `out` - Coefficients to accumulate into.
pub fn shift_multipole(
    multipole: &[C64],
    source_order: usize,
    tensor: &[C64],
    target_order: usize,
    out: &mut [C64],
) {
    for n in 0..=target_order {
        for m in 0..=n {
            let mi = m as i64;
            let mut sum = C64::zero();
            for k in 0..=n.min(source_order) {
                let j = n - k;
                let (ki, ji) = (k as i64, j as i64);
                for l in (-ki).max(mi - ji)..=ki.min(mi + ji) {
                    sum += full(multipole, k, l) * full(tensor, j, mi - l).conj();
                }
            }
            out[index(n, m)] += sum;
        }
    }
}

/// Translate a local expansion with a tensor of regular harmonics, accumulating
/// `out_k^l += Σ_{n>=k,m} L_n^m conj(T_{n-k}^{m-l})`.
pub fn shift_local(local: &[C64], order: usize, tensor: &[C64], out: &mut [C64]) {
    for k in 0..=order {
        for l in 0..=k {
            let li = l as i64;
            let mut sum = C64::zero();
            for n in k..=order {
                let j = n - k;
                let (ni, ji) = (n as i64, j as i64);
                for m in (-ni).max(li - ji)..=ni.min(li + ji) {
                    sum += full(local, n, m) * full(tensor, j, m - li).conj();
                }
            }
            out[index(k, l)] += sum;
        }
    }
}

/// Multipole to local contraction with a tensor of irregular harmonics, accumulating
/// `L_n^m += (-1)^n Σ_{k,l} M_k^l T_{n+k}^{m+l}` for `n <= target_order`.
///
/// # Arguments
/// * `multipole` - Source coefficients.
/// * `source_order` - Order of `multipole`.
/// * `tensor` - Irregular harmonics of the target centre minus the source centre, or a lattice sum of them, up to
///   degree `source_order + target_order`.
/// * `target_order` - Order of `local`.
/// * `local` - Coefficients to accumulate into.
pub fn contract_irregular(
    multipole: &[C64],
    source_order: usize,
    tensor: &[C64],
    target_order: usize,
    local: &mut [C64],
) {
    for n in 0..=target_order {
        for m in 0..=n {
            let mi = m as i64;
            let mut sum = C64::zero();
            for k in 0..=source_order {
                let ki = k as i64;
                for l in -ki..=ki {
                    sum += full(multipole, k, l) * full(tensor, n + k, mi + l);
                }
            }
            local[index(n, m)] += sum * parity(n);
        }
    }
}

/// `Re Σ_{n,m} L_n^m X_n^m` over all orders, for coefficient sets obeying the negative order symmetry.
pub fn contract(local: &[C64], x: &[C64], order: usize) -> f64 {
    (0..=order)
        .map(|n| {
            let mut sum = (local[index(n, 0)] * x[index(n, 0)]).re;
            for m in 1..=n {
                sum += 2.0 * (local[index(n, m)] * x[index(n, m)]).re;
            }
            sum
        })
        .sum()
}

/// Gradient of `Σ L_n^m X_n^m` with respect to the evaluation point, where `X` holds conjugated regular harmonics of
/// the point, or a multipole expansion summing them.
pub fn gradient(local: &[C64], x: &[C64], order: usize) -> [f64; 3] {
    let mut gx = C64::zero();
    let mut gy = C64::zero();
    let mut gz = C64::zero();
    let minus_half_i = C64::new(0.0, -0.5);

    for n in 1..=order {
        let j = n - 1;
        let ni = n as i64;
        for m in -ni..=ni {
            let l = full(local, n, m);
            let below = full(x, j, m - 1);
            let above = full(x, j, m + 1);
            gx += l * (below - above) * 0.5;
            gy += l * (below + above) * minus_half_i;
            gz += l * full(x, j, m);
        }
    }

    [gx.re, gy.re, gz.re]
}

/// Coulomb interactions, `q_i q_j / r` with unit Coulomb constant.
#[derive(Clone, Debug)]
pub struct Coulomb {
    expansion_order: usize,
    method: M2lMethod,
    fft: Option<Fft2d>,
}

impl Coulomb {
    /// Constructor
    ///
    /// # Arguments
    /// * `expansion_order` - Truncation degree of multipole and local expansions.
    /// * `method` - Evaluation of multipole to local translations.
    pub fn new(expansion_order: usize, method: M2lMethod) -> Result<Self, FmmError> {
        if expansion_order > MAX_EXPANSION_ORDER {
            return Err(FmmError::Configuration(format!(
                "expansion order {expansion_order} exceeds the maximum of {MAX_EXPANSION_ORDER}"
            )));
        }

        // Degrees 0..=2p of the transfer tensor along one axis, orders -2p..=2p along the other
        let fft = match method {
            M2lMethod::Dense => None,
            M2lMethod::Fft => Some(Fft2d::new(2 * expansion_order + 1, 4 * expansion_order + 1)),
        };

        Ok(Self {
            expansion_order,
            method,
            fft,
        })
    }

    /// Multipole to local method in use.
    pub fn method(&self) -> M2lMethod {
        self.method
    }

    /// Place a transfer tensor on the spectral grid, degree `j` in row `j` and order `μ` in column `μ mod cols`.
    fn transfer_grid(&self, fft: &Fft2d, tensor: &[C64]) -> Vec<C64> {
        let (rows, cols) = fft.shape();
        let mut grid = vec![C64::zero(); rows * cols];
        for j in 0..rows {
            let ji = j as i64;
            for mu in -ji..=ji {
                grid[j * cols + mu.rem_euclid(cols as i64) as usize] = full(tensor, j, mu);
            }
        }
        grid
    }

    /// Place a multipole on the spectral grid reflected in both directions, so that the cyclic convolution with a
    /// transfer grid evaluates the multipole to local correlation.
    fn signal_grid(&self, fft: &Fft2d, multipole: &[C64]) -> Vec<C64> {
        let (rows, cols) = fft.shape();
        let mut grid = vec![C64::zero(); rows * cols];
        for k in 0..=self.expansion_order {
            let ki = k as i64;
            let row = (rows - k) % rows;
            for l in -ki..=ki {
                grid[row * cols + (-l).rem_euclid(cols as i64) as usize] = full(multipole, k, l);
            }
        }
        grid
    }
}

impl ExpansionKernel for Coulomb {
    type Coefficient = C64;
    type Transfer = Vec<C64>;
    type Signal = Vec<C64>;
    type Accumulator = Vec<C64>;

    fn kind(&self) -> KernelKind {
        KernelKind::Coulomb
    }

    fn expansion_order(&self) -> usize {
        self.expansion_order
    }

    fn ncoeffs(&self) -> usize {
        ncoeffs(self.expansion_order)
    }

    fn p2m(&self, particles: &[Particle], centre: &[f64; 3], multipole: &mut [C64]) {
        let n = self.ncoeffs();
        let mut r = [C64::zero(); SCRATCH];

        for particle in particles.iter().filter(|p| p.charge != 0.0) {
            regular(&sub(&particle.position, centre), self.expansion_order, &mut r);
            for (m, r) in multipole.iter_mut().zip(&r[..n]) {
                *m += r.conj() * particle.charge;
            }
        }
    }

    fn m2m(&self, child: &[C64], displacement: &[f64; 3], parent: &mut [C64]) {
        let mut r = [C64::zero(); SCRATCH];
        regular(displacement, self.expansion_order, &mut r);
        shift_multipole(child, self.expansion_order, &r, self.expansion_order, parent);
    }

    fn transfer(&self, displacement: &[f64; 3]) -> Vec<C64> {
        let degree = 2 * self.expansion_order;
        let mut tensor = vec![C64::zero(); ncoeffs(degree)];
        irregular(displacement, degree, &mut tensor);

        match &self.fft {
            None => tensor,
            Some(fft) => fft.forward(&self.transfer_grid(fft, &tensor)),
        }
    }

    fn signal(&self, multipole: &[C64]) -> Vec<C64> {
        match &self.fft {
            None => multipole.to_vec(),
            Some(fft) => fft.forward(&self.signal_grid(fft, multipole)),
        }
    }

    fn accumulator(&self) -> Vec<C64> {
        match &self.fft {
            None => vec![C64::zero(); self.ncoeffs()],
            Some(fft) => vec![C64::zero(); fft.len()],
        }
    }

    fn m2l(&self, transfer: &Vec<C64>, signal: &Vec<C64>, accumulator: &mut Vec<C64>) {
        match &self.fft {
            None => contract_irregular(
                signal,
                self.expansion_order,
                transfer,
                self.expansion_order,
                accumulator,
            ),
            Some(_) => {
                for ((a, t), s) in accumulator.iter_mut().zip(transfer).zip(signal) {
                    *a += t * s;
                }
            }
        }
    }

    fn finalise(&self, accumulator: &mut Vec<C64>, local: &mut [C64]) {
        match &self.fft {
            None => {
                for (l, a) in local.iter_mut().zip(accumulator.iter()) {
                    *l += a;
                }
            }
            Some(fft) => {
                let cols = fft.shape().1;
                let scale = 1.0 / fft.len() as f64;
                let grid = fft.inverse(accumulator);
                for n in 0..=self.expansion_order {
                    for m in 0..=n {
                        local[index(n, m)] += grid[n * cols + m] * (parity(n) * scale);
                    }
                }
            }
        }
        accumulator.iter_mut().for_each(|a| *a = C64::zero());
    }

    fn l2l(&self, parent: &[C64], displacement: &[f64; 3], child: &mut [C64]) {
        let mut r = [C64::zero(); SCRATCH];
        regular(displacement, self.expansion_order, &mut r);
        shift_local(parent, self.expansion_order, &r, child);
    }

    fn l2p(&self, local: &[C64], centre: &[f64; 3], particle: &Particle) -> Evaluation {
        let mut x = [C64::zero(); SCRATCH];
        regular(&sub(&particle.position, centre), self.expansion_order, &mut x);
        x[..self.ncoeffs()].iter_mut().for_each(|c| *c = c.conj());

        let potential = contract(local, &x, self.expansion_order);
        let g = gradient(local, &x, self.expansion_order);
        let q = particle.charge;

        Evaluation {
            energy: q * potential,
            potential,
            force: [-q * g[0], -q * g[1], -q * g[2]],
        }
    }

    fn p2p(&self, target: &Particle, source: &Particle, shift: &[f64; 3]) -> Evaluation {
        let r = [
            target.position[0] - source.position[0] - shift[0],
            target.position[1] - source.position[1] - shift[1],
            target.position[2] - source.position[2] - shift[2],
        ];
        let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
        if r2 == 0.0 {
            return Evaluation::default();
        }

        let inv_r = 1.0 / r2.sqrt();
        let potential = source.charge * inv_r;
        let scale = target.charge * potential * inv_r * inv_r;

        Evaluation {
            energy: target.charge * potential,
            potential,
            force: [scale * r[0], scale * r[1], scale * r[2]],
        }
    }

    fn net_gradient(&self, local: &[C64], multipole: &[C64]) -> [f64; 3] {
        gradient(local, multipole, self.expansion_order)
    }
}
