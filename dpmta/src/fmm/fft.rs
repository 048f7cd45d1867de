//! Two dimensional complex FFTs of small dense grids, used by the spectral multipole to local translation.
use std::sync::Arc;

use num::Zero;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Planned forward and inverse transforms of a `rows` by `cols` grid.
///
/// Grids are row major. Spectra are kept in the transposed, column major, layout so that a forward transform followed
/// by an inverse one needs only two transposes in total, spectra are only ever multiplied point wise.
#[derive(Clone)]
pub struct Fft2d {
    rows: usize,
    cols: usize,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Fft2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft2d")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

/// Transpose a row major `rows` by `cols` matrix into `dst`.
fn transpose(src: &[Complex<f64>], rows: usize, cols: usize, dst: &mut [Complex<f64>]) {
    for i in 0..rows {
        for j in 0..cols {
            dst[j * rows + i] = src[i * cols + j];
        }
    }
}

impl Fft2d {
    /// Plan transforms for a grid shape.
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            rows,
            cols,
            row_forward: planner.plan_fft_forward(cols),
            row_inverse: planner.plan_fft_inverse(cols),
            col_forward: planner.plan_fft_forward(rows),
            col_inverse: planner.plan_fft_inverse(rows),
        }
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Whether the grid is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grid shape, `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Unnormalised forward transform of a row major grid, returned in the transposed layout.
    pub fn forward(&self, grid: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let mut buffer = grid.to_vec();
        self.row_forward.process(&mut buffer);

        let mut spectrum = vec![Complex::zero(); self.len()];
        transpose(&buffer, self.rows, self.cols, &mut spectrum);
        self.col_forward.process(&mut spectrum);
        spectrum
    }

    /// Unnormalised inverse of [`Fft2d::forward`], returns a row major grid scaled by [`Fft2d::len`].
    pub fn inverse(&self, spectrum: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let mut buffer = spectrum.to_vec();
        self.col_inverse.process(&mut buffer);

        let mut grid = vec![Complex::zero(); self.len()];
        transpose(&buffer, self.cols, self.rows, &mut grid);
        self.row_inverse.process(&mut grid);
        grid
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_round_trip() {
        let fft = Fft2d::new(5, 9);
        let grid = (0..fft.len())
            .map(|i| Complex::new((i as f64).sin(), (i as f64 * 0.3).cos()))
            .collect::<Vec<_>>();

        let recovered = fft.inverse(&fft.forward(&grid));
        for (a, b) in grid.iter().zip(recovered) {
            assert_relative_eq!(a.re, b.re / fft.len() as f64, epsilon = 1e-12);
            assert_relative_eq!(a.im, b.im / fft.len() as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_cyclic_convolution() {
        // Point wise products of spectra convolve cyclically in both directions
        let (rows, cols) = (3, 4);
        let fft = Fft2d::new(rows, cols);

        let a = (0..rows * cols)
            .map(|i| Complex::new(i as f64 + 1.0, 0.0))
            .collect::<Vec<_>>();
        let mut b = vec![Complex::zero(); rows * cols];
        // Delta at (1, 2) shifts a by one row and two columns
        b[cols + 2] = Complex::new(1.0, 0.0);

        let product = fft
            .forward(&a)
            .iter()
            .zip(fft.forward(&b))
            .map(|(x, y)| x * y)
            .collect::<Vec<_>>();
        let c = fft.inverse(&product);

        for i in 0..rows {
            for j in 0..cols {
                let expected = a[((i + rows - 1) % rows) * cols + (j + cols - 2) % cols];
                assert_relative_eq!(c[i * cols + j].re / fft.len() as f64, expected.re, epsilon = 1e-12);
            }
        }
    }
}
