//! Helper Functions
use lazy_static::lazy_static;

use crate::tree::types::Domain;

/// Largest `n` whose factorial is finite in double precision.
const MAX_FACTORIAL: usize = 170;

lazy_static! {
    static ref FACTORIALS: Vec<f64> = {
        let mut factorials = vec![1f64; MAX_FACTORIAL + 1];
        for n in 1..=MAX_FACTORIAL {
            factorials[n] = factorials[n - 1] * n as f64;
        }
        factorials
    };
}

/// `n!`, infinite beyond the range of double precision.
pub fn factorial(n: usize) -> f64 {
    FACTORIALS.get(n).copied().unwrap_or(f64::INFINITY)
}

/// `(-1)^n`
pub fn parity(n: usize) -> f64 {
    if n % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

/// Component wise difference `a - b`.
pub fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Euclidean norm.
pub fn norm(a: &[f64; 3]) -> f64 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt()
}

/// Outer product `a (x) b`.
pub fn outer(a: &[f64; 3], b: &[f64; 3]) -> [[f64; 3]; 3] {
    let mut result = [[0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            result[i][j] = a[i] * b[j];
        }
    }
    result
}

/// Accumulate `scale * b` into `a`.
pub fn add_scaled(a: &mut [[f64; 3]; 3], b: &[[f64; 3]; 3], scale: f64) {
    for (ra, rb) in a.iter_mut().zip(b) {
        for (x, y) in ra.iter_mut().zip(rb) {
            *x += scale * y;
        }
    }
}

/// Real space translation of a lattice image.
///
/// # Arguments
/// * `image` - Integer image index along each axis.
/// * `domain` - Unit cell of the lattice.
pub fn image_shift(image: &[i64; 3], domain: &Domain) -> [f64; 3] {
    [
        image[0] as f64 * domain.side_length[0],
        image[1] as f64 * domain.side_length[1],
        image[2] as f64 * domain.side_length[2],
    ]
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_factorials() {
        assert_eq!(factorial(0), 1.0);
        assert_eq!(factorial(5), 120.0);
        assert_relative_eq!(factorial(20), 2_432_902_008_176_640_000.0);
        assert!(factorial(171).is_infinite());
    }

    #[test]
    fn test_outer() {
        let mut w = [[0f64; 3]; 3];
        add_scaled(&mut w, &outer(&[1.0, 2.0, 3.0], &[0.0, 1.0, -1.0]), 0.5);
        assert_eq!(w[1], [0.0, 1.0, -1.0]);
        assert_eq!(w[2][2], -1.5);
    }
}
