//! Reproducible test matrices.
//!
//! Used by the integration tests and by `pslu generate`.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::PsluResult;
use crate::matrix::SparseColumns;

fn from_columns(n: usize, columns: Vec<BTreeMap<usize, f64>>) -> PsluResult<SparseColumns> {
    let mut col_ptr = Vec::with_capacity(n + 1);
    let mut row_idx = Vec::new();
    let mut values = Vec::new();
    col_ptr.push(0);
    for column in columns {
        for (row, value) in column {
            row_idx.push(row);
            values.push(value);
        }
        col_ptr.push(row_idx.len());
    }
    SparseColumns::from_raw(n, col_ptr, row_idx, values)
}

/// Tridiagonal matrix with constant bands.
pub fn tridiagonal(n: usize, sub: f64, diag: f64, sup: f64) -> PsluResult<SparseColumns> {
    let columns = (0..n)
        .map(|j| {
            let mut col = BTreeMap::new();
            if j > 0 {
                col.insert(j - 1, sup);
            }
            col.insert(j, diag);
            if j + 1 < n {
                col.insert(j + 1, sub);
            }
            col
        })
        .collect();
    from_columns(n, columns)
}

/// Upwind 5-point convection-diffusion operator on a `k x k` grid.
///
/// `peclet` scales the convection term; the result is unsymmetric for any
/// nonzero value.
pub fn convection_diffusion_2d(k: usize, peclet: f64) -> PsluResult<SparseColumns> {
    let n = k * k;
    let h = 1.0 / (k as f64 + 1.0);
    let c = 0.5 * peclet * h;
    let mut columns = vec![BTreeMap::new(); n];
    for y in 0..k {
        for x in 0..k {
            let row = y * k + x;
            let mut add = |col: usize, value: f64| {
                columns[col].insert(row, value);
            };
            add(row, 4.0);
            if x > 0 {
                add(row - 1, -1.0 - c);
            }
            if x + 1 < k {
                add(row + 1, -1.0 + c);
            }
            if y > 0 {
                add(row - k, -1.0 - 0.5 * c);
            }
            if y + 1 < k {
                add(row + k, -1.0 + 0.5 * c);
            }
        }
    }
    from_columns(n, columns)
}

/// Random unsymmetric matrix with a weak diagonal, so partial pivoting
/// picks off-diagonal rows. Same seed, same matrix.
pub fn random_unsymmetric(n: usize, per_column: usize, seed: u64) -> PsluResult<SparseColumns> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut columns = Vec::with_capacity(n);
    for j in 0..n {
        let mut col = BTreeMap::new();
        let magnitude: f64 = rng.gen_range(0.05..1.0);
        let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        col.insert(j, sign * magnitude);
        for _ in 0..per_column {
            let row = rng.gen_range(0..n);
            let value: f64 = rng.gen_range(-2.0..2.0);
            col.entry(row).or_insert(value);
        }
        columns.push(col);
    }
    from_columns(n, columns)
}

/// Arrow matrix: dense last row and column, diagonal elsewhere.
pub fn arrow(n: usize) -> PsluResult<SparseColumns> {
    let columns = (0..n)
        .map(|j| {
            let mut col = BTreeMap::new();
            col.insert(j, n as f64);
            if j + 1 < n {
                col.insert(n - 1, 1.0);
            } else {
                for row in 0..n - 1 {
                    col.insert(row, 1.0);
                }
            }
            col
        })
        .collect();
    from_columns(n, columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tridiagonal_shape() {
        let a = tridiagonal(5, -1.0, 2.0, -1.0).unwrap();
        assert_eq!(a.n(), 5);
        assert_eq!(a.nnz(), 13);
        assert_eq!(a.get(1, 0), Some(-1.0));
    }

    #[test]
    fn test_convection_diffusion_is_unsymmetric() {
        let a = convection_diffusion_2d(4, 10.0).unwrap();
        assert_eq!(a.n(), 16);
        assert_ne!(a.get(0, 1), a.get(1, 0));
        assert_eq!(a.get(5, 5), Some(4.0));
    }

    #[test]
    fn test_random_is_reproducible() {
        let a = random_unsymmetric(30, 3, 7).unwrap();
        let b = random_unsymmetric(30, 3, 7).unwrap();
        assert_eq!(a, b);
        assert!((0..30).all(|j| a.get(j, j).is_some()));
    }

    #[test]
    fn test_arrow() {
        let a = arrow(4).unwrap();
        assert_eq!(a.nnz(), 4 + 3 + 3);
        assert_eq!(a.get(3, 0), Some(1.0));
        assert_eq!(a.get(0, 3), Some(1.0));
    }
}
