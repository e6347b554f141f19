//! Validated compressed-column input matrix.
//!
//! [`SparseColumns`] is the engine's read-only view of `A`. It is built once
//! from a `sprs` matrix or raw CSC arrays, checked for structural problems,
//! and then shared by every worker without further validation.

use sprs::{CsMat, CsMatView};

use crate::error::{PsluError, PsluResult};

/// Square sparse matrix in compressed sparse column form.
///
/// Row indices are strictly increasing inside each column.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseColumns {
    n: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    values: Vec<f64>,
}

impl SparseColumns {
    /// Build from raw CSC arrays, checking every structural property.
    pub fn from_raw(
        n: usize,
        col_ptr: Vec<usize>,
        row_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> PsluResult<Self> {
        if n == 0 {
            return Err(PsluError::Structural("matrix has no columns".into()));
        }
        if col_ptr.len() != n + 1 {
            return Err(PsluError::Structural(format!(
                "column pointer has length {}, expected {}",
                col_ptr.len(),
                n + 1
            )));
        }
        if col_ptr[0] != 0 || col_ptr[n] != row_idx.len() || row_idx.len() != values.len() {
            return Err(PsluError::Structural(format!(
                "column pointer does not describe {} stored entries",
                row_idx.len()
            )));
        }
        if let Some(j) = col_ptr.windows(2).position(|w| w[0] > w[1]) {
            return Err(PsluError::Structural(format!(
                "column pointer decreases at column {j}"
            )));
        }
        for j in 0..n {
            let rows = &row_idx[col_ptr[j]..col_ptr[j + 1]];
            if let Some(&r) = rows.iter().find(|&&r| r >= n) {
                return Err(PsluError::Structural(format!(
                    "row index {r} out of range in column {j} (n = {n})"
                )));
            }
            if rows.windows(2).any(|w| w[0] >= w[1]) {
                return Err(PsluError::Structural(format!(
                    "row indices of column {j} are not strictly increasing"
                )));
            }
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(PsluError::Structural(format!(
                "non-finite value stored at entry {pos}"
            )));
        }
        Ok(Self {
            n,
            col_ptr,
            row_idx,
            values,
        })
    }

    /// Copy a `sprs` CSC view.
    pub fn from_sprs(view: CsMatView<'_, f64>) -> PsluResult<Self> {
        if !view.is_csc() {
            return Err(PsluError::Structural(
                "matrix must be in compressed sparse column storage".into(),
            ));
        }
        let (rows, cols) = view.shape();
        if rows != cols {
            return Err(PsluError::Structural(format!(
                "matrix must be square, got {rows}x{cols}"
            )));
        }

        let mut col_ptr = Vec::with_capacity(cols + 1);
        let mut row_idx = Vec::with_capacity(view.nnz());
        let mut values = Vec::with_capacity(view.nnz());
        col_ptr.push(0);
        for column in view.outer_iterator() {
            for (row, &value) in column.iter() {
                row_idx.push(row);
                values.push(value);
            }
            col_ptr.push(row_idx.len());
        }
        Self::from_raw(cols, col_ptr, row_idx, values)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.row_idx.len()
    }

    /// Row indices and values of column `j`.
    pub fn column(&self, j: usize) -> (&[usize], &[f64]) {
        let range = self.col_ptr[j]..self.col_ptr[j + 1];
        (&self.row_idx[range.clone()], &self.values[range])
    }

    pub fn column_rows(&self, j: usize) -> &[usize] {
        &self.row_idx[self.col_ptr[j]..self.col_ptr[j + 1]]
    }

    /// Stored value at `(row, col)`, if any.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        let (rows, values) = self.column(col);
        rows.binary_search(&row).ok().map(|pos| values[pos])
    }

    pub fn frobenius_norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Same pattern, values replaced column by column.
    pub fn with_values(&self, values: Vec<f64>) -> PsluResult<Self> {
        if values.len() != self.values.len() {
            return Err(PsluError::Structural(format!(
                "expected {} values, got {}",
                self.values.len(),
                values.len()
            )));
        }
        Self::from_raw(self.n, self.col_ptr.clone(), self.row_idx.clone(), values)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn to_sprs(&self) -> CsMat<f64> {
        CsMat::new_csc(
            (self.n, self.n),
            self.col_ptr.clone(),
            self.row_idx.clone(),
            self.values.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn small() -> CsMat<f64> {
        let mut tri = TriMat::new((3, 3));
        tri.add_triplet(0, 0, 4.0);
        tri.add_triplet(1, 0, -1.0);
        tri.add_triplet(1, 1, 4.0);
        tri.add_triplet(2, 2, 2.0);
        tri.add_triplet(0, 2, 1.0);
        tri.to_csc()
    }

    #[test]
    fn test_from_sprs() {
        let mat = small();
        let a = SparseColumns::from_sprs(mat.view()).unwrap();
        assert_eq!(a.n(), 3);
        assert_eq!(a.nnz(), 5);
        assert_eq!(a.column_rows(0), &[0, 1]);
        assert_eq!(a.get(0, 2), Some(1.0));
        assert_eq!(a.get(1, 2), None);
        assert_eq!(a.to_sprs(), mat);
    }

    #[test]
    fn test_rejects_csr() {
        let mat = small().to_csr();
        let err = SparseColumns::from_sprs(mat.view()).unwrap_err();
        assert!(matches!(err, PsluError::Structural(_)));
    }

    #[test]
    fn test_rejects_non_square() {
        let mut tri = TriMat::new((2, 3));
        tri.add_triplet(0, 0, 1.0);
        let mat: CsMat<f64> = tri.to_csc();
        assert!(SparseColumns::from_sprs(mat.view()).is_err());
    }

    #[test]
    fn test_rejects_bad_raw_arrays() {
        assert!(SparseColumns::from_raw(0, vec![0], vec![], vec![]).is_err());
        // Out of range row
        assert!(SparseColumns::from_raw(2, vec![0, 1, 2], vec![0, 5], vec![1.0, 1.0]).is_err());
        // Unsorted rows
        assert!(
            SparseColumns::from_raw(2, vec![0, 2, 2], vec![1, 0], vec![1.0, 1.0]).is_err()
        );
        // NaN value
        assert!(
            SparseColumns::from_raw(2, vec![0, 1, 2], vec![0, 1], vec![f64::NAN, 1.0]).is_err()
        );
    }

    #[test]
    fn test_rejects_column_pointer_past_entries() {
        // col_ptr[1] points beyond the stored entries but the last one matches
        let err = SparseColumns::from_raw(2, vec![0, 5, 3], vec![0, 1, 1], vec![1.0, 2.0, 3.0])
            .unwrap_err();
        assert!(matches!(err, PsluError::Structural(_)));
        assert!(err.to_string().contains("decreases at column 1"));

        let err =
            SparseColumns::from_raw(3, vec![0, 2, 1, 3], vec![0, 1, 2], vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, PsluError::Structural(_)));
    }

    #[test]
    fn test_with_values_keeps_pattern() {
        let a = SparseColumns::from_sprs(small().view()).unwrap();
        let b = a.with_values(vec![1.0; 5]).unwrap();
        assert_eq!(b.column_rows(2), a.column_rows(2));
        assert_eq!(b.get(2, 2), Some(1.0));
        assert!(a.with_values(vec![1.0]).is_err());
    }

    #[test]
    fn test_frobenius_norm() {
        let a = SparseColumns::from_raw(2, vec![0, 1, 2], vec![0, 1], vec![3.0, 4.0]).unwrap();
        assert!((a.frobenius_norm() - 5.0).abs() < 1e-15);
    }
}
