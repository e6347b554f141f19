//! Assembled factors and verification helpers.
//!
//! [`LuFactors`] holds `L` (unit lower triangular, diagonal stored) and `U`
//! as `sprs` CSC matrices in factorization order, such that
//! `P·A·Q = L·U` with `P` given by [`LuFactors::row_perm`] and `Q` by
//! [`LuFactors::col_order`]. Exact zeros produced by cancellation are not
//! stored, so the pattern only depends on the values, not on how columns were
//! grouped into supernodes.

use std::ops::Range;

use pslu_core::{FactorReport, PsluError, PsluResult, SparseColumns, EMPTY};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, CsMatView};

use crate::store::FactorStore;

/// Symbolic results of a previous factorization, for the reuse modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorFactorization {
    pub col_order: Vec<usize>,
    /// Postordered elimination tree in factorization order
    pub parent: Vec<usize>,
    /// `row_perm[original_row]` = pivot column
    pub row_perm: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct LuFactors {
    l: CsMat<f64>,
    u: CsMat<f64>,
    row_perm: Vec<usize>,
    col_order: Vec<usize>,
    parent: Vec<usize>,
    supernodes: Vec<Range<usize>>,
    report: FactorReport,
}

type ColumnEntries = (Vec<(usize, f64)>, Vec<(usize, f64)>);

/// `L(:, k)` and `U(:, k)` as sorted `(row, value)` lists.
fn extract_column(store: &FactorStore, perm_r: &[usize], k: usize) -> PsluResult<ColumnEntries> {
    let missing = |what: &str| PsluError::InvariantViolation(format!("column {k} has no {what}"));
    let head = store.supernode_of(k).ok_or_else(|| missing("supernode"))?;
    let rows_region = store.supernode_rows(head).ok_or_else(|| missing("row set"))?;
    let values_region = store.column_values(k).ok_or_else(|| missing("values"))?;

    let mut lower = vec![(k, 1.0)];
    let mut upper: Vec<(usize, f64)> = store
        .upper_entries(k)
        .into_iter()
        .filter(|&(_, v)| v != 0.0)
        .collect();

    let rows = store.lsub.read(rows_region);
    let values = store.lusup.read(values_region);
    if rows.len() != values.len() {
        return Err(PsluError::InvariantViolation(format!(
            "column {k} stores {} values for {} rows",
            values.len(),
            rows.len()
        )));
    }
    for (&row, &value) in rows.iter().zip(values.iter()) {
        let pivot_col = perm_r[row];
        if pivot_col == EMPTY || pivot_col < head {
            return Err(PsluError::InvariantViolation(format!(
                "row {row} of supernode {head} has pivot column {pivot_col}"
            )));
        }
        if pivot_col == k {
            upper.push((k, value));
        } else if value != 0.0 {
            if pivot_col < k {
                upper.push((pivot_col, value));
            } else {
                lower.push((pivot_col, value));
            }
        }
    }
    lower.sort_unstable_by_key(|e| e.0);
    upper.sort_unstable_by_key(|e| e.0);
    Ok((lower, upper))
}

fn to_csc(n: usize, columns: Vec<Vec<(usize, f64)>>) -> CsMat<f64> {
    let nnz = columns.iter().map(Vec::len).sum();
    let mut indptr = Vec::with_capacity(n + 1);
    let mut indices = Vec::with_capacity(nnz);
    let mut data = Vec::with_capacity(nnz);
    indptr.push(0);
    for column in columns {
        for (row, value) in column {
            indices.push(row);
            data.push(value);
        }
        indptr.push(indices.len());
    }
    CsMat::new_csc((n, n), indptr, indices, data)
}

impl LuFactors {
    /// Read the committed factorization out of the store, one column per
    /// rayon task.
    pub(crate) fn assemble(
        store: &FactorStore,
        col_order: Vec<usize>,
        parent: Vec<usize>,
        mut report: FactorReport,
    ) -> PsluResult<Self> {
        let n = store.n();
        let perm_r = store.row_permutation();
        let columns = (0..n)
            .into_par_iter()
            .map(|k| extract_column(store, &perm_r, k))
            .collect::<PsluResult<Vec<_>>>()?;
        let (lower, upper): (Vec<_>, Vec<_>) = columns.into_iter().unzip();

        let l = to_csc(n, lower);
        let u = to_csc(n, upper);
        let supernodes = store.partition();

        report.nnz_l = l.nnz();
        report.nnz_u = u.nnz();
        report.supernodes = supernodes.len();
        report.max_supernode_width = supernodes.iter().map(|s| s.len()).max().unwrap_or(0);
        report.mean_supernode_width = if supernodes.is_empty() {
            0.0
        } else {
            n as f64 / supernodes.len() as f64
        };

        Ok(Self {
            l,
            u,
            row_perm: perm_r,
            col_order,
            parent,
            supernodes,
            report,
        })
    }

    pub(crate) fn set_elapsed(&mut self, elapsed_ms: f64) {
        self.report.elapsed_ms = elapsed_ms;
    }

    pub fn n(&self) -> usize {
        self.col_order.len()
    }

    pub fn l(&self) -> CsMatView<'_, f64> {
        self.l.view()
    }

    pub fn u(&self) -> CsMatView<'_, f64> {
        self.u.view()
    }

    /// `row_perm[original_row]` is the row's position in `P·A`.
    pub fn row_perm(&self) -> &[usize] {
        &self.row_perm
    }

    /// `col_order[k]` is the original column at position `k` of `A·Q`.
    pub fn col_order(&self) -> &[usize] {
        &self.col_order
    }

    pub fn etree(&self) -> &[usize] {
        &self.parent
    }

    pub fn supernodes(&self) -> &[Range<usize>] {
        &self.supernodes
    }

    pub fn report(&self) -> &FactorReport {
        &self.report
    }

    /// Symbolic data for a `SamePattern` or `SamePatternSameRowPerm` run.
    pub fn prior(&self) -> PriorFactorization {
        PriorFactorization {
            col_order: self.col_order.clone(),
            parent: self.parent.clone(),
            row_perm: self.row_perm.clone(),
        }
    }

    /// Relative residual `‖L·U − P·A·Q‖_F / ‖A‖_F`.
    pub fn residual(&self, a: &SparseColumns) -> PsluResult<f64> {
        let n = self.n();
        if a.n() != n {
            return Err(PsluError::Structural(format!(
                "matrix is {m}x{m}, factors are {n}x{n}",
                m = a.n()
            )));
        }
        let norm = a.frobenius_norm();
        let squares: f64 = (0..n)
            .into_par_iter()
            .map_init(
                || (vec![0.0f64; n], Vec::new()),
                |(work, touched), k| {
                    let mut add = |row: usize, value: f64| {
                        if work[row] == 0.0 {
                            touched.push(row);
                        }
                        work[row] += value;
                    };
                    if let Some(u_col) = self.u.outer_view(k) {
                        for (c, &u_ck) in u_col.iter() {
                            if let Some(l_col) = self.l.outer_view(c) {
                                for (i, &l_ic) in l_col.iter() {
                                    add(i, l_ic * u_ck);
                                }
                            }
                        }
                    }
                    let (rows, values) = a.column(self.col_order[k]);
                    for (&row, &value) in rows.iter().zip(values) {
                        add(self.row_perm[row], -value);
                    }
                    let mut sum = 0.0;
                    touched.sort_unstable();
                    touched.dedup();
                    for &row in touched.iter() {
                        sum += work[row] * work[row];
                        work[row] = 0.0;
                    }
                    touched.clear();
                    sum
                },
            )
            .sum();
        Ok(if norm == 0.0 {
            squares.sqrt()
        } else {
            squares.sqrt() / norm
        })
    }

    /// Solve `A·x = b` by forward and backward substitution.
    pub fn solve(&self, b: &[f64]) -> PsluResult<Vec<f64>> {
        let n = self.n();
        if b.len() != n {
            return Err(PsluError::Structural(format!(
                "right-hand side has length {}, expected {n}",
                b.len()
            )));
        }
        let mut y = vec![0.0; n];
        for (row, &value) in b.iter().enumerate() {
            y[self.row_perm[row]] = value;
        }

        for k in 0..n {
            let yk = y[k];
            if yk == 0.0 {
                continue;
            }
            if let Some(col) = self.l.outer_view(k) {
                for (i, &l_ik) in col.iter() {
                    if i > k {
                        y[i] -= l_ik * yk;
                    }
                }
            }
        }

        for k in (0..n).rev() {
            let col = self.u.outer_view(k).ok_or_else(|| {
                PsluError::InvariantViolation(format!("U has no column {k}"))
            })?;
            let diag = col.get(k).copied().ok_or_else(|| {
                PsluError::InvariantViolation(format!("U({k}, {k}) is not stored"))
            })?;
            let zk = y[k] / diag;
            y[k] = zk;
            if zk == 0.0 {
                continue;
            }
            for (i, &u_ik) in col.iter() {
                if i < k {
                    y[i] -= u_ik * zk;
                }
            }
        }

        let mut x = vec![0.0; n];
        for (k, &col) in self.col_order.iter().enumerate() {
            x[col] = y[k];
        }
        Ok(x)
    }
}
