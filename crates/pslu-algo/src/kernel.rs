//! Numeric kernel collaborator.
//!
//! The engine only needs two things from the arithmetic: apply the updates of
//! a set of completed supernodes to a column held in an [`Accumulator`], and
//! choose a pivot row. [`SupernodalKernel`] is the default, a plain
//! left-looking update with threshold partial pivoting.

use pslu_core::{PsluError, PsluResult};
use thiserror::Error;

use crate::store::FactorStore;

/// Dense scatter of the column being factored, indexed by original row.
#[derive(Debug)]
pub struct Accumulator {
    values: Vec<f64>,
    touched: Vec<bool>,
    rows: Vec<usize>,
}

impl Accumulator {
    pub fn new(n: usize) -> Self {
        Self {
            values: vec![0.0; n],
            touched: vec![false; n],
            rows: Vec::new(),
        }
    }

    fn touch(&mut self, row: usize) {
        if !self.touched[row] {
            self.touched[row] = true;
            self.rows.push(row);
        }
    }

    /// Load `A(:, j)`.
    pub fn scatter(&mut self, rows: &[usize], values: &[f64]) {
        for (&row, &value) in rows.iter().zip(values) {
            self.touch(row);
            self.values[row] += value;
        }
    }

    pub fn get(&self, row: usize) -> f64 {
        self.values[row]
    }

    pub fn subtract(&mut self, row: usize, delta: f64) {
        self.touch(row);
        self.values[row] -= delta;
    }

    /// Rows written since the last clear, in first-touch order.
    pub fn touched(&self) -> &[usize] {
        &self.rows
    }

    pub fn clear(&mut self) {
        for &row in &self.rows {
            self.values[row] = 0.0;
            self.touched[row] = false;
        }
        self.rows.clear();
    }
}

/// Why no pivot could be chosen for a column.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum NumericFailure {
    #[error("column {column} has no nonzero pivot candidate")]
    ZeroPivot { column: usize },

    #[error("column {column}: largest candidate {magnitude:e} is at or below the pivot floor")]
    BelowFloor { column: usize, magnitude: f64 },

    #[error("column {column} has a non-finite pivot candidate")]
    NonFinite { column: usize },
}

impl NumericFailure {
    pub fn column(&self) -> usize {
        match *self {
            NumericFailure::ZeroPivot { column }
            | NumericFailure::BelowFloor { column, .. }
            | NumericFailure::NonFinite { column } => column,
        }
    }
}

/// Everything pivot selection may look at besides the accumulator.
#[derive(Debug, Clone, Copy)]
pub struct PivotRequest<'a> {
    pub column: usize,
    /// Original row matching the column's original index
    pub diagonal_row: usize,
    /// Unpivoted rows of the column structure, ascending
    pub candidates: &'a [usize],
    /// Pivot row of a previous factorization, if reused
    pub preferred: Option<usize>,
    pub threshold: f64,
    pub floor: f64,
    pub diagonal_only: bool,
}

pub trait NumericKernel: Sync {
    /// Apply the updates of the supernodes headed by `dependencies` (ascending)
    /// to column `column`.
    fn update(
        &self,
        column: usize,
        dependencies: &[usize],
        store: &FactorStore,
        acc: &mut Accumulator,
    ) -> PsluResult<()>;

    fn select_pivot(
        &self,
        request: &PivotRequest<'_>,
        acc: &Accumulator,
    ) -> Result<usize, NumericFailure>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SupernodalKernel;

impl NumericKernel for SupernodalKernel {
    fn update(
        &self,
        column: usize,
        dependencies: &[usize],
        store: &FactorStore,
        acc: &mut Accumulator,
    ) -> PsluResult<()> {
        for &head in dependencies {
            let end = store.supernode_end(head).min(column);
            let rows_region = store.supernode_rows(head).ok_or_else(|| {
                PsluError::InvariantViolation(format!("supernode {head} has no row set"))
            })?;
            let rows = store.lsub.read(rows_region);
            for k in head..end {
                let xk = acc.get(store.pivot_row(k));
                if xk == 0.0 {
                    continue;
                }
                let region = store.column_values(k).ok_or_else(|| {
                    PsluError::InvariantViolation(format!("column {k} has no committed values"))
                })?;
                let values = store.lusup.read(region);
                for (&row, &l) in rows.iter().zip(values.iter()) {
                    // U block entries and the pivot itself are not part of L(:, k)
                    if matches!(store.pivot_of_row(row), Some(c) if c >= head && c <= k) {
                        continue;
                    }
                    acc.subtract(row, l * xk);
                }
            }
        }
        Ok(())
    }

    fn select_pivot(
        &self,
        request: &PivotRequest<'_>,
        acc: &Accumulator,
    ) -> Result<usize, NumericFailure> {
        let column = request.column;
        let mut pivmax = 0.0f64;
        let mut pivptr = None;
        for &row in request.candidates {
            let magnitude = acc.get(row).abs();
            if !magnitude.is_finite() {
                return Err(NumericFailure::NonFinite { column });
            }
            if magnitude > pivmax {
                pivmax = magnitude;
                pivptr = Some(row);
            }
        }

        let is_candidate = |row: usize| request.candidates.binary_search(&row).is_ok();

        if request.diagonal_only {
            let diag = request.diagonal_row;
            let magnitude = if is_candidate(diag) {
                acc.get(diag).abs()
            } else {
                0.0
            };
            if magnitude == 0.0 {
                return Err(NumericFailure::ZeroPivot { column });
            }
            if magnitude <= request.floor {
                return Err(NumericFailure::BelowFloor { column, magnitude });
            }
            return Ok(diag);
        }

        let Some(pivptr) = pivptr else {
            return Err(NumericFailure::ZeroPivot { column });
        };
        if pivmax <= request.floor {
            return Err(NumericFailure::BelowFloor {
                column,
                magnitude: pivmax,
            });
        }

        let cutoff = request.threshold * pivmax;
        let acceptable = |row: usize| {
            let magnitude = acc.get(row).abs();
            is_candidate(row) && magnitude != 0.0 && magnitude >= cutoff
        };
        if let Some(row) = request.preferred.filter(|&row| acceptable(row)) {
            return Ok(row);
        }
        if acceptable(request.diagonal_row) {
            return Ok(request.diagonal_row);
        }
        Ok(pivptr)
    }
}
