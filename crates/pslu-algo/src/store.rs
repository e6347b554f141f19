//! Supernode and factor store.
//!
//! Column-indexed descriptors (`supno`, `sup_end`, pivots, regions) are
//! atomics or write-once cells so that a column's data can be read by any
//! thread that has observed the column as DONE, without a lock. Bulk data
//! lives in the four [`FactorBuffer`]s.
//!
//! Layout of supernode `h` with full row set `R` (original row indices,
//! sorted): `lsub[R]` holds the rows; each column `k` of the supernode owns a
//! `lusup` region of `|R|` values, one per row of `R`. For a row whose pivot
//! column lies in `[h, k)` the value is an entry of `U`; the row pivoted at
//! `k` carries the pivot; every other row carries an `L` multiplier. Entries
//! of `U` above the supernode go to `usub`/`ucol` as `(pivot column, value)`.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use pslu_core::{FactorOptions, MemoryUsage, PsluError, PsluResult, EMPTY};

use crate::memory::{BufferKind, FactorBuffer, MemoryBudget, Region};

/// Regions of one column's entries above its supernode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpperRegions {
    pub index: Region,
    pub value: Region,
}

pub struct FactorStore {
    n: usize,
    supno: Box<[AtomicUsize]>,
    sup_end: Box<[AtomicUsize]>,
    perm_r: Box<[AtomicUsize]>,
    pivot_row: Box<[AtomicUsize]>,
    rows: Box<[OnceLock<Region>]>,
    values: Box<[OnceLock<Region>]>,
    upper: Box<[OnceLock<UpperRegions>]>,
    pub(crate) lsub: FactorBuffer<usize>,
    pub(crate) lusup: FactorBuffer<f64>,
    pub(crate) usub: FactorBuffer<usize>,
    pub(crate) ucol: FactorBuffer<f64>,
    budget: Arc<MemoryBudget>,
}

fn atomics(n: usize) -> Box<[AtomicUsize]> {
    (0..n).map(|_| AtomicUsize::new(EMPTY)).collect()
}

fn cells<T>(n: usize) -> Box<[OnceLock<T>]> {
    (0..n).map(|_| OnceLock::new()).collect()
}

impl FactorStore {
    /// Size the buffers from `nnz(A)` and the options' fill ratio.
    pub fn new(n: usize, nnz: usize, options: &FactorOptions) -> PsluResult<Self> {
        let budget = Arc::new(MemoryBudget::new(options.memory_limit_bytes));
        let initial = nnz.saturating_mul(options.fill_ratio).max(n).max(16);
        let growth = options.expansion_factor;
        Ok(Self {
            n,
            supno: atomics(n),
            sup_end: atomics(n),
            perm_r: atomics(n),
            pivot_row: atomics(n),
            rows: cells(n),
            values: cells(n),
            upper: cells(n),
            lsub: FactorBuffer::with_capacity(BufferKind::Lsub, initial, growth, budget.clone())?,
            lusup: FactorBuffer::with_capacity(BufferKind::Lusup, initial, growth, budget.clone())?,
            usub: FactorBuffer::with_capacity(BufferKind::Usub, initial / 2, growth, budget.clone())?,
            ucol: FactorBuffer::with_capacity(BufferKind::Ucol, initial / 2, growth, budget.clone())?,
            budget,
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Pivot column of an original row, once assigned.
    pub fn pivot_of_row(&self, row: usize) -> Option<usize> {
        match self.perm_r[row].load(Ordering::Acquire) {
            EMPTY => None,
            col => Some(col),
        }
    }

    /// Original row chosen as pivot of `col`.
    pub fn pivot_row(&self, col: usize) -> usize {
        self.pivot_row[col].load(Ordering::Acquire)
    }

    pub(crate) fn assign_pivot(&self, row: usize, col: usize) -> PsluResult<()> {
        self.perm_r[row]
            .compare_exchange(EMPTY, col, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|owner| {
                PsluError::InvariantViolation(format!(
                    "row {row} chosen as pivot of column {col} already pivots column {owner}"
                ))
            })?;
        self.pivot_row[col].store(row, Ordering::Release);
        Ok(())
    }

    /// Head of the supernode containing `col`.
    pub fn supernode_of(&self, col: usize) -> Option<usize> {
        match self.supno[col].load(Ordering::Acquire) {
            EMPTY => None,
            head => Some(head),
        }
    }

    /// One past the last committed column of the supernode headed by `head`.
    pub fn supernode_end(&self, head: usize) -> usize {
        self.sup_end[head].load(Ordering::Acquire)
    }

    /// Register `col` as part of the supernode `head` (a new one if equal).
    pub(crate) fn extend_supernode(&self, head: usize, col: usize) -> PsluResult<()> {
        if head == col {
            if self.rows[head].get().is_none() {
                return Err(PsluError::InvariantViolation(format!(
                    "supernode {head} opened without a row set"
                )));
            }
        } else if self.supernode_end(head) != col {
            return Err(PsluError::InvariantViolation(format!(
                "column {col} cannot join supernode {head} ending at {}",
                self.supernode_end(head)
            )));
        }
        self.supno[col].store(head, Ordering::Release);
        self.sup_end[head].store(col + 1, Ordering::Release);
        Ok(())
    }

    /// Store the full row set of a new supernode.
    pub(crate) fn publish_rows(&self, head: usize, rows: &[usize]) -> PsluResult<Region> {
        let region = self.lsub.append(rows)?;
        self.rows[head].set(region).map_err(|_| {
            PsluError::InvariantViolation(format!("row set of supernode {head} published twice"))
        })?;
        Ok(region)
    }

    pub fn supernode_rows(&self, head: usize) -> Option<Region> {
        self.rows[head].get().copied()
    }

    pub(crate) fn commit_values(&self, col: usize, values: &[f64]) -> PsluResult<Region> {
        let region = self.lusup.append(values)?;
        self.values[col].set(region).map_err(|_| {
            PsluError::InvariantViolation(format!("values of column {col} committed twice"))
        })?;
        Ok(region)
    }

    pub fn column_values(&self, col: usize) -> Option<Region> {
        self.values[col].get().copied()
    }

    pub(crate) fn commit_upper(&self, col: usize, entries: &[(usize, f64)]) -> PsluResult<()> {
        let indices: Vec<usize> = entries.iter().map(|&(k, _)| k).collect();
        let values: Vec<f64> = entries.iter().map(|&(_, v)| v).collect();
        let index = self.usub.append(&indices)?;
        let value = self.ucol.append(&values)?;
        self.upper[col]
            .set(UpperRegions { index, value })
            .map_err(|_| {
                PsluError::InvariantViolation(format!("U entries of column {col} committed twice"))
            })
    }

    /// `(pivot column, value)` pairs of `U` above the supernode of `col`.
    pub fn upper_entries(&self, col: usize) -> Vec<(usize, f64)> {
        match self.upper[col].get() {
            Some(regions) => {
                let index = self.usub.read(regions.index);
                let value = self.ucol.read(regions.value);
                index.iter().copied().zip(value.iter().copied()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Supernode ranges in column order, for a completed factorization.
    pub fn partition(&self) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut col = 0;
        while col < self.n {
            let end = match self.supernode_of(col) {
                Some(head) if head == col => self.supernode_end(head).max(col + 1),
                _ => col + 1,
            };
            ranges.push(col..end);
            col = end;
        }
        ranges
    }

    /// `perm_r` as a plain vector (`EMPTY` for unpivoted rows).
    pub fn row_permutation(&self) -> Vec<usize> {
        self.perm_r.iter().map(|p| p.load(Ordering::Acquire)).collect()
    }

    pub fn buffer(&self, kind: BufferKind) -> BufferHandle<'_> {
        match kind {
            BufferKind::Lsub => BufferHandle::Index(&self.lsub),
            BufferKind::Usub => BufferHandle::Index(&self.usub),
            BufferKind::Lusup => BufferHandle::Value(&self.lusup),
            BufferKind::Ucol => BufferHandle::Value(&self.ucol),
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            buffers: vec![
                self.lsub.usage(),
                self.lusup.usage(),
                self.usub.usage(),
                self.ucol.usage(),
            ],
            reserved_bytes: self.budget.reserved(),
            peak_bytes: self.budget.peak(),
            limit_bytes: self.budget.limit(),
        }
    }
}

/// Borrowed handle to one of the store's buffers, for verification.
pub enum BufferHandle<'a> {
    Index(&'a FactorBuffer<usize>),
    Value(&'a FactorBuffer<f64>),
}

impl BufferHandle<'_> {
    pub fn force_expand(&self) -> PsluResult<()> {
        match self {
            BufferHandle::Index(buf) => buf.force_expand().map(|_| ()),
            BufferHandle::Value(buf) => buf.force_expand().map(|_| ()),
        }
    }

    pub fn expansions(&self) -> usize {
        match self {
            BufferHandle::Index(buf) => buf.expansions(),
            BufferHandle::Value(buf) => buf.expansions(),
        }
    }
}
