//! Symmetric pruning graph.
//!
//! Every supernode has a full subscript set (its row structure) and, once a
//! later pivot proves the tail redundant for dependency search, a pruned set
//! that keeps only rows already pivoted. [`PrunedSubscripts`] can only be made
//! from a [`FullSubscripts`], so a pruned set is always a subset of the full
//! set it was filtered from.
//!
//! Traversals enter the supernode's [`BusyMarker`]; pruning needs the marker
//! exclusively and gives up after a bounded backoff, leaving the request to be
//! retried by the caller.

use std::sync::OnceLock;

use pslu_core::{PsluError, PsluResult};

use crate::memory::{FactorBuffer, Region};
use crate::store::FactorStore;
use crate::sync::{BusyMarker, LockName, NamedMutex};

/// Row structure of a supernode as committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullSubscripts {
    region: Region,
}

impl FullSubscripts {
    pub fn region(&self) -> Region {
        self.region
    }

    /// Keep the rows for which `keep` holds, appending them as a new region.
    fn prune(
        &self,
        lsub: &FactorBuffer<usize>,
        keep: impl FnMut(&usize) -> bool,
    ) -> PsluResult<PrunedSubscripts> {
        let region = lsub.append_filtered(self.region, keep)?;
        Ok(PrunedSubscripts {
            region,
            source: self.region,
        })
    }
}

/// Rows of a full set that still matter to dependency search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrunedSubscripts {
    region: Region,
    source: Region,
}

impl PrunedSubscripts {
    pub fn region(&self) -> Region {
        self.region
    }

    /// The full set this one was filtered from.
    pub fn source(&self) -> Region {
        self.source
    }
}

#[derive(Debug, Default)]
pub struct SupernodeEntry {
    marker: BusyMarker,
    full: OnceLock<FullSubscripts>,
    pruned: OnceLock<PrunedSubscripts>,
}

impl SupernodeEntry {
    pub fn marker(&self) -> &BusyMarker {
        &self.marker
    }

    pub fn full(&self) -> Option<FullSubscripts> {
        self.full.get().copied()
    }

    pub fn pruned(&self) -> Option<PrunedSubscripts> {
        self.pruned.get().copied()
    }

    /// The set dependency search should read.
    pub fn search_region(&self) -> Option<Region> {
        self.pruned()
            .map(|p| p.region())
            .or_else(|| self.full().map(|f| f.region()))
    }
}

/// Outcome of a prune request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    Pruned { kept: usize, dropped: usize },
    AlreadyPruned,
    /// The pivot row is not in the supernode's structure
    NotApplicable,
    /// A traversal held the marker past the backoff budget
    Busy,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneTotals {
    pub pruned: usize,
    pub rows_dropped: usize,
}

pub struct PruningGraph {
    entries: Box<[SupernodeEntry]>,
    totals: NamedMutex<PruneTotals>,
}

impl PruningGraph {
    pub fn new(n: usize) -> Self {
        Self {
            entries: (0..n).map(|_| SupernodeEntry::default()).collect(),
            totals: NamedMutex::new(LockName::PruneGraph, PruneTotals::default()),
        }
    }

    pub fn entry(&self, head: usize) -> &SupernodeEntry {
        &self.entries[head]
    }

    pub(crate) fn publish_full(&self, head: usize, region: Region) -> PsluResult<()> {
        self.entries[head]
            .full
            .set(FullSubscripts { region })
            .map_err(|_| {
                PsluError::InvariantViolation(format!(
                    "full subscripts of supernode {head} published twice"
                ))
            })
    }

    pub fn is_pruned(&self, head: usize) -> bool {
        self.entries[head].pruned.get().is_some()
    }

    /// Run `visit` over the rows dependency search should see, holding the
    /// supernode's busy marker for the duration.
    pub fn traverse<R>(
        &self,
        head: usize,
        lsub: &FactorBuffer<usize>,
        visit: impl FnOnce(&[usize]) -> R,
    ) -> PsluResult<R> {
        let entry = &self.entries[head];
        let _guard = entry.marker.enter();
        let region = entry.search_region().ok_or_else(|| {
            PsluError::InvariantViolation(format!(
                "supernode {head} reached before its structure was published"
            ))
        })?;
        Ok(lsub.with_region(region, visit))
    }

    /// Prune supernode `head` after `pivot_row` has been pivoted.
    ///
    /// Keeps the rows that already have a pivot column. No-op when the
    /// supernode is already pruned or does not contain `pivot_row`.
    pub fn try_prune(
        &self,
        head: usize,
        pivot_row: usize,
        store: &FactorStore,
        backoff_limit: u32,
    ) -> PsluResult<PruneOutcome> {
        let entry = &self.entries[head];
        if entry.pruned.get().is_some() {
            return Ok(PruneOutcome::AlreadyPruned);
        }
        let Some(full) = entry.full() else {
            return Err(PsluError::InvariantViolation(format!(
                "prune requested for unpublished supernode {head}"
            )));
        };
        let contains = store
            .lsub
            .with_region(full.region(), |rows| rows.binary_search(&pivot_row).is_ok());
        if !contains {
            return Ok(PruneOutcome::NotApplicable);
        }

        let Some(exclusive) = entry.marker.try_exclusive(backoff_limit) else {
            return Ok(PruneOutcome::Busy);
        };
        if !exclusive.marker().is_exclusive() {
            return Err(PsluError::InvariantViolation(format!(
                "pruning supernode {head} without exclusive access"
            )));
        }
        if entry.pruned.get().is_some() {
            return Ok(PruneOutcome::AlreadyPruned);
        }

        let mut totals = self.totals.lock();
        let pruned = full.prune(&store.lsub, |&row| store.pivot_of_row(row).is_some())?;
        entry.pruned.set(pruned).map_err(|_| {
            PsluError::InvariantViolation(format!("supernode {head} pruned twice"))
        })?;
        let kept = pruned.region().len();
        let dropped = full.region().len() - kept;
        totals.pruned += 1;
        totals.rows_dropped += dropped;
        Ok(PruneOutcome::Pruned { kept, dropped })
    }

    pub fn totals(&self) -> PruneTotals {
        *self.totals.lock()
    }
}
