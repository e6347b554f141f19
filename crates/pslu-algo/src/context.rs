//! Shared factorization context.
//!
//! One [`SharedContext`] exists per factorization call. The driver builds it
//! before any thread starts, every worker borrows it, and the driver takes it
//! apart again once the pool has drained.

use pslu_core::{FactorOptions, SparseColumns, WorkerStats};

use crate::etree::EliminationTree;
use crate::graph::PruningGraph;
use crate::kernel::NumericKernel;
use crate::scheduler::Scheduler;
use crate::split::SupernodeSplitPolicy;
use crate::store::FactorStore;
use crate::sync::{ErrorLedger, LockName, NamedMutex, StatusBoard};

pub struct SharedContext<'a> {
    pub(crate) a: &'a SparseColumns,
    pub(crate) options: &'a FactorOptions,
    pub(crate) kernel: &'a dyn NumericKernel,
    pub(crate) split: &'a dyn SupernodeSplitPolicy,
    /// `col_order[k]` is the original column factored at position `k`
    pub(crate) col_order: Vec<usize>,
    pub(crate) tree: EliminationTree,
    /// Preferred pivot row per column, from a previous factorization
    pub(crate) preferred: Option<Vec<usize>>,
    pub(crate) store: FactorStore,
    pub(crate) graph: PruningGraph,
    pub(crate) status: StatusBoard,
    pub(crate) scheduler: Scheduler,
    pub(crate) ledger: ErrorLedger,
    pub(crate) statistics: NamedMutex<Vec<WorkerStats>>,
}

pub(crate) struct ContextParts<'a> {
    pub a: &'a SparseColumns,
    pub options: &'a FactorOptions,
    pub kernel: &'a dyn NumericKernel,
    pub split: &'a dyn SupernodeSplitPolicy,
    pub col_order: Vec<usize>,
    pub tree: EliminationTree,
    pub preferred: Option<Vec<usize>>,
    pub store: FactorStore,
    pub status: StatusBoard,
    pub scheduler: Scheduler,
}

impl<'a> SharedContext<'a> {
    pub(crate) fn new(parts: ContextParts<'a>) -> Self {
        let n = parts.a.n();
        Self {
            a: parts.a,
            options: parts.options,
            kernel: parts.kernel,
            split: parts.split,
            col_order: parts.col_order,
            tree: parts.tree,
            preferred: parts.preferred,
            store: parts.store,
            graph: PruningGraph::new(n),
            status: parts.status,
            scheduler: parts.scheduler,
            ledger: ErrorLedger::new(),
            statistics: NamedMutex::new(LockName::Statistics, Vec::new()),
        }
    }

    pub fn n(&self) -> usize {
        self.col_order.len()
    }

    /// Original row the column's diagonal refers to.
    pub(crate) fn diagonal_row(&self, col: usize) -> usize {
        self.col_order[col]
    }

    pub(crate) fn preferred_row(&self, col: usize) -> Option<usize> {
        self.preferred.as_ref().map(|rows| rows[col])
    }

    pub(crate) fn record_stats(&self, stats: WorkerStats) {
        self.statistics.lock().push(stats);
    }
}
