//! Worker execution loop.
//!
//! Each thread of the pool owns one [`Worker`]: its search marks, dense
//! accumulator, scratch arena, deferred prunes and statistics. The loop is
//!
//! ```text
//! Idle -> Fetch -> DependencySearch -> NumericUpdate -> Commit -> PruneCheck -> Fetch
//!           |                                                                    |
//!           +--> Exit <------------------------------------------------------- Failed
//! ```
//!
//! A numeric failure records the column in the [`ErrorLedger`] and drops the
//! rest of the unit; the worker keeps fetching so that every column below the
//! lowest failure is still factored. Resource and invariant errors stop the
//! whole pool.
//!
//! [`ErrorLedger`]: crate::sync::ErrorLedger

use std::ops::Range;

use pslu_core::{PsluError, PsluResult, WorkerStats};
use tracing::{debug, debug_span, warn};

use crate::arena::ScratchArena;
use crate::context::SharedContext;
use crate::dfs::{DependencySearch, PanelSearch, SearchResult, SearchWorkspace};
use crate::graph::PruneOutcome;
use crate::kernel::{Accumulator, NumericFailure, PivotRequest};
use crate::scheduler::{Assignment, Dispatch, UnitKind};
use crate::split::JoinCandidate;
use crate::sync::{ColumnStatus, WaitOutcome};

/// Retry passes over deferred prunes before a worker exits.
const EXIT_PRUNE_ROUNDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetch,
    DependencySearch,
    NumericUpdate,
    Commit,
    PruneCheck,
    Failed,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Finished,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeferredPrune {
    head: usize,
    pivot_row: usize,
}

/// Buffers reused for every column a worker factors.
struct ColumnWork {
    search: SearchWorkspace,
    panel: PanelSearch,
    found: SearchResult,
    acc: Accumulator,
    values: Vec<f64>,
    upper: Vec<(usize, f64)>,
}

impl ColumnWork {
    fn new(n: usize) -> Self {
        Self {
            search: SearchWorkspace::new(n),
            panel: PanelSearch::default(),
            found: SearchResult::default(),
            acc: Accumulator::new(n),
            values: Vec::new(),
            upper: Vec::new(),
        }
    }

    /// Every row the update wrote must have been found by the search.
    fn check_reach(&self, ctx: &SharedContext<'_>, col: usize) -> PsluResult<()> {
        for &row in self.acc.touched() {
            let reached = match ctx.store.pivot_of_row(row) {
                Some(pivot_col) => ctx
                    .store
                    .supernode_of(pivot_col)
                    .is_some_and(|head| self.found.depends_on(head)),
                None => self.found.lower_rows.binary_search(&row).is_ok(),
            };
            if !reached {
                return Err(PsluError::InvariantViolation(format!(
                    "update of column {col} wrote row {row} outside its searched structure"
                )));
            }
        }
        Ok(())
    }

    /// Write column `col` into supernode `head` with pivot row `pivot`.
    ///
    /// The row set of `head` must already be published.
    fn commit(
        &mut self,
        ctx: &SharedContext<'_>,
        col: usize,
        head: usize,
        pivot: usize,
    ) -> PsluResult<()> {
        let store = &ctx.store;
        let rows_region = store.supernode_rows(head).ok_or_else(|| {
            PsluError::InvariantViolation(format!("supernode {head} has no row set"))
        })?;
        let pivot_value = self.acc.get(pivot);

        self.values.clear();
        let mut holds_pivot = false;
        {
            let rows = store.lsub.read(rows_region);
            for &row in rows.iter() {
                let x = self.acc.get(row);
                let value = if row == pivot {
                    holds_pivot = true;
                    x
                } else if store.pivot_of_row(row).is_some() {
                    x
                } else {
                    x / pivot_value
                };
                self.values.push(value);
            }
        }
        if !holds_pivot {
            return Err(PsluError::InvariantViolation(format!(
                "pivot row {pivot} of column {col} is missing from supernode {head}"
            )));
        }

        self.upper.clear();
        for &dep in &self.found.dependencies {
            if dep == head {
                continue;
            }
            for k in dep..store.supernode_end(dep).min(col) {
                let value = self.acc.get(store.pivot_row(k));
                if value != 0.0 {
                    self.upper.push((k, value));
                }
            }
        }

        store.commit_values(col, &self.values)?;
        store.commit_upper(col, &self.upper)?;
        store.assign_pivot(pivot, col)?;
        store.extend_supernode(head, col)?;
        self.acc.clear();
        Ok(())
    }
}

fn select_pivot(
    ctx: &SharedContext<'_>,
    acc: &Accumulator,
    col: usize,
    candidates: &[usize],
) -> Result<usize, NumericFailure> {
    let request = PivotRequest {
        column: col,
        diagonal_row: ctx.diagonal_row(col),
        candidates,
        preferred: ctx.preferred_row(col),
        threshold: ctx.options.diag_pivot_thresh,
        floor: ctx.options.pivot_floor,
        diagonal_only: ctx.options.symmetric_mode,
    };
    ctx.kernel.select_pivot(&request, acc)
}

/// Head of the supernode `col` should join, if any.
///
/// Only a predecessor factored earlier in the same unit is considered, which
/// keeps the decision independent of other threads' progress.
fn join_target(
    ctx: &SharedContext<'_>,
    found: &SearchResult,
    col: usize,
    unit_start: usize,
) -> Option<usize> {
    if col <= unit_start {
        return None;
    }
    let head = ctx.store.supernode_of(col - 1)?;
    let rows = ctx.store.supernode_rows(head)?;
    let width = col - head;
    let candidate = JoinCandidate {
        column: col,
        same_unit: true,
        predecessor_reached: found.depends_on(head),
        structure_matches: found.lower_rows.len() + width == rows.len(),
        width,
    };
    ctx.split.joins(&candidate).then_some(head)
}

pub(crate) struct Worker<'c, 'a> {
    id: usize,
    ctx: &'c SharedContext<'a>,
    state: WorkerState,
    work: ColumnWork,
    scratch: ScratchArena,
    deferred: Vec<DeferredPrune>,
    stats: WorkerStats,
}

impl<'c, 'a> Worker<'c, 'a> {
    pub(crate) fn new(id: usize, ctx: &'c SharedContext<'a>) -> Self {
        Self {
            id,
            ctx,
            state: WorkerState::Idle,
            work: ColumnWork::new(ctx.n()),
            scratch: ScratchArena::new(),
            deferred: Vec::new(),
            stats: WorkerStats::new(id),
        }
    }

    /// Fetch and factor units until the scheduler runs dry or the pool aborts.
    pub(crate) fn run(mut self) -> WorkerStats {
        let span = debug_span!("worker", id = self.id);
        let _entered = span.enter();

        loop {
            self.state = WorkerState::Fetch;
            if self.ctx.ledger.is_aborted() {
                break;
            }
            let assignment = match self.ctx.scheduler.next(&self.ctx.status) {
                Ok(Some(assignment)) => assignment,
                Ok(None) => break,
                Err(err) => {
                    self.fatal(err);
                    break;
                }
            };
            if let Err(err) = self.process(assignment) {
                self.fatal(err);
                break;
            }
        }

        if !self.ctx.ledger.is_aborted() {
            if let Err(err) = self.drain_deferred() {
                self.fatal(err);
            }
        }
        if self.stats.failed_column.is_some() {
            self.state = WorkerState::Failed;
        } else if self.state != WorkerState::Failed {
            self.state = WorkerState::Exit;
        }
        debug!(
            state = ?self.state,
            failed_column = ?self.stats.failed_column,
            columns = self.stats.columns,
            units = self.stats.units(),
            busy_waits = self.stats.busy_waits,
            scratch_bytes = self.scratch.allocated_bytes(),
            "worker exiting"
        );
        self.stats
    }

    fn fatal(&mut self, err: PsluError) {
        self.state = WorkerState::Failed;
        warn!(worker = self.id, error = %err, "worker stopping");
        self.ctx.ledger.record_fatal(err);
        self.ctx.status.wake_all();
    }

    fn numeric_failure(&mut self, failure: NumericFailure) {
        self.state = WorkerState::Failed;
        let column = failure.column();
        warn!(
            worker = self.id,
            column,
            original_column = self.ctx.col_order[column],
            %failure,
            "pivot selection failed"
        );
        self.stats.record_failure(column);
        self.ctx.ledger.record_failure(column);
        self.ctx.status.wake_all();
        self.work.acc.clear();
    }

    fn process(&mut self, assignment: Assignment) -> PsluResult<()> {
        let ctx = self.ctx;
        let unit = ctx.scheduler.plan().unit(assignment.unit);
        ctx.scheduler.begin(assignment.unit)?;
        if assignment.dispatch == Dispatch::Pipelined {
            self.stats.pipelined_units += 1;
        }

        for segment in &unit.segments {
            let progress = match segment.kind {
                UnitKind::RelaxedSupernode => self.factor_relaxed(segment.columns.clone())?,
                _ => self.factor_panel(segment.columns.clone(), unit.columns.start)?,
            };
            if progress == Progress::Abandoned {
                self.stats.abandoned_units += 1;
                debug!(unit = assignment.unit, columns = ?unit.columns, "unit abandoned");
                return Ok(());
            }
        }

        match unit.kind {
            UnitKind::Domain => self.stats.domains += 1,
            UnitKind::RelaxedSupernode => self.stats.relaxed_units += 1,
            UnitKind::Panel => self.stats.panels += 1,
        }
        ctx.scheduler.complete(assignment.unit, &ctx.status)
    }

    /// Wait for the descendants of `col` that lie before `segment_start`.
    /// Returns false when a wait was cancelled.
    fn await_descendants(&mut self, col: usize, segment_start: usize) -> bool {
        let ctx = self.ctx;
        let start = ctx.tree.first_descendant(col).max(ctx.status.done_prefix());
        for k in start..segment_start.min(col) {
            if ctx.status.is_done(k) {
                continue;
            }
            self.stats.busy_waits += 1;
            if ctx.status.wait_done(k, || ctx.ledger.cancels_wait_on(k)) == WaitOutcome::Cancelled
            {
                return false;
            }
        }
        true
    }

    fn factor_panel(&mut self, columns: Range<usize>, unit_start: usize) -> PsluResult<Progress> {
        let ctx = self.ctx;
        let search = DependencySearch::new(&ctx.store, &ctx.graph);

        self.state = WorkerState::DependencySearch;
        for col in columns.clone() {
            if ctx.ledger.abandons(col) || !self.await_descendants(col, columns.start) {
                return Ok(Progress::Abandoned);
            }
        }
        search.search_panel(
            columns.clone(),
            |col| ctx.a.column_rows(ctx.col_order[col]),
            &mut self.work.search,
            &mut self.work.panel,
        )?;
        self.stats.searches += 1;
        self.stats.supernodes_read += self.work.panel.traversals();

        for col in columns {
            if ctx.ledger.abandons(col) {
                return Ok(Progress::Abandoned);
            }
            ctx.status.start(col)?;
            let (rows, values) = ctx.a.column(ctx.col_order[col]);
            let work = &mut self.work;
            work.panel.take(col, &mut work.found)?;
            self.stats.supernodes_read +=
                search.complete_column(col, &mut work.search, &mut work.found)?;
            self.stats.supernodes_visited += work.found.supernodes_visited;

            self.state = WorkerState::NumericUpdate;
            work.acc.scatter(rows, values);
            ctx.kernel
                .update(col, &work.found.dependencies, &ctx.store, &mut work.acc)?;
            work.check_reach(ctx, col)?;

            let join = join_target(ctx, &work.found, col, unit_start);
            let pivot = match select_pivot(ctx, &work.acc, col, &work.found.lower_rows) {
                Ok(row) => row,
                Err(failure) => {
                    self.numeric_failure(failure);
                    return Ok(Progress::Abandoned);
                }
            };

            self.state = WorkerState::Commit;
            let head = match join {
                Some(head) => head,
                None => {
                    let region = ctx.store.publish_rows(col, &work.found.lower_rows)?;
                    ctx.graph.publish_full(col, region)?;
                    col
                }
            };
            work.commit(ctx, col, head, pivot)?;
            ctx.status.finish(col)?;
            self.stats.columns += 1;

            self.state = WorkerState::PruneCheck;
            self.retry_deferred()?;
            for i in 0..self.work.found.dependencies.len() {
                let dep = self.work.found.dependencies[i];
                if dep != head {
                    self.prune(dep, pivot)?;
                }
            }
        }
        Ok(Progress::Finished)
    }

    /// Factor a relaxed supernode as one dense block over the union of its
    /// columns' rows. No search is needed: every dependency lies inside.
    fn factor_relaxed(&mut self, columns: Range<usize>) -> PsluResult<Progress> {
        let ctx = self.ctx;
        let first = columns.start;
        self.work.found.clear();

        let mut failure = None;
        let mut progress = Progress::Finished;
        {
            let mut rows = self.scratch.alloc_vec::<usize>();
            for col in columns.clone() {
                rows.extend_from_slice(ctx.a.column_rows(ctx.col_order[col]));
            }
            rows.sort_unstable();
            rows.dedup();
            let mut candidates = self.scratch.alloc_vec_with_capacity::<usize>(rows.len());

            for col in columns {
                if ctx.ledger.abandons(col) {
                    progress = Progress::Abandoned;
                    break;
                }
                ctx.status.start(col)?;
                if col == first {
                    let region = ctx.store.publish_rows(first, &rows)?;
                    ctx.graph.publish_full(first, region)?;
                }

                self.state = WorkerState::NumericUpdate;
                let (a_rows, a_values) = ctx.a.column(ctx.col_order[col]);
                self.work.acc.scatter(a_rows, a_values);
                if col > first {
                    ctx.kernel
                        .update(col, &[first], &ctx.store, &mut self.work.acc)?;
                }

                candidates.clear();
                candidates.extend(
                    rows.iter()
                        .copied()
                        .filter(|&row| ctx.store.pivot_of_row(row).is_none()),
                );
                let pivot = match select_pivot(ctx, &self.work.acc, col, &candidates) {
                    Ok(row) => row,
                    Err(err) => {
                        failure = Some(err);
                        progress = Progress::Abandoned;
                        break;
                    }
                };

                self.state = WorkerState::Commit;
                self.work.commit(ctx, col, first, pivot)?;
                ctx.status.finish(col)?;
                self.stats.columns += 1;
            }
        }
        self.scratch.reset();
        if let Some(failure) = failure {
            self.numeric_failure(failure);
        }
        Ok(progress)
    }

    fn prune(&mut self, head: usize, pivot_row: usize) -> PsluResult<()> {
        let ctx = self.ctx;
        let marker = ctx.graph.entry(head).marker();
        let outcome = match ctx.status.observed(head, marker) {
            ColumnStatus::BusyDescendant if !ctx.graph.is_pruned(head) => PruneOutcome::Busy,
            _ => ctx.graph.try_prune(
                head,
                pivot_row,
                &ctx.store,
                ctx.options.prune_backoff_limit,
            )?,
        };
        match outcome {
            PruneOutcome::Pruned { .. } => self.stats.prunes += 1,
            PruneOutcome::Busy => {
                self.stats.prunes_deferred += 1;
                debug!(worker = self.id, head, "prune deferred");
                self.deferred.push(DeferredPrune { head, pivot_row });
            }
            PruneOutcome::AlreadyPruned | PruneOutcome::NotApplicable => {}
        }
        Ok(())
    }

    fn retry_deferred(&mut self) -> PsluResult<()> {
        if self.deferred.is_empty() {
            return Ok(());
        }
        let ctx = self.ctx;
        for request in std::mem::take(&mut self.deferred) {
            match ctx.graph.try_prune(
                request.head,
                request.pivot_row,
                &ctx.store,
                ctx.options.prune_backoff_limit,
            )? {
                PruneOutcome::Pruned { .. } => self.stats.prunes += 1,
                PruneOutcome::Busy => self.deferred.push(request),
                PruneOutcome::AlreadyPruned | PruneOutcome::NotApplicable => {}
            }
        }
        Ok(())
    }

    fn drain_deferred(&mut self) -> PsluResult<()> {
        for _ in 0..EXIT_PRUNE_ROUNDS {
            if self.deferred.is_empty() {
                return Ok(());
            }
            self.retry_deferred()?;
            std::thread::yield_now();
        }
        if !self.deferred.is_empty() {
            warn!(
                worker = self.id,
                count = self.deferred.len(),
                "abandoning deferred prunes"
            );
            self.stats.prunes_abandoned += self.deferred.len();
            self.deferred.clear();
        }
        Ok(())
    }
}
