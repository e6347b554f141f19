//! Factorization driver.
//!
//! [`Factorizer`] validates the input, computes the column order and the
//! postordered elimination tree, cuts the tree into work units, builds the
//! [`SharedContext`] and runs a scoped pool of named worker threads over it.
//! After the pool drains it reconciles errors (fatal first, then the lowest
//! failing column) and assembles [`LuFactors`].
//!
//! # Example
//!
//! ```
//! use pslu_algo::Factorizer;
//! use pslu_core::{gallery, FactorOptions};
//!
//! let a = gallery::convection_diffusion_2d(6, 10.0).unwrap();
//! let lu = Factorizer::new(FactorOptions::default())
//!     .with_threads(2)
//!     .factor_columns(&a)
//!     .unwrap();
//! assert!(lu.residual(&a).unwrap() < 1e-10);
//! ```

use std::time::Instant;

use pslu_core::{
    FactorMode, FactorOptions, FactorReport, PsluError, PsluResult, SparseColumns, WorkerStats,
    EMPTY,
};
use sprs::CsMatView;
use tracing::{debug, info};

use crate::context::{ContextParts, SharedContext};
use crate::etree::{column_etree, postorder, relabel, relaxed_supernodes, symmetric_etree, EliminationTree};
use crate::factors::{LuFactors, PriorFactorization};
use crate::kernel::{NumericKernel, SupernodalKernel};
use crate::ordering::{validate_permutation, ColumnOrdering, NaturalOrdering};
use crate::scheduler::{Scheduler, UnitKind, UnitPlan};
use crate::split::{FundamentalSplit, SupernodeSplitPolicy};
use crate::store::FactorStore;
use crate::sync::StatusBoard;
use crate::worker::Worker;

/// Column order, tree and preferred pivots for one call.
struct Symbolic {
    col_order: Vec<usize>,
    tree: EliminationTree,
    preferred: Option<Vec<usize>>,
}

/// Configured factorization engine. Reusable across calls.
pub struct Factorizer {
    options: FactorOptions,
    threads: usize,
    kernel: Box<dyn NumericKernel>,
    ordering: Box<dyn ColumnOrdering>,
    split: Box<dyn SupernodeSplitPolicy>,
}

/// Unit counts of a plan, for the report.
#[derive(Debug, Clone, Copy, Default)]
struct PlanCounts {
    domains: usize,
    relaxed: usize,
    panels: usize,
}

impl Factorizer {
    pub fn new(options: FactorOptions) -> Self {
        Self {
            threads: 0,
            kernel: Box::new(SupernodalKernel),
            ordering: Box::new(NaturalOrdering),
            split: Box::new(FundamentalSplit::new(options.max_supernode)),
            options,
        }
    }

    /// Worker threads; 0 uses every available CPU.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_kernel(mut self, kernel: impl NumericKernel + 'static) -> Self {
        self.kernel = Box::new(kernel);
        self
    }

    pub fn with_ordering(mut self, ordering: impl ColumnOrdering + 'static) -> Self {
        self.ordering = Box::new(ordering);
        self
    }

    /// Replace the default [`FundamentalSplit`] capped at `max_supernode`.
    pub fn with_split_policy(mut self, split: impl SupernodeSplitPolicy + 'static) -> Self {
        self.split = Box::new(split);
        self
    }

    pub fn options(&self) -> &FactorOptions {
        &self.options
    }

    pub fn threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// Factor a CSC matrix from scratch.
    pub fn factor(&self, a: CsMatView<'_, f64>) -> PsluResult<LuFactors> {
        let a = SparseColumns::from_sprs(a)?;
        self.factor_columns(&a)
    }

    pub fn factor_columns(&self, a: &SparseColumns) -> PsluResult<LuFactors> {
        self.run(a, None)
    }

    /// Factor a matrix with the pattern of an earlier one, reusing as much
    /// as `options.mode` allows.
    pub fn refactor(
        &self,
        a: CsMatView<'_, f64>,
        prior: &PriorFactorization,
    ) -> PsluResult<LuFactors> {
        let a = SparseColumns::from_sprs(a)?;
        self.refactor_columns(&a, prior)
    }

    pub fn refactor_columns(
        &self,
        a: &SparseColumns,
        prior: &PriorFactorization,
    ) -> PsluResult<LuFactors> {
        self.run(a, Some(prior))
    }

    fn symbolic(
        &self,
        a: &SparseColumns,
        prior: Option<&PriorFactorization>,
    ) -> PsluResult<Symbolic> {
        let n = a.n();
        let mode = self.options.mode;
        let prior = match prior {
            _ if !mode.needs_prior() => None,
            Some(prior) => Some(prior),
            None => {
                return Err(PsluError::Config(format!(
                    "mode {mode:?} needs a prior factorization"
                )))
            }
        };

        let (col_order, tree) = match prior {
            Some(prior) => {
                validate_permutation(&prior.col_order, n)?;
                if prior.parent.len() != n {
                    return Err(PsluError::Structural(format!(
                        "prior elimination tree has {} nodes, matrix has {n} columns",
                        prior.parent.len()
                    )));
                }
                (
                    prior.col_order.clone(),
                    EliminationTree::from_postordered(prior.parent.clone())?,
                )
            }
            None => {
                let initial = self.ordering.column_order(a)?;
                validate_permutation(&initial, n)?;
                let parent = if self.options.symmetric_mode {
                    symmetric_etree(a, &initial)
                } else {
                    column_etree(a, &initial)
                };
                let post = postorder(&parent);
                let col_order = post.iter().map(|&k| initial[k]).collect();
                let tree = EliminationTree::from_postordered(relabel(&parent, &post))?;
                (col_order, tree)
            }
        };

        let preferred = match (mode, prior) {
            (FactorMode::SamePatternSameRowPerm, Some(prior)) => {
                validate_permutation(&prior.row_perm, n)?;
                let mut rows = vec![EMPTY; n];
                for (row, &col) in prior.row_perm.iter().enumerate() {
                    rows[col] = row;
                }
                Some(rows)
            }
            _ => None,
        };

        Ok(Symbolic {
            col_order,
            tree,
            preferred,
        })
    }

    fn run(&self, a: &SparseColumns, prior: Option<&PriorFactorization>) -> PsluResult<LuFactors> {
        let started = Instant::now();
        let threads = self.threads();
        let (context, counts) = self.prepare(a, prior, threads)?;
        self.execute(&context, threads);
        reconcile(&context)?;
        let mut factors = self.finish(context, counts, threads)?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
        factors.set_elapsed(elapsed_ms);
        let report = factors.report();
        info!(
            n = a.n(),
            threads,
            nnz_l = report.nnz_l,
            nnz_u = report.nnz_u,
            supernodes = report.supernodes,
            elapsed_ms,
            "factorization complete"
        );
        Ok(factors)
    }

    /// Validate, order, plan and allocate: everything before the workers
    /// start.
    fn prepare<'s>(
        &'s self,
        a: &'s SparseColumns,
        prior: Option<&PriorFactorization>,
        threads: usize,
    ) -> PsluResult<(SharedContext<'s>, PlanCounts)> {
        self.options.validate()?;
        let n = a.n();

        let Symbolic {
            col_order,
            tree,
            preferred,
        } = self.symbolic(a, prior)?;
        let relaxed = relaxed_supernodes(&tree, self.options.relax);
        let domains = self
            .ordering
            .domains(&tree, threads, self.options.domain_ratio);
        let plan = UnitPlan::build(&tree, &relaxed, &domains, self.options.panel_size)?;

        let mut counts = PlanCounts {
            domains: plan.count(UnitKind::Domain),
            ..PlanCounts::default()
        };
        for segment in plan.units().iter().flat_map(|u| u.segments.iter()) {
            match segment.kind {
                UnitKind::RelaxedSupernode => counts.relaxed += 1,
                UnitKind::Panel => counts.panels += 1,
                UnitKind::Domain => {}
            }
        }
        debug!(
            n,
            threads,
            units = plan.len(),
            domains = counts.domains,
            relaxed = counts.relaxed,
            panels = counts.panels,
            "work units planned"
        );

        let status = StatusBoard::new(n);
        let scheduler = Scheduler::new(plan, &status)?;
        let store = FactorStore::new(n, a.nnz(), &self.options)?;
        let context = SharedContext::new(ContextParts {
            a,
            options: &self.options,
            kernel: self.kernel.as_ref(),
            split: self.split.as_ref(),
            col_order,
            tree,
            preferred,
            store,
            status,
            scheduler,
        });
        Ok((context, counts))
    }

    /// Run a scoped pool of named workers until the plan drains.
    fn execute(&self, ctx: &SharedContext<'_>, threads: usize) {
        std::thread::scope(|scope| {
            for id in 0..threads {
                let spawned = std::thread::Builder::new()
                    .name(format!("pslu-worker-{id}"))
                    .spawn_scoped(scope, move || {
                        let stats = Worker::new(id, ctx).run();
                        ctx.record_stats(stats);
                    });
                if let Err(err) = spawned {
                    ctx.ledger.record_fatal(PsluError::Io(err));
                    ctx.status.wake_all();
                    break;
                }
            }
        });
    }

    fn finish(
        &self,
        context: SharedContext<'_>,
        counts: PlanCounts,
        threads: usize,
    ) -> PsluResult<LuFactors> {
        let n = context.n();
        let nnz_a = context.a.nnz();
        let SharedContext {
            store,
            col_order,
            tree,
            statistics,
            graph,
            ..
        } = context;
        let mut workers = statistics.into_inner();
        workers.sort_by_key(|w| w.worker);
        let mut totals = WorkerStats::default();
        for worker in &workers {
            totals.merge(worker);
        }
        let prune_totals = graph.totals();
        debug!(
            pruned = prune_totals.pruned,
            rows_dropped = prune_totals.rows_dropped,
            supernodes_read = totals.supernodes_read,
            "pruning summary"
        );

        let report = FactorReport {
            n,
            nnz_a,
            threads,
            domains: counts.domains,
            relaxed_supernodes: counts.relaxed,
            panels: counts.panels,
            totals,
            workers,
            memory: store.memory_usage(),
            ..FactorReport::default()
        };
        LuFactors::assemble(&store, col_order, tree.parents().to_vec(), report)
    }
}

impl Default for Factorizer {
    fn default() -> Self {
        Self::new(FactorOptions::default())
    }
}

/// Turn what the workers left behind into the call's outcome.
fn reconcile(ctx: &SharedContext<'_>) -> PsluResult<()> {
    if let Some(err) = ctx.ledger.take_fatal() {
        return Err(err);
    }
    if let Some(column) = ctx.ledger.first_failure() {
        if ctx.status.done_prefix() < column {
            return Err(PsluError::InvariantViolation(format!(
                "column {} below failing column {column} was never committed",
                ctx.status.done_prefix()
            )));
        }
        return Err(PsluError::SingularPivot {
            column,
            original_column: ctx.col_order[column],
            last_committed: ctx.status.last_done(),
        });
    }
    for col in 0..ctx.n() {
        let commits = ctx.status.commit_count(col);
        if commits != 1 {
            return Err(PsluError::InvariantViolation(format!(
                "column {col} committed {commits} times"
            )));
        }
    }
    if ctx.scheduler.remaining_columns() != 0 {
        return Err(PsluError::InvariantViolation(format!(
            "{} columns were never handed out",
            ctx.scheduler.remaining_columns()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::ExplicitOrdering;
    use crate::split::SingleColumn;
    use pslu_core::gallery;

    #[test]
    fn test_tridiagonal_single_thread() {
        let a = gallery::tridiagonal(20, -1.0, 4.0, -1.0).unwrap();
        let lu = Factorizer::default()
            .with_threads(1)
            .factor_columns(&a)
            .unwrap();
        assert!(lu.residual(&a).unwrap() < 1e-12);
        assert_eq!(lu.report().threads, 1);
        assert_eq!(lu.report().totals.columns, 20);
        assert_eq!(lu.supernodes().iter().map(|s| s.len()).sum::<usize>(), 20);
    }

    #[test]
    fn test_dense_pivoting_swaps_rows() {
        // [[1, 4], [3, 2]]: partial pivoting picks row 1 for column 0
        let a = SparseColumns::from_raw(2, vec![0, 2, 4], vec![0, 1, 0, 1], vec![1.0, 3.0, 4.0, 2.0])
            .unwrap();
        let lu = Factorizer::default()
            .with_threads(1)
            .factor_columns(&a)
            .unwrap();
        assert_eq!(lu.row_perm()[1], 0);
        assert!(lu.residual(&a).unwrap() < 1e-14);
    }

    #[test]
    fn test_explicit_ordering_and_solve() {
        let a = gallery::convection_diffusion_2d(5, 5.0).unwrap();
        let order: Vec<usize> = (0..a.n()).rev().collect();
        let lu = Factorizer::default()
            .with_threads(3)
            .with_ordering(ExplicitOrdering::new(order))
            .factor_columns(&a)
            .unwrap();
        assert!(lu.residual(&a).unwrap() < 1e-10);

        let x_true: Vec<f64> = (0..a.n()).map(|i| 1.0 + i as f64 / 10.0).collect();
        let mut b = vec![0.0; a.n()];
        for j in 0..a.n() {
            let (rows, values) = a.column(j);
            for (&row, &value) in rows.iter().zip(values) {
                b[row] += value * x_true[j];
            }
        }
        let x = lu.solve(&b).unwrap();
        for (got, want) in x.iter().zip(&x_true) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn test_single_column_policy_matches_values() {
        let a = gallery::random_unsymmetric(60, 3, 11).unwrap();
        let grouped = Factorizer::default()
            .with_threads(2)
            .factor_columns(&a)
            .unwrap();
        let single = Factorizer::default()
            .with_threads(2)
            .with_split_policy(SingleColumn)
            .factor_columns(&a)
            .unwrap();
        assert_eq!(grouped.row_perm(), single.row_perm());
        assert!(single.residual(&a).unwrap() < 1e-10);
        assert!(single.supernodes().len() >= grouped.supernodes().len());
    }

    #[test]
    fn test_reuse_needs_prior() {
        let a = gallery::tridiagonal(5, 1.0, 3.0, 1.0).unwrap();
        let options = FactorOptions::default().with_mode(FactorMode::SamePattern);
        let err = Factorizer::new(options).factor_columns(&a).unwrap_err();
        assert!(matches!(err, PsluError::Config(_)));
    }

    #[test]
    fn test_invalid_options_rejected_before_work() {
        let a = gallery::tridiagonal(5, 1.0, 3.0, 1.0).unwrap();
        let options = FactorOptions::default().with_panel_size(0);
        let err = Factorizer::new(options).factor_columns(&a).unwrap_err();
        assert!(matches!(err, PsluError::Config(_)));
    }

    /// Tridiagonal matrix whose column `k` is scaled down to almost nothing.
    fn nearly_singular(n: usize, k: usize) -> SparseColumns {
        let a = gallery::tridiagonal(n, -1.0, 4.0, -1.0).unwrap();
        let mut values = Vec::with_capacity(a.nnz());
        for j in 0..n {
            let factor = if j == k { 1e-14 } else { 1.0 };
            values.extend(a.column(j).1.iter().map(|v| v * factor));
        }
        a.with_values(values).unwrap()
    }

    #[test]
    fn test_failing_worker_reports_its_column() {
        let a = nearly_singular(160, 70);
        let options = FactorOptions::default().with_pivot_floor(1e-10);
        let factorizer = Factorizer::new(options);
        let (ctx, _) = factorizer.prepare(&a, None, 4).unwrap();
        factorizer.execute(&ctx, 4);

        let failure = ctx.ledger.first_failure().unwrap();
        assert_eq!(ctx.col_order[failure], 70);
        let stats = ctx.statistics.lock().clone();
        assert_eq!(stats.len(), 4);
        let failed: Vec<_> = stats.iter().filter_map(|w| w.failed_column).collect();
        assert_eq!(failed, vec![failure]);

        // Every column below the failure was still factored
        assert!(ctx.status.done_prefix() >= failure);
        match reconcile(&ctx) {
            Err(PsluError::SingularPivot { column, .. }) => assert_eq!(column, failure),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_pruned_subscripts_stay_inside_full_set() {
        let a = gallery::convection_diffusion_2d(12, 10.0).unwrap();
        let factorizer = Factorizer::default().with_split_policy(SingleColumn);
        let (ctx, _) = factorizer.prepare(&a, None, 4).unwrap();
        factorizer.execute(&ctx, 4);
        reconcile(&ctx).unwrap();

        let mut pruned = 0;
        for range in ctx.store.partition() {
            let entry = ctx.graph.entry(range.start);
            let full = entry.full().unwrap();
            let full_rows = ctx.store.lsub.with_region(full.region(), |rows| rows.to_vec());
            let Some(subset) = entry.pruned() else {
                continue;
            };
            pruned += 1;
            assert_eq!(subset.source(), full.region());
            let kept = ctx.store.lsub.with_region(subset.region(), |rows| rows.to_vec());
            assert!(kept.len() <= full_rows.len());
            for row in kept {
                assert!(full_rows.binary_search(&row).is_ok(), "row {row} not in supernode {}", range.start);
                assert!(ctx.store.pivot_of_row(row).is_some());
            }
        }
        assert!(pruned > 0);
        assert_eq!(pruned, ctx.graph.totals().pruned);
    }

    #[test]
    fn test_panel_search_shares_subscripts() {
        let a = gallery::convection_diffusion_2d(10, 1.0).unwrap();
        let options = FactorOptions::default().with_panel_size(8).with_relax(1);
        let lu = Factorizer::new(options)
            .with_threads(1)
            .with_split_policy(SingleColumn)
            .factor_columns(&a)
            .unwrap();
        let totals = &lu.report().totals;
        // One search per panel, not per column
        assert!(totals.searches < totals.columns);
        assert!(totals.supernodes_read < totals.supernodes_visited);
        assert!(lu.residual(&a).unwrap() < 1e-10);
    }

    #[test]
    fn test_symmetric_mode_keeps_diagonal() {
        let a = gallery::convection_diffusion_2d(4, 1.0).unwrap();
        let options = FactorOptions::default().with_symmetric_mode(true);
        let lu = Factorizer::new(options)
            .with_threads(2)
            .factor_columns(&a)
            .unwrap();
        for (k, &col) in lu.col_order().iter().enumerate() {
            assert_eq!(lu.row_perm()[col], k);
        }
        assert!(lu.residual(&a).unwrap() < 1e-10);
    }
}
