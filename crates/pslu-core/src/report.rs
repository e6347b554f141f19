//! Statistics gathered during a factorization.
//!
//! Each worker fills a [`WorkerStats`] in its own context; the driver merges
//! them into a [`FactorReport`] together with supernode and memory summaries.
//! Everything serializes to JSON for the CLI's `--json` output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Counters kept by one worker thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker: usize,
    pub domains: usize,
    pub relaxed_units: usize,
    pub panels: usize,
    /// Units taken with busy descendants because the queue ran dry
    pub pipelined_units: usize,
    /// Units dropped because a lower column already failed
    pub abandoned_units: usize,
    pub columns: usize,
    /// Panel dependency searches
    pub searches: usize,
    /// Supernodes each column depended on, summed over columns
    pub supernodes_visited: usize,
    /// Supernode subscript sets read from the pruning graph
    pub supernodes_read: usize,
    pub busy_waits: usize,
    pub prunes: usize,
    pub prunes_deferred: usize,
    pub prunes_abandoned: usize,
    /// Lowest column whose pivot selection failed on this worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_column: Option<usize>,
}

impl WorkerStats {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            ..Self::default()
        }
    }

    pub fn units(&self) -> usize {
        self.domains + self.relaxed_units + self.panels
    }

    /// Add another worker's counters into this one.
    pub fn merge(&mut self, other: &WorkerStats) {
        self.domains += other.domains;
        self.relaxed_units += other.relaxed_units;
        self.panels += other.panels;
        self.pipelined_units += other.pipelined_units;
        self.abandoned_units += other.abandoned_units;
        self.columns += other.columns;
        self.searches += other.searches;
        self.supernodes_visited += other.supernodes_visited;
        self.supernodes_read += other.supernodes_read;
        self.busy_waits += other.busy_waits;
        self.prunes += other.prunes;
        self.prunes_deferred += other.prunes_deferred;
        self.prunes_abandoned += other.prunes_abandoned;
        if let Some(column) = other.failed_column {
            self.record_failure(column);
        }
    }

    /// Keep the lowest failed column seen.
    pub fn record_failure(&mut self, column: usize) {
        self.failed_column = Some(self.failed_column.map_or(column, |c| c.min(column)));
    }
}

/// Size and growth history of one factor buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferUsage {
    pub name: String,
    pub len: usize,
    pub capacity: usize,
    pub expansions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub buffers: Vec<BufferUsage>,
    pub reserved_bytes: usize,
    pub peak_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_bytes: Option<usize>,
}

impl MemoryUsage {
    pub fn total_expansions(&self) -> usize {
        self.buffers.iter().map(|b| b.expansions).sum()
    }
}

/// Summary of a successful factorization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorReport {
    pub n: usize,
    pub nnz_a: usize,
    pub threads: usize,
    pub domains: usize,
    pub relaxed_supernodes: usize,
    pub panels: usize,
    pub supernodes: usize,
    pub max_supernode_width: usize,
    pub mean_supernode_width: f64,
    pub nnz_l: usize,
    pub nnz_u: usize,
    pub elapsed_ms: f64,
    pub totals: WorkerStats,
    pub workers: Vec<WorkerStats>,
    pub memory: MemoryUsage,
}

impl FactorReport {
    /// Fill ratio `(nnz(L) + nnz(U) - n) / nnz(A)`.
    pub fn fill_ratio(&self) -> f64 {
        if self.nnz_a == 0 {
            return 0.0;
        }
        (self.nnz_l + self.nnz_u).saturating_sub(self.n) as f64 / self.nnz_a as f64
    }
}

impl fmt::Display for FactorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "n = {}, nnz(A) = {}, nnz(L) = {}, nnz(U) = {} (fill {:.2}x)",
            self.n,
            self.nnz_a,
            self.nnz_l,
            self.nnz_u,
            self.fill_ratio()
        )?;
        writeln!(
            f,
            "supernodes: {} (max width {}, mean {:.2}), units: {} domains, {} relaxed, {} panels",
            self.supernodes,
            self.max_supernode_width,
            self.mean_supernode_width,
            self.domains,
            self.relaxed_supernodes,
            self.panels
        )?;
        writeln!(
            f,
            "threads: {}, searches: {}, busy waits: {}, prunes: {} ({} deferred, {} abandoned)",
            self.threads,
            self.totals.searches,
            self.totals.busy_waits,
            self.totals.prunes,
            self.totals.prunes_deferred,
            self.totals.prunes_abandoned
        )?;
        write!(
            f,
            "memory: peak {} bytes, {} buffer expansions, {:.3} ms",
            self.memory.peak_bytes,
            self.memory.total_expansions(),
            self.elapsed_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_stats() {
        let mut a = WorkerStats::new(0);
        a.columns = 3;
        a.panels = 1;
        let mut b = WorkerStats::new(1);
        b.columns = 4;
        b.relaxed_units = 2;
        b.prunes_deferred = 1;

        a.merge(&b);
        assert_eq!(a.worker, 0);
        assert_eq!(a.columns, 7);
        assert_eq!(a.units(), 3);
        assert_eq!(a.prunes_deferred, 1);
        assert_eq!(a.failed_column, None);
    }

    #[test]
    fn test_merge_keeps_lowest_failure() {
        let mut a = WorkerStats::new(0);
        a.record_failure(9);
        let mut b = WorkerStats::new(1);
        b.record_failure(5);
        b.record_failure(7);
        assert_eq!(b.failed_column, Some(5));

        a.merge(&b);
        assert_eq!(a.failed_column, Some(5));
        a.merge(&WorkerStats::new(2));
        assert_eq!(a.failed_column, Some(5));

        let json = serde_json::to_string(&WorkerStats::new(3)).unwrap();
        assert!(!json.contains("failed_column"));
        let back: WorkerStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.failed_column, None);
    }

    #[test]
    fn test_report_json_and_display() {
        let report = FactorReport {
            n: 4,
            nnz_a: 10,
            nnz_l: 7,
            nnz_u: 7,
            supernodes: 2,
            memory: MemoryUsage {
                buffers: vec![BufferUsage {
                    name: "lusup".into(),
                    len: 12,
                    capacity: 40,
                    expansions: 1,
                }],
                reserved_bytes: 320,
                peak_bytes: 320,
                limit_bytes: None,
            },
            ..FactorReport::default()
        };
        assert!((report.fill_ratio() - 1.0).abs() < 1e-12);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"nnz_l\":7"));
        assert!(!json.contains("limit_bytes"));

        let text = report.to_string();
        assert!(text.contains("nnz(L) = 7"));
        assert!(text.contains("1 buffer expansions"));
    }
}
