//! Dependency search.
//!
//! Starting from the rows of `A(:, q_j)`, an iterative depth-first search
//! walks the pruning graph: a pivoted row leads to the supernode of its pivot
//! column, an unpivoted row joins the lower structure of column `j`.
//!
//! Search runs per panel in two phases. [`DependencySearch::search_panel`]
//! explores, for every column of the panel at once, the supernodes finished
//! before the panel started; each supernode's subscripts are read from the
//! graph once and shared by all columns of the panel. Just before a column is
//! updated, [`DependencySearch::complete_column`] follows the rows that
//! earlier columns of the same panel have pivoted in the meantime. Both
//! outputs are sorted, so the result does not depend on the visiting order.

use std::ops::Range;

use pslu_core::{PsluError, PsluResult};

use crate::graph::PruningGraph;
use crate::store::FactorStore;

/// Mark arrays reused across searches, reset lazily by bumping a stamp.
#[derive(Debug)]
pub struct SearchWorkspace {
    row_mark: Vec<u32>,
    supernode_mark: Vec<u32>,
    stamp: u32,
    stack: Vec<usize>,
    /// Subscripts copied out of the graph during the current panel
    cached: Vec<Option<Range<usize>>>,
    cached_heads: Vec<usize>,
    cache: Vec<usize>,
}

impl SearchWorkspace {
    pub fn new(n: usize) -> Self {
        Self {
            row_mark: vec![0; n],
            supernode_mark: vec![0; n],
            stamp: 0,
            stack: Vec::new(),
            cached: vec![None; n],
            cached_heads: Vec::new(),
            cache: Vec::new(),
        }
    }

    fn next_stamp(&mut self) -> u32 {
        if self.stamp == u32::MAX {
            self.row_mark.fill(0);
            self.supernode_mark.fill(0);
            self.stamp = 0;
        }
        self.stamp += 1;
        self.stamp
    }

    fn begin_panel(&mut self) {
        for head in self.cached_heads.drain(..) {
            self.cached[head] = None;
        }
        self.cache.clear();
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Heads of the supernodes column `j` depends on, ascending
    pub dependencies: Vec<usize>,
    /// Unpivoted rows in the structure of column `j`, ascending
    pub lower_rows: Vec<usize>,
    /// Every row the search marked
    pub reached: Vec<usize>,
    pub supernodes_visited: usize,
}

impl SearchResult {
    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.lower_rows.clear();
        self.reached.clear();
        self.supernodes_visited = 0;
    }

    pub fn depends_on(&self, head: usize) -> bool {
        self.dependencies.binary_search(&head).is_ok()
    }
}

/// Per-column results of the shared phase of a panel search.
#[derive(Debug, Default)]
pub struct PanelSearch {
    start: usize,
    results: Vec<SearchResult>,
    traversals: usize,
}

impl PanelSearch {
    pub fn columns(&self) -> Range<usize> {
        self.start..self.start + self.results.len()
    }

    pub fn result(&self, column: usize) -> Option<&SearchResult> {
        column
            .checked_sub(self.start)
            .and_then(|i| self.results.get(i))
    }

    /// Supernode subscript sets read from the graph for the whole panel.
    pub fn traversals(&self) -> usize {
        self.traversals
    }

    /// Swap the shared-phase result of `column` into `into`.
    pub fn take(&mut self, column: usize, into: &mut SearchResult) -> PsluResult<()> {
        let panel = self.start..self.start + self.results.len();
        let slot = column
            .checked_sub(self.start)
            .and_then(|i| self.results.get_mut(i))
            .ok_or_else(|| {
                PsluError::InvariantViolation(format!(
                    "column {column} is not part of the searched panel {:?}",
                    panel
                ))
            })?;
        std::mem::swap(slot, into);
        Ok(())
    }
}

pub struct DependencySearch<'a> {
    store: &'a FactorStore,
    graph: &'a PruningGraph,
}

impl<'a> DependencySearch<'a> {
    pub fn new(store: &'a FactorStore, graph: &'a PruningGraph) -> Self {
        Self { store, graph }
    }

    /// Shared phase for the panel `columns`; `rows_of(j)` is the pattern of
    /// `A(:, q_j)`.
    ///
    /// Every descendant of the panel's columns that lies before the panel
    /// must be DONE, and no column of the panel may be committed yet.
    pub fn search_panel<'r>(
        &self,
        columns: Range<usize>,
        rows_of: impl Fn(usize) -> &'r [usize],
        ws: &mut SearchWorkspace,
        panel: &mut PanelSearch,
    ) -> PsluResult<()> {
        ws.begin_panel();
        panel.start = columns.start;
        panel.traversals = 0;
        panel
            .results
            .resize_with(columns.len(), SearchResult::default);

        for (column, out) in columns.zip(panel.results.iter_mut()) {
            out.clear();
            let stamp = ws.next_stamp();
            ws.stack.clear();
            for &row in rows_of(column) {
                if ws.row_mark[row] != stamp {
                    ws.row_mark[row] = stamp;
                    out.reached.push(row);
                    ws.stack.push(row);
                }
            }
            panel.traversals += self.descend(column, stamp, ws, out)?;
            out.dependencies.sort_unstable();
            out.lower_rows.sort_unstable();
        }
        Ok(())
    }

    /// Finish the search of `column` from its shared-phase result: rows
    /// that were unpivoted then but have been pivoted by earlier columns of
    /// the panel are followed into their supernodes.
    ///
    /// Returns the number of subscript sets read from the graph.
    pub fn complete_column(
        &self,
        column: usize,
        ws: &mut SearchWorkspace,
        out: &mut SearchResult,
    ) -> PsluResult<usize> {
        let stamp = ws.next_stamp();
        ws.stack.clear();
        for &row in &out.reached {
            ws.row_mark[row] = stamp;
        }
        for &head in &out.dependencies {
            ws.supernode_mark[head] = stamp;
        }
        let store = self.store;
        let stack = &mut ws.stack;
        out.lower_rows.retain(|&row| {
            let pivoted = store.pivot_of_row(row).is_some();
            if pivoted {
                stack.push(row);
            }
            !pivoted
        });
        if ws.stack.is_empty() {
            return Ok(0);
        }

        let traversals = self.descend(column, stamp, ws, out)?;
        out.dependencies.sort_unstable();
        out.lower_rows.sort_unstable();
        Ok(traversals)
    }

    fn descend(
        &self,
        column: usize,
        stamp: u32,
        ws: &mut SearchWorkspace,
        out: &mut SearchResult,
    ) -> PsluResult<usize> {
        let mut traversals = 0;
        while let Some(row) = ws.stack.pop() {
            let Some(pivot_col) = self.store.pivot_of_row(row) else {
                out.lower_rows.push(row);
                continue;
            };
            if pivot_col >= column {
                return Err(PsluError::InvariantViolation(format!(
                    "search for column {column} reached row {row} pivoted at column {pivot_col}"
                )));
            }
            let head = self.store.supernode_of(pivot_col).ok_or_else(|| {
                PsluError::InvariantViolation(format!(
                    "column {pivot_col} pivoted but not assigned to a supernode"
                ))
            })?;
            if ws.supernode_mark[head] == stamp {
                continue;
            }
            ws.supernode_mark[head] = stamp;
            out.dependencies.push(head);
            out.supernodes_visited += 1;

            let subscripts = match ws.cached[head].clone() {
                Some(range) => range,
                None => {
                    let begin = ws.cache.len();
                    let cache = &mut ws.cache;
                    self.graph.traverse(head, &self.store.lsub, |rows| {
                        cache.extend_from_slice(rows)
                    })?;
                    let range = begin..ws.cache.len();
                    ws.cached[head] = Some(range.clone());
                    ws.cached_heads.push(head);
                    traversals += 1;
                    range
                }
            };
            for i in subscripts {
                let next = ws.cache[i];
                if ws.row_mark[next] != stamp {
                    ws.row_mark[next] = stamp;
                    out.reached.push(next);
                    ws.stack.push(next);
                }
            }
        }
        Ok(traversals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pslu_core::FactorOptions;

    // Column 0 pivoted on row 1 with structure {1, 3}; column 1 pivoted on
    // row 0 with structure {0, 2, 3}.
    fn setup() -> (FactorStore, PruningGraph) {
        let store = FactorStore::new(5, 10, &FactorOptions::default()).unwrap();
        let graph = PruningGraph::new(5);
        let r0 = store.publish_rows(0, &[1, 3]).unwrap();
        graph.publish_full(0, r0).unwrap();
        store.extend_supernode(0, 0).unwrap();
        store.assign_pivot(1, 0).unwrap();

        let r1 = store.publish_rows(1, &[0, 2, 3]).unwrap();
        graph.publish_full(1, r1).unwrap();
        store.extend_supernode(1, 1).unwrap();
        store.assign_pivot(0, 1).unwrap();
        (store, graph)
    }

    fn search_one(
        search: &DependencySearch<'_>,
        column: usize,
        rows: &[usize],
        ws: &mut SearchWorkspace,
    ) -> PsluResult<SearchResult> {
        let mut panel = PanelSearch::default();
        search.search_panel(column..column + 1, |_| rows, ws, &mut panel)?;
        let mut out = SearchResult::default();
        panel.take(column, &mut out)?;
        search.complete_column(column, ws, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_search_follows_pivots() {
        let (store, graph) = setup();
        let search = DependencySearch::new(&store, &graph);
        let mut ws = SearchWorkspace::new(5);

        let out = search_one(&search, 2, &[1, 4], &mut ws).unwrap();
        assert_eq!(out.dependencies, vec![0]);
        assert_eq!(out.lower_rows, vec![3, 4]);

        let out = search_one(&search, 2, &[0], &mut ws).unwrap();
        assert_eq!(out.dependencies, vec![1]);
        assert_eq!(out.lower_rows, vec![2, 3]);
        assert!(out.depends_on(1));
        assert!(!out.depends_on(0));
    }

    #[test]
    fn test_panel_shares_subscripts() {
        let (store, graph) = setup();
        let search = DependencySearch::new(&store, &graph);
        let mut ws = SearchWorkspace::new(5);
        let mut panel = PanelSearch::default();

        let rows: [&[usize]; 2] = [&[1, 4], &[0, 1]];
        search
            .search_panel(2..4, |col| rows[col - 2], &mut ws, &mut panel)
            .unwrap();
        assert_eq!(panel.columns(), 2..4);
        // Supernode 0 is reached from both columns but read once
        assert_eq!(panel.traversals(), 2);
        assert_eq!(panel.result(2).unwrap().dependencies, vec![0]);
        assert_eq!(panel.result(3).unwrap().dependencies, vec![0, 1]);
        assert_eq!(panel.result(3).unwrap().lower_rows, vec![2, 3]);
        assert!(panel.result(4).is_none());
    }

    #[test]
    fn test_complete_follows_rows_pivoted_inside_panel() {
        let (store, graph) = setup();
        let search = DependencySearch::new(&store, &graph);
        let mut ws = SearchWorkspace::new(5);
        let mut panel = PanelSearch::default();

        let rows: [&[usize]; 2] = [&[2, 4], &[4]];
        search
            .search_panel(2..4, |col| rows[col - 2], &mut ws, &mut panel)
            .unwrap();
        assert_eq!(panel.result(3).unwrap().lower_rows, vec![4]);

        // Column 2 commits with pivot row 4 and structure {2, 4}
        let mut first = SearchResult::default();
        panel.take(2, &mut first).unwrap();
        search.complete_column(2, &mut ws, &mut first).unwrap();
        assert_eq!(first.lower_rows, vec![2, 4]);
        let region = store.publish_rows(2, &first.lower_rows).unwrap();
        graph.publish_full(2, region).unwrap();
        store.extend_supernode(2, 2).unwrap();
        store.assign_pivot(4, 2).unwrap();

        let mut second = SearchResult::default();
        panel.take(3, &mut second).unwrap();
        let read = search.complete_column(3, &mut ws, &mut second).unwrap();
        assert_eq!(read, 1);
        assert_eq!(second.dependencies, vec![2]);
        assert_eq!(second.lower_rows, vec![2]);
    }

    #[test]
    fn test_search_uses_pruned_set() {
        let (store, graph) = setup();
        store.assign_pivot(3, 2).unwrap();
        store.extend_supernode(1, 2).unwrap();
        graph.try_prune(0, 3, &store, 4).unwrap();

        let search = DependencySearch::new(&store, &graph);
        let mut ws = SearchWorkspace::new(5);
        let out = search_one(&search, 3, &[1], &mut ws).unwrap();
        // Supernode 0 now lists rows 1 and 3 only because both are pivoted;
        // row 3 leads to supernode 1.
        assert_eq!(out.dependencies, vec![0, 1]);
        assert_eq!(out.lower_rows, vec![2]);
    }

    #[test]
    fn test_pivot_above_column_is_violation() {
        let (store, graph) = setup();
        let search = DependencySearch::new(&store, &graph);
        let mut ws = SearchWorkspace::new(5);
        let err = search_one(&search, 1, &[0], &mut ws).unwrap_err();
        assert!(matches!(err, PsluError::InvariantViolation(_)));
    }

    #[test]
    fn test_take_outside_panel_is_violation() {
        let mut panel = PanelSearch::default();
        let mut out = SearchResult::default();
        assert!(panel.take(0, &mut out).is_err());
    }

    #[test]
    fn test_stamp_wraparound_resets_marks() {
        let mut ws = SearchWorkspace::new(3);
        ws.stamp = u32::MAX;
        ws.row_mark[1] = u32::MAX;
        assert_eq!(ws.next_stamp(), 1);
        assert_eq!(ws.row_mark[1], 0);
    }
}
