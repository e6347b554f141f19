//! Work units and the scheduler that hands them out.
//!
//! The postordered elimination tree is cut into contiguous column ranges:
//!
//! | Unit | Contents | Waits on others |
//! |------|----------|-----------------|
//! | `Domain` | a whole subtree, factored by one worker | never |
//! | `RelaxedSupernode` | a small leaf subtree, one dense block | never |
//! | `Panel` | up to `panel_size` consecutive remaining columns | busy descendants |
//!
//! A unit becomes *ready* when every child unit (the distinct units holding
//! its columns' tree children) has completed. Ready units are claimed and
//! queued. When the queue runs dry a worker claims the lowest unclaimed unit
//! instead (pipelining) and waits for its busy descendants column by column.
//! Every unit lower than a pipelined one has already been claimed, so those
//! waits always end.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use pslu_core::{PsluError, PsluResult, EMPTY};
use tracing::debug;

use crate::etree::EliminationTree;
use crate::queue::TaskQueue;
use crate::sync::StatusBoard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Domain,
    RelaxedSupernode,
    Panel,
}

/// A piece of a unit processed in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: UnitKind,
    pub columns: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub kind: UnitKind,
    pub columns: Range<usize>,
    /// Relaxed supernodes and panels in column order; a single entry for
    /// anything but a domain.
    pub segments: Vec<Segment>,
}

impl WorkUnit {
    fn single(kind: UnitKind, columns: Range<usize>) -> Self {
        Self {
            kind,
            columns: columns.clone(),
            segments: vec![Segment { kind, columns }],
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// The static cut of the tree into units plus their dependency counts.
#[derive(Debug, Clone)]
pub struct UnitPlan {
    units: Vec<WorkUnit>,
    unit_of: Vec<usize>,
    parents: Vec<Vec<usize>>,
    children: Vec<usize>,
}

fn segments(columns: Range<usize>, relaxed_end: &[usize], panel_size: usize) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut col = columns.start;
    while col < columns.end {
        if relaxed_end[col] != EMPTY {
            out.push(Segment {
                kind: UnitKind::RelaxedSupernode,
                columns: col..relaxed_end[col],
            });
            col = relaxed_end[col];
        } else {
            let mut end = col + 1;
            while end < columns.end && end - col < panel_size && relaxed_end[end] == EMPTY {
                end += 1;
            }
            out.push(Segment {
                kind: UnitKind::Panel,
                columns: col..end,
            });
            col = end;
        }
    }
    out
}

impl UnitPlan {
    /// Cut the tree into units. `relaxed` and `domains` must be subtrees.
    pub fn build(
        tree: &EliminationTree,
        relaxed: &[Range<usize>],
        domains: &[Range<usize>],
        panel_size: usize,
    ) -> PsluResult<Self> {
        let n = tree.n();
        let mut relaxed_end = vec![EMPTY; n];
        let mut in_relaxed = vec![false; n];
        for range in relaxed {
            if range.is_empty() || tree.subtree(range.end - 1) != *range {
                return Err(PsluError::Structural(format!(
                    "relaxed supernode {range:?} is not a subtree"
                )));
            }
            relaxed_end[range.start] = range.end;
            in_relaxed[range.clone()].iter_mut().for_each(|c| *c = true);
        }

        let mut kept_domains: Vec<Range<usize>> = Vec::new();
        for range in domains {
            if range.is_empty() || tree.subtree(range.end - 1) != *range {
                return Err(PsluError::Structural(format!(
                    "domain {range:?} is not a subtree"
                )));
            }
            if in_relaxed[range.end - 1] {
                continue;
            }
            kept_domains.push(range.clone());
        }
        kept_domains.sort_by_key(|r| r.start);
        if kept_domains.windows(2).any(|w| w[0].end > w[1].start) {
            return Err(PsluError::Structural("domains overlap".into()));
        }

        let mut units = Vec::new();
        let mut col = 0;
        let mut next_domain = kept_domains.iter().peekable();
        while col < n {
            match next_domain.peek() {
                Some(&domain) if domain.start == col => {
                    let domain = domain.clone();
                    let pieces = segments(domain.clone(), &relaxed_end, panel_size);
                    if pieces.len() > 1 {
                        units.push(WorkUnit {
                            kind: UnitKind::Domain,
                            columns: domain.clone(),
                            segments: pieces,
                        });
                    } else {
                        units.extend(
                            pieces
                                .into_iter()
                                .map(|s| WorkUnit::single(s.kind, s.columns)),
                        );
                    }
                    col = domain.end;
                    next_domain.next();
                }
                next => {
                    let gap_end = next.map_or(n, |d| d.start);
                    units.extend(
                        segments(col..gap_end, &relaxed_end, panel_size)
                            .into_iter()
                            .map(|s| WorkUnit::single(s.kind, s.columns)),
                    );
                    col = gap_end;
                }
            }
        }

        let mut unit_of = vec![0; n];
        for (id, unit) in units.iter().enumerate() {
            unit_of[unit.columns.clone()].iter_mut().for_each(|u| *u = id);
        }
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
        for col in 0..n {
            if let Some(p) = tree.parent(col) {
                let (child, parent) = (unit_of[col], unit_of[p]);
                if child != parent {
                    parents[child].push(parent);
                }
            }
        }
        let mut children = vec![0; units.len()];
        for list in &mut parents {
            list.sort_unstable();
            list.dedup();
            for &p in list.iter() {
                children[p] += 1;
            }
        }

        Ok(Self {
            units,
            unit_of,
            parents,
            children,
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    pub fn unit(&self, id: usize) -> &WorkUnit {
        &self.units[id]
    }

    pub fn unit_of(&self, col: usize) -> usize {
        self.unit_of[col]
    }

    pub fn parents(&self, id: usize) -> &[usize] {
        &self.parents[id]
    }

    pub fn child_count(&self, id: usize) -> usize {
        self.children[id]
    }

    pub fn count(&self, kind: UnitKind) -> usize {
        self.units.iter().filter(|u| u.kind == kind).count()
    }
}

/// How a unit reached its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Ready,
    Pipelined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub unit: usize,
    pub dispatch: Dispatch,
}

impl Assignment {
    fn ready(unit: usize) -> Self {
        Self {
            unit,
            dispatch: Dispatch::Ready,
        }
    }
}

pub struct Scheduler {
    plan: UnitPlan,
    queue: TaskQueue<Assignment>,
    claimed: Box<[AtomicBool]>,
    started: Box<[AtomicBool]>,
    pending: Box<[AtomicUsize]>,
    cursor: AtomicUsize,
    unclaimed_columns: AtomicUsize,
}

impl Scheduler {
    /// Seed the queue: domains first, then every other unit without children.
    pub fn new(plan: UnitPlan, status: &StatusBoard) -> PsluResult<Self> {
        let count = plan.len();
        let total: usize = plan.units().iter().map(WorkUnit::len).sum();
        let scheduler = Self {
            queue: TaskQueue::new(),
            claimed: (0..count).map(|_| AtomicBool::new(false)).collect(),
            started: (0..count).map(|_| AtomicBool::new(false)).collect(),
            pending: (0..count)
                .map(|id| AtomicUsize::new(plan.child_count(id)))
                .collect(),
            cursor: AtomicUsize::new(0),
            unclaimed_columns: AtomicUsize::new(total),
            plan,
        };

        let domains = (0..count).filter(|&id| scheduler.plan.unit(id).kind == UnitKind::Domain);
        let leaves = (0..count).filter(|&id| {
            scheduler.plan.unit(id).kind != UnitKind::Domain && scheduler.plan.child_count(id) == 0
        });
        let seeds: Vec<usize> = domains.chain(leaves).collect();
        for &id in &seeds {
            scheduler.claim(id, status)?;
        }
        debug!(units = count, seeds = seeds.len(), "scheduler seeded");
        scheduler.queue.enqueue_all(seeds.into_iter().map(Assignment::ready));
        Ok(scheduler)
    }

    pub fn plan(&self) -> &UnitPlan {
        &self.plan
    }

    fn claim(&self, id: usize, status: &StatusBoard) -> PsluResult<bool> {
        if self.claimed[id].swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let columns = self.plan.unit(id).columns.clone();
        self.unclaimed_columns
            .fetch_sub(columns.len(), Ordering::AcqRel);
        status.mark_queued(columns)?;
        Ok(true)
    }

    /// Next unit for a worker, or `None` once every unit has been handed out.
    pub fn next(&self, status: &StatusBoard) -> PsluResult<Option<Assignment>> {
        let mut failure = None;
        let assignment = self.queue.dequeue_or_else(|| {
            let mut id = self.cursor.load(Ordering::Acquire);
            while id < self.plan.len() {
                match self.claim(id, status) {
                    Ok(true) => {
                        self.cursor.store(id + 1, Ordering::Release);
                        return Some(Assignment {
                            unit: id,
                            dispatch: Dispatch::Pipelined,
                        });
                    }
                    Ok(false) => id += 1,
                    Err(err) => {
                        failure = Some(err);
                        return None;
                    }
                }
            }
            self.cursor.store(id, Ordering::Release);
            None
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(assignment),
        }
    }

    /// Mark a unit as started; a second start is an invariant violation.
    pub fn begin(&self, id: usize) -> PsluResult<()> {
        if !self.claimed[id].load(Ordering::Acquire) {
            return Err(PsluError::InvariantViolation(format!(
                "unit {id} started without being claimed"
            )));
        }
        if self.started[id].swap(true, Ordering::AcqRel) {
            return Err(PsluError::InvariantViolation(format!(
                "unit {id} handed out twice"
            )));
        }
        Ok(())
    }

    /// Record completion and queue parents that became ready.
    pub fn complete(&self, id: usize, status: &StatusBoard) -> PsluResult<()> {
        for &parent in self.plan.parents(id) {
            if self.pending[parent].fetch_sub(1, Ordering::AcqRel) == 1
                && self.claim(parent, status)?
            {
                self.queue.enqueue(Assignment::ready(parent));
            }
        }
        Ok(())
    }

    /// Columns not yet handed to any worker.
    pub fn remaining_columns(&self) -> usize {
        self.unclaimed_columns.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
