//! Shared synchronization state.
//!
//! Workers coordinate through a handful of primitives:
//!
//! | Primitive | Protects |
//! |-----------|----------|
//! | [`StatusBoard`] | per-column lifecycle and the commit counter |
//! | [`BusyMarker`] | a supernode's subscript sets during traversal and pruning |
//! | [`ErrorLedger`] | the lowest failing column and the first fatal error |
//! | [`NamedMutex`] | queue, pruning counters, statistics |
//!
//! Lock order is fixed: `Queue` never nests with anything, `PruneGraph` may
//! be followed by a buffer lock, buffer locks never nest with each other on
//! the write side, `Statistics` is a leaf. Nobody spins or parks while holding
//! a named lock.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use pslu_core::{PsluError, PsluResult, EMPTY};

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;
const PARK_TIMEOUT: Duration = Duration::from_micros(250);

/// Exponential backoff for test-and-wait loops.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { step: 0 }
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Spin for a growing number of iterations, then yield the time slice.
    pub fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                std::hint::spin_loop();
            }
        } else {
            std::thread::yield_now();
        }
        if self.step <= YIELD_LIMIT {
            self.step += 1;
        }
    }

    /// True once spinning and yielding stopped paying off; callers should park.
    pub fn is_completed(&self) -> bool {
        self.step > YIELD_LIMIT
    }
}

/// Lifecycle of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnStatus {
    Unscheduled,
    Queued,
    InProgress,
    /// Done, but a traversal of its supernode is in flight
    BusyDescendant,
    Done,
}

impl ColumnStatus {
    fn encode(self) -> u8 {
        match self {
            ColumnStatus::Unscheduled => 0,
            ColumnStatus::Queued => 1,
            ColumnStatus::InProgress => 2,
            ColumnStatus::BusyDescendant => 3,
            ColumnStatus::Done => 4,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            0 => ColumnStatus::Unscheduled,
            1 => ColumnStatus::Queued,
            2 => ColumnStatus::InProgress,
            3 => ColumnStatus::BusyDescendant,
            _ => ColumnStatus::Done,
        }
    }
}

/// Result of waiting on a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Done,
    Cancelled,
}

/// Wakes parked waiters when any column completes.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    epoch: Mutex<u64>,
    condvar: Condvar,
    sleepers: AtomicUsize,
}

impl CompletionSignal {
    pub fn notify(&self) {
        if self.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        *self.epoch.lock() += 1;
        self.condvar.notify_all();
    }

    /// Park until notified or `timeout` elapses, unless `ready` already holds.
    pub fn park_unless(&self, ready: impl Fn() -> bool, timeout: Duration) {
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        {
            let mut epoch = self.epoch.lock();
            if !ready() {
                let _ = self.condvar.wait_for(&mut epoch, timeout);
            }
        }
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-column status words plus commit counters.
pub struct StatusBoard {
    states: Box<[AtomicU8]>,
    commits: Box<[AtomicU32]>,
    done_prefix: AtomicUsize,
    signal: CompletionSignal,
}

impl StatusBoard {
    pub fn new(n: usize) -> Self {
        Self {
            states: (0..n).map(|_| AtomicU8::new(0)).collect(),
            commits: (0..n).map(|_| AtomicU32::new(0)).collect(),
            done_prefix: AtomicUsize::new(0),
            signal: CompletionSignal::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Stored lifecycle state.
    pub fn status(&self, col: usize) -> ColumnStatus {
        ColumnStatus::decode(self.states[col].load(Ordering::Acquire))
    }

    /// Lifecycle state as seen by a prospective pruner.
    pub fn observed(&self, col: usize, marker: &BusyMarker) -> ColumnStatus {
        match self.status(col) {
            ColumnStatus::Done if marker.traversals() > 0 => ColumnStatus::BusyDescendant,
            status => status,
        }
    }

    fn transition(&self, col: usize, from: ColumnStatus, to: ColumnStatus) -> PsluResult<()> {
        self.states[col]
            .compare_exchange(from.encode(), to.encode(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| {
                PsluError::InvariantViolation(format!(
                    "column {col} moving {from:?} -> {to:?} found {:?}",
                    ColumnStatus::decode(actual)
                ))
            })
    }

    pub fn mark_queued(&self, cols: Range<usize>) -> PsluResult<()> {
        for col in cols {
            self.transition(col, ColumnStatus::Unscheduled, ColumnStatus::Queued)?;
        }
        Ok(())
    }

    pub fn start(&self, col: usize) -> PsluResult<()> {
        self.transition(col, ColumnStatus::Queued, ColumnStatus::InProgress)
    }

    /// Publish `col` as DONE. Everything written before this call is visible
    /// to any thread that observes the column as done.
    pub fn finish(&self, col: usize) -> PsluResult<()> {
        self.transition(col, ColumnStatus::InProgress, ColumnStatus::Done)?;
        let prior = self.commits[col].fetch_add(1, Ordering::AcqRel);
        if prior != 0 {
            return Err(PsluError::InvariantViolation(format!(
                "column {col} committed {} times",
                prior + 1
            )));
        }
        self.advance_prefix();
        self.signal.notify();
        Ok(())
    }

    pub fn is_done(&self, col: usize) -> bool {
        self.states[col].load(Ordering::Acquire) == ColumnStatus::Done.encode()
    }

    /// Every column below the returned index is DONE.
    pub fn done_prefix(&self) -> usize {
        self.done_prefix.load(Ordering::Acquire)
    }

    fn advance_prefix(&self) {
        let mut prefix = self.done_prefix.load(Ordering::Acquire);
        while prefix < self.len() && self.is_done(prefix) {
            match self.done_prefix.compare_exchange(
                prefix,
                prefix + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => prefix += 1,
                Err(actual) => prefix = actual,
            }
        }
    }

    pub fn commit_count(&self, col: usize) -> u32 {
        self.commits[col].load(Ordering::Acquire)
    }

    /// Highest DONE column, if any.
    pub fn last_done(&self) -> Option<usize> {
        (0..self.len()).rev().find(|&col| self.is_done(col))
    }

    /// Wait until `col` is DONE or `cancelled` reports the wait is pointless.
    pub fn wait_done(&self, col: usize, cancelled: impl Fn() -> bool) -> WaitOutcome {
        let mut backoff = Backoff::new();
        loop {
            if self.is_done(col) {
                return WaitOutcome::Done;
            }
            if cancelled() {
                return WaitOutcome::Cancelled;
            }
            if backoff.is_completed() {
                self.signal
                    .park_unless(|| self.is_done(col) || cancelled(), PARK_TIMEOUT);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Wake every parked waiter, e.g. after recording a failure.
    pub fn wake_all(&self) {
        self.signal.notify();
    }
}

const PRUNING: usize = 1 << (usize::BITS - 1);

/// Traversal counter with an exclusive pruning flag.
///
/// Any number of traversals may hold the marker at once; pruning needs it
/// with no traversal in flight and blocks new traversals while it runs.
#[derive(Debug, Default)]
pub struct BusyMarker {
    state: AtomicUsize,
}

impl BusyMarker {
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    pub fn enter(&self) -> TraversalGuard<'_> {
        let mut backoff = Backoff::new();
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current & PRUNING == 0 {
                if self
                    .state
                    .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return TraversalGuard { marker: self };
                }
            } else {
                backoff.snooze();
            }
        }
    }

    /// Take the marker exclusively, giving up after `limit` backoff steps.
    pub fn try_exclusive(&self, limit: u32) -> Option<ExclusiveGuard<'_>> {
        let mut backoff = Backoff::new();
        for _ in 0..=limit {
            if self
                .state
                .compare_exchange(0, PRUNING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ExclusiveGuard { marker: self });
            }
            backoff.snooze();
        }
        None
    }

    pub fn traversals(&self) -> usize {
        self.state.load(Ordering::Acquire) & !PRUNING
    }

    pub fn is_exclusive(&self) -> bool {
        self.state.load(Ordering::Acquire) & PRUNING != 0
    }
}

#[must_use]
pub struct TraversalGuard<'a> {
    marker: &'a BusyMarker,
}

impl Drop for TraversalGuard<'_> {
    fn drop(&mut self) {
        self.marker.state.fetch_sub(1, Ordering::Release);
    }
}

#[must_use]
pub struct ExclusiveGuard<'a> {
    marker: &'a BusyMarker,
}

impl ExclusiveGuard<'_> {
    pub fn marker(&self) -> &BusyMarker {
        self.marker
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.marker.state.fetch_and(!PRUNING, Ordering::Release);
    }
}

/// First-error bookkeeping shared by all workers.
#[derive(Debug)]
pub struct ErrorLedger {
    first_failure: AtomicUsize,
    aborted: AtomicBool,
    fatal: Mutex<Option<PsluError>>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self {
            first_failure: AtomicUsize::new(EMPTY),
            aborted: AtomicBool::new(false),
            fatal: Mutex::new(None),
        }
    }

    /// Record a numeric failure; the lowest column wins.
    pub fn record_failure(&self, col: usize) {
        self.first_failure.fetch_min(col, Ordering::AcqRel);
    }

    /// Record a resource or invariant error. Every worker stops.
    pub fn record_fatal(&self, err: PsluError) {
        self.aborted.store(true, Ordering::Release);
        let mut slot = self.fatal.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn first_failure(&self) -> Option<usize> {
        match self.first_failure.load(Ordering::Acquire) {
            EMPTY => None,
            col => Some(col),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Work on `col` can no longer change the outcome.
    pub fn abandons(&self, col: usize) -> bool {
        self.is_aborted() || col > self.first_failure.load(Ordering::Acquire)
    }

    /// Waiting for `col` may never end.
    pub fn cancels_wait_on(&self, col: usize) -> bool {
        self.is_aborted() || col >= self.first_failure.load(Ordering::Acquire)
    }

    pub fn take_fatal(&self) -> Option<PsluError> {
        self.fatal.lock().take()
    }
}

impl Default for ErrorLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a named lock, used in logs and lock-order documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockName {
    Queue,
    PruneGraph,
    Statistics,
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockName::Queue => "queue",
            LockName::PruneGraph => "prune-graph",
            LockName::Statistics => "statistics",
        };
        f.write_str(name)
    }
}

/// A mutex that knows its place in the lock order.
pub struct NamedMutex<T> {
    name: LockName,
    inner: Mutex<T>,
}

impl<T> NamedMutex<T> {
    pub fn new(name: LockName, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
        }
    }

    pub fn name(&self) -> LockName {
        self.name
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
