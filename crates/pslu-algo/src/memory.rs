//! Dynamic memory manager.
//!
//! Factor storage lives in a few flat [`FactorBuffer`]s. Writers append whole
//! regions under the buffer's write lock; readers hold the read side while
//! they look at a region, so a relocation during growth is never observed
//! half way. A [`Region`] is a plain `(start, end)` pair and stays valid
//! across relocations; only the buffer's [`BufferGeneration`] changes.
//!
//! Every growth is charged to a shared [`MemoryBudget`]. Exceeding the budget
//! or failing `try_reserve_exact` yields [`PsluError::OutOfMemory`].

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use pslu_core::{BufferUsage, PsluError, PsluResult};
use tracing::debug;

/// Which factor buffer a region belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Row subscripts of supernodes (full and pruned sets)
    Lsub,
    /// Supernode values
    Lusup,
    /// Row (pivot column) indices of U above supernodes
    Usub,
    /// Values of U above supernodes
    Ucol,
}

impl BufferKind {
    pub fn name(self) -> &'static str {
        match self {
            BufferKind::Lsub => "lsub",
            BufferKind::Lusup => "lusup",
            BufferKind::Usub => "usub",
            BufferKind::Ucol => "ucol",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Half-open index range inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub start: usize,
    pub end: usize,
}

impl Region {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }
}

/// Bumped every time a buffer's storage may have moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct BufferGeneration(pub u64);

/// Byte accounting shared by all buffers of one factorization.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: Option<usize>,
    reserved: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            reserved: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Reserve `bytes`, failing if the limit would be exceeded.
    pub fn charge(&self, bytes: usize) -> bool {
        let mut current = self.reserved.load(Ordering::Acquire);
        loop {
            let Some(next) = current.checked_add(bytes) else {
                return false;
            };
            if self.limit.is_some_and(|limit| next > limit) {
                return false;
            }
            match self.reserved.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::AcqRel);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Account for `bytes` that are already allocated, limit or not.
    pub fn record(&self, bytes: usize) {
        let next = self.reserved.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak.fetch_max(next, Ordering::AcqRel);
    }

    pub fn release(&self, bytes: usize) {
        self.reserved.fetch_sub(bytes, Ordering::AcqRel);
    }

    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// A growable buffer of plain elements addressed by [`Region`]s.
pub struct FactorBuffer<T> {
    kind: BufferKind,
    data: RwLock<Vec<T>>,
    generation: AtomicU64,
    expansions: AtomicUsize,
    growth: f64,
    budget: Arc<MemoryBudget>,
}

impl<T: Copy> FactorBuffer<T> {
    /// Allocate `initial` elements up front, charged to `budget`.
    pub fn with_capacity(
        kind: BufferKind,
        initial: usize,
        growth: f64,
        budget: Arc<MemoryBudget>,
    ) -> PsluResult<Self> {
        let bytes = initial.saturating_mul(std::mem::size_of::<T>());
        if !budget.charge(bytes) {
            return Err(PsluError::OutOfMemory {
                buffer: kind.name(),
                requested_bytes: bytes,
            });
        }
        let mut data = Vec::new();
        if data.try_reserve_exact(initial).is_err() {
            budget.release(bytes);
            return Err(PsluError::OutOfMemory {
                buffer: kind.name(),
                requested_bytes: bytes,
            });
        }
        if data.capacity() > initial {
            budget.record((data.capacity() - initial).saturating_mul(std::mem::size_of::<T>()));
        }
        Ok(Self {
            kind,
            data: RwLock::new(data),
            generation: AtomicU64::new(0),
            expansions: AtomicUsize::new(0),
            growth,
            budget,
        })
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Grow `data` so that `additional` more elements fit.
    fn grow_locked(&self, data: &mut Vec<T>, additional: usize) -> PsluResult<()> {
        let needed = data.len().checked_add(additional).ok_or(PsluError::OutOfMemory {
            buffer: self.kind.name(),
            requested_bytes: usize::MAX,
        })?;
        if needed <= data.capacity() {
            return Ok(());
        }
        let old_capacity = data.capacity();
        let scaled = (old_capacity as f64 * self.growth).ceil() as usize;
        let new_capacity = needed.max(scaled).max(old_capacity + 1);
        let extra = new_capacity - old_capacity;
        let bytes = extra.saturating_mul(std::mem::size_of::<T>());

        if !self.budget.charge(bytes) {
            return Err(PsluError::OutOfMemory {
                buffer: self.kind.name(),
                requested_bytes: bytes,
            });
        }
        if data.try_reserve_exact(new_capacity - data.len()).is_err() {
            self.budget.release(bytes);
            return Err(PsluError::OutOfMemory {
                buffer: self.kind.name(),
                requested_bytes: bytes,
            });
        }
        // try_reserve_exact may round up; the surplus is already allocated.
        let actual_extra = data.capacity() - old_capacity;
        if actual_extra > extra {
            self.budget
                .record((actual_extra - extra).saturating_mul(std::mem::size_of::<T>()));
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.expansions.fetch_add(1, Ordering::AcqRel);
        debug!(
            buffer = self.kind.name(),
            from = old_capacity,
            to = data.capacity(),
            generation,
            "expanded factor buffer"
        );
        Ok(())
    }

    /// Make room for `additional` more elements.
    pub fn ensure_capacity(&self, additional: usize) -> PsluResult<BufferGeneration> {
        let mut data = self.data.write();
        self.grow_locked(&mut data, additional)?;
        Ok(self.generation())
    }

    /// Grow by one expansion step regardless of free space.
    pub fn force_expand(&self) -> PsluResult<BufferGeneration> {
        let mut data = self.data.write();
        let free = data.capacity() - data.len();
        self.grow_locked(&mut data, free + 1)?;
        Ok(self.generation())
    }

    /// Append `values` as one new region.
    pub fn append(&self, values: &[T]) -> PsluResult<Region> {
        let mut data = self.data.write();
        self.grow_locked(&mut data, values.len())?;
        let start = data.len();
        data.extend_from_slice(values);
        Ok(Region::new(start, data.len()))
    }

    /// Append the elements of `values` that satisfy `keep`.
    pub fn append_filtered(
        &self,
        source: Region,
        mut keep: impl FnMut(&T) -> bool,
    ) -> PsluResult<Region> {
        let mut data = self.data.write();
        self.grow_locked(&mut data, source.len())?;
        let start = data.len();
        for pos in source.range() {
            let value = data[pos];
            if keep(&value) {
                data.push(value);
            }
        }
        Ok(Region::new(start, data.len()))
    }

    /// Read access to a region. Holds the buffer's read lock until dropped.
    pub fn read(&self, region: Region) -> MappedRwLockReadGuard<'_, [T]> {
        RwLockReadGuard::map(self.data.read_recursive(), |data| &data[region.range()])
    }

    pub fn with_region<R>(&self, region: Region, f: impl FnOnce(&[T]) -> R) -> R {
        let view = self.read(region);
        f(&view)
    }

    pub fn to_vec(&self, region: Region) -> Vec<T> {
        self.read(region).to_vec()
    }

    pub fn len(&self) -> usize {
        self.data.read_recursive().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.read_recursive().capacity()
    }

    pub fn generation(&self) -> BufferGeneration {
        BufferGeneration(self.generation.load(Ordering::Acquire))
    }

    pub fn expansions(&self) -> usize {
        self.expansions.load(Ordering::Acquire)
    }

    pub fn usage(&self) -> BufferUsage {
        let data = self.data.read_recursive();
        BufferUsage {
            name: self.kind.name().to_string(),
            len: data.len(),
            capacity: data.capacity(),
            expansions: self.expansions(),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data.into_inner()
    }
}
