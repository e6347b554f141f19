//! Per-worker scratch arena.
//!
//! The row union of a relaxed supernode and its per-column pivot candidate
//! lists come from a bumpalo arena owned by the worker, reset once the block
//! is committed. Value columns and upper entries of ordinary columns reuse
//! the worker's own vectors instead.

use bumpalo::Bump;

/// Arena for allocations scoped to one relaxed block.
///
/// # Example
///
/// ```
/// use pslu_algo::arena::ScratchArena;
///
/// let mut scratch = ScratchArena::new();
/// {
///     let mut rows = scratch.alloc_vec::<usize>();
///     rows.extend([4, 1, 7]);
///     rows.sort_unstable();
///     assert_eq!(&rows[..], &[1, 4, 7]);
/// }
/// scratch.reset();
/// ```
pub struct ScratchArena {
    bump: Bump,
}

impl ScratchArena {
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    /// Free everything allocated since the last reset.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    pub fn alloc_vec<T>(&self) -> bumpalo::collections::Vec<'_, T> {
        bumpalo::collections::Vec::new_in(&self.bump)
    }

    pub fn alloc_vec_with_capacity<T>(&self, capacity: usize) -> bumpalo::collections::Vec<'_, T> {
        bumpalo::collections::Vec::with_capacity_in(capacity, &self.bump)
    }

    /// Bytes currently held by the arena.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::new()
    }
}
