//! Shared FIFO task queue.
//!
//! A plain `VecDeque` behind the `Queue` named lock. Removal happens with the
//! lock held, so an item is handed out at most once; nobody ever waits on the
//! queue for new work to arrive.

use std::collections::VecDeque;

use crate::sync::{LockName, NamedMutex};

pub struct TaskQueue<T> {
    items: NamedMutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            items: NamedMutex::new(LockName::Queue, VecDeque::new()),
        }
    }

    pub fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
    }

    pub fn enqueue_all(&self, items: impl IntoIterator<Item = T>) {
        self.items.lock().extend(items);
    }

    pub fn dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Pop the front item, or run `fallback` while still holding the lock.
    ///
    /// `fallback` must not touch this queue.
    pub fn dequeue_or_else(&self, fallback: impl FnOnce() -> Option<T>) -> Option<T> {
        let mut items = self.items.lock();
        items.pop_front().or_else(fallback)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::new();
        queue.enqueue(3);
        queue.enqueue_all([1, 2]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fallback_only_when_empty() {
        let queue = TaskQueue::new();
        queue.enqueue(1);
        assert_eq!(queue.dequeue_or_else(|| Some(99)), Some(1));
        assert_eq!(queue.dequeue_or_else(|| Some(99)), Some(99));
        assert_eq!(queue.dequeue_or_else(|| None), None);
    }
}
