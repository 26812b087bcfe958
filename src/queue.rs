use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// FIFO of pending items shared between producers and workers.
///
/// Backed by a lock-free `SegQueue`, so every push and pop is linearizable:
/// dequeue order is submit order and each item is handed to exactly one
/// caller of [`TaskQueue::pop`]. The length counter is bumped *before* the
/// push lands, so `is_empty()` never reports empty while an item is on its way
/// in.
pub struct TaskQueue<T> {
    items: SegQueue<T>,
    len: AtomicUsize,
    capacity: Option<usize>,
}

impl<T> TaskQueue<T> {
    pub fn unbounded() -> Self {
        Self {
            items: SegQueue::new(),
            len: AtomicUsize::new(0),
            capacity: None,
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            items: SegQueue::new(),
            len: AtomicUsize::new(0),
            capacity: Some(capacity),
        }
    }

    /// Appends `item` to the tail. A bounded queue that is full hands the item
    /// back.
    pub fn push(&self, item: T) -> Result<(), T> {
        match self.capacity {
            None => {
                self.len.fetch_add(1, Ordering::SeqCst);
            }
            Some(cap) => {
                let reserved = self
                    .len
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < cap).then_some(n + 1)
                    });
                if reserved.is_err() {
                    return Err(item);
                }
            }
        }
        self.items.push(item);
        Ok(())
    }

    #[inline]
    pub fn pop(&self) -> Option<T> {
        let item = self.items.pop()?;
        self.len.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
