//! Segmented work list shared by scavenger workers.
//!
//! Each worker owns a [`Local`] view with a private push segment and pop
//! segment. Full push segments are published to the global pool, where
//! idle workers can steal them. Most pushes and pops never touch the lock.
//!
//! ```text
//!   worker 0            global pool            worker 1
//! ┌──────────┐      ┌──────┬──────┬───┐     ┌──────────┐
//! │ push seg │─────▶│ seg  │ seg  │...│────▶│ pop seg  │
//! │ pop seg  │      └──────┴──────┴───┘     │ push seg │
//! └──────────┘                              └──────────┘
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Entries per segment.
pub const SEGMENT_SIZE: usize = 64;

/// Global pool of published segments.
#[derive(Debug)]
pub struct WorkList<T> {
    pool: Mutex<Vec<Vec<T>>>,
    /// Number of published segments, readable without the lock.
    published: AtomicUsize,
}

impl<T> WorkList<T> {
    /// Create an empty work list.
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            published: AtomicUsize::new(0),
        }
    }

    /// Create a worker-local view.
    pub fn local(&self) -> Local<'_, T> {
        Local {
            global: self,
            push_segment: Vec::with_capacity(SEGMENT_SIZE),
            pop_segment: Vec::new(),
        }
    }

    /// Check if the pool holds no published segments.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.published.load(Ordering::Acquire) == 0
    }

    /// Number of published segments.
    #[inline]
    pub fn segments(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    fn publish(&self, segment: Vec<T>) {
        let mut pool = self.pool.lock();
        pool.push(segment);
        self.published.store(pool.len(), Ordering::Release);
    }

    fn steal(&self) -> Option<Vec<T>> {
        if self.is_empty() {
            return None;
        }
        let mut pool = self.pool.lock();
        let segment = pool.pop();
        self.published.store(pool.len(), Ordering::Release);
        segment
    }
}

impl<T> Default for WorkList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker's view of a [`WorkList`].
pub struct Local<'a, T> {
    global: &'a WorkList<T>,
    push_segment: Vec<T>,
    pop_segment: Vec<T>,
}

impl<T> Local<'_, T> {
    /// Push an entry, publishing the push segment when it fills up.
    #[inline]
    pub fn push(&mut self, entry: T) {
        if self.push_segment.len() == SEGMENT_SIZE {
            let full = std::mem::replace(&mut self.push_segment, Vec::with_capacity(SEGMENT_SIZE));
            self.global.publish(full);
        }
        self.push_segment.push(entry);
    }

    /// Pop an entry: the pop segment first, then the local push segment,
    /// then a stolen segment.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if let Some(entry) = self.pop_segment.pop() {
            return Some(entry);
        }
        if !self.push_segment.is_empty() {
            std::mem::swap(&mut self.push_segment, &mut self.pop_segment);
            return self.pop_segment.pop();
        }
        self.pop_segment = self.global.steal()?;
        self.pop_segment.pop()
    }

    /// Publish any locally buffered entries so other workers can take them.
    pub fn publish(&mut self) {
        if !self.push_segment.is_empty() {
            let segment = std::mem::replace(&mut self.push_segment, Vec::with_capacity(SEGMENT_SIZE));
            self.global.publish(segment);
        }
    }

    /// Check whether this worker holds no local entries.
    #[inline]
    pub fn is_local_empty(&self) -> bool {
        self.push_segment.is_empty() && self.pop_segment.is_empty()
    }
}
