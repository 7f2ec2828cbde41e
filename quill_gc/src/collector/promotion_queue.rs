//! Queue of promoted objects awaiting an interior scan.
//!
//! Promotion copies an object into old space but defers scanning its body.
//! The `(target, size)` pair goes into this queue and is drained before the
//! scavenge completes, which keeps recursion depth bounded no matter how
//! deep the promoted structure is.

use crate::tagged::Address;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A promoted object whose pointers are not yet scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionEntry {
    /// Address of the object in old space.
    pub target: Address,
    /// Object size in bytes.
    pub size: usize,
}

/// FIFO of promoted objects, shared by all workers.
#[derive(Debug, Default)]
pub struct PromotionQueue {
    entries: Mutex<VecDeque<PromotionEntry>>,
    inserted: AtomicUsize,
    processed: AtomicUsize,
}

impl PromotionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a freshly promoted object.
    #[inline]
    pub fn insert(&self, target: Address, size: usize) {
        self.entries.lock().push_back(PromotionEntry { target, size });
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    /// Dequeue the oldest entry. The caller must scan it.
    #[inline]
    pub fn remove(&self) -> Option<PromotionEntry> {
        let entry = self.entries.lock().pop_front()?;
        self.processed.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Check if no entries are waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of waiting entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Total entries ever inserted.
    #[inline]
    pub fn inserted(&self) -> usize {
        self.inserted.load(Ordering::Relaxed)
    }

    /// Total entries removed for scanning.
    #[inline]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }
}
