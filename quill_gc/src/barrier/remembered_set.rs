//! Remembered set for tracking old→young slots.
//!
//! The remembered set holds the addresses of old-generation slots that
//! contain pointers into the young generation. A scavenge treats every
//! recorded slot as a root, so it never has to scan the old generation.
//!
//! # Design
//!
//! An append buffer with deduplication on drain. The write barrier appends
//! (O(1)), and the scavenger drains the buffer at the start of a cycle and
//! re-inserts the slots that still point young at the end.

use crate::tagged::Address;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Initial buffer capacity.
const BUFFER_CAPACITY: usize = 4096;

/// Remembered set of old→young slots.
///
/// Supports concurrent insertion and bulk drain by the collector during a
/// stop-the-world pause.
pub struct RememberedSet {
    /// Recorded slot addresses. May contain duplicates until drained.
    buffer: Mutex<Vec<Address>>,

    /// Number of entries (approximate, duplicates included).
    count: AtomicUsize,
}

impl RememberedSet {
    /// Create a new empty remembered set.
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::with_capacity(BUFFER_CAPACITY)),
            count: AtomicUsize::new(0),
        }
    }

    /// Record an old-generation slot holding a young reference.
    #[inline]
    pub fn insert(&self, slot: Address) {
        self.buffer.lock().push(slot);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record many slots at once.
    pub fn extend(&self, slots: impl IntoIterator<Item = Address>) {
        let mut buffer = self.buffer.lock();
        let before = buffer.len();
        buffer.extend(slots);
        self.count
            .fetch_add(buffer.len() - before, Ordering::Relaxed);
    }

    /// Drain all slots, sorted and deduplicated.
    pub fn drain(&self) -> Vec<Address> {
        let mut entries = {
            let mut buffer = self.buffer.lock();
            std::mem::replace(&mut *buffer, Vec::with_capacity(BUFFER_CAPACITY))
        };
        self.count.store(0, Ordering::Relaxed);

        // Deduplicate by sorting + dedup
        entries.sort_unstable();
        entries.dedup();
        entries
    }

    /// Copy of the current slots, sorted and deduplicated.
    pub fn snapshot(&self) -> Vec<Address> {
        let mut entries = self.buffer.lock().clone();
        entries.sort_unstable();
        entries.dedup();
        entries
    }

    /// Get the approximate number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Check if the remembered set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RememberedSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(raw: usize) -> Address {
        Address::new(raw)
    }

    #[test]
    fn test_remembered_set_creation() {
        let rs = RememberedSet::new();
        assert!(rs.is_empty());
        assert_eq!(rs.len(), 0);
    }

    #[test]
    fn test_insert_multiple() {
        let rs = RememberedSet::new();
        for i in 0..100 {
            rs.insert(slot(0x1000 + i * 8));
        }
        assert_eq!(rs.len(), 100);
    }

    #[test]
    fn test_drain_deduplicates() {
        let rs = RememberedSet::new();
        for _ in 0..50 {
            rs.insert(slot(0x2000));
        }

        let entries = rs.drain();
        assert_eq!(entries, vec![slot(0x2000)]);
        assert!(rs.is_empty());
    }

    #[test]
    fn test_drain_sorted_order() {
        let rs = RememberedSet::new();
        rs.insert(slot(0x3000));
        rs.insert(slot(0x1000));
        rs.extend([slot(0x2000), slot(0x1000)]);

        assert_eq!(rs.snapshot(), vec![slot(0x1000), slot(0x2000), slot(0x3000)]);
        assert_eq!(rs.len(), 4);
        assert_eq!(rs.drain(), vec![slot(0x1000), slot(0x2000), slot(0x3000)]);
    }

    #[test]
    fn test_concurrent_insert() {
        let rs = RememberedSet::new();
        std::thread::scope(|s| {
            for t in 0..4 {
                let rs = &rs;
                s.spawn(move || {
                    for i in 0..250 {
                        rs.insert(slot(0x1_0000 + (t * 250 + i) * 8));
                    }
                });
            }
        });
        assert_eq!(rs.drain().len(), 1000);
    }
}
