//! Root enumeration.
//!
//! GC roots are the mutable slots outside the heap that may reference heap
//! objects: stack slots, globals, handles held by the embedder. The
//! scavenger reaches them through [`RootProvider`], which can hand out
//! disjoint partitions to parallel workers.

use crate::tagged::{Address, Tagged};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of GC roots.
///
/// Every root slot must be visited by exactly one partition. The slots are
/// atomics so workers can update them in place.
pub trait RootProvider: Sync {
    /// Visit the root slots belonging to `partition` of `partitions`.
    fn visit_roots(&self, partition: usize, partitions: usize, visitor: &mut dyn FnMut(&AtomicUsize));
}

/// A flat, growable root set.
///
/// Partitions are contiguous chunks of the slot vector.
#[derive(Debug, Default)]
pub struct RootSet {
    slots: Vec<AtomicUsize>,
}

impl RootSet {
    /// Create a new empty root set.
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Add a root and return its index.
    pub fn push(&mut self, value: Tagged) -> usize {
        self.slots.push(AtomicUsize::new(value.raw()));
        self.slots.len() - 1
    }

    /// Add a root referencing `object`.
    pub fn push_object(&mut self, object: Address) -> usize {
        self.push(Tagged::from_address(object))
    }

    /// Current value of a root.
    pub fn get(&self, index: usize) -> Option<Tagged> {
        self.slots
            .get(index)
            .map(|s| Tagged::from_raw(s.load(Ordering::Acquire)))
    }

    /// Object referenced by a root, if it holds a heap reference.
    pub fn object(&self, index: usize) -> Option<Address> {
        self.get(index).and_then(Tagged::as_address)
    }

    /// Overwrite a root.
    pub fn set(&self, index: usize, value: Tagged) {
        if let Some(slot) = self.slots.get(index) {
            slot.store(value.raw(), Ordering::Release);
        }
    }

    /// Iterate over all root values.
    pub fn iter(&self) -> impl Iterator<Item = Tagged> + '_ {
        self.slots
            .iter()
            .map(|s| Tagged::from_raw(s.load(Ordering::Acquire)))
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if there are no roots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl RootProvider for RootSet {
    fn visit_roots(
        &self,
        partition: usize,
        partitions: usize,
        visitor: &mut dyn FnMut(&AtomicUsize),
    ) {
        let chunk = self.slots.len().div_ceil(partitions.max(1)).max(1);
        for slot in self.slots.chunks(chunk).nth(partition).into_iter().flatten() {
            visitor(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_set_push_get() {
        let mut roots = RootSet::new();
        let a = roots.push(Tagged::from_smi(7));
        let b = roots.push_object(Address::new(0x1000));
        assert_eq!(roots.get(a).and_then(Tagged::as_smi), Some(7));
        assert_eq!(roots.object(b), Some(Address::new(0x1000)));
        assert_eq!(roots.object(a), None);
        assert_eq!(roots.len(), 2);

        roots.set(a, Tagged::from_smi(8));
        assert_eq!(roots.get(a).and_then(Tagged::as_smi), Some(8));
    }

    #[test]
    fn test_partitions_cover_every_slot_once() {
        let mut roots = RootSet::new();
        for i in 0..10 {
            roots.push(Tagged::from_smi(i));
        }
        let mut seen = Vec::new();
        for p in 0..3 {
            roots.visit_roots(p, 3, &mut |slot| {
                seen.push(Tagged::from_raw(slot.load(Ordering::Relaxed)).as_smi().unwrap())
            });
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_more_partitions_than_roots() {
        let mut roots = RootSet::new();
        roots.push(Tagged::from_smi(1));
        let mut count = 0;
        for p in 0..4 {
            roots.visit_roots(p, 4, &mut |_| count += 1);
        }
        assert_eq!(count, 1);
    }
}
