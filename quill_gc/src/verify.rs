//! Heap verification.
//!
//! Walks every space and checks the invariants a completed scavenge must
//! leave behind: from-space is empty, every header decodes, every pointer
//! lands on the start of a live object outside from-space, and no root or
//! remembered slot references from-space.

use crate::heap::{Heap, Space};
use crate::object::ShapeId;
use crate::roots::RootProvider;
use crate::tagged::{Address, Tagged};
use crate::error::FatalHeapError;

use rustc_hash::FxHashSet;
use std::sync::atomic::Ordering;

/// A violated heap invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// From-space still holds allocated bytes.
    FromSpaceNotEmpty(usize),
    /// A space could not be walked.
    CorruptSpace(Space, FatalHeapError),
    /// A heap slot references something that is not a live object.
    DanglingPointer {
        /// Slot address.
        slot: Address,
        /// Referenced address.
        target: Address,
    },
    /// A root references from-space or a non-object address.
    BadRoot {
        /// Referenced address.
        target: Address,
    },
    /// A remembered slot lies outside old space or references from-space.
    BadRememberedSlot {
        /// Slot address.
        slot: Address,
    },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::FromSpaceNotEmpty(bytes) => {
                write!(f, "from-space still holds {bytes} bytes")
            }
            VerifyError::CorruptSpace(space, e) => write!(f, "{space:?} space: {e}"),
            VerifyError::DanglingPointer { slot, target } => {
                write!(f, "slot {slot} references non-object {target}")
            }
            VerifyError::BadRoot { target } => write!(f, "root references {target}"),
            VerifyError::BadRememberedSlot { slot } => {
                write!(f, "remembered slot {slot} is invalid")
            }
        }
    }
}

impl std::error::Error for VerifyError {}

/// Check heap invariants. Returns every violation found.
pub fn verify_heap(heap: &Heap, roots: &dyn RootProvider) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();

    let from_bytes = heap.from_space().allocated();
    if from_bytes != 0 {
        errors.push(VerifyError::FromSpaceNotEmpty(from_bytes));
    }

    let mut objects: Vec<(Address, ShapeId, usize)> = Vec::new();
    for space in [Space::To, Space::Old] {
        if let Err(e) = heap.for_each_object(space, |addr, id, size| objects.push((addr, id, size))) {
            errors.push(VerifyError::CorruptSpace(space, e));
        }
    }
    let starts: FxHashSet<Address> = objects
        .iter()
        .filter(|(_, id, _)| !id.is_filler())
        .map(|(addr, _, _)| *addr)
        .collect();

    let is_live = |value: Tagged| match value.as_address() {
        Some(target) => !heap.is_in_from_space(target) && (!heap.contains(target) || starts.contains(&target)),
        None => true,
    };

    for &(object, id, size) in &objects {
        if id.is_filler() {
            continue;
        }
        let Some(shape) = heap.shapes().get(id) else {
            continue;
        };
        for offset in shape.pointer_slots(size) {
            let slot = object.offset(offset);
            let value = heap.read_field(object, offset);
            if !is_live(value) {
                errors.push(VerifyError::DanglingPointer {
                    slot,
                    target: value.as_address().unwrap_or(Address::NULL),
                });
            }
        }
    }

    roots.visit_roots(0, 1, &mut |slot| {
        let value = Tagged::from_raw(slot.load(Ordering::Acquire));
        if !is_live(value) {
            errors.push(VerifyError::BadRoot {
                target: value.as_address().unwrap_or(Address::NULL),
            });
        }
    });

    for slot in heap.remembered_set().snapshot() {
        let points_from_space = heap
            .slot(slot)
            .map(|w| Tagged::from_raw(w.load(Ordering::Acquire)))
            .and_then(Tagged::as_address)
            .is_some_and(|target| heap.is_in_from_space(target));
        if !heap.in_old(slot) || points_from_space {
            errors.push(VerifyError::BadRememberedSlot { slot });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        log::error!("heap verification found {} errors", errors.len());
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::Generation;
    use crate::object::Shape;
    use crate::roots::RootSet;

    #[test]
    fn test_fresh_heap_verifies() {
        let heap = Heap::new(GcConfig::for_testing()).unwrap();
        assert_eq!(verify_heap(&heap, &RootSet::new()), Ok(()));
    }

    #[test]
    fn test_interior_pointer_detected() {
        let mut heap = Heap::new(GcConfig::for_testing()).unwrap();
        let pair = heap.register_shape(Shape::fixed("pair", 24)).unwrap();
        let a = heap.allocate(pair, 0, Generation::Young).unwrap();
        heap.write_field(a, 8, Tagged::from_address(a.offset(8)));

        let errors = verify_heap(&heap, &RootSet::new()).unwrap_err();
        assert_eq!(
            errors,
            vec![VerifyError::DanglingPointer {
                slot: a.offset(8),
                target: a.offset(8),
            }]
        );
    }

    #[test]
    fn test_remembered_slot_in_young_detected() {
        let mut heap = Heap::new(GcConfig::for_testing()).unwrap();
        let pair = heap.register_shape(Shape::fixed("pair", 24)).unwrap();
        let a = heap.allocate(pair, 0, Generation::Young).unwrap();
        heap.remembered_set().insert(a.offset(8));

        let errors = verify_heap(&heap, &RootSet::new()).unwrap_err();
        assert_eq!(errors, vec![VerifyError::BadRememberedSlot { slot: a.offset(8) }]);
    }
}
