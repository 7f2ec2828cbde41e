//! Write barriers for generational GC.
//!
//! The barrier tracks old→young references so a scavenge can find every
//! young object reachable from the old generation without scanning it.
//! [`Heap::write_field`](crate::heap::Heap::write_field) runs the barrier
//! on every tagged store.

mod remembered_set;

pub use remembered_set::RememberedSet;
