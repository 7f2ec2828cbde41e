//! Quill Garbage Collector
//!
//! A parallel young-generation copying collector over a tagged-pointer heap.
//!
//! # Architecture
//!
//! - **Young generation**: two semispaces. The mutator bump-allocates in
//!   to-space; a scavenge flips the spaces and evacuates every live object
//!   out of from-space.
//!
//! - **Old generation**: page-based bump allocation. Objects that already
//!   survived one scavenge are promoted here, as is anything that does not
//!   fit in to-space.
//!
//! - **Object model**: each object starts with a map word that holds either
//!   its shape id or, once evacuated, its forwarding address. Shapes
//!   classify body words as data or pointers.
//!
//! # Write Barriers
//!
//! Tagged stores into old objects that create an old→young reference
//! record the slot in a remembered set, which the next scavenge treats as
//! roots.
//!
//! # Usage
//!
//! ```
//! use quill_gc::{GcConfig, Generation, Heap, RootSet, Scavenger, Shape, Tagged};
//!
//! let mut heap = Heap::new(GcConfig::for_testing()).unwrap();
//! let pair = heap.register_shape(Shape::fixed("pair", 24)).unwrap();
//!
//! let a = heap.allocate(pair, 0, Generation::Young).unwrap();
//! let b = heap.allocate(pair, 0, Generation::Young).unwrap();
//! heap.write_field(a, 8, Tagged::from_address(b));
//!
//! let mut roots = RootSet::new();
//! roots.push_object(a);
//!
//! let result = Scavenger::new().scavenge(&mut heap, &roots);
//! assert_eq!(result.objects_copied, 2);
//! ```
//!
//! # Failure
//!
//! Heap-invariant violations during a scavenge are fatal: they are logged
//! and the process panics (aborts in release builds).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod collector;
pub mod config;
pub mod error;
pub mod heap;
pub mod object;
pub mod roots;
pub mod tagged;
pub mod verify;

mod stats;

// Re-exports for convenient access
pub use barrier::RememberedSet;
pub use collector::{scavenge, PromotionQueue, Scavenger};
pub use config::{ConfigError, GcConfig};
pub use error::{AllocationError, FatalHeapError, ShapeError};
pub use heap::{Generation, Heap, Space};
pub use object::{
    Alignment, BodyContents, BodyRegion, ObjectKind, RegionEnd, Shape, ShapeId, ShapeRegistry,
    SizeSpec,
};
pub use roots::{RootProvider, RootSet};
pub use stats::{GcStats, GcTimer, ScavengeResult};
pub use tagged::{Address, MapWord, Tagged, WORD_SIZE};
