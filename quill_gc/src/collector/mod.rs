//! Young-generation collection.
//!
//! The [`Scavenger`] evacuates live young objects using per-worker
//! [`LocalAllocationBuffer`]s, a segmented [`WorkList`] of copied objects,
//! and a shared [`PromotionQueue`] of promoted objects awaiting a scan.

mod lab;
mod promotion_queue;
mod scavenger;
mod worklist;

pub use lab::LocalAllocationBuffer;
pub use promotion_queue::{PromotionEntry, PromotionQueue};
pub use scavenger::{Scavenger, SlotTarget};
pub use worklist::{Local, WorkList, SEGMENT_SIZE};

use crate::heap::Heap;
use crate::roots::RootProvider;
use crate::stats::ScavengeResult;

/// Run one scavenge with a fresh [`Scavenger`].
pub fn scavenge(heap: &mut Heap, roots: &dyn RootProvider) -> ScavengeResult {
    Scavenger::new().scavenge(heap, roots)
}
