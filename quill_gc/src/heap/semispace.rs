//! Young-generation semispace with bump-pointer allocation.
//!
//! The young generation is two semispaces of equal size. The mutator and
//! the scavenger both allocate in to-space; a scavenge starts by flipping
//! the spaces so the objects to collect sit in from-space.
//!
//! Allocation is a CAS bump of `top`:
//! ```text
//! start = top (+ one filler word if double alignment requires it)
//! top = start + size
//! ```

use super::region::Region;
use crate::object::Alignment;
use crate::tagged::{Address, WORD_SIZE};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One semispace.
#[derive(Debug)]
pub struct SemiSpace {
    region: Region,
    /// Current allocation pointer.
    top: AtomicUsize,
    /// Objects below this address survived the previous scavenge.
    age_mark: Address,
}

/// Result of a raw bump allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAllocation {
    /// Start of the object.
    pub address: Address,
    /// Filler word placed before the object, if alignment needed one.
    pub filler: Option<Address>,
}

impl SemiSpace {
    /// Create an empty semispace.
    pub fn new(start: Address, size: usize) -> Self {
        Self {
            region: Region::new(start, size),
            top: AtomicUsize::new(start.raw()),
            age_mark: start,
        }
    }

    /// Try to allocate `size` bytes.
    ///
    /// The caller must write a filler header at `filler` if one is returned.
    #[inline]
    pub fn allocate(&self, size: usize, alignment: Alignment) -> Option<RawAllocation> {
        let end = self.region.end().raw();
        loop {
            let current = self.top.load(Ordering::Relaxed);
            let fill = fill_for(Address::new(current), alignment);
            let new_top = current.checked_add(fill + size)?;

            if new_top > end {
                return None; // Space exhausted
            }

            // CAS to claim the space
            if self
                .top
                .compare_exchange_weak(current, new_top, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let start = Address::new(current);
                return Some(RawAllocation {
                    address: start.offset(fill),
                    filler: (fill > 0).then_some(start),
                });
            }
        }
    }

    /// The backing region.
    #[inline]
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Check if an address is within this space.
    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        self.region.contains(addr)
    }

    /// Current allocation pointer.
    #[inline]
    pub fn top(&self) -> Address {
        Address::new(self.top.load(Ordering::Acquire))
    }

    /// Age mark from the previous scavenge.
    #[inline]
    pub fn age_mark(&self) -> Address {
        self.age_mark
    }

    /// Record the current top as the age mark.
    pub fn set_age_mark_to_top(&mut self) {
        self.age_mark = self.top();
    }

    /// Get bytes allocated.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.top().distance_from(self.region.start())
    }

    /// Get remaining free bytes.
    #[inline]
    pub fn free(&self) -> usize {
        self.region.size() - self.allocated()
    }

    /// Reset the space for reuse. All memory is zeroed.
    pub fn reset(&mut self) {
        self.region.clear();
        self.top.store(self.region.start().raw(), Ordering::Release);
        self.age_mark = self.region.start();
    }
}

/// Filler bytes needed before an object placed at `top`.
#[inline]
pub(crate) fn fill_for(top: Address, alignment: Alignment) -> usize {
    match alignment {
        Alignment::Double if !top.is_double_aligned() => WORD_SIZE,
        _ => 0,
    }
}
