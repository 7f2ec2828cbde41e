//! Old space (tenured generation) with page-based bump allocation.
//!
//! The old space is reserved up front as a run of equally sized pages. The
//! allocator bumps through the current page and, when an object does not
//! fit, seals the page tail with a filler and moves to the next one. Sealed
//! tails keep the space linearly iterable from its start to `top`.
//!
//! Promotion from several scavenger workers goes through one lock. The
//! critical section is a bump and an occasional page switch.

use super::region::Region;
use super::semispace::{fill_for, RawAllocation};
use super::write_filler;
use crate::object::Alignment;
use crate::tagged::Address;

use parking_lot::Mutex;

/// Old space (tenured generation).
#[derive(Debug)]
pub struct OldSpace {
    region: Region,
    page_size: usize,
    cursor: Mutex<Cursor>,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    /// Next free address.
    top: Address,
    /// End of the current page.
    limit: Address,
}

impl OldSpace {
    /// Create an empty old space of `size` bytes split into pages.
    pub fn new(start: Address, size: usize, page_size: usize) -> Self {
        let region = Region::new(start, size);
        let limit = start.offset(page_size.min(size));
        Self {
            region,
            page_size,
            cursor: Mutex::new(Cursor { top: start, limit }),
        }
    }

    /// Allocate `size` bytes.
    ///
    /// Returns `None` when no page can hold the object. The caller must
    /// write a filler header at the returned `filler`, if any.
    pub fn allocate(&self, size: usize, alignment: Alignment) -> Option<RawAllocation> {
        if size + alignment.max_fill() > self.page_size {
            return None;
        }

        let mut cursor = self.cursor.lock();
        loop {
            let fill = fill_for(cursor.top, alignment);
            let new_top = cursor.top.offset(fill + size);
            if new_top <= cursor.limit {
                let start = cursor.top;
                cursor.top = new_top;
                return Some(RawAllocation {
                    address: start.offset(fill),
                    filler: (fill > 0).then_some(start),
                });
            }

            // Current page is full, seal it and advance
            if cursor.limit >= self.region.end() {
                return None;
            }
            write_filler(
                &self.region,
                cursor.top,
                cursor.limit.distance_from(cursor.top),
            );
            cursor.top = cursor.limit;
            cursor.limit = cursor.limit.offset(self.page_size);
            log::trace!("old space: advanced to page at {}", cursor.top);
        }
    }

    /// The backing region.
    #[inline]
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Check if an address is within the old space.
    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        self.region.contains(addr)
    }

    /// Next free address. Everything below it is iterable.
    #[inline]
    pub fn top(&self) -> Address {
        self.cursor.lock().top
    }

    /// Get total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    /// Get bytes in use, sealed page tails included.
    #[inline]
    pub fn usage(&self) -> usize {
        self.top().distance_from(self.region.start())
    }

    /// Number of pages touched so far.
    pub fn pages_used(&self) -> usize {
        let cursor = self.cursor.lock();
        cursor.limit.distance_from(self.region.start()) / self.page_size
    }
}
