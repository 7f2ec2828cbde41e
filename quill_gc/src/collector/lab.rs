//! Local allocation buffers.
//!
//! A worker claims a chunk of to-space with one atomic bump and then
//! allocates from it without synchronization. Unused space is turned into
//! a filler when the buffer is closed, so to-space stays iterable.

use crate::error::{fatal, FatalHeapError};
use crate::heap::{Heap, SemiSpace};
use crate::object::Alignment;
use crate::tagged::{Address, WORD_SIZE};

/// A worker-private slice of to-space.
#[derive(Debug, Clone, Copy)]
pub struct LocalAllocationBuffer {
    top: Address,
    limit: Address,
}

impl LocalAllocationBuffer {
    /// A buffer with no space. The first allocation triggers a refill.
    pub const fn empty() -> Self {
        Self {
            top: Address::NULL,
            limit: Address::NULL,
        }
    }

    /// Remaining bytes.
    #[inline]
    pub fn available(&self) -> usize {
        self.limit.distance_from(self.top)
    }

    /// Current allocation pointer.
    #[inline]
    pub fn top(&self) -> Address {
        self.top
    }

    /// Bump-allocate inside the buffer.
    #[inline]
    pub fn allocate(&mut self, heap: &Heap, size: usize, alignment: Alignment) -> Option<Address> {
        let fill = match alignment {
            Alignment::Double if !self.top.is_double_aligned() => WORD_SIZE,
            _ => 0,
        };
        if fill + size > self.available() {
            return None;
        }
        if fill > 0 {
            heap.create_filler(self.top, fill);
        }
        let object = self.top.offset(fill);
        self.top = object.offset(size);
        Some(object)
    }

    /// Close the current buffer and claim a fresh one of `lab_size` bytes.
    ///
    /// Returns `false` when to-space cannot supply a full buffer.
    pub fn refill(&mut self, heap: &Heap, to_space: &SemiSpace, lab_size: usize) -> bool {
        self.close(heap);
        match to_space.allocate(lab_size, Alignment::Word) {
            Some(raw) => {
                self.top = raw.address;
                self.limit = raw.address.offset(lab_size);
                true
            }
            None => false,
        }
    }

    /// Fill the unused tail and drop the buffer.
    pub fn close(&mut self, heap: &Heap) {
        if self.available() > 0 {
            heap.create_filler(self.top, self.available());
        }
        *self = Self::empty();
    }

    /// Check that a copy of `size` bytes at `target` ends at the allocation
    /// pointer, allowing one trailing filler word.
    #[inline]
    pub fn check_copy_target(&self, target: Address, size: usize) {
        let end = target.offset(size);
        if end != self.top && end.offset(WORD_SIZE) != self.top {
            fatal(FatalHeapError::MisplacedCopy {
                target,
                size,
                top: self.top,
            });
        }
    }
}

impl Default for LocalAllocationBuffer {
    fn default() -> Self {
        Self::empty()
    }
}
