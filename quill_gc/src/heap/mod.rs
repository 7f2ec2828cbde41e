//! Heap memory management.
//!
//! The heap is divided into three spaces, laid out back to back in one
//! simulated address range:
//!
//! ```text
//! HEAP_BASE
//! ├── semispace 0 ─┐
//! ├── semispace 1 ─┴─ young generation (from-space / to-space, swapped each cycle)
//! └── old space ───── tenured generation, page-based bump allocation
//! ```
//!
//! Objects are addressed by [`Address`]. Slots are accessed through
//! [`Heap::read_field`] and [`Heap::write_field`]; the latter runs the
//! generational write barrier.

mod old_space;
mod region;
mod semispace;

pub use old_space::OldSpace;
pub use region::Region;
pub use semispace::{RawAllocation, SemiSpace};

use crate::barrier::RememberedSet;
use crate::config::{ConfigError, GcConfig};
use crate::error::{fatal, AllocationError, FatalHeapError, ShapeError};
use crate::object::{
    Alignment, Shape, ShapeId, ShapeRegistry, FREE_SPACE_HEADER_SIZE, FREE_SPACE_LENGTH_OFFSET,
};
use crate::stats::GcStats;
use crate::tagged::{Address, MapWord, Tagged, WORD_SIZE};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// First address handed out by the heap.
pub const HEAP_BASE: usize = 0x10_0000;

/// Generation an object is allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Young generation (to-space).
    Young,
    /// Old generation.
    Old,
}

/// An iterable space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// The semispace being evacuated during a scavenge.
    From,
    /// The semispace receiving survivors and new allocations.
    To,
    /// The old generation.
    Old,
}

/// The managed heap.
pub struct Heap {
    /// Configuration parameters.
    config: GcConfig,

    /// Layout descriptors. Read-only during a scavenge.
    shapes: ShapeRegistry,

    /// The two young semispaces.
    semispaces: [SemiSpace; 2],

    /// Index of the current to-space in `semispaces`.
    to_index: usize,

    /// Old generation.
    old_space: OldSpace,

    /// Old→young slots recorded by the write barrier.
    remembered_set: RememberedSet,

    /// Value marking the empty half of a shortcut candidate.
    empty_sentinel: Option<Tagged>,

    /// Whether incremental marking is active.
    marking: bool,

    /// Slots recorded for the marker while marking is active.
    recorded_slots: Mutex<Vec<Address>>,

    /// GC statistics.
    stats: GcStats,
}

impl Heap {
    /// Create a new heap with the given configuration.
    pub fn new(config: GcConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let semi = config.semispace_size;
        let base = Address::new(HEAP_BASE);
        let semispaces = [
            SemiSpace::new(base, semi),
            SemiSpace::new(base.offset(semi), semi),
        ];
        let old_space = OldSpace::new(base.offset(2 * semi), config.old_space_size, config.page_size);

        log::debug!(
            "heap: semispaces {}KB x2, old space {}KB in {}KB pages",
            semi / 1024,
            config.old_space_size / 1024,
            config.page_size / 1024
        );

        Ok(Self {
            config,
            shapes: ShapeRegistry::new(),
            semispaces,
            to_index: 0,
            old_space,
            remembered_set: RememberedSet::new(),
            empty_sentinel: None,
            marking: false,
            recorded_slots: Mutex::new(Vec::new()),
            stats: GcStats::new(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Get GC statistics.
    #[inline]
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Get the shape registry.
    #[inline]
    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    /// Register a new shape.
    pub fn register_shape(&mut self, shape: Shape) -> Result<ShapeId, ShapeError> {
        self.shapes.register(shape)
    }

    /// Get the remembered set.
    #[inline]
    pub fn remembered_set(&self) -> &RememberedSet {
        &self.remembered_set
    }

    /// Current to-space.
    #[inline]
    pub fn to_space(&self) -> &SemiSpace {
        &self.semispaces[self.to_index]
    }

    /// Current from-space.
    #[inline]
    pub fn from_space(&self) -> &SemiSpace {
        &self.semispaces[self.to_index ^ 1]
    }

    /// Old generation.
    #[inline]
    pub fn old_space(&self) -> &OldSpace {
        &self.old_space
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Check if an address is in from-space.
    #[inline]
    pub fn is_in_from_space(&self, addr: Address) -> bool {
        self.from_space().contains(addr)
    }

    /// Check if an address is in to-space.
    #[inline]
    pub fn is_in_to_space(&self, addr: Address) -> bool {
        self.to_space().contains(addr)
    }

    /// Check if an address is in the young generation.
    #[inline]
    pub fn in_young(&self, addr: Address) -> bool {
        self.semispaces[0].contains(addr) || self.semispaces[1].contains(addr)
    }

    /// Check if an address is in the old generation.
    #[inline]
    pub fn in_old(&self, addr: Address) -> bool {
        self.old_space.contains(addr)
    }

    /// Check if an address is anywhere in the heap.
    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        self.in_young(addr) || self.in_old(addr)
    }

    /// Check if a tagged value references the young generation.
    #[inline]
    pub fn points_young(&self, value: Tagged) -> bool {
        value.as_address().is_some_and(|a| self.in_young(a))
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate raw, zeroed memory in to-space.
    ///
    /// Fails when to-space is full. The caller should scavenge and retry.
    pub fn allocate_young(
        &self,
        size: usize,
        alignment: Alignment,
    ) -> Result<Address, AllocationError> {
        let raw = self
            .to_space()
            .allocate(size, alignment)
            .ok_or(AllocationError::YoungSpaceExhausted { requested: size })?;
        self.finish_raw(raw);
        Ok(raw.address)
    }

    /// Allocate raw, zeroed memory in old space.
    pub fn allocate_old(
        &self,
        size: usize,
        alignment: Alignment,
    ) -> Result<Address, AllocationError> {
        let raw = self
            .old_space
            .allocate(size, alignment)
            .ok_or(AllocationError::OldSpaceExhausted { requested: size })?;
        self.finish_raw(raw);
        Ok(raw.address)
    }

    /// Allocate and initialize an object of the given shape.
    ///
    /// `length` is ignored for fixed-size shapes. The body is filled with
    /// Smi zero.
    pub fn allocate(
        &self,
        shape_id: ShapeId,
        length: usize,
        generation: Generation,
    ) -> Result<Address, AllocationError> {
        let shape = self
            .shapes
            .get(shape_id)
            .ok_or(AllocationError::UnknownShape(shape_id.index()))?;
        let length = i64::try_from(length).map_err(|_| AllocationError::InvalidLength(-1))?;
        let size = shape
            .size_for_length(length)
            .ok_or(AllocationError::InvalidLength(length))?;

        let address = match generation {
            Generation::Young => self.allocate_young(size, shape.alignment)?,
            Generation::Old => self.allocate_old(size, shape.alignment)?,
        };

        self.header(address)
            .store(MapWord::Shape(shape_id).encode(), Ordering::Release);
        if let Some(offset) = shape.length_offset() {
            self.word(address.offset(offset))
                .store(Tagged::from_smi(length).raw(), Ordering::Relaxed);
        }
        self.stats.record_allocation(size);
        Ok(address)
    }

    fn finish_raw(&self, raw: RawAllocation) {
        if let Some(filler) = raw.filler {
            self.create_filler(filler, WORD_SIZE);
        }
    }

    // =========================================================================
    // Field Access
    // =========================================================================

    /// The word at `addr`, if it is a word-aligned heap address.
    #[inline]
    pub fn slot(&self, addr: Address) -> Option<&AtomicUsize> {
        self.region_of(addr).and_then(|r| r.word(addr))
    }

    /// Read a tagged field.
    #[inline]
    pub fn read_field(&self, object: Address, offset: usize) -> Tagged {
        Tagged::from_raw(self.word(object.offset(offset)).load(Ordering::Acquire))
    }

    /// Write a tagged field, running the generational write barrier.
    ///
    /// Storing a young reference into an old object records the slot in
    /// the remembered set.
    #[inline]
    pub fn write_field(&self, object: Address, offset: usize, value: Tagged) {
        let slot = object.offset(offset);
        self.word(slot).store(value.raw(), Ordering::Release);
        if self.in_old(object) && self.points_young(value) {
            self.remembered_set.insert(slot);
        }
    }

    /// Read a raw data word.
    #[inline]
    pub fn read_word(&self, addr: Address) -> usize {
        self.word(addr).load(Ordering::Relaxed)
    }

    /// Write a raw data word. No barrier.
    #[inline]
    pub fn write_word(&self, addr: Address, value: usize) {
        self.word(addr).store(value, Ordering::Relaxed);
    }

    /// The header word of an object.
    #[inline]
    pub(crate) fn header(&self, object: Address) -> &AtomicUsize {
        self.word(object)
    }

    /// Decode an object's map word.
    #[inline]
    pub fn map_word(&self, object: Address) -> MapWord {
        MapWord::decode(self.header(object).load(Ordering::Acquire))
    }

    fn word(&self, addr: Address) -> &AtomicUsize {
        match self.slot(addr) {
            Some(word) => word,
            None => fatal(FatalHeapError::CorruptHeader {
                object: addr,
                raw: 0,
            }),
        }
    }

    fn region_of(&self, addr: Address) -> Option<&Region> {
        if self.old_space.contains(addr) {
            Some(self.old_space.region())
        } else {
            self.semispaces
                .iter()
                .find(|s| s.contains(addr))
                .map(SemiSpace::region)
        }
    }

    // =========================================================================
    // Object Layout
    // =========================================================================

    /// Resolve a shape id to its descriptor.
    pub fn shape(&self, object: Address, id: ShapeId) -> Result<&Shape, FatalHeapError> {
        self.shapes.get(id).ok_or(FatalHeapError::UnknownShape {
            object,
            shape: id.index(),
        })
    }

    /// The shape of an object that has not been forwarded.
    pub fn shape_of(&self, object: Address) -> Result<(ShapeId, &Shape), FatalHeapError> {
        match self.map_word(object) {
            MapWord::Shape(id) => Ok((id, self.shape(object, id)?)),
            MapWord::Forwarded(_) => Err(FatalHeapError::CorruptHeader {
                object,
                raw: self.header(object).load(Ordering::Relaxed),
            }),
        }
    }

    /// Size of an object in bytes.
    pub fn size_of(&self, object: Address) -> Result<usize, FatalHeapError> {
        let (_, shape) = self.shape_of(object)?;
        self.size_with_shape(object, shape)
    }

    /// Size of an object whose shape is already known.
    pub fn size_with_shape(&self, object: Address, shape: &Shape) -> Result<usize, FatalHeapError> {
        let length = match shape.length_offset() {
            Some(offset) => {
                let field = self.read_field(object, offset);
                field.as_smi().ok_or(FatalHeapError::CorruptHeader {
                    object,
                    raw: field.raw(),
                })?
            }
            None => 0,
        };
        shape
            .size_for_length(length)
            .ok_or(FatalHeapError::SizeOverflow { object, length })
    }

    /// Walk every object in a space in address order.
    pub fn for_each_object<F>(&self, space: Space, mut f: F) -> Result<(), FatalHeapError>
    where
        F: FnMut(Address, ShapeId, usize),
    {
        let (mut cursor, top) = match space {
            Space::From => (self.from_space().region().start(), self.from_space().top()),
            Space::To => (self.to_space().region().start(), self.to_space().top()),
            Space::Old => (self.old_space.region().start(), self.old_space.top()),
        };
        while cursor < top {
            let (id, shape) = self.shape_of(cursor)?;
            let size = self.size_with_shape(cursor, shape)?;
            f(cursor, id, size);
            cursor = cursor.offset(size);
        }
        Ok(())
    }

    /// Overwrite `size` bytes at `addr` with a filler object.
    pub(crate) fn create_filler(&self, addr: Address, size: usize) {
        match self.region_of(addr) {
            Some(region) => write_filler(region, addr, size),
            None => fatal(FatalHeapError::CorruptHeader { object: addr, raw: 0 }),
        }
    }

    /// Copy every word after the header from `src` to `dst`.
    pub(crate) fn copy_body(&self, src: Address, dst: Address, size: usize) {
        let words = size / WORD_SIZE;
        let from = self.region_of(src).and_then(|r| r.words(src, size));
        let to = self.region_of(dst).and_then(|r| r.words(dst, size));
        match (from, to) {
            (Some(from), Some(to)) => {
                for i in 1..words {
                    to[i].store(from[i].load(Ordering::Relaxed), Ordering::Relaxed);
                }
            }
            _ => fatal(FatalHeapError::MisplacedCopy {
                target: dst,
                size,
                top: src,
            }),
        }
    }

    // =========================================================================
    // Collector Hooks
    // =========================================================================

    /// Set the value that marks the empty half of a shortcut candidate.
    pub fn set_empty_sentinel(&mut self, sentinel: Tagged) {
        self.empty_sentinel = Some(sentinel);
    }

    /// The empty sentinel, if one is configured.
    #[inline]
    pub fn empty_sentinel(&self) -> Option<Tagged> {
        self.empty_sentinel
    }

    /// Turn incremental marking on or off.
    pub fn set_marking(&mut self, marking: bool) {
        self.marking = marking;
    }

    /// Whether incremental marking is active.
    #[inline]
    pub fn is_marking(&self) -> bool {
        self.marking
    }

    /// Record a slot the marker must revisit.
    pub(crate) fn record_slot(&self, slot: Address) {
        self.recorded_slots.lock().push(slot);
    }

    /// Take the slots recorded for the marker.
    pub fn take_recorded_slots(&self) -> Vec<Address> {
        std::mem::take(&mut *self.recorded_slots.lock())
    }

    /// Swap semispaces at the start of a scavenge.
    pub(crate) fn flip(&mut self) {
        self.to_index ^= 1;
        debug_assert_eq!(self.to_space().allocated(), 0, "to-space not empty at flip");
    }

    /// Close a scavenge: survivors age, from-space is wiped.
    pub(crate) fn finish_scavenge(&mut self) {
        let from_index = self.to_index ^ 1;
        self.semispaces[self.to_index].set_age_mark_to_top();
        self.semispaces[from_index].reset();
    }
}

/// Write a filler object covering `addr..addr + size`.
pub(crate) fn write_filler(region: &Region, addr: Address, size: usize) {
    let store = |at: Address, value: usize| {
        if let Some(word) = region.word(at) {
            word.store(value, Ordering::Release);
        }
    };
    match size {
        0 => {}
        WORD_SIZE => store(addr, MapWord::Shape(ShapeId::ONE_WORD_FILLER).encode()),
        _ => {
            debug_assert!(size >= FREE_SPACE_HEADER_SIZE);
            let length = (size - FREE_SPACE_HEADER_SIZE) as i64;
            store(
                addr.offset(FREE_SPACE_LENGTH_OFFSET),
                Tagged::from_smi(length).raw(),
            );
            store(addr, MapWord::Shape(ShapeId::FREE_SPACE).encode());
        }
    }
}
