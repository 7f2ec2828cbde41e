//! Tagged word representation.
//!
//! Every slot in the heap holds one machine word. The low bit of a word
//! distinguishes the two kinds of values a slot can hold:
//!
//! ```text
//! ┌──────────────────────────────────────────────┬───┐
//! │ signed integer payload                       │ 0 │  small integer (Smi)
//! ├──────────────────────────────────────────────┼───┤
//! │ object address (word aligned)                │ 1 │  heap reference
//! └──────────────────────────────────────────────┴───┘
//! ```
//!
//! The first word of every object is its *map word*. It uses the same
//! encoding: a Smi-tagged shape id while the object is in place, or a
//! heap-tagged address once the object has been evacuated.

use crate::object::ShapeId;

/// Size of a heap word in bytes.
pub const WORD_SIZE: usize = 8;

/// Size of a double-aligned allocation unit in bytes.
pub const DOUBLE_SIZE: usize = 2 * WORD_SIZE;

/// Tag bit marking a heap reference.
const HEAP_OBJECT_TAG: usize = 1;

/// Mask for the tag bits.
const TAG_MASK: usize = 1;

// =============================================================================
// Address
// =============================================================================

/// A byte address in the simulated heap address space.
///
/// Address zero is never handed out by any space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(usize);

impl Address {
    /// The null address.
    pub const NULL: Address = Address(0);

    /// Create an address from a raw byte value.
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Address(raw)
    }

    /// Raw byte value.
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Check for the null address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one.
    #[inline]
    pub const fn offset(self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }

    /// Distance in bytes from `base` to this address.
    #[inline]
    pub const fn distance_from(self, base: Address) -> usize {
        self.0 - base.0
    }

    /// Check word alignment.
    #[inline]
    pub const fn is_word_aligned(self) -> bool {
        self.0 % WORD_SIZE == 0
    }

    /// Check double-word alignment.
    #[inline]
    pub const fn is_double_aligned(self) -> bool {
        self.0 % DOUBLE_SIZE == 0
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// =============================================================================
// Tagged
// =============================================================================

/// A tagged heap word: either a small integer or a heap reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tagged(usize);

impl Tagged {
    /// The Smi zero. Freshly allocated bodies are filled with it.
    pub const ZERO: Tagged = Tagged(0);

    /// Reinterpret a raw word.
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Tagged(raw)
    }

    /// Raw word value.
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Encode a small integer. The top bit of the payload is lost.
    #[inline]
    pub const fn from_smi(value: i64) -> Self {
        Tagged((value << 1) as usize)
    }

    /// Encode a reference to the object at `address`.
    #[inline]
    pub fn from_address(address: Address) -> Self {
        debug_assert!(address.is_word_aligned(), "unaligned object address {address}");
        Tagged(address.raw() | HEAP_OBJECT_TAG)
    }

    /// Check for a small integer.
    #[inline]
    pub const fn is_smi(self) -> bool {
        self.0 & TAG_MASK == 0
    }

    /// Check for a heap reference.
    #[inline]
    pub const fn is_heap_object(self) -> bool {
        self.0 & TAG_MASK == HEAP_OBJECT_TAG
    }

    /// Decode a small integer.
    #[inline]
    pub const fn as_smi(self) -> Option<i64> {
        if self.is_smi() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    /// Decode a heap reference.
    #[inline]
    pub const fn as_address(self) -> Option<Address> {
        if self.is_heap_object() {
            Some(Address(self.0 & !TAG_MASK))
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Tagged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.as_smi(), self.as_address()) {
            (Some(v), _) => write!(f, "Smi({v})"),
            (_, Some(a)) => write!(f, "Ref({a})"),
            _ => unreachable!(),
        }
    }
}

impl From<Address> for Tagged {
    fn from(address: Address) -> Self {
        Tagged::from_address(address)
    }
}

// =============================================================================
// Map Word
// =============================================================================

/// Decoded first word of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapWord {
    /// The object is in place and described by this shape.
    Shape(ShapeId),
    /// The object has been evacuated to this address.
    Forwarded(Address),
}

impl MapWord {
    /// Decode a raw header word.
    #[inline]
    pub fn decode(raw: usize) -> MapWord {
        let tagged = Tagged::from_raw(raw);
        match tagged.as_address() {
            Some(target) => MapWord::Forwarded(target),
            None => MapWord::Shape(ShapeId::new((raw >> 1) as u32)),
        }
    }

    /// Encode into a raw header word.
    #[inline]
    pub fn encode(self) -> usize {
        match self {
            MapWord::Shape(id) => (id.index() as usize) << 1,
            MapWord::Forwarded(target) => Tagged::from_address(target).raw(),
        }
    }

    /// Check whether this is a forwarding address.
    #[inline]
    pub fn is_forwarding_address(self) -> bool {
        matches!(self, MapWord::Forwarded(_))
    }
}

/// Round `size` up to a multiple of `align` (a power of two).
#[inline]
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}
