//! Error types for the heap and the scavenger.
//!
//! Two classes of failure exist:
//!
//! - **Recoverable**: shape registration and mutator allocation. These are
//!   returned as `Result` so the embedder can react (reject the shape, run a
//!   scavenge and retry).
//! - **Fatal**: heap-invariant violations discovered while objects are being
//!   moved. Continuing after one of these would hand a corrupt object graph
//!   back to the mutator, so they are routed through [`fatal`] and never
//!   returned.

use crate::tagged::Address;

// =============================================================================
// Shape Errors
// =============================================================================

/// A shape descriptor rejected at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Fixed instance size is smaller than the header word.
    SizeTooSmall(usize),
    /// Instance or header size is not a multiple of the word size.
    MisalignedSize(usize),
    /// Variable-size element width is zero.
    ZeroElementSize,
    /// Length field does not lie inside the fixed header.
    LengthFieldOutsideHeader {
        /// Offset of the length field.
        offset: usize,
        /// Size of the fixed header.
        header_size: usize,
    },
    /// A body region overlaps the header word, is inverted, or runs past
    /// the instance.
    RegionOutOfBounds {
        /// Region start offset.
        start: usize,
        /// Region end offset, if fixed.
        end: Option<usize>,
    },
    /// A pointer region does not start and end on word boundaries.
    MisalignedPointerRegion {
        /// Region start offset.
        start: usize,
    },
    /// A kind-specific field does not lie in a pointer region.
    KindFieldNotPointer(usize),
    /// The registry has no room for more shape ids.
    TooManyShapes,
}

impl std::fmt::Display for ShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeError::SizeTooSmall(size) => {
                write!(f, "instance size {size} cannot hold a header word")
            }
            ShapeError::MisalignedSize(size) => {
                write!(f, "size {size} is not word aligned")
            }
            ShapeError::ZeroElementSize => write!(f, "element size must be non-zero"),
            ShapeError::LengthFieldOutsideHeader {
                offset,
                header_size,
            } => write!(
                f,
                "length field at offset {offset} lies outside the {header_size}-byte header"
            ),
            ShapeError::RegionOutOfBounds { start, end } => match end {
                Some(end) => write!(f, "body region {start}..{end} is out of bounds"),
                None => write!(f, "body region {start}..end is out of bounds"),
            },
            ShapeError::MisalignedPointerRegion { start } => {
                write!(f, "pointer region at offset {start} is not word aligned")
            }
            ShapeError::KindFieldNotPointer(offset) => {
                write!(f, "field at offset {offset} is not in a pointer region")
            }
            ShapeError::TooManyShapes => write!(f, "shape registry is full"),
        }
    }
}

impl std::error::Error for ShapeError {}

// =============================================================================
// Allocation Errors
// =============================================================================

/// Mutator-side allocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationError {
    /// The young generation has no room. Run a scavenge and retry.
    YoungSpaceExhausted {
        /// Requested size in bytes.
        requested: usize,
    },
    /// The old generation has no room.
    OldSpaceExhausted {
        /// Requested size in bytes.
        requested: usize,
    },
    /// The shape id is not registered.
    UnknownShape(u32),
    /// The computed instance size overflowed or the length was negative.
    InvalidLength(i64),
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationError::YoungSpaceExhausted { requested } => {
                write!(f, "young space exhausted allocating {requested} bytes")
            }
            AllocationError::OldSpaceExhausted { requested } => {
                write!(f, "old space exhausted allocating {requested} bytes")
            }
            AllocationError::UnknownShape(id) => write!(f, "unknown shape id {id}"),
            AllocationError::InvalidLength(len) => write!(f, "invalid object length {len}"),
        }
    }
}

impl std::error::Error for AllocationError {}

// =============================================================================
// Fatal Heap Errors
// =============================================================================

/// Heap-invariant violation. Never returned; see [`fatal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalHeapError {
    /// Neither a semispace copy nor a promotion could be allocated.
    OutOfMemory {
        /// Object being evacuated.
        object: Address,
        /// Its size in bytes.
        size: usize,
    },
    /// An object header decodes to nothing meaningful.
    CorruptHeader {
        /// Object address.
        object: Address,
        /// Raw header word.
        raw: usize,
    },
    /// The header names a shape the registry does not know.
    UnknownShape {
        /// Object address.
        object: Address,
        /// Shape index.
        shape: u32,
    },
    /// A variable-size object's length field yields no valid size.
    SizeOverflow {
        /// Object address.
        object: Address,
        /// Raw length value.
        length: i64,
    },
    /// A semispace copy did not land at the allocation pointer.
    MisplacedCopy {
        /// Copy target.
        target: Address,
        /// Copy size.
        size: usize,
        /// Allocation pointer at the time of the check.
        top: Address,
    },
    /// Post-scavenge verification failed.
    Verification(String),
}

impl std::fmt::Display for FatalHeapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalHeapError::OutOfMemory { object, size } => write!(
                f,
                "out of memory evacuating {size}-byte object at {object}"
            ),
            FatalHeapError::CorruptHeader { object, raw } => {
                write!(f, "corrupt header {raw:#x} at {object}")
            }
            FatalHeapError::UnknownShape { object, shape } => {
                write!(f, "unknown shape {shape} at {object}")
            }
            FatalHeapError::SizeOverflow { object, length } => {
                write!(f, "object at {object} has invalid length {length}")
            }
            FatalHeapError::MisplacedCopy { target, size, top } => write!(
                f,
                "copy of {size} bytes to {target} does not end at allocation top {top}"
            ),
            FatalHeapError::Verification(msg) => write!(f, "heap verification failed: {msg}"),
        }
    }
}

impl std::error::Error for FatalHeapError {}

/// Terminate on a heap-invariant violation.
///
/// Logs the error and panics. Release builds abort on panic, so no GC code
/// unwinds past a broken heap.
#[cold]
#[inline(never)]
pub fn fatal(error: FatalHeapError) -> ! {
    log::error!("fatal heap error: {error}");
    panic!("fatal heap error: {error}");
}
