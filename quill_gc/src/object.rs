//! Object model: shapes, sizes, and body classification.
//!
//! Every heap object starts with a one-word header holding its [`ShapeId`].
//! The shape describes the rest of the object:
//!
//! - **Size**: fixed, or computed from a Smi length field in the header.
//! - **Body regions**: byte ranges classified as opaque data or tagged
//!   pointers. The scavenger bulk-copies every object and only rescans the
//!   pointer regions.
//! - **Kind**: selects custom evacuation logic for the few object kinds that
//!   need more than a generic copy.
//!
//! Shapes are validated when they enter the [`ShapeRegistry`], so a
//! malformed descriptor can never be seen by the collector.

use crate::error::ShapeError;
use crate::tagged::{align_up, WORD_SIZE};
use smallvec::SmallVec;
use std::ops::Range;

// =============================================================================
// Shape Identity
// =============================================================================

/// Index of a shape in the [`ShapeRegistry`].
///
/// Id zero is never assigned, so an all-zero header word is detectably
/// corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(u32);

impl ShapeId {
    /// One-word filler used for alignment padding.
    pub const ONE_WORD_FILLER: ShapeId = ShapeId(1);
    /// Variable-size filler covering abandoned memory.
    pub const FREE_SPACE: ShapeId = ShapeId(2);

    /// Create a shape id from its raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        ShapeId(index)
    }

    /// Raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Check whether this is one of the filler shapes.
    #[inline]
    pub fn is_filler(self) -> bool {
        self == Self::ONE_WORD_FILLER || self == Self::FREE_SPACE
    }
}

/// Offset of the length field in a `FREE_SPACE` filler.
pub const FREE_SPACE_LENGTH_OFFSET: usize = WORD_SIZE;

/// Minimum size of a `FREE_SPACE` filler.
pub const FREE_SPACE_HEADER_SIZE: usize = 2 * WORD_SIZE;

// =============================================================================
// Layout Descriptors
// =============================================================================

/// Required start alignment of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    /// Word aligned.
    #[default]
    Word,
    /// Aligned to two words.
    Double,
}

impl Alignment {
    /// Maximum filler bytes needed to satisfy this alignment.
    #[inline]
    pub const fn max_fill(self) -> usize {
        match self {
            Alignment::Word => 0,
            Alignment::Double => WORD_SIZE,
        }
    }
}

/// How an object's size is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    /// Every instance has this many bytes, header included.
    Fixed(usize),
    /// Size is `header_size + length * element_size`, rounded up to a word.
    /// The length is a Smi stored at `length_offset`.
    Variable {
        /// Bytes before the first element, header included.
        header_size: usize,
        /// Offset of the Smi length field.
        length_offset: usize,
        /// Bytes per element.
        element_size: usize,
    },
}

/// What a body region holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyContents {
    /// Opaque bytes. Never scanned.
    Data,
    /// Tagged words. Scanned for young references.
    Pointer,
}

/// End of a body region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionEnd {
    /// A fixed byte offset.
    At(usize),
    /// The end of the instance, whatever its size.
    ObjectEnd,
}

/// A classified byte range of an object body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyRegion {
    /// First byte offset.
    pub start: usize,
    /// End offset.
    pub end: RegionEnd,
    /// Classification.
    pub contents: BodyContents,
}

impl BodyRegion {
    /// Pointer region `start..end`.
    pub const fn pointers(start: usize, end: RegionEnd) -> Self {
        Self {
            start,
            end,
            contents: BodyContents::Pointer,
        }
    }

    /// Data region `start..end`.
    pub const fn data(start: usize, end: RegionEnd) -> Self {
        Self {
            start,
            end,
            contents: BodyContents::Data,
        }
    }

    /// Resolve against a concrete instance size.
    #[inline]
    pub fn resolve(&self, size: usize) -> Range<usize> {
        let end = match self.end {
            RegionEnd::At(end) => end.min(size),
            RegionEnd::ObjectEnd => size,
        };
        self.start.min(end)..end
    }
}

/// Object kinds with custom evacuation behaviour.
///
/// Field values are byte offsets into the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectKind {
    /// Plain copy.
    #[default]
    Generic,
    /// A pair that collapses to `first` when `second` holds the heap's empty
    /// sentinel and marking is off.
    ShortcutCandidate {
        /// Offset of the surviving half.
        first: usize,
        /// Offset of the half checked against the sentinel.
        second: usize,
    },
    /// An indirection that always resolves to `target`, which lives in old
    /// space, when marking is off.
    ThinReference {
        /// Offset of the target reference.
        target: usize,
    },
    /// Holds a code-entry slot that marking must revisit.
    Function {
        /// Offset of the code-entry reference.
        code_entry: usize,
    },
}

// =============================================================================
// Shape
// =============================================================================

/// Immutable layout descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    /// Human-readable name for diagnostics.
    pub name: String,
    /// Evacuation kind.
    pub kind: ObjectKind,
    /// Size rule.
    pub size: SizeSpec,
    /// Body classification. Bytes not covered are treated as data.
    pub regions: SmallVec<[BodyRegion; 4]>,
    /// Start alignment.
    pub alignment: Alignment,
}

impl Shape {
    /// A fixed-size shape whose body is entirely tagged pointers.
    pub fn fixed(name: impl Into<String>, size: usize) -> Self {
        let mut regions = SmallVec::new();
        if size > WORD_SIZE {
            regions.push(BodyRegion::pointers(WORD_SIZE, RegionEnd::ObjectEnd));
        }
        Self {
            name: name.into(),
            kind: ObjectKind::Generic,
            size: SizeSpec::Fixed(size),
            regions,
            alignment: Alignment::Word,
        }
    }

    /// A fixed-size shape with explicit regions.
    pub fn with_regions(
        name: impl Into<String>,
        size: usize,
        regions: impl IntoIterator<Item = BodyRegion>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ObjectKind::Generic,
            size: SizeSpec::Fixed(size),
            regions: regions.into_iter().collect(),
            alignment: Alignment::Word,
        }
    }

    /// A variable-length array of tagged pointers with a length word after
    /// the header.
    pub fn pointer_array(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ObjectKind::Generic,
            size: SizeSpec::Variable {
                header_size: 2 * WORD_SIZE,
                length_offset: WORD_SIZE,
                element_size: WORD_SIZE,
            },
            regions: SmallVec::from_slice(&[BodyRegion::pointers(
                2 * WORD_SIZE,
                RegionEnd::ObjectEnd,
            )]),
            alignment: Alignment::Word,
        }
    }

    /// A variable-length byte array. No pointers.
    pub fn byte_array(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ObjectKind::Generic,
            size: SizeSpec::Variable {
                header_size: 2 * WORD_SIZE,
                length_offset: WORD_SIZE,
                element_size: 1,
            },
            regions: SmallVec::from_slice(&[BodyRegion::data(
                2 * WORD_SIZE,
                RegionEnd::ObjectEnd,
            )]),
            alignment: Alignment::Word,
        }
    }

    /// Set the evacuation kind.
    pub fn kind(mut self, kind: ObjectKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the start alignment.
    pub fn aligned(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Instance size for a given length. `None` on a negative length or
    /// overflow. Fixed shapes ignore the length.
    pub fn size_for_length(&self, length: i64) -> Option<usize> {
        match self.size {
            SizeSpec::Fixed(size) => Some(size),
            SizeSpec::Variable {
                header_size,
                element_size,
                ..
            } => {
                let length = usize::try_from(length).ok()?;
                let body = length.checked_mul(element_size)?;
                let raw = header_size.checked_add(body)?;
                raw.checked_add(WORD_SIZE - 1)?;
                Some(align_up(raw, WORD_SIZE))
            }
        }
    }

    /// Offset of the length field, if the shape is variable-size.
    #[inline]
    pub fn length_offset(&self) -> Option<usize> {
        match self.size {
            SizeSpec::Fixed(_) => None,
            SizeSpec::Variable { length_offset, .. } => Some(length_offset),
        }
    }

    /// Classify the body of an instance of `size` bytes.
    ///
    /// Returns the resolved, non-empty regions in declaration order.
    pub fn classify_body(&self, size: usize) -> SmallVec<[(Range<usize>, BodyContents); 4]> {
        self.regions
            .iter()
            .map(|r| (r.resolve(size), r.contents))
            .filter(|(range, _)| !range.is_empty())
            .collect()
    }

    /// Whether any region holds pointers.
    #[inline]
    pub fn contents(&self) -> BodyContents {
        if self
            .regions
            .iter()
            .any(|r| r.contents == BodyContents::Pointer)
        {
            BodyContents::Pointer
        } else {
            BodyContents::Data
        }
    }

    /// Byte offsets of every tagged slot in an instance of `size` bytes.
    pub fn pointer_slots(&self, size: usize) -> impl Iterator<Item = usize> + '_ {
        self.regions
            .iter()
            .filter(|r| r.contents == BodyContents::Pointer)
            .flat_map(move |r| r.resolve(size).step_by(WORD_SIZE))
    }

    fn validate(&self) -> Result<(), ShapeError> {
        let limit = match self.size {
            SizeSpec::Fixed(size) => {
                if size < WORD_SIZE {
                    return Err(ShapeError::SizeTooSmall(size));
                }
                if size % WORD_SIZE != 0 {
                    return Err(ShapeError::MisalignedSize(size));
                }
                Some(size)
            }
            SizeSpec::Variable {
                header_size,
                length_offset,
                element_size,
            } => {
                if header_size < WORD_SIZE {
                    return Err(ShapeError::SizeTooSmall(header_size));
                }
                if header_size % WORD_SIZE != 0 {
                    return Err(ShapeError::MisalignedSize(header_size));
                }
                if element_size == 0 {
                    return Err(ShapeError::ZeroElementSize);
                }
                if length_offset < WORD_SIZE
                    || length_offset % WORD_SIZE != 0
                    || length_offset + WORD_SIZE > header_size
                {
                    return Err(ShapeError::LengthFieldOutsideHeader {
                        offset: length_offset,
                        header_size,
                    });
                }
                None
            }
        };

        for region in &self.regions {
            let end = match region.end {
                RegionEnd::At(end) => Some(end),
                RegionEnd::ObjectEnd => None,
            };
            let out_of_bounds = region.start < WORD_SIZE
                || end.is_some_and(|e| e < region.start)
                || matches!((end, limit), (Some(e), Some(l)) if e > l)
                || matches!(limit, Some(l) if region.start > l);
            if out_of_bounds {
                return Err(ShapeError::RegionOutOfBounds {
                    start: region.start,
                    end,
                });
            }
            if region.contents == BodyContents::Pointer
                && (region.start % WORD_SIZE != 0 || end.is_some_and(|e| e % WORD_SIZE != 0))
            {
                return Err(ShapeError::MisalignedPointerRegion {
                    start: region.start,
                });
            }
        }

        let kind_fields: SmallVec<[usize; 2]> = match self.kind {
            ObjectKind::Generic => SmallVec::new(),
            ObjectKind::ShortcutCandidate { first, second } => {
                SmallVec::from_slice(&[first, second])
            }
            ObjectKind::ThinReference { target } => SmallVec::from_slice(&[target]),
            ObjectKind::Function { code_entry } => SmallVec::from_slice(&[code_entry]),
        };
        for offset in kind_fields {
            if !self.is_fixed_pointer_field(offset) {
                return Err(ShapeError::KindFieldNotPointer(offset));
            }
        }
        Ok(())
    }

    /// A kind field must be a pointer slot present in every instance.
    fn is_fixed_pointer_field(&self, offset: usize) -> bool {
        let min_size = match self.size {
            SizeSpec::Fixed(size) => size,
            SizeSpec::Variable { header_size, .. } => header_size,
        };
        offset % WORD_SIZE == 0
            && offset + WORD_SIZE <= min_size
            && self.regions.iter().any(|r| {
                r.contents == BodyContents::Pointer && r.resolve(min_size).contains(&offset)
            })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry of shapes, indexed by [`ShapeId`].
///
/// The two filler shapes are always present. Shapes are only added while
/// the heap is exclusively borrowed, so the registry is read-only during a
/// scavenge.
#[derive(Debug, Clone)]
pub struct ShapeRegistry {
    shapes: Vec<Shape>,
}

impl ShapeRegistry {
    /// Create a registry holding only the filler shapes.
    pub fn new() -> Self {
        let one_word = Shape {
            name: "one_word_filler".to_string(),
            kind: ObjectKind::Generic,
            size: SizeSpec::Fixed(WORD_SIZE),
            regions: SmallVec::new(),
            alignment: Alignment::Word,
        };
        let free_space = Shape {
            name: "free_space".to_string(),
            kind: ObjectKind::Generic,
            size: SizeSpec::Variable {
                header_size: FREE_SPACE_HEADER_SIZE,
                length_offset: FREE_SPACE_LENGTH_OFFSET,
                element_size: 1,
            },
            regions: SmallVec::new(),
            alignment: Alignment::Word,
        };
        Self {
            shapes: vec![one_word, free_space],
        }
    }

    /// Validate and register a shape.
    pub fn register(&mut self, shape: Shape) -> Result<ShapeId, ShapeError> {
        shape.validate()?;
        // Shape ids share the map word with a tag bit.
        let index = u32::try_from(self.shapes.len() + 1)
            .ok()
            .filter(|i| *i < u32::MAX >> 1)
            .ok_or(ShapeError::TooManyShapes)?;
        log::trace!("registered shape {} as {}", shape.name, index);
        self.shapes.push(shape);
        Ok(ShapeId(index))
    }

    /// Look up a shape.
    #[inline]
    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|i| self.shapes.get(i))
    }

    /// Number of registered shapes, fillers included.
    #[inline]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Always false; the fillers are always present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
