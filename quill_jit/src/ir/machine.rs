//! Machine-level value representations.
//!
//! A [`MachineType`] pairs a storage [`MachineRepresentation`] (how many bits,
//! tagged or raw) with a [`MachineSemantic`] (how those bits are interpreted).
//! Memory operators carry a machine type so passes can reason about access
//! widths and about which recorded values may stand in for a load.

// =============================================================================
// Representation
// =============================================================================

/// Storage representation of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MachineRepresentation {
    /// No value.
    None,
    /// Single bit, stored as a byte.
    Bit,
    /// 8-bit integer.
    Word8,
    /// 16-bit integer.
    Word16,
    /// 32-bit integer.
    Word32,
    /// 64-bit integer.
    Word64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// Tagged small integer.
    TaggedSigned,
    /// Tagged heap reference.
    TaggedPointer,
    /// Either tagged form.
    Tagged,
}

impl MachineRepresentation {
    /// Width of one element in bytes. Tagged values are pointer sized.
    pub const fn element_size(self) -> usize {
        match self {
            MachineRepresentation::None => 0,
            MachineRepresentation::Bit | MachineRepresentation::Word8 => 1,
            MachineRepresentation::Word16 => 2,
            MachineRepresentation::Word32 | MachineRepresentation::Float32 => 4,
            MachineRepresentation::Word64
            | MachineRepresentation::Float64
            | MachineRepresentation::TaggedSigned
            | MachineRepresentation::TaggedPointer
            | MachineRepresentation::Tagged => 8,
        }
    }

    /// Raw integer representations.
    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            MachineRepresentation::Bit
                | MachineRepresentation::Word8
                | MachineRepresentation::Word16
                | MachineRepresentation::Word32
                | MachineRepresentation::Word64
        )
    }

    /// Any of the tagged representations.
    #[inline]
    pub const fn is_any_tagged(self) -> bool {
        matches!(
            self,
            MachineRepresentation::TaggedSigned
                | MachineRepresentation::TaggedPointer
                | MachineRepresentation::Tagged
        )
    }

    /// Whether a value stored as `self` can satisfy a load of `to`.
    ///
    /// Tagged covers tagged. An integer covers any integer of equal or
    /// smaller width, given truncation and extension. Everything else must
    /// match exactly.
    pub const fn subsumes(self, to: MachineRepresentation) -> bool {
        if self as u8 == to as u8 {
            return true;
        }
        if self.is_any_tagged() {
            return to.is_any_tagged();
        }
        if self.is_integral() {
            return to.is_integral() && self.element_size() >= to.element_size();
        }
        false
    }
}

// =============================================================================
// Semantic
// =============================================================================

/// Interpretation of a value's bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineSemantic {
    /// No interpretation.
    None,
    /// Boolean.
    Bool,
    /// Signed 32-bit (also used for sign-extended narrow loads).
    Int32,
    /// Unsigned 32-bit (also used for zero-extended narrow loads).
    Uint32,
    /// Signed 64-bit.
    Int64,
    /// Unsigned 64-bit.
    Uint64,
    /// Floating point number.
    Number,
    /// Anything, usually a tagged value.
    Any,
}

// =============================================================================
// Machine Type
// =============================================================================

/// Representation plus semantic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineType {
    /// Storage representation.
    pub representation: MachineRepresentation,
    /// Interpretation.
    pub semantic: MachineSemantic,
}

impl MachineType {
    /// Create a machine type.
    pub const fn new(representation: MachineRepresentation, semantic: MachineSemantic) -> Self {
        Self {
            representation,
            semantic,
        }
    }

    /// Sign-extended byte.
    pub const INT8: Self = Self::new(MachineRepresentation::Word8, MachineSemantic::Int32);
    /// Zero-extended byte.
    pub const UINT8: Self = Self::new(MachineRepresentation::Word8, MachineSemantic::Uint32);
    /// Sign-extended half word.
    pub const INT16: Self = Self::new(MachineRepresentation::Word16, MachineSemantic::Int32);
    /// Zero-extended half word.
    pub const UINT16: Self = Self::new(MachineRepresentation::Word16, MachineSemantic::Uint32);
    /// Signed word.
    pub const INT32: Self = Self::new(MachineRepresentation::Word32, MachineSemantic::Int32);
    /// Unsigned word.
    pub const UINT32: Self = Self::new(MachineRepresentation::Word32, MachineSemantic::Uint32);
    /// Signed double word.
    pub const INT64: Self = Self::new(MachineRepresentation::Word64, MachineSemantic::Int64);
    /// Unsigned double word.
    pub const UINT64: Self = Self::new(MachineRepresentation::Word64, MachineSemantic::Uint64);
    /// Single precision float.
    pub const FLOAT32: Self = Self::new(MachineRepresentation::Float32, MachineSemantic::Number);
    /// Double precision float.
    pub const FLOAT64: Self = Self::new(MachineRepresentation::Float64, MachineSemantic::Number);
    /// Any tagged value.
    pub const ANY_TAGGED: Self = Self::new(MachineRepresentation::Tagged, MachineSemantic::Any);
    /// Tagged heap reference.
    pub const TAGGED_POINTER: Self =
        Self::new(MachineRepresentation::TaggedPointer, MachineSemantic::Any);
    /// Tagged small integer.
    pub const TAGGED_SIGNED: Self =
        Self::new(MachineRepresentation::TaggedSigned, MachineSemantic::Int32);

    /// Width in bytes.
    #[inline]
    pub const fn element_size(self) -> usize {
        self.representation.element_size()
    }
}

// =============================================================================
// Pointer Size
// =============================================================================

/// Native pointer width of the compilation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerSize {
    /// 32-bit target.
    Word32,
    /// 64-bit target.
    #[default]
    Word64,
}

impl PointerSize {
    /// Word representation of a native pointer.
    pub const fn representation(self) -> MachineRepresentation {
        match self {
            PointerSize::Word32 => MachineRepresentation::Word32,
            PointerSize::Word64 => MachineRepresentation::Word64,
        }
    }
}
