//! IR operator definitions.
//!
//! Operators are organized by category:
//! - **Constants**: integer, external and heap constants, parameters
//! - **Word**: machine integer arithmetic and conversions
//! - **Memory**: allocation, object field access, protected accesses
//! - **Control**: start, end, branches, merges and loops
//! - **Effects**: effect phis, calls, debug instructions
//!
//! Every operator fixes the shape of its node's input list. Inputs are laid
//! out as values first, then effects, then controls:
//!
//! ```text
//! [ v0 .. vN | e0 .. eM | c0 .. cK ]
//! ```
//!
//! Variadic operators (`Merge`, `Loop`, `EffectPhi`, `End`, `Call`) carry
//! their input count so the layout is always known from the operator alone.

use super::machine::{MachineRepresentation, MachineType};

// =============================================================================
// Operator Properties
// =============================================================================

bitflags::bitflags! {
    /// Static properties of an operator.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpProperties: u8 {
        /// Does not write memory observable by other operations.
        const NO_WRITE = 0b0000_0001;
        /// Does not read memory.
        const NO_READ = 0b0000_0010;
        /// Inputs may be swapped.
        const COMMUTATIVE = 0b0000_0100;
        /// Cannot throw or deoptimize.
        const NO_THROW = 0b0000_1000;
        /// No side effects at all.
        const PURE = Self::NO_WRITE.bits() | Self::NO_READ.bits() | Self::NO_THROW.bits();
    }
}

// =============================================================================
// Operator Categories
// =============================================================================

/// Operator category for fast dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCategory {
    /// Constant values and parameters.
    Constant = 0,
    /// Machine word arithmetic.
    Word = 1,
    /// Memory access and allocation.
    Memory = 2,
    /// Control flow.
    Control = 3,
    /// Effect merges, calls and debug instructions.
    Effect = 4,
}

// =============================================================================
// Sub-operators
// =============================================================================

/// Machine word operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordOp {
    /// 32-bit add.
    Int32Add,
    /// 64-bit add.
    Int64Add,
    /// 32-bit bitwise and.
    Word32And,
    /// 32-bit shift left.
    Word32Shl,
    /// 32-bit arithmetic shift right.
    Word32Sar,
    /// Keep the low 32 bits of a 64-bit value.
    TruncateInt64ToInt32,
    /// Zero-extend a 32-bit value to 64 bits.
    ChangeUint32ToUint64,
}

impl WordOp {
    /// Number of value operands.
    pub const fn arity(self) -> usize {
        match self {
            WordOp::TruncateInt64ToInt32 | WordOp::ChangeUint32ToUint64 => 1,
            _ => 2,
        }
    }

    /// Check if the operands may be swapped.
    pub const fn is_commutative(self) -> bool {
        matches!(self, WordOp::Int32Add | WordOp::Int64Add | WordOp::Word32And)
    }
}

/// Memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    /// Allocate a fresh object: `(size) [effect] [control]`.
    Allocate,
    /// Read a field that never changes: `(object, offset)`.
    LoadImmutable(MachineType),
    /// Read an object field: `(object, offset) [effect] [control]`.
    LoadFromObject(MachineType),
    /// Write an object field: `(object, offset, value) [effect] [control]`.
    StoreToObject(MachineType),
    /// Trap-checked raw load: `(base, index) [effect] [control]`.
    ProtectedLoad(MachineType),
    /// Trap-checked raw store: `(base, index, value) [effect] [control]`.
    ProtectedStore(MachineRepresentation),
}

/// Control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOp {
    /// Graph entry. Produces the initial effect and control.
    Start,
    /// Graph exit, joining `n` terminators.
    End(u16),
    /// Two-way branch on a value.
    Branch,
    /// True projection of a branch.
    IfTrue,
    /// False projection of a branch.
    IfFalse,
    /// Join of `n` control predecessors.
    Merge(u16),
    /// Loop header. Input 0 is the entry, the rest are back edges.
    Loop(u16),
    /// Function return: `(value) [effect] [control]`.
    Return,
    /// Placeholder for removed code.
    Dead,
}

/// Known external references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalRef {
    /// Debug-only object type assertion. Calls to it have no effect on memory.
    CheckObjectType,
    /// Any other runtime entry point.
    Runtime(u32),
}

// =============================================================================
// Operator (Unified)
// =============================================================================

/// Unified operator representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // Constants
    /// 32-bit integer constant.
    Int32Constant(i32),
    /// 64-bit integer constant.
    Int64Constant(i64),
    /// Address of an external function or datum.
    ExternalConstant(ExternalRef),
    /// Reference to a heap object known at compile time.
    HeapConstant(u32),
    /// Function parameter.
    Parameter(u16),

    /// Machine word operation.
    Word(WordOp),

    /// Memory operation.
    Memory(MemoryOp),

    /// Control operation.
    Control(ControlOp),

    // Effects
    /// Effect merge over `n` inputs, controlled by a `Merge` or `Loop`.
    EffectPhi(u16),
    /// Call: `(target, args..) [effect] [control]`.
    Call {
        /// Number of arguments after the target.
        args: u16,
        /// Callee is known not to write memory.
        no_write: bool,
    },
    /// Breakpoint instruction.
    DebugBreak,
    /// Failed internal assertion: `(message) [effect] [control]`.
    AbortCsaAssert,
}

impl Operator {
    /// Get the category of this operator.
    pub const fn category(&self) -> OpCategory {
        match self {
            Operator::Int32Constant(_)
            | Operator::Int64Constant(_)
            | Operator::ExternalConstant(_)
            | Operator::HeapConstant(_)
            | Operator::Parameter(_) => OpCategory::Constant,
            Operator::Word(_) => OpCategory::Word,
            Operator::Memory(_) => OpCategory::Memory,
            Operator::Control(_) => OpCategory::Control,
            Operator::EffectPhi(_)
            | Operator::Call { .. }
            | Operator::DebugBreak
            | Operator::AbortCsaAssert => OpCategory::Effect,
        }
    }

    /// Number of value inputs.
    pub const fn value_input_count(&self) -> usize {
        match self {
            Operator::Word(op) => op.arity(),
            Operator::Memory(MemoryOp::Allocate) => 1,
            Operator::Memory(MemoryOp::LoadImmutable(_))
            | Operator::Memory(MemoryOp::LoadFromObject(_))
            | Operator::Memory(MemoryOp::ProtectedLoad(_)) => 2,
            Operator::Memory(MemoryOp::StoreToObject(_))
            | Operator::Memory(MemoryOp::ProtectedStore(_)) => 3,
            Operator::Control(ControlOp::Branch) | Operator::Control(ControlOp::Return) => 1,
            Operator::Call { args, .. } => 1 + *args as usize,
            Operator::AbortCsaAssert => 1,
            _ => 0,
        }
    }

    /// Number of effect inputs.
    pub const fn effect_input_count(&self) -> usize {
        match self {
            Operator::EffectPhi(n) => *n as usize,
            Operator::Memory(MemoryOp::LoadImmutable(_)) => 0,
            Operator::Memory(_)
            | Operator::Control(ControlOp::Return)
            | Operator::Call { .. }
            | Operator::DebugBreak
            | Operator::AbortCsaAssert => 1,
            _ => 0,
        }
    }

    /// Number of control inputs.
    pub const fn control_input_count(&self) -> usize {
        match self {
            Operator::Control(ControlOp::End(n))
            | Operator::Control(ControlOp::Merge(n))
            | Operator::Control(ControlOp::Loop(n)) => *n as usize,
            Operator::Control(ControlOp::Branch)
            | Operator::Control(ControlOp::IfTrue)
            | Operator::Control(ControlOp::IfFalse)
            | Operator::Control(ControlOp::Return)
            | Operator::EffectPhi(_)
            | Operator::Call { .. }
            | Operator::DebugBreak
            | Operator::AbortCsaAssert => 1,
            Operator::Memory(MemoryOp::LoadImmutable(_)) => 0,
            Operator::Memory(_) => 1,
            _ => 0,
        }
    }

    /// Total number of inputs.
    #[inline]
    pub const fn input_count(&self) -> usize {
        self.value_input_count() + self.effect_input_count() + self.control_input_count()
    }

    /// Number of effect outputs (zero or one).
    pub const fn effect_output_count(&self) -> usize {
        match self {
            Operator::Control(ControlOp::Start) | Operator::Control(ControlOp::Dead) => 1,
            Operator::Memory(MemoryOp::LoadImmutable(_)) => 0,
            Operator::Memory(_)
            | Operator::EffectPhi(_)
            | Operator::Call { .. }
            | Operator::DebugBreak
            | Operator::AbortCsaAssert => 1,
            _ => 0,
        }
    }

    /// Static properties.
    pub fn properties(&self) -> OpProperties {
        match self {
            Operator::Int32Constant(_)
            | Operator::Int64Constant(_)
            | Operator::ExternalConstant(_)
            | Operator::HeapConstant(_)
            | Operator::Parameter(_) => OpProperties::PURE,
            Operator::Word(op) if op.is_commutative() => {
                OpProperties::PURE | OpProperties::COMMUTATIVE
            }
            Operator::Word(_) => OpProperties::PURE,
            Operator::Memory(MemoryOp::LoadImmutable(_)) => OpProperties::PURE,
            Operator::Memory(MemoryOp::LoadFromObject(_)) => {
                OpProperties::NO_WRITE | OpProperties::NO_THROW
            }
            Operator::Memory(MemoryOp::ProtectedLoad(_)) => OpProperties::NO_WRITE,
            Operator::Memory(MemoryOp::Allocate)
            | Operator::Memory(MemoryOp::StoreToObject(_)) => OpProperties::NO_THROW,
            Operator::Memory(MemoryOp::ProtectedStore(_)) => OpProperties::empty(),
            Operator::EffectPhi(_) => OpProperties::PURE,
            Operator::Control(ControlOp::Start) => OpProperties::empty(),
            Operator::Control(_) => OpProperties::NO_WRITE | OpProperties::NO_READ,
            Operator::Call { no_write: true, .. } => OpProperties::NO_WRITE,
            Operator::Call { .. } => OpProperties::empty(),
            Operator::DebugBreak | Operator::AbortCsaAssert => OpProperties::NO_THROW,
        }
    }

    /// Check a single property.
    #[inline]
    pub fn has_property(&self, property: OpProperties) -> bool {
        self.properties().contains(property)
    }

    /// Check if this operator is pure (no side effects).
    pub fn is_pure(&self) -> bool {
        self.has_property(OpProperties::PURE) && self.effect_input_count() == 0
    }

    /// Integer value of a constant operator.
    pub const fn as_int_constant(&self) -> Option<i64> {
        match self {
            Operator::Int32Constant(v) => Some(*v as i64),
            Operator::Int64Constant(v) => Some(*v),
            _ => None,
        }
    }

    /// Constants of any kind.
    pub const fn is_constant(&self) -> bool {
        matches!(
            self,
            Operator::Int32Constant(_)
                | Operator::Int64Constant(_)
                | Operator::ExternalConstant(_)
                | Operator::HeapConstant(_)
        )
    }

    /// Short printable name.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Operator::Int32Constant(_) => "Int32Constant",
            Operator::Int64Constant(_) => "Int64Constant",
            Operator::ExternalConstant(_) => "ExternalConstant",
            Operator::HeapConstant(_) => "HeapConstant",
            Operator::Parameter(_) => "Parameter",
            Operator::Word(WordOp::Int32Add) => "Int32Add",
            Operator::Word(WordOp::Int64Add) => "Int64Add",
            Operator::Word(WordOp::Word32And) => "Word32And",
            Operator::Word(WordOp::Word32Shl) => "Word32Shl",
            Operator::Word(WordOp::Word32Sar) => "Word32Sar",
            Operator::Word(WordOp::TruncateInt64ToInt32) => "TruncateInt64ToInt32",
            Operator::Word(WordOp::ChangeUint32ToUint64) => "ChangeUint32ToUint64",
            Operator::Memory(MemoryOp::Allocate) => "Allocate",
            Operator::Memory(MemoryOp::LoadImmutable(_)) => "LoadImmutable",
            Operator::Memory(MemoryOp::LoadFromObject(_)) => "LoadFromObject",
            Operator::Memory(MemoryOp::StoreToObject(_)) => "StoreToObject",
            Operator::Memory(MemoryOp::ProtectedLoad(_)) => "ProtectedLoad",
            Operator::Memory(MemoryOp::ProtectedStore(_)) => "ProtectedStore",
            Operator::Control(ControlOp::Start) => "Start",
            Operator::Control(ControlOp::End(_)) => "End",
            Operator::Control(ControlOp::Branch) => "Branch",
            Operator::Control(ControlOp::IfTrue) => "IfTrue",
            Operator::Control(ControlOp::IfFalse) => "IfFalse",
            Operator::Control(ControlOp::Merge(_)) => "Merge",
            Operator::Control(ControlOp::Loop(_)) => "Loop",
            Operator::Control(ControlOp::Return) => "Return",
            Operator::Control(ControlOp::Dead) => "Dead",
            Operator::EffectPhi(_) => "EffectPhi",
            Operator::Call { .. } => "Call",
            Operator::DebugBreak => "DebugBreak",
            Operator::AbortCsaAssert => "AbortCSAAssert",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
