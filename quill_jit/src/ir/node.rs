//! IR node definitions.
//!
//! A node is an operator plus an ordered input list. The operator fixes how
//! the list splits into value, effect and control inputs, so a node needs no
//! separate per-kind edge lists:
//!
//! ```text
//! StoreToObject(obj, off, val) [eff] [ctl]
//!   inputs = [obj, off, val, eff, ctl]
//!             ^ values      ^ effect ^ control
//! ```

use super::arena::Id;
use super::operators::Operator;
use smallvec::SmallVec;

// =============================================================================
// Node ID Type Alias
// =============================================================================

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

/// Inline input storage. Most nodes have at most five inputs.
pub type InputList = SmallVec<[NodeId; 5]>;

// =============================================================================
// Node
// =============================================================================

/// A node in the IR graph.
#[derive(Clone)]
pub struct Node {
    /// The operation this node performs.
    pub op: Operator,
    /// Inputs: values, then effects, then controls.
    pub inputs: InputList,
    /// Flags for node properties.
    pub flags: NodeFlags,
}

impl Node {
    /// Create a node.
    pub fn new(op: Operator, inputs: &[NodeId]) -> Self {
        Node {
            op,
            inputs: InputList::from_slice(inputs),
            flags: NodeFlags::empty(),
        }
    }

    /// Value input `index`.
    #[inline]
    pub fn value_input(&self, index: usize) -> Option<NodeId> {
        if index < self.op.value_input_count() {
            self.inputs.get(index).copied()
        } else {
            None
        }
    }

    /// Effect input `index`.
    #[inline]
    pub fn effect_input(&self, index: usize) -> Option<NodeId> {
        if index < self.op.effect_input_count() {
            self.inputs.get(self.op.value_input_count() + index).copied()
        } else {
            None
        }
    }

    /// Control input `index`.
    #[inline]
    pub fn control_input(&self, index: usize) -> Option<NodeId> {
        if index < self.op.control_input_count() {
            let first = self.op.value_input_count() + self.op.effect_input_count();
            self.inputs.get(first + index).copied()
        } else {
            None
        }
    }

    /// All value inputs.
    pub fn value_inputs(&self) -> &[NodeId] {
        let n = self.op.value_input_count().min(self.inputs.len());
        &self.inputs[..n]
    }

    /// All effect inputs.
    pub fn effect_inputs(&self) -> &[NodeId] {
        let start = self.op.value_input_count().min(self.inputs.len());
        let end = (start + self.op.effect_input_count()).min(self.inputs.len());
        &self.inputs[start..end]
    }

    /// All control inputs.
    pub fn control_inputs(&self) -> &[NodeId] {
        let start = (self.op.value_input_count() + self.op.effect_input_count())
            .min(self.inputs.len());
        &self.inputs[start..]
    }

    /// Integer value if this node is an integer constant.
    #[inline]
    pub fn as_int_constant(&self) -> Option<i64> {
        self.op.as_int_constant()
    }

    /// Check if this node has been marked dead.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    /// Mark this node as dead.
    pub fn mark_dead(&mut self) {
        self.flags.insert(NodeFlags::DEAD);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, " {:?}", self.inputs.as_slice())?;
        }
        if self.is_dead() {
            write!(f, " (dead)")?;
        }
        Ok(())
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags for node properties.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Node has been removed from the graph.
        const DEAD = 0b0000_0001;
        /// Node was created by an optimization pass.
        const SYNTHETIC = 0b0000_0010;
    }
}

// =============================================================================
// Tests
// =============================================================================
