//! The IR graph.
//!
//! The graph provides:
//! - **Arena-based storage**: nodes are addressed by stable [`NodeId`]s
//! - **Use lists**: one entry per input edge, kept in sync by every mutation
//! - **Typed builders**: one constructor per operator, so hand-built graphs
//!   always have well-formed input lists
//! - **In-place rewriting**: passes replace inputs and uses, and kill nodes
//!   rather than rebuilding the graph
//!
//! Killed nodes stay in the arena with [`NodeFlags::DEAD`] set and drop out
//! of every use list.

use super::arena::{Arena, SecondaryMap};
use super::error::IrError;
use super::machine::{MachineRepresentation, MachineType, PointerSize};
use super::node::{Node, NodeFlags, NodeId};
use super::operators::{ControlOp, ExternalRef, MemoryOp, Operator, WordOp};

// =============================================================================
// Graph Structure
// =============================================================================

/// An IR graph with explicit value, effect and control edges.
#[derive(Clone)]
pub struct Graph {
    /// Node storage.
    nodes: Arena<Node>,
    /// For each node, the nodes using it (one entry per edge).
    uses: SecondaryMap<Node, Vec<NodeId>>,
    /// The start node (initial effect and control).
    pub start: NodeId,
    /// The end node (joins all terminators).
    pub end: NodeId,
}

impl Graph {
    /// Create a graph holding only `Start` and an empty `End`.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create a graph with room for `node_capacity` nodes.
    pub fn with_capacity(node_capacity: usize) -> Self {
        let mut nodes = Arena::with_capacity(node_capacity);
        let start = nodes.alloc(Node::new(Operator::Control(ControlOp::Start), &[]));
        let end = nodes.alloc(Node::new(Operator::Control(ControlOp::End(0)), &[]));
        Graph {
            nodes,
            uses: SecondaryMap::with_capacity(node_capacity),
            start,
            end,
        }
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    /// Get a node.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Get a node mutably.
    ///
    /// Editing `inputs` directly bypasses use-list maintenance; prefer
    /// [`Graph::replace_input`].
    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Get a node if the ID is in range.
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Operator of a node.
    #[inline]
    pub fn op(&self, id: NodeId) -> Operator {
        self.nodes[id].op
    }

    /// Total nodes ever created, including dead ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph holds only start and end.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 2
    }

    /// Number of nodes not marked dead.
    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|(_, n)| !n.is_dead()).count()
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node after checking its input list.
    pub fn add_node(&mut self, op: Operator, inputs: &[NodeId]) -> Result<NodeId, IrError> {
        if inputs.len() != op.input_count() {
            return Err(IrError::ArityMismatch {
                op,
                expected: op.input_count(),
                actual: inputs.len(),
            });
        }
        for &input in inputs {
            match self.nodes.get(input) {
                None => return Err(IrError::DanglingInput { node: None, input }),
                Some(n) if n.is_dead() => {
                    return Err(IrError::DeadInput {
                        node: self.nodes.next_id(),
                        input,
                    })
                }
                Some(_) => {}
            }
        }
        Ok(self.insert(op, inputs))
    }

    /// Add a node whose input list the caller built from the operator's layout.
    fn insert(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        debug_assert_eq!(inputs.len(), op.input_count(), "{op:?}");
        let id = self.nodes.alloc(Node::new(op, inputs));
        for &input in inputs {
            self.add_use(input, id);
        }
        id
    }

    /// Add a node created by an optimization pass.
    pub(crate) fn insert_synthetic(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let id = self.insert(op, inputs);
        self.nodes[id].flags.insert(NodeFlags::SYNTHETIC);
        id
    }

    // =========================================================================
    // Use Lists
    // =========================================================================

    /// Nodes using `id`, one entry per edge.
    pub fn uses(&self, id: NodeId) -> &[NodeId] {
        self.uses.get(id)
    }

    /// Number of edges into `id`.
    pub fn use_count(&self, id: NodeId) -> usize {
        self.uses.get(id).len()
    }

    fn add_use(&mut self, def: NodeId, user: NodeId) {
        self.uses.get_mut(def).push(user);
    }

    fn remove_use(&mut self, def: NodeId, user: NodeId) {
        let uses = self.uses.get_mut(def);
        if let Some(pos) = uses.iter().position(|&u| u == user) {
            uses.swap_remove(pos);
        }
    }

    // =========================================================================
    // Node Modification
    // =========================================================================

    /// Replace input `index` of `node`.
    pub fn replace_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        let Some(&old) = self.nodes[node].inputs.get(index) else {
            return;
        };
        if old == new_input {
            return;
        }
        self.remove_use(old, node);
        self.nodes[node].inputs[index] = new_input;
        self.add_use(new_input, node);
    }

    /// Attach a terminator (for example a `Return`) to `End`.
    pub fn add_terminator(&mut self, terminator: NodeId) {
        let end = self.end;
        let count = self.nodes[end].inputs.len() as u16;
        let node = &mut self.nodes[end];
        node.inputs.push(terminator);
        node.op = Operator::Control(ControlOp::End(count + 1));
        self.add_use(terminator, end);
    }

    /// Redirect every use of `old` to `new`.
    pub fn replace_all_uses(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        let users = std::mem::take(self.uses.get_mut(old));
        for user in users {
            if let Some(slot) = self.nodes[user].inputs.iter_mut().find(|i| **i == old) {
                *slot = new;
                self.add_use(new, user);
            }
        }
    }

    /// Redirect uses of `node` by edge kind.
    ///
    /// Value uses go to `value`. Effect uses go to `effect`, or to the node's
    /// own effect input when `None`. Control uses go to `control`, or to the
    /// node's own control input when `None`. A use with no replacement is
    /// left in place.
    pub fn replace_uses_by_kind(
        &mut self,
        node: NodeId,
        value: Option<NodeId>,
        effect: Option<NodeId>,
        control: Option<NodeId>,
    ) {
        let effect = effect.or_else(|| self.nodes[node].effect_input(0));
        let control = control.or_else(|| self.nodes[node].control_input(0));

        let mut users = self.uses.get(node).to_vec();
        users.sort_unstable();
        users.dedup();

        for user in users {
            let op = self.nodes[user].op;
            let values = op.value_input_count();
            let effects = op.effect_input_count();
            for index in 0..self.nodes[user].inputs.len() {
                if self.nodes[user].inputs[index] != node {
                    continue;
                }
                let replacement = if index < values {
                    value
                } else if index < values + effects {
                    effect
                } else {
                    control
                };
                if let Some(replacement) = replacement {
                    self.replace_input(user, index, replacement);
                }
            }
        }
    }

    /// Mark a node dead and drop its input edges from the use lists.
    pub fn kill(&mut self, id: NodeId) {
        if self.nodes[id].is_dead() {
            return;
        }
        self.nodes[id].mark_dead();
        let inputs = self.nodes[id].inputs.clone();
        for input in inputs {
            self.remove_use(input, id);
        }
    }

    // =========================================================================
    // Constants
    // =========================================================================

    /// Function parameter.
    pub fn parameter(&mut self, index: u16) -> NodeId {
        self.insert(Operator::Parameter(index), &[])
    }

    /// 32-bit constant.
    pub fn int32_constant(&mut self, value: i32) -> NodeId {
        self.insert(Operator::Int32Constant(value), &[])
    }

    /// 64-bit constant.
    pub fn int64_constant(&mut self, value: i64) -> NodeId {
        self.insert(Operator::Int64Constant(value), &[])
    }

    /// Pointer-width constant.
    pub fn intptr_constant(&mut self, pointer_size: PointerSize, value: i64) -> NodeId {
        match pointer_size {
            PointerSize::Word32 => self.int32_constant(value as i32),
            PointerSize::Word64 => self.int64_constant(value),
        }
    }

    /// External reference.
    pub fn external_constant(&mut self, reference: ExternalRef) -> NodeId {
        self.insert(Operator::ExternalConstant(reference), &[])
    }

    /// Heap object known at compile time.
    pub fn heap_constant(&mut self, handle: u32) -> NodeId {
        self.insert(Operator::HeapConstant(handle), &[])
    }

    // =========================================================================
    // Word Operations
    // =========================================================================

    /// Binary or unary word operation.
    pub fn word(&mut self, op: WordOp, operands: &[NodeId]) -> NodeId {
        self.insert(Operator::Word(op), operands)
    }

    /// 32-bit add.
    pub fn int32_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.word(WordOp::Int32Add, &[lhs, rhs])
    }

    /// 64-bit add.
    pub fn int64_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.word(WordOp::Int64Add, &[lhs, rhs])
    }

    /// Pointer-width add.
    pub fn intptr_add(&mut self, pointer_size: PointerSize, lhs: NodeId, rhs: NodeId) -> NodeId {
        match pointer_size {
            PointerSize::Word32 => self.int32_add(lhs, rhs),
            PointerSize::Word64 => self.int64_add(lhs, rhs),
        }
    }

    /// Zero-extend 32 to 64 bits.
    pub fn change_uint32_to_uint64(&mut self, value: NodeId) -> NodeId {
        self.word(WordOp::ChangeUint32ToUint64, &[value])
    }

    // =========================================================================
    // Memory Operations
    // =========================================================================

    /// Allocate a fresh object.
    pub fn allocate(&mut self, size: NodeId, effect: NodeId, control: NodeId) -> NodeId {
        self.insert(Operator::Memory(MemoryOp::Allocate), &[size, effect, control])
    }

    /// Load a field that never changes.
    pub fn load_immutable(&mut self, ty: MachineType, object: NodeId, offset: NodeId) -> NodeId {
        self.insert(Operator::Memory(MemoryOp::LoadImmutable(ty)), &[object, offset])
    }

    /// Load an object field.
    pub fn load_from_object(
        &mut self,
        ty: MachineType,
        object: NodeId,
        offset: NodeId,
        effect: NodeId,
        control: NodeId,
    ) -> NodeId {
        self.insert(
            Operator::Memory(MemoryOp::LoadFromObject(ty)),
            &[object, offset, effect, control],
        )
    }

    /// Store an object field.
    pub fn store_to_object(
        &mut self,
        ty: MachineType,
        object: NodeId,
        offset: NodeId,
        value: NodeId,
        effect: NodeId,
        control: NodeId,
    ) -> NodeId {
        self.insert(
            Operator::Memory(MemoryOp::StoreToObject(ty)),
            &[object, offset, value, effect, control],
        )
    }

    /// Trap-checked load from `base + index`.
    pub fn protected_load(
        &mut self,
        ty: MachineType,
        base: NodeId,
        index: NodeId,
        effect: NodeId,
        control: NodeId,
    ) -> NodeId {
        self.insert(
            Operator::Memory(MemoryOp::ProtectedLoad(ty)),
            &[base, index, effect, control],
        )
    }

    /// Trap-checked store to `base + index`.
    pub fn protected_store(
        &mut self,
        rep: MachineRepresentation,
        base: NodeId,
        index: NodeId,
        value: NodeId,
        effect: NodeId,
        control: NodeId,
    ) -> NodeId {
        self.insert(
            Operator::Memory(MemoryOp::ProtectedStore(rep)),
            &[base, index, value, effect, control],
        )
    }

    // =========================================================================
    // Effects
    // =========================================================================

    /// Call `target` with `args`.
    pub fn call(
        &mut self,
        target: NodeId,
        args: &[NodeId],
        no_write: bool,
        effect: NodeId,
        control: NodeId,
    ) -> NodeId {
        let mut inputs = Vec::with_capacity(args.len() + 3);
        inputs.push(target);
        inputs.extend_from_slice(args);
        inputs.push(effect);
        inputs.push(control);
        let op = Operator::Call {
            args: args.len() as u16,
            no_write,
        };
        self.insert(op, &inputs)
    }

    /// Breakpoint.
    pub fn debug_break(&mut self, effect: NodeId, control: NodeId) -> NodeId {
        self.insert(Operator::DebugBreak, &[effect, control])
    }

    /// Failed assertion.
    pub fn abort_csa_assert(&mut self, message: NodeId, effect: NodeId, control: NodeId) -> NodeId {
        self.insert(Operator::AbortCsaAssert, &[message, effect, control])
    }

    /// Merge effect chains at a `Merge` or `Loop`.
    pub fn effect_phi(&mut self, effects: &[NodeId], control: NodeId) -> NodeId {
        let mut inputs = effects.to_vec();
        inputs.push(control);
        self.insert(Operator::EffectPhi(effects.len() as u16), &inputs)
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    /// Branch on `condition`.
    pub fn branch(&mut self, condition: NodeId, control: NodeId) -> NodeId {
        self.insert(Operator::Control(ControlOp::Branch), &[condition, control])
    }

    /// True successor of a branch.
    pub fn if_true(&mut self, branch: NodeId) -> NodeId {
        self.insert(Operator::Control(ControlOp::IfTrue), &[branch])
    }

    /// False successor of a branch.
    pub fn if_false(&mut self, branch: NodeId) -> NodeId {
        self.insert(Operator::Control(ControlOp::IfFalse), &[branch])
    }

    /// Control merge.
    pub fn merge(&mut self, controls: &[NodeId]) -> NodeId {
        self.insert(Operator::Control(ControlOp::Merge(controls.len() as u16)), controls)
    }

    /// Two-input loop header. The back edge initially points at `entry`;
    /// close it with [`Graph::replace_input`] once the body exists.
    pub fn loop_header(&mut self, entry: NodeId) -> NodeId {
        self.insert(Operator::Control(ControlOp::Loop(2)), &[entry, entry])
    }

    /// Return `value`, attached to `End`.
    pub fn return_value(&mut self, value: NodeId, effect: NodeId, control: NodeId) -> NodeId {
        let ret = self.insert(Operator::Control(ControlOp::Return), &[value, effect, control]);
        self.add_terminator(ret);
        ret
    }

    /// Placeholder for unreachable code.
    pub fn dead(&mut self) -> NodeId {
        self.insert(Operator::Control(ControlOp::Dead), &[])
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterate over all nodes, dead ones included.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Iterate over live nodes.
    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().filter(|(_, n)| !n.is_dead())
    }

    /// Iterate over all node IDs.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        self.nodes.ids()
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check that every live node has a well-formed input list and that use
    /// lists match input edges exactly.
    pub fn verify(&self) -> Result<(), IrError> {
        for (id, node) in self.live_nodes() {
            if node.inputs.len() != node.op.input_count() {
                return Err(IrError::ArityMismatch {
                    op: node.op,
                    expected: node.op.input_count(),
                    actual: node.inputs.len(),
                });
            }
            for &input in &node.inputs {
                let Some(def) = self.nodes.get(input) else {
                    return Err(IrError::DanglingInput {
                        node: Some(id),
                        input,
                    });
                };
                if def.is_dead() {
                    return Err(IrError::DeadInput { node: id, input });
                }
                let edges = node.inputs.iter().filter(|&&i| i == input).count();
                let recorded = self.uses(input).iter().filter(|&&u| u == id).count();
                if edges != recorded {
                    return Err(IrError::UseListMismatch {
                        def: input,
                        user: id,
                    });
                }
            }
        }
        for (def, _) in self.live_nodes() {
            for &user in self.uses(def) {
                if self.nodes[user].is_dead() || !self.nodes[user].inputs.contains(&def) {
                    return Err(IrError::UseListMismatch { def, user });
                }
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} live nodes):", self.live_count())?;
        for (id, node) in self.live_nodes() {
            writeln!(f, "  {:?}: {:?}", id, node)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
