//! Load elimination over object field accesses.
//!
//! Walks effect chains forward and keeps, for every effect-producing node,
//! an [`AbstractState`]: what is known to be stored at `(object, offset)`
//! at that point. A `LoadFromObject` that finds a usable entry is replaced
//! by the recorded value; otherwise its own result becomes the entry.
//!
//! # Object classes
//!
//! Objects are split by what they can alias:
//!
//! | Class     | Nodes                                    | May alias            |
//! |-----------|------------------------------------------|----------------------|
//! | Fresh     | `Allocate`                               | itself, arbitrary    |
//! | Constant  | parameters, immutable loads, constants   | constant, arbitrary  |
//! | Arbitrary | everything else                          | anything             |
//!
//! Each class keeps one table keyed by constant offset and one keyed by the
//! offset node when the offset is not a constant. A store kills every entry
//! it may alias, including entries at nearby offsets whose width overlaps.
//!
//! # Merges and loops
//!
//! At a `Merge`, the states of all predecessors are intersected; an entry
//! survives only if every predecessor agrees on it exactly. At a `Loop`, the
//! entry state is used unless some node on a back edge may write memory,
//! in which case the state is reset. Loops are never iterated to a fixed
//! point.

use super::reducer::{GraphReducer, Reducer, Reduction};
use super::OptimizationPass;
use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::graph::Graph;
use crate::ir::machine::{MachineRepresentation, MachineType};
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::{ControlOp, ExternalRef, MemoryOp, OpProperties, Operator, WordOp};

use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::rc::Rc;

/// Widest access in bytes. Bounds the backwards overlap scan on a store.
const MAX_REPR_SIZE: u32 = 8;

// =============================================================================
// Abstract State
// =============================================================================

/// A value known to be stored in a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Node producing the stored value.
    pub value: NodeId,
    /// Representation it was stored or loaded with.
    pub representation: MachineRepresentation,
}

/// Aliasing class of an object node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    /// Freshly allocated; aliases nothing else that is fresh.
    Fresh,
    /// Parameter, immutable load or constant.
    Constant,
    /// Unknown provenance.
    Arbitrary,
}

impl ObjectClass {
    /// Classify `object`.
    pub fn of(graph: &Graph, object: NodeId) -> Self {
        match graph.op(object) {
            Operator::Memory(MemoryOp::Allocate) => ObjectClass::Fresh,
            Operator::Parameter(_) | Operator::Memory(MemoryOp::LoadImmutable(_)) => {
                ObjectClass::Constant
            }
            op if op.is_constant() => ObjectClass::Constant,
            _ => ObjectClass::Arbitrary,
        }
    }
}

/// Offset operand of a field access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOffset {
    /// Integer constant offset.
    Known(u32),
    /// Offset computed at run time, identified by its node.
    Unknown(NodeId),
}

impl FieldOffset {
    /// Resolve the offset operand `offset`.
    pub fn of(graph: &Graph, offset: NodeId) -> Self {
        match graph.node(offset).as_int_constant() {
            Some(value) => FieldOffset::Known(value as u32),
            None => FieldOffset::Unknown(offset),
        }
    }
}

type ObjectMap = FxHashMap<NodeId, FieldInfo>;
/// offset -> object -> info
type KnownOffsets = FxHashMap<u32, ObjectMap>;
/// object -> offset node -> info
type UnknownOffsets = FxHashMap<NodeId, ObjectMap>;

/// Known field contents at one point of the effect chain.
///
/// States are treated as immutable once published; every transfer function
/// returns a new state. Inner maps are never left empty, so two states with
/// the same entries compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbstractState {
    fresh: KnownOffsets,
    constant: KnownOffsets,
    arbitrary: KnownOffsets,
    fresh_unknown: UnknownOffsets,
    constant_unknown: UnknownOffsets,
    arbitrary_unknown: UnknownOffsets,
}

impl AbstractState {
    /// State with no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of recorded fields.
    pub fn len(&self) -> usize {
        fn count<K>(table: &FxHashMap<K, ObjectMap>) -> usize {
            table.values().map(|objects| objects.len()).sum()
        }
        count(&self.fresh)
            + count(&self.constant)
            + count(&self.arbitrary)
            + count(&self.fresh_unknown)
            + count(&self.constant_unknown)
            + count(&self.arbitrary_unknown)
    }

    /// Check if nothing is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value recorded for `object` at `offset`.
    pub fn lookup(&self, class: ObjectClass, object: NodeId, offset: FieldOffset) -> Option<FieldInfo> {
        match offset {
            FieldOffset::Known(off) => self.known(class).get(&off)?.get(&object).copied(),
            FieldOffset::Unknown(off) => self.unknown(class).get(&object)?.get(&off).copied(),
        }
    }

    /// Copy of this state with `object.offset = value` recorded.
    pub fn add_field(
        &self,
        class: ObjectClass,
        object: NodeId,
        offset: FieldOffset,
        value: NodeId,
        representation: MachineRepresentation,
    ) -> Self {
        let mut state = self.clone();
        let info = FieldInfo {
            value,
            representation,
        };
        match offset {
            FieldOffset::Known(off) => {
                state.known_mut(class).entry(off).or_default().insert(object, info);
            }
            FieldOffset::Unknown(off) => {
                state.unknown_mut(class).entry(object).or_default().insert(off, info);
            }
        }
        state
    }

    /// Copy of this state without anything a store of `representation` to
    /// `object.offset` may overwrite.
    pub fn kill_field(
        &self,
        class: ObjectClass,
        object: NodeId,
        offset: FieldOffset,
        representation: MachineRepresentation,
    ) -> Self {
        let mut state = self.clone();
        match (offset, class) {
            (FieldOffset::Known(off), ObjectClass::Fresh) => {
                state.kill_fresh_offset(object, off, representation);
                kill_offset(&mut state.arbitrary, off, representation);
                state.fresh_unknown.remove(&object);
                state.arbitrary_unknown.clear();
            }
            (FieldOffset::Known(off), ObjectClass::Constant) => {
                kill_offset(&mut state.constant, off, representation);
                kill_offset(&mut state.arbitrary, off, representation);
                state.constant_unknown.clear();
                state.arbitrary_unknown.clear();
            }
            (FieldOffset::Known(off), ObjectClass::Arbitrary) => {
                kill_offset(&mut state.fresh, off, representation);
                kill_offset(&mut state.constant, off, representation);
                kill_offset(&mut state.arbitrary, off, representation);
                state.fresh_unknown.clear();
                state.constant_unknown.clear();
                state.arbitrary_unknown.clear();
            }
            (FieldOffset::Unknown(_), ObjectClass::Fresh) => {
                state.fresh.retain(|_, objects| {
                    objects.remove(&object);
                    !objects.is_empty()
                });
                state.fresh_unknown.remove(&object);
                state.arbitrary.clear();
                state.arbitrary_unknown.clear();
            }
            (FieldOffset::Unknown(_), ObjectClass::Constant) => {
                state.constant.clear();
                state.constant_unknown.clear();
                state.arbitrary.clear();
                state.arbitrary_unknown.clear();
            }
            (FieldOffset::Unknown(_), ObjectClass::Arbitrary) => return Self::new(),
        }
        state
    }

    /// Keep only the entries `other` agrees with exactly.
    pub fn intersect_with(&mut self, other: &AbstractState) {
        intersect_tables(&mut self.fresh, &other.fresh);
        intersect_tables(&mut self.constant, &other.constant);
        intersect_tables(&mut self.arbitrary, &other.arbitrary);
        intersect_tables(&mut self.fresh_unknown, &other.fresh_unknown);
        intersect_tables(&mut self.constant_unknown, &other.constant_unknown);
        intersect_tables(&mut self.arbitrary_unknown, &other.arbitrary_unknown);
    }

    fn known(&self, class: ObjectClass) -> &KnownOffsets {
        match class {
            ObjectClass::Fresh => &self.fresh,
            ObjectClass::Constant => &self.constant,
            ObjectClass::Arbitrary => &self.arbitrary,
        }
    }

    fn known_mut(&mut self, class: ObjectClass) -> &mut KnownOffsets {
        match class {
            ObjectClass::Fresh => &mut self.fresh,
            ObjectClass::Constant => &mut self.constant,
            ObjectClass::Arbitrary => &mut self.arbitrary,
        }
    }

    fn unknown(&self, class: ObjectClass) -> &UnknownOffsets {
        match class {
            ObjectClass::Fresh => &self.fresh_unknown,
            ObjectClass::Constant => &self.constant_unknown,
            ObjectClass::Arbitrary => &self.arbitrary_unknown,
        }
    }

    fn unknown_mut(&mut self, class: ObjectClass) -> &mut UnknownOffsets {
        match class {
            ObjectClass::Fresh => &mut self.fresh_unknown,
            ObjectClass::Constant => &mut self.constant_unknown,
            ObjectClass::Arbitrary => &mut self.arbitrary_unknown,
        }
    }

    /// Like [`kill_offset`], restricted to one fresh object.
    fn kill_fresh_offset(&mut self, object: NodeId, offset: u32, representation: MachineRepresentation) {
        for i in 0..representation.element_size() as u32 {
            let key = offset.wrapping_add(i);
            if let Some(objects) = self.fresh.get_mut(&key) {
                objects.remove(&object);
                if objects.is_empty() {
                    self.fresh.remove(&key);
                }
            }
        }
        for i in offset.saturating_sub(MAX_REPR_SIZE - 1)..offset {
            if let Some(objects) = self.fresh.get_mut(&i) {
                if objects
                    .get(&object)
                    .is_some_and(|info| overlaps(info.representation, offset - i))
                {
                    objects.remove(&object);
                }
                if objects.is_empty() {
                    self.fresh.remove(&i);
                }
            }
        }
    }
}

/// Drop every entry in `offset..offset + width` and every entry starting
/// below `offset` whose width reaches into it.
fn kill_offset(table: &mut KnownOffsets, offset: u32, representation: MachineRepresentation) {
    for i in 0..representation.element_size() as u32 {
        table.remove(&offset.wrapping_add(i));
    }
    for i in offset.saturating_sub(MAX_REPR_SIZE - 1)..offset {
        if let Some(objects) = table.get_mut(&i) {
            objects.retain(|_, info| !overlaps(info.representation, offset - i));
            if objects.is_empty() {
                table.remove(&i);
            }
        }
    }
}

#[inline]
fn overlaps(representation: MachineRepresentation, distance: u32) -> bool {
    representation != MachineRepresentation::None
        && representation.element_size() as u32 > distance
}

fn intersect_tables<K: Copy + Eq + Hash>(
    to: &mut FxHashMap<K, ObjectMap>,
    from: &FxHashMap<K, ObjectMap>,
) {
    to.retain(|key, objects| {
        let other = from.get(key);
        objects.retain(|object, info| other.and_then(|o| o.get(object)) == Some(&*info));
        !objects.is_empty()
    });
}

// =============================================================================
// Load Elimination Pass
// =============================================================================

/// Statistics from load elimination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadEliminationStats {
    /// Loads replaced by a known value.
    pub loads_eliminated: usize,
    /// Truncation and extension nodes inserted for narrower loads.
    pub conversions_inserted: usize,
    /// Loop headers whose state was reset because the body writes memory.
    pub loop_states_reset: usize,
    /// Nodes visited by the reducer.
    pub visits: usize,
}

/// Load elimination pass.
#[derive(Debug)]
pub struct LoadElimination {
    states: SecondaryMap<Node, Option<Rc<AbstractState>>>,
    empty: Rc<AbstractState>,
    stats: LoadEliminationStats,
}

impl LoadElimination {
    /// Create the pass.
    pub fn new() -> Self {
        Self {
            states: SecondaryMap::new(),
            empty: Rc::new(AbstractState::new()),
            stats: LoadEliminationStats::default(),
        }
    }

    /// Statistics from the last run.
    pub fn stats(&self) -> &LoadEliminationStats {
        &self.stats
    }

    /// State computed for an effect-producing node in the last run.
    pub fn state_at(&self, node: NodeId) -> Option<&AbstractState> {
        self.states.get(node).as_deref()
    }

    fn state(&self, node: NodeId) -> Option<Rc<AbstractState>> {
        self.states.get(node).clone()
    }

    fn reduce_load_from_object(&mut self, graph: &mut Graph, node: NodeId, ty: MachineType) -> Reduction {
        let n = graph.node(node);
        let (Some(object), Some(offset), Some(effect)) =
            (n.value_input(0), n.value_input(1), n.effect_input(0))
        else {
            return Reduction::NoChange;
        };
        let Some(state) = self.state(effect) else {
            return Reduction::NoChange;
        };

        let class = ObjectClass::of(graph, object);
        let offset = FieldOffset::of(graph, offset);
        let representation = ty.representation;
        if let Some(info) = state.lookup(class, object, offset) {
            // Never reuse a value recorded with an incompatible
            // representation, or resurrect a killed node.
            if info.representation.subsumes(representation) && !graph.node(info.value).is_dead() {
                let replacement = self.truncate_and_extend(graph, info.value, info.representation, ty);
                log::trace!("load {node} replaced by {replacement}");
                graph.replace_uses_by_kind(node, Some(replacement), Some(effect), None);
                self.stats.loads_eliminated += 1;
                return Reduction::Replace(replacement);
            }
        }

        let state = state.add_field(class, object, offset, node, representation);
        self.update_state(node, Rc::new(state))
    }

    fn reduce_store_to_object(&mut self, graph: &Graph, node: NodeId, ty: MachineType) -> Reduction {
        let n = graph.node(node);
        let (Some(object), Some(offset), Some(value), Some(effect)) = (
            n.value_input(0),
            n.value_input(1),
            n.value_input(2),
            n.effect_input(0),
        ) else {
            return Reduction::NoChange;
        };
        let Some(state) = self.state(effect) else {
            return Reduction::NoChange;
        };

        let class = ObjectClass::of(graph, object);
        let offset = FieldOffset::of(graph, offset);
        let representation = ty.representation;
        let state = state
            .kill_field(class, object, offset, representation)
            .add_field(class, object, offset, value, representation);
        self.update_state(node, Rc::new(state))
    }

    fn reduce_effect_phi(&mut self, graph: &Graph, node: NodeId) -> Reduction {
        let n = graph.node(node);
        let (Some(effect0), Some(control)) = (n.effect_input(0), n.control_input(0)) else {
            return Reduction::NoChange;
        };
        let Some(state0) = self.state(effect0) else {
            return Reduction::NoChange;
        };

        if let Operator::Control(ControlOp::Loop(_)) = graph.op(control) {
            // Reducible loops only: the entry edge dominates the header.
            let state = self.compute_loop_state(graph, node, state0);
            return self.update_state(node, state);
        }

        let mut inputs = Vec::with_capacity(n.effect_inputs().len());
        for &effect in &n.effect_inputs()[1..] {
            let Some(state) = self.state(effect) else {
                return Reduction::NoChange;
            };
            inputs.push(state);
        }

        let mut state = (*state0).clone();
        for other in &inputs {
            state.intersect_with(other);
        }
        self.update_state(node, Rc::new(state))
    }

    /// Entry state, or the empty state if anything reachable backwards from
    /// the back edges may write memory.
    fn compute_loop_state(
        &mut self,
        graph: &Graph,
        phi: NodeId,
        entry: Rc<AbstractState>,
    ) -> Rc<AbstractState> {
        let mut visited = BitSet::with_capacity(graph.len());
        visited.insert(phi.as_usize());
        let mut queue: VecDeque<NodeId> = graph.node(phi).effect_inputs()[1..].iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.as_usize()) {
                continue;
            }
            let node = graph.node(current);
            if !node.op.has_property(OpProperties::NO_WRITE) {
                log::trace!("loop {phi} reset by {current}:{}", node.op.mnemonic());
                self.stats.loop_states_reset += 1;
                return self.empty.clone();
            }
            queue.extend(node.effect_inputs().iter().copied());
        }
        entry
    }

    fn reduce_call(&mut self, graph: &Graph, node: NodeId) -> Reduction {
        let target = graph.node(node).value_input(0);
        if target.map(|t| graph.op(t)) == Some(Operator::ExternalConstant(ExternalRef::CheckObjectType)) {
            return self.propagate_input_state(graph, node);
        }
        self.reduce_other_node(graph, node)
    }

    fn reduce_other_node(&mut self, graph: &Graph, node: NodeId) -> Reduction {
        let n = graph.node(node);
        if n.op.effect_input_count() != 1 || n.op.effect_output_count() != 1 {
            return Reduction::NoChange;
        }
        let Some(effect) = n.effect_input(0) else {
            return Reduction::NoChange;
        };
        // Unknown predecessor: wait until it is computed.
        let Some(state) = self.state(effect) else {
            return Reduction::NoChange;
        };
        let next = if n.op.has_property(OpProperties::NO_WRITE) {
            state
        } else {
            self.empty.clone()
        };
        self.update_state(node, next)
    }

    fn propagate_input_state(&mut self, graph: &Graph, node: NodeId) -> Reduction {
        let Some(effect) = graph.node(node).effect_input(0) else {
            return Reduction::NoChange;
        };
        match self.state(effect) {
            Some(state) => self.update_state(node, state),
            None => Reduction::NoChange,
        }
    }

    /// Publish `state` for `node`; `Changed` only if it differs.
    fn update_state(&mut self, node: NodeId, state: Rc<AbstractState>) -> Reduction {
        if let Some(current) = self.states.get(node) {
            if Rc::ptr_eq(current, &state) || **current == *state {
                return Reduction::NoChange;
            }
        }
        self.states.set(node, Some(state));
        Reduction::Changed(node)
    }

    /// Adapt a recorded value of representation `from` to a load of `to`.
    fn truncate_and_extend(
        &mut self,
        graph: &mut Graph,
        value: NodeId,
        from: MachineRepresentation,
        to: MachineType,
    ) -> NodeId {
        debug_assert!(from.subsumes(to.representation));
        let width = to.element_size() as i32;

        if to == MachineType::INT8 || to == MachineType::INT16 {
            // Narrow, then sign-extend back to 32 bits with a shift pair.
            let narrowed = self.truncate_word64(graph, value, from);
            let shift = graph.insert_synthetic(Operator::Int32Constant(32 - 8 * width), &[]);
            let shl = graph.insert_synthetic(Operator::Word(WordOp::Word32Shl), &[narrowed, shift]);
            self.stats.conversions_inserted += 2;
            graph.insert_synthetic(Operator::Word(WordOp::Word32Sar), &[shl, shift])
        } else if to == MachineType::UINT8 || to == MachineType::UINT16 {
            let narrowed = self.truncate_word64(graph, value, from);
            let mask = graph.insert_synthetic(Operator::Int32Constant((1 << (8 * width)) - 1), &[]);
            self.stats.conversions_inserted += 1;
            graph.insert_synthetic(Operator::Word(WordOp::Word32And), &[narrowed, mask])
        } else if from == MachineRepresentation::Word64
            && to.representation == MachineRepresentation::Word32
        {
            self.truncate_word64(graph, value, from)
        } else {
            value
        }
    }

    fn truncate_word64(&mut self, graph: &mut Graph, value: NodeId, from: MachineRepresentation) -> NodeId {
        if from != MachineRepresentation::Word64 {
            return value;
        }
        self.stats.conversions_inserted += 1;
        graph.insert_synthetic(Operator::Word(WordOp::TruncateInt64ToInt32), &[value])
    }
}

impl Default for LoadElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl Reducer for LoadElimination {
    fn name(&self) -> &'static str {
        "load-elimination"
    }

    fn reduce(&mut self, graph: &mut Graph, node: NodeId) -> Reduction {
        let op = graph.op(node);
        if op.effect_input_count() > 0 {
            log::trace!("visit {node}:{}", op.mnemonic());
        }
        match op {
            Operator::Memory(MemoryOp::LoadFromObject(ty)) => {
                self.reduce_load_from_object(graph, node, ty)
            }
            Operator::Memory(MemoryOp::StoreToObject(ty)) => {
                self.reduce_store_to_object(graph, node, ty)
            }
            // Debug instructions must not change what gets optimized.
            Operator::DebugBreak | Operator::AbortCsaAssert => {
                self.propagate_input_state(graph, node)
            }
            Operator::Call { .. } => self.reduce_call(graph, node),
            Operator::EffectPhi(_) => self.reduce_effect_phi(graph, node),
            Operator::Control(ControlOp::Dead) => Reduction::NoChange,
            Operator::Control(ControlOp::Start) => {
                let empty = self.empty.clone();
                self.update_state(node, empty)
            }
            _ => self.reduce_other_node(graph, node),
        }
    }
}

impl OptimizationPass for LoadElimination {
    fn name(&self) -> &'static str {
        "load-elimination"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        self.states.clear();
        self.stats = LoadEliminationStats::default();

        let reduced = GraphReducer::new().reduce_graph(graph, self);
        self.stats.visits = reduced.visits;

        log::debug!(
            "load elimination: {} loads eliminated, {} conversions, {} loop resets",
            self.stats.loads_eliminated,
            self.stats.conversions_inserted,
            self.stats.loop_states_reset
        );
        self.stats.loads_eliminated > 0
    }
}

// =============================================================================
// Tests
// =============================================================================
