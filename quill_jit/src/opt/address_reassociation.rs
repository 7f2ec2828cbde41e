//! Address reassociation.
//!
//! Protected memory accesses often compute their address as
//!
//! ```text
//! ProtectedLoad(IntPtrAdd(base, imm), reg)
//! ProtectedLoad(base, IntPtrAdd(reg, imm))
//! ```
//!
//! Several accesses on one effect chain frequently share `base` and `reg`
//! and differ only in `imm`. When more than `threshold` of them do, this
//! pass creates one `IntPtrAdd(base, reg)` and rewrites each access to
//!
//! ```text
//! ProtectedLoad(new_base, imm)
//! ```
//!
//! so the immediate can be folded into the addressing mode and the shared
//! base is computed once. Grouping by effect chain keeps the new base's live
//! range short.

use super::OptimizationPass;
use crate::ir::graph::Graph;
use crate::ir::machine::PointerSize;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, MemoryOp, OpProperties, Operator, WordOp};

use rustc_hash::FxHashMap;

/// Default minimum group size, exclusive.
pub const DEFAULT_THRESHOLD: usize = 2;

/// Statistics from address reassociation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassociationStats {
    /// Memory operations matching either address pattern.
    pub candidates: usize,
    /// Distinct `(base, reg, effect chain)` keys seen.
    pub distinct_keys: usize,
    /// Shared base nodes created; one per rewritten key.
    pub shared_base_nodes: usize,
    /// Memory operations rewritten to use a shared base.
    pub ops_rewritten: usize,
}

/// `(base, reg, effect chain root)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CandidateKey {
    base: NodeId,
    reg: NodeId,
    effect_chain: NodeId,
}

#[derive(Debug, Default)]
struct CandidateMemOps {
    mem_ops: Vec<NodeId>,
    imm_offsets: Vec<NodeId>,
}

impl CandidateMemOps {
    fn add(&mut self, mem_op: NodeId, imm_offset: NodeId) {
        self.mem_ops.push(mem_op);
        self.imm_offsets.push(imm_offset);
    }

    fn len(&self) -> usize {
        debug_assert_eq!(self.mem_ops.len(), self.imm_offsets.len());
        self.mem_ops.len()
    }
}

/// Address reassociation pass.
#[derive(Debug)]
pub struct AddressReassociation {
    pointer_size: PointerSize,
    threshold: usize,
    /// Keys in first-seen order, so rewriting is deterministic.
    order: Vec<CandidateKey>,
    candidates: FxHashMap<CandidateKey, CandidateMemOps>,
    stats: ReassociationStats,
}

impl AddressReassociation {
    /// Create the pass for `pointer_size` with the default threshold.
    pub fn new(pointer_size: PointerSize) -> Self {
        Self::with_threshold(pointer_size, DEFAULT_THRESHOLD)
    }

    /// Create the pass, rewriting keys with more than `threshold` members.
    pub fn with_threshold(pointer_size: PointerSize, threshold: usize) -> Self {
        Self {
            pointer_size,
            threshold,
            order: Vec::new(),
            candidates: FxHashMap::default(),
            stats: ReassociationStats::default(),
        }
    }

    /// Statistics from the last run.
    pub fn stats(&self) -> &ReassociationStats {
        &self.stats
    }

    /// Record `node` if its address matches either pattern.
    pub fn visit_mem_op(&mut self, graph: &Graph, node: NodeId, effect_chain: NodeId) {
        let n = graph.node(node);
        debug_assert!(matches!(
            n.op,
            Operator::Memory(MemoryOp::ProtectedLoad(_) | MemoryOp::ProtectedStore(_))
        ));
        let (Some(base), Some(index)) = (n.value_input(0), n.value_input(1)) else {
            return;
        };

        // Base component: mem[(base + imm) + reg].
        if let Some((add_base, imm)) = match_add_imm(graph, base) {
            self.add_candidate(node, add_base, index, imm, effect_chain);
            return;
        }
        // Index component: mem[base + (reg + imm)].
        if let Some((reg, imm)) = match_add_imm(graph, index) {
            self.add_candidate(node, base, reg, imm, effect_chain);
        }
    }

    fn add_candidate(&mut self, mem_op: NodeId, base: NodeId, reg: NodeId, imm: NodeId, effect_chain: NodeId) {
        let key = CandidateKey {
            base,
            reg,
            effect_chain,
        };
        self.stats.candidates += 1;
        if !self.candidates.contains_key(&key) {
            self.order.push(key);
        }
        self.candidates.entry(key).or_default().add(mem_op, imm);
    }

    /// Rewrite every key with enough members.
    pub fn optimize(&mut self, graph: &mut Graph) -> bool {
        self.stats.distinct_keys = self.order.len();
        let add = match self.pointer_size {
            PointerSize::Word32 => WordOp::Int32Add,
            PointerSize::Word64 => WordOp::Int64Add,
        };

        let mut changed = false;
        for key in &self.order {
            let Some(group) = self.candidates.get(key) else {
                continue;
            };
            if group.len() <= self.threshold {
                continue;
            }
            let new_base = graph.insert_synthetic(Operator::Word(add), &[key.base, key.reg]);
            log::trace!(
                "shared base {new_base} = {} + {} for {} ops on chain {}",
                key.base,
                key.reg,
                group.len(),
                key.effect_chain
            );
            for (&mem_op, &imm) in group.mem_ops.iter().zip(&group.imm_offsets) {
                graph.replace_input(mem_op, 0, new_base);
                graph.replace_input(mem_op, 1, imm);
            }
            self.stats.shared_base_nodes += 1;
            self.stats.ops_rewritten += group.len();
            changed = true;
        }
        changed
    }
}

impl OptimizationPass for AddressReassociation {
    fn name(&self) -> &'static str {
        "address-reassociation"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        self.order.clear();
        self.candidates.clear();
        self.stats = ReassociationStats::default();

        let mem_ops: Vec<NodeId> = graph
            .live_nodes()
            .filter(|(_, n)| {
                matches!(
                    n.op,
                    Operator::Memory(MemoryOp::ProtectedLoad(_) | MemoryOp::ProtectedStore(_))
                )
            })
            .map(|(id, _)| id)
            .collect();
        for node in mem_ops {
            let chain = effect_chain_root(graph, node);
            self.visit_mem_op(graph, node, chain);
        }

        let changed = self.optimize(graph);
        log::debug!(
            "address reassociation: {} candidates, {} keys, {} shared bases, {} ops rewritten",
            self.stats.candidates,
            self.stats.distinct_keys,
            self.stats.shared_base_nodes,
            self.stats.ops_rewritten
        );
        changed
    }
}

/// Match `x + c` where `c` is an integer constant, moving a constant left
/// operand to the right.
fn match_add_imm(graph: &Graph, node: NodeId) -> Option<(NodeId, NodeId)> {
    let n = graph.node(node);
    if !matches!(n.op, Operator::Word(WordOp::Int32Add | WordOp::Int64Add)) {
        return None;
    }
    let (mut lhs, mut rhs) = (n.value_input(0)?, n.value_input(1)?);
    let is_const = |id: NodeId| graph.node(id).as_int_constant().is_some();
    if n.op.has_property(OpProperties::COMMUTATIVE) && is_const(lhs) && !is_const(rhs) {
        std::mem::swap(&mut lhs, &mut rhs);
    }
    is_const(rhs).then_some((lhs, rhs))
}

/// Identify the effect chain `node` belongs to: the nearest `Start` or
/// `EffectPhi` reached by following first effect inputs.
pub fn effect_chain_root(graph: &Graph, node: NodeId) -> NodeId {
    let mut current = node;
    loop {
        let n = graph.node(current);
        match n.op {
            Operator::Control(ControlOp::Start) | Operator::EffectPhi(_) => return current,
            _ => {}
        }
        match n.effect_input(0) {
            Some(effect) => current = effect,
            None => return current,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::machine::MachineType;

    /// `count` loads of `(base + imm_i) + reg` chained off `Start`.
    fn chained_loads(g: &mut Graph, base: NodeId, reg: NodeId, count: i64) -> (Vec<NodeId>, NodeId) {
        let mut effect = g.start;
        let mut loads = Vec::new();
        for i in 0..count {
            let imm = g.int64_constant(8 * (i + 1));
            let addr = g.int64_add(base, imm);
            effect = g.protected_load(MachineType::INT32, addr, reg, effect, g.start);
            loads.push(effect);
        }
        (loads, effect)
    }

    #[test]
    fn test_match_add_imm_either_operand_order() {
        let mut g = Graph::new();
        let p = g.parameter(0);
        let q = g.parameter(1);
        let c = g.int64_constant(4);
        let lhs_const = g.int64_add(c, p);
        let rhs_const = g.int64_add(p, c);
        let no_const = g.int64_add(p, q);

        assert_eq!(match_add_imm(&g, lhs_const), Some((p, c)));
        assert_eq!(match_add_imm(&g, rhs_const), Some((p, c)));
        assert_eq!(match_add_imm(&g, no_const), None);
        assert_eq!(match_add_imm(&g, p), None);
    }

    #[test]
    fn test_effect_chain_root_stops_at_start() {
        let mut g = Graph::new();
        let base = g.parameter(0);
        let reg = g.parameter(1);
        let (loads, _) = chained_loads(&mut g, base, reg, 3);
        for load in loads {
            assert_eq!(effect_chain_root(&g, load), g.start);
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut g = Graph::new();
        let base = g.parameter(0);
        let reg = g.parameter(1);
        let (loads, last) = chained_loads(&mut g, base, reg, 2);
        g.return_value(last, last, g.start);

        let mut pass = AddressReassociation::new(PointerSize::Word64);
        assert!(!pass.run(&mut g));
        assert_eq!(pass.stats().shared_base_nodes, 0);
        assert_eq!(pass.stats().distinct_keys, 1);
        assert_ne!(g.node(loads[0]).inputs[0], g.node(loads[1]).inputs[0]);
        assert_eq!(g.node(loads[0]).inputs[1], reg);
    }

    #[test]
    fn test_custom_threshold() {
        let mut g = Graph::new();
        let base = g.parameter(0);
        let reg = g.parameter(1);
        let (loads, _) = chained_loads(&mut g, base, reg, 2);

        let mut pass = AddressReassociation::with_threshold(PointerSize::Word64, 1);
        assert!(pass.run(&mut g));
        assert_eq!(pass.stats().ops_rewritten, 2);
        assert_eq!(g.node(loads[0]).inputs[0], g.node(loads[1]).inputs[0]);
    }
}
