//! Reducer framework.
//!
//! A [`Reducer`] looks at one node at a time and reports whether it changed
//! or replaced it. [`GraphReducer`] drives a reducer over the whole graph:
//!
//! 1. Depth-first from `End`, reducing each node after its inputs (inputs
//!    already on the stack, such as loop back edges, are skipped).
//! 2. When a node changes, its users are queued for another visit.
//! 3. When a node is replaced, its remaining uses move to the replacement,
//!    the node is killed and its former users are queued.
//!
//! The drive loop runs until both the stack and the revisit queue are empty.

use crate::ir::arena::SecondaryMap;
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};

use std::collections::VecDeque;

// =============================================================================
// Reduction
// =============================================================================

/// Outcome of reducing a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Nothing learned or changed.
    NoChange,
    /// The node itself (or information about it) changed.
    Changed(NodeId),
    /// The node should be replaced by another node.
    Replace(NodeId),
}

impl Reduction {
    /// Check if anything changed.
    #[inline]
    pub fn changed(self) -> bool {
        !matches!(self, Reduction::NoChange)
    }

    /// The node now standing for the reduced one.
    #[inline]
    pub fn replacement(self) -> Option<NodeId> {
        match self {
            Reduction::NoChange => None,
            Reduction::Changed(n) | Reduction::Replace(n) => Some(n),
        }
    }
}

/// A per-node graph rewriting rule.
pub trait Reducer {
    /// Name for logging.
    fn name(&self) -> &'static str;

    /// Reduce `node`. A reducer returning [`Reduction::Replace`] is
    /// responsible for rewiring effect and control uses first; the driver
    /// only moves the uses that remain.
    fn reduce(&mut self, graph: &mut Graph, node: NodeId) -> Reduction;
}

// =============================================================================
// Graph Reducer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
enum VisitState {
    #[default]
    Unvisited,
    Revisit,
    OnStack,
    Visited,
}

#[derive(Debug, Clone, Copy)]
struct StackEntry {
    node: NodeId,
    input_index: usize,
}

/// Counters from one [`GraphReducer::reduce_graph`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReducerStats {
    /// Calls to [`Reducer::reduce`].
    pub visits: usize,
    /// Reductions reporting [`Reduction::Changed`].
    pub changed: usize,
    /// Reductions reporting [`Reduction::Replace`].
    pub replaced: usize,
    /// Nodes queued for revisiting.
    pub revisits: usize,
}

/// Drives a [`Reducer`] over a graph.
#[derive(Debug, Default)]
pub struct GraphReducer {
    state: SecondaryMap<Node, VisitState>,
    stack: Vec<StackEntry>,
    revisit: VecDeque<NodeId>,
    stats: ReducerStats,
}

impl GraphReducer {
    /// Create a driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reduce every node reachable from `End` until nothing changes.
    pub fn reduce_graph(&mut self, graph: &mut Graph, reducer: &mut dyn Reducer) -> ReducerStats {
        self.state.clear();
        self.stack.clear();
        self.revisit.clear();
        self.stats = ReducerStats::default();

        let end = graph.end;
        self.reduce_node(graph, reducer, end);

        log::trace!(
            "{}: {} visits, {} changed, {} replaced",
            reducer.name(),
            self.stats.visits,
            self.stats.changed,
            self.stats.replaced
        );
        self.stats
    }

    fn reduce_node(&mut self, graph: &mut Graph, reducer: &mut dyn Reducer, node: NodeId) {
        self.push(node);
        loop {
            if !self.stack.is_empty() {
                self.reduce_top(graph, reducer);
            } else if let Some(next) = self.revisit.pop_front() {
                if self.state[next] == VisitState::Revisit {
                    self.push(next);
                }
            } else {
                break;
            }
        }
    }

    fn reduce_top(&mut self, graph: &mut Graph, reducer: &mut dyn Reducer) {
        let Some(&StackEntry { node, input_index }) = self.stack.last() else {
            return;
        };
        if graph.node(node).is_dead() {
            self.pop();
            return;
        }

        if self.recurse_inputs(graph, node, input_index) {
            return;
        }

        let max_id = graph.len();
        self.stats.visits += 1;
        match reducer.reduce(graph, node) {
            Reduction::NoChange => self.pop(),
            Reduction::Changed(changed) if changed == node => {
                self.stats.changed += 1;
                if self.recurse_inputs(graph, node, 0) {
                    return;
                }
                self.pop();
                self.revisit_users(graph, node);
            }
            Reduction::Changed(_) => self.pop(),
            Reduction::Replace(replacement) => {
                self.stats.replaced += 1;
                self.pop();
                self.replace(graph, node, replacement, max_id);
            }
        }
    }

    /// Push the first unvisited input at or after `from`. Returns `true` if
    /// one was pushed; the top entry then resumes after it.
    fn recurse_inputs(&mut self, graph: &Graph, node: NodeId, from: usize) -> bool {
        let inputs = &graph.node(node).inputs;
        for (i, &input) in inputs.iter().enumerate().skip(from) {
            if input != node && self.state[input] <= VisitState::Revisit {
                if let Some(top) = self.stack.last_mut() {
                    top.input_index = i + 1;
                }
                self.push(input);
                return true;
            }
        }
        false
    }

    fn replace(&mut self, graph: &mut Graph, node: NodeId, replacement: NodeId, max_id: usize) {
        if replacement == node {
            return;
        }
        let mut users = graph.uses(node).to_vec();
        users.sort_unstable();
        users.dedup();

        graph.replace_all_uses(node, replacement);
        graph.kill(node);
        for user in users {
            self.revisit_node(user);
        }
        if replacement.as_usize() >= max_id && self.state[replacement] <= VisitState::Revisit {
            self.push(replacement);
        }
    }

    fn revisit_users(&mut self, graph: &Graph, node: NodeId) {
        let users: Vec<NodeId> = graph.uses(node).to_vec();
        for user in users {
            if user != node {
                self.revisit_node(user);
            }
        }
    }

    fn revisit_node(&mut self, node: NodeId) {
        if self.state[node] == VisitState::Visited {
            self.state.set(node, VisitState::Revisit);
            self.revisit.push_back(node);
            self.stats.revisits += 1;
        }
    }

    fn push(&mut self, node: NodeId) {
        self.state.set(node, VisitState::OnStack);
        self.stack.push(StackEntry {
            node,
            input_index: 0,
        });
    }

    fn pop(&mut self) {
        if let Some(entry) = self.stack.pop() {
            self.state.set(entry.node, VisitState::Visited);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
