//! Errors reported for malformed IR.

use super::node::NodeId;
use super::operators::Operator;

/// A structural problem with a node or its edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    /// Input count does not match what the operator expects.
    ArityMismatch {
        /// The operator.
        op: Operator,
        /// Inputs the operator requires.
        expected: usize,
        /// Inputs supplied.
        actual: usize,
    },
    /// An input refers to a node that does not exist.
    DanglingInput {
        /// The node with the bad edge.
        node: Option<NodeId>,
        /// The missing input.
        input: NodeId,
    },
    /// A live node uses a killed node.
    DeadInput {
        /// The user.
        node: NodeId,
        /// The dead input.
        input: NodeId,
    },
    /// A use list is out of sync with the input edges.
    UseListMismatch {
        /// The definition.
        def: NodeId,
        /// The user whose edge is missing or extra.
        user: NodeId,
    },
}

impl std::fmt::Display for IrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrError::ArityMismatch {
                op,
                expected,
                actual,
            } => write!(
                f,
                "{} expects {} inputs, got {}",
                op.mnemonic(),
                expected,
                actual
            ),
            IrError::DanglingInput {
                node: Some(node),
                input,
            } => write!(f, "node {node} has dangling input {input}"),
            IrError::DanglingInput { node: None, input } => {
                write!(f, "new node has dangling input {input}")
            }
            IrError::DeadInput { node, input } => {
                write!(f, "node {node} uses dead node {input}")
            }
            IrError::UseListMismatch { def, user } => {
                write!(f, "use list of {def} disagrees with inputs of {user}")
            }
        }
    }
}

impl std::error::Error for IrError {}
