//! Graph intermediate representation.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): index-based node storage and side tables
//! - **Machine** (`machine.rs`): value representations and access widths
//! - **Operators** (`operators.rs`): operator set and input layouts
//! - **Node** (`node.rs`): node definitions
//! - **Graph** (`graph.rs`): the graph, use lists and builders
//!
//! Every node orders its inputs as values, then effects, then controls.
//! Effect edges encode memory ordering; a chain of effect edges inside one
//! basic block is a sequence, and chains only join at `EffectPhi` nodes.

pub mod arena;
pub mod error;
pub mod graph;
pub mod machine;
pub mod node;
pub mod operators;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use error::IrError;
pub use graph::Graph;
pub use machine::{MachineRepresentation, MachineSemantic, MachineType, PointerSize};
pub use node::{InputList, Node, NodeFlags, NodeId};
pub use operators::{
    ControlOp, ExternalRef, MemoryOp, OpCategory, OpProperties, Operator, WordOp,
};
