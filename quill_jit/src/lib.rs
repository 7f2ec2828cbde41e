//! Quill JIT memory optimizations.
//!
//! A sea-of-nodes IR with explicit effect chains, and two passes over it:
//!
//! - **Load elimination**: forwards known field contents to later loads on
//!   the same effect chain, using a fresh/constant/arbitrary aliasing model
//! - **Address reassociation**: shares one `base + reg` computation between
//!   protected memory accesses that differ only in their immediate offset
//!
//! # Usage
//!
//! ```
//! use quill_jit::ir::{Graph, MachineType};
//! use quill_jit::opt::pipeline::optimize;
//!
//! let mut g = Graph::new();
//! let object = g.parameter(0);
//! let value = g.parameter(1);
//! let offset = g.int32_constant(8);
//! let store = g.store_to_object(MachineType::ANY_TAGGED, object, offset, value, g.start, g.start);
//! let load = g.load_from_object(MachineType::ANY_TAGGED, object, offset, store, g.start);
//! let ret = g.return_value(load, load, g.start);
//!
//! optimize(&mut g);
//! assert_eq!(g.node(ret).value_input(0), Some(value));
//! ```
#![warn(missing_docs)]

pub mod ir;
pub mod opt;

pub use ir::{Graph, IrError, MachineRepresentation, MachineType, NodeId, Operator, PointerSize};
pub use opt::{
    AddressReassociation, LoadElimination, OptPipeline, OptimizationPass, PipelineConfig,
};
