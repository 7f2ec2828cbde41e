//! Optimization passes.
//!
//! # Passes
//!
//! - **Load elimination** (`load_elimination.rs`): forwards stored and
//!   previously loaded field values to later loads on the same effect chain
//! - **Address reassociation** (`address_reassociation.rs`): rewrites
//!   `mem[(base + imm) + reg]` into `mem[(base + reg) + imm]` when enough
//!   accesses share `base + reg`
//!
//! Both passes are driven through [`OptimizationPass`]; load elimination is
//! also a [`Reducer`] run by [`GraphReducer`].

pub mod address_reassociation;
pub mod load_elimination;
pub mod pipeline;
pub mod reducer;

pub use address_reassociation::{AddressReassociation, ReassociationStats};
pub use load_elimination::{AbstractState, LoadElimination, LoadEliminationStats};
pub use pipeline::{OptPipeline, PassPhase, PassStat, PipelineConfig, PipelineStats};
pub use reducer::{GraphReducer, Reducer, Reduction, ReducerStats};

use crate::ir::graph::Graph;

/// A whole-graph optimization pass.
pub trait OptimizationPass {
    /// Pass name for statistics and logging.
    fn name(&self) -> &'static str;

    /// Run the pass. Returns `true` if the graph changed.
    fn run(&mut self, graph: &mut Graph) -> bool;
}
