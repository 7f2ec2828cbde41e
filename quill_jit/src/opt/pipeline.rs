//! Optimization Pipeline.
//!
//! Runs the memory optimization passes in order and collects per-pass
//! statistics.
//!
//! # Pass Phases
//!
//! 1. **Memory**: load elimination, iterated until nothing changes
//! 2. **Addressing**: address reassociation, run once
//!
//! Load elimination must run before reassociation: eliminated loads would
//! otherwise be counted towards a shared base they no longer need.

use super::address_reassociation::{AddressReassociation, DEFAULT_THRESHOLD};
use super::load_elimination::LoadElimination;
use super::OptimizationPass;
use crate::ir::graph::Graph;
use crate::ir::machine::PointerSize;

use std::time::{Duration, Instant};

// =============================================================================
// Pass Phase
// =============================================================================

/// Phase of the optimization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassPhase {
    /// Memory access optimizations.
    Memory,
    /// Address computation rewriting.
    Addressing,
}

impl PassPhase {
    const ALL: [PassPhase; 2] = [PassPhase::Memory, PassPhase::Addressing];

    /// Whether passes in this phase are re-run until they report no change.
    fn iterates(self) -> bool {
        matches!(self, PassPhase::Memory)
    }
}

// =============================================================================
// Pass Entry
// =============================================================================

/// A registered pass in the pipeline.
struct PassEntry {
    pass: Box<dyn OptimizationPass>,
    phase: PassPhase,
    enabled: bool,
    runs: usize,
    changes: usize,
    time: Duration,
}

impl PassEntry {
    fn new<P: OptimizationPass + 'static>(pass: P, phase: PassPhase) -> Self {
        Self {
            pass: Box::new(pass),
            phase,
            enabled: true,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Configuration for the optimization pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Enable load elimination.
    pub enable_load_elimination: bool,

    /// Enable address reassociation.
    pub enable_address_reassociation: bool,

    /// A `(base, reg, chain)` group is rewritten only with strictly more
    /// members than this.
    pub reassociation_threshold: usize,

    /// Target pointer width; selects `Int32Add` or `Int64Add` for new bases.
    pub pointer_size: PointerSize,

    /// Maximum iterations of an iterating phase.
    pub max_iterations_per_phase: usize,

    /// Collect timing statistics.
    pub collect_timing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_load_elimination: true,
            enable_address_reassociation: true,
            reassociation_threshold: DEFAULT_THRESHOLD,
            pointer_size: PointerSize::Word64,
            max_iterations_per_phase: 3,
            collect_timing: true,
        }
    }
}

impl PipelineConfig {
    /// Load elimination only, no timing.
    pub fn minimal() -> Self {
        Self {
            enable_address_reassociation: false,
            max_iterations_per_phase: 1,
            collect_timing: false,
            ..Default::default()
        }
    }

    /// Every pass, iterated further.
    pub fn full() -> Self {
        Self {
            max_iterations_per_phase: 8,
            ..Default::default()
        }
    }

    /// Default configuration for a target with `pointer_size`.
    pub fn for_target(pointer_size: PointerSize) -> Self {
        Self {
            pointer_size,
            ..Default::default()
        }
    }
}

// =============================================================================
// Optimization Pipeline
// =============================================================================

/// The memory optimization pipeline.
pub struct OptPipeline {
    config: PipelineConfig,
    passes: Vec<PassEntry>,
    total_iterations: usize,
    total_time: Duration,
}

impl OptPipeline {
    /// Create a new pipeline with default configuration.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Create a pipeline with custom configuration.
    pub fn with_config(config: PipelineConfig) -> Self {
        let mut pipeline = Self {
            config,
            passes: Vec::new(),
            total_iterations: 0,
            total_time: Duration::ZERO,
        };

        pipeline.register_default_passes();
        pipeline
    }

    fn register_default_passes(&mut self) {
        if self.config.enable_load_elimination {
            self.register(LoadElimination::new(), PassPhase::Memory);
        }
        if self.config.enable_address_reassociation {
            let pass = AddressReassociation::with_threshold(
                self.config.pointer_size,
                self.config.reassociation_threshold,
            );
            self.register(pass, PassPhase::Addressing);
        }
    }

    /// Register a custom pass.
    pub fn register<P: OptimizationPass + 'static>(&mut self, pass: P, phase: PassPhase) {
        self.passes.push(PassEntry::new(pass, phase));
    }

    /// Enable or disable every registered pass named `name`.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        for entry in &mut self.passes {
            if entry.pass.name() == name {
                entry.enabled = enabled;
            }
        }
    }

    /// Run the optimization pipeline on a graph.
    pub fn run(&mut self, graph: &mut Graph) -> PipelineStats {
        let start = Instant::now();
        let initial_size = graph.live_count();

        let mut stats = PipelineStats::default();
        let mut iterations = 0;
        for phase in PassPhase::ALL {
            iterations += self.run_phase(graph, phase, &mut stats);
        }

        self.total_iterations = iterations;
        self.total_time = start.elapsed();

        stats.total_iterations = iterations;
        stats.total_time = self.total_time;
        stats.initial_size = initial_size;
        stats.final_size = graph.live_count();

        log::debug!(
            "pipeline: {} iterations, {} -> {} live nodes in {:?}",
            iterations,
            initial_size,
            stats.final_size,
            stats.total_time
        );
        stats
    }

    /// Run all passes of `phase`. Returns the number of iterations.
    fn run_phase(&mut self, graph: &mut Graph, phase: PassPhase, stats: &mut PipelineStats) -> usize {
        let max_iterations = if phase.iterates() {
            self.config.max_iterations_per_phase.max(1)
        } else {
            1
        };

        let mut iterations = 0;
        while iterations < max_iterations {
            iterations += 1;
            let mut iter_changed = false;

            for entry in &mut self.passes {
                if entry.phase != phase || !entry.enabled {
                    continue;
                }

                let start = self.config.collect_timing.then(Instant::now);
                let changed = entry.pass.run(graph);
                if let Some(start) = start {
                    entry.time += start.elapsed();
                }

                entry.runs += 1;
                if changed {
                    entry.changes += 1;
                    iter_changed = true;
                }
            }

            if !iter_changed {
                break;
            }
        }

        stats.phases_run += 1;
        iterations
    }

    /// Per-pass statistics.
    pub fn pass_stats(&self) -> Vec<PassStat> {
        self.passes
            .iter()
            .map(|e| PassStat {
                name: e.pass.name().to_string(),
                phase: e.phase,
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }

    /// Configuration in use.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Total iterations of the last run.
    #[inline]
    pub fn iterations(&self) -> usize {
        self.total_iterations
    }

    /// Time spent in the last run.
    #[inline]
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
}

impl Default for OptPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from a single pass.
#[derive(Debug, Clone)]
pub struct PassStat {
    /// Pass name.
    pub name: String,
    /// Pass phase.
    pub phase: PassPhase,
    /// Number of times run.
    pub runs: usize,
    /// Number of times it made changes.
    pub changes: usize,
    /// Total time spent in this pass; zero unless timing is collected.
    pub time: Duration,
}

/// Statistics from the entire pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total iterations across all phases.
    pub total_iterations: usize,
    /// Number of phases run.
    pub phases_run: usize,
    /// Total time spent.
    pub total_time: Duration,
    /// Live nodes before.
    pub initial_size: usize,
    /// Live nodes after.
    pub final_size: usize,
}

impl PipelineStats {
    /// Ratio of final to initial live nodes.
    pub fn size_reduction(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Quick Optimize Functions
// =============================================================================

/// Run the default pipeline on a graph.
pub fn optimize(graph: &mut Graph) -> PipelineStats {
    OptPipeline::new().run(graph)
}

/// Run the minimal pipeline on a graph.
pub fn optimize_minimal(graph: &mut Graph) -> PipelineStats {
    OptPipeline::with_config(PipelineConfig::minimal()).run(graph)
}

/// Run the full pipeline on a graph.
pub fn optimize_full(graph: &mut Graph) -> PipelineStats {
    OptPipeline::with_config(PipelineConfig::full()).run(graph)
}

// =============================================================================
// Tests
// =============================================================================
