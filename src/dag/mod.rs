// src/dag/mod.rs

//! Memory-aware execution-order planning for dataflow DAGs.
//!
//! - [`node`] holds the node arena every phase works on.
//! - [`builder`] turns the abstract op graph + buffer table into planner
//!   nodes and charges each node its memory delta.
//! - [`simplify`] shrinks the graph with equivalence-preserving rewrites.
//! - [`scheduler`] greedily picks an execution order that keeps peak live
//!   memory low, then projects it back to caller-visible ops.

pub mod builder;
pub mod node;
pub mod scheduler;
pub mod simplify;

use tracing::debug;

pub use node::{BufferId, OpId};
pub use scheduler::MemoryPlan;

/// One operation of the input graph.
///
/// Dependencies are indices into the same op list; references outside the
/// list (dependencies leaving the planned sub-graph) are ignored.
#[derive(Debug, Clone, Default)]
pub struct OpSpec {
    /// Ops whose outputs this op reads.
    pub data_deps: Vec<OpId>,
    /// Ops that must run first for non-data reasons.
    pub control_deps: Vec<OpId>,
    /// Whether the buffers this op produces may be released once
    /// consumed. Immovable/external buffers are not reusable and take no
    /// part in memory accounting.
    pub reusable: bool,
}

/// One logical buffer: its byte size, the op producing it and the ops
/// reading it. A buffer nobody reads is released by its own producer.
#[derive(Debug, Clone)]
pub struct BufferSpec {
    pub size: i64,
    pub producer: OpId,
    pub consumers: Vec<OpId>,
}

/// The abstract graph handed to the planner: ops plus the buffer table.
#[derive(Debug, Clone, Default)]
pub struct DataflowGraph {
    pub ops: Vec<OpSpec>,
    pub buffers: Vec<BufferSpec>,
}

/// Knobs for one planning call.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Run the graph simplifier before scheduling. Disabling it must not
    /// change which orders are valid, only how large the search space is.
    pub simplify: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self { simplify: true }
    }
}

/// Compute an execution order for `graph` that keeps peak live memory
/// low.
///
/// The returned order contains every op exactly once and respects every
/// data and control dependency. The call is synchronous, deterministic
/// for a fixed input, and owns all of its state; concurrent calls share
/// nothing.
pub fn plan(graph: &DataflowGraph, options: &PlanOptions) -> MemoryPlan {
    let mut built = builder::build(graph);
    if options.simplify {
        simplify::simplify(&mut built.arena, &mut built.active);
        debug!(nodes = built.active.len(), "graph after simplification");
    }
    scheduler::GreedyScheduler::new(built.arena, built.active, built.op_count).run()
}

/// Plan with default options.
pub fn plan_default(graph: &DataflowGraph) -> MemoryPlan {
    plan(graph, &PlanOptions::default())
}
