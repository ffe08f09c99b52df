// src/dag/builder.rs

//! Build the planner's node graph from the abstract op graph and buffer
//! table, then charge every node its memory delta.
//!
//! After this phase the graph is a DAG in which every reusable buffer has
//! exactly one well-defined release point:
//! - zero consumers: the producer releases its own buffer;
//! - one consumer: that consumer inherits the release;
//! - several consumers: a synthetic release node runs after all of them,
//!   shared between buffers that die with the same consumer set.

use tracing::debug;

use crate::dag::node::{NodeArena, NodeId};
use crate::dag::DataflowGraph;

/// The built planner graph: the arena, the list of live node ids (ops
/// first, then synthetic releases) and the number of caller-visible ops.
pub(crate) struct BuiltGraph {
    pub arena: NodeArena,
    pub active: Vec<NodeId>,
    pub op_count: usize,
}

pub(crate) fn build(graph: &DataflowGraph) -> BuiltGraph {
    let mut arena = NodeArena::new();
    let op_count = graph.ops.len();

    // One node per op; `NodeId` and `OpId` coincide for real ops.
    for (op, spec) in graph.ops.iter().enumerate() {
        arena.new_op(op, spec.reusable);
    }

    connect_dependencies(&mut arena, graph);

    let consumers = normalized_consumers(graph, op_count);
    let mut active: Vec<NodeId> = (0..op_count).collect();
    charge_memory(&mut arena, &mut active, graph, &consumers);

    debug!(
        ops = op_count,
        releases = active.len() - op_count,
        "planner graph built"
    );

    BuiltGraph {
        arena,
        active,
        op_count,
    }
}

/// Mirror every data and control dependency that lies inside the
/// sub-graph. References to ops outside it are ignored.
fn connect_dependencies(arena: &mut NodeArena, graph: &DataflowGraph) {
    let op_count = graph.ops.len();
    for (op, spec) in graph.ops.iter().enumerate() {
        for &dep in spec.data_deps.iter().chain(spec.control_deps.iter()) {
            if dep < op_count && dep != op {
                arena.connect(dep, op);
            }
        }
    }
}

/// Per-buffer consumer sets restricted to the sub-graph, sorted and
/// de-duplicated. A buffer nobody consumes is consumed by its producer.
fn normalized_consumers(graph: &DataflowGraph, op_count: usize) -> Vec<Vec<NodeId>> {
    graph
        .buffers
        .iter()
        .map(|buffer| {
            let mut consumers: Vec<NodeId> = buffer
                .consumers
                .iter()
                .copied()
                .filter(|&c| c < op_count)
                .collect();
            if consumers.is_empty() {
                consumers.push(buffer.producer);
            }
            consumers.sort_unstable();
            consumers.dedup();
            consumers
        })
        .collect()
}

/// Compute `memory_increment`, `peak_memory` and `max_difference` for all
/// nodes, creating or merging synthetic release nodes as needed.
fn charge_memory(
    arena: &mut NodeArena,
    active: &mut Vec<NodeId>,
    graph: &DataflowGraph,
    consumers: &[Vec<NodeId>],
) {
    // Producing a reusable buffer raises both the increment and the peak.
    for buffer in graph.buffers.iter() {
        let producer = buffer.producer;
        if arena.nodes[producer].is_reusable {
            arena.nodes[producer].memory_increment += buffer.size;
            arena.nodes[producer].peak_memory += buffer.size;
        }
    }

    // Charge each release to the node that performs it.
    for (buffer_id, buffer) in graph.buffers.iter().enumerate() {
        if !arena.nodes[buffer.producer].is_reusable {
            continue;
        }
        let consumer_set = &consumers[buffer_id];
        if consumer_set.len() == 1 {
            // The single consumer inherits the release: its increment
            // drops while its transient peak stays where it was.
            let consumer = consumer_set[0];
            arena.nodes[consumer].memory_increment -= buffer.size;
            arena.nodes[consumer].max_difference += buffer.size;
            continue;
        }
        if let Some(existing) = find_mergeable_release(arena, consumers, consumer_set) {
            // Another buffer dies with the same consumers; amortize one
            // release event across both.
            arena.nodes[existing].memory_increment -= buffer.size;
            arena.nodes[existing].max_difference += buffer.size;
            continue;
        }
        let release = arena.new_release(buffer_id, buffer.size);
        for &consumer in consumer_set {
            arena.connect(consumer, release);
        }
        active.push(release);
    }

    for &id in active.iter() {
        let node = &arena.nodes[id];
        assert_eq!(
            node.peak_memory,
            node.memory_increment + node.max_difference,
            "memory accounting out of sync after graph construction"
        );
    }
}

/// Look through the first consumer's successors for an existing release
/// node whose buffer has exactly the same consumer set.
fn find_mergeable_release(
    arena: &NodeArena,
    consumers: &[Vec<NodeId>],
    consumer_set: &[NodeId],
) -> Option<NodeId> {
    let first_consumer = consumer_set[0];
    for &out in arena.nodes[first_consumer].outs.iter() {
        let Some(buffer_id) = arena.nodes[out].buffer else {
            continue;
        };
        if consumers[buffer_id] == consumer_set {
            return Some(out);
        }
    }
    None
}

/// Check that the memory bookkeeping still balances; the sum of all
/// increments must equal the bytes of reusable buffers never released
/// (which is zero, since every buffer has a release point).
#[cfg(test)]
fn total_increment(arena: &NodeArena, active: &[NodeId]) -> i64 {
    active.iter().map(|&id| arena.nodes[id].memory_increment).sum()
}
