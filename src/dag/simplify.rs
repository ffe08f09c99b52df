// src/dag/simplify.rs

//! Equivalence-preserving graph rewrites that shrink the scheduling search
//! space without changing memory semantics.
//!
//! Three passes run to a bounded fixed point:
//! - [`fuse_nodes`]: merge single-successor / single-predecessor chains,
//!   recording absorbed nodes in the survivor's pre/post lists;
//! - [`clip_edges`]: drop predecessor edges made redundant by another
//!   predecessor that already reaches them transitively;
//! - [`order_releases`]: add ordering edges between release nodes so that
//!   whichever release becomes ready earliest fires first.

use tracing::debug;

use crate::dag::node::{NodeArena, NodeId};

/// Upper bound on release-ordering rounds. Each round can only remove
/// nodes/edges or add release-ordering edges, so a small fixed bound with
/// an early exit on a no-change round is enough.
const MAX_ROUNDS: usize = 100;

pub(crate) fn simplify(arena: &mut NodeArena, active: &mut Vec<NodeId>) {
    debug!(nodes = active.len(), "simplification: initial graph");
    fuse_nodes(arena, active);
    for _ in 0..2 {
        clip_edges(arena, active);
        fuse_nodes(arena, active);
    }
    debug!(nodes = active.len(), "simplification: after fuse/clip warmup");
    for round in 0..MAX_ROUNDS {
        let mut changed = order_releases(arena, active);
        changed |= clip_edges(arena, active);
        changed |= fuse_nodes(arena, active);
        debug!(round, nodes = active.len(), "simplification round done");
        if !changed {
            break;
        }
    }
}

/// Fuse chains. Forward: a node with exactly one successor and a priority
/// no better than that successor's runs at the last moment before it, so
/// it merges into the successor. Backward: a negative node with one
/// predecessor and non-positive peak runs immediately after it, so it
/// merges into the predecessor. Returns whether anything was fused.
pub(crate) fn fuse_nodes(arena: &mut NodeArena, active: &mut Vec<NodeId>) -> bool {
    let mut changed = false;
    // Reverse order: only the current position is ever removed, so the
    // remaining indices stay valid.
    for index in (0..active.len()).rev() {
        let id = active[index];
        let mut merged = false;

        if arena.nodes[id].outs.len() == 1 {
            let successor = *arena.nodes[id].outs.first().expect("one successor");
            if arena.nodes[id].priority() >= arena.nodes[successor].priority() {
                let (increment, peak) = (
                    arena.nodes[id].memory_increment,
                    arena.nodes[id].peak_memory,
                );
                arena.nodes[successor].pre.push(id);
                arena.nodes[successor].peak_memory =
                    peak.max(increment + arena.nodes[successor].peak_memory);
                arena.nodes[successor].memory_increment += increment;
                arena.nodes[successor].max_difference = arena.nodes[successor].peak_memory
                    - arena.nodes[successor].memory_increment;
                arena.clip(id, successor);
                // The successor takes over all of the fused node's inputs.
                for input in arena.nodes[id].ins.clone() {
                    arena.connect(input, successor);
                    arena.nodes[input].outs.remove(&id);
                }
                arena.nodes[id].ins.clear();
                arena.nodes[id].alive = false;
                active.remove(index);
                merged = true;
                changed = true;
            }
        }

        if !merged
            && arena.nodes[id].ins.len() == 1
            && arena.nodes[id].memory_increment < 0
            && arena.nodes[id].peak_memory <= 0
        {
            let predecessor = *arena.nodes[id].ins.first().expect("one predecessor");
            let (increment, peak) = (
                arena.nodes[id].memory_increment,
                arena.nodes[id].peak_memory,
            );
            arena.nodes[predecessor].post.push(id);
            arena.nodes[predecessor].peak_memory = arena.nodes[predecessor]
                .peak_memory
                .max(arena.nodes[predecessor].memory_increment + peak);
            arena.nodes[predecessor].memory_increment += increment;
            arena.nodes[predecessor].max_difference = arena.nodes[predecessor].peak_memory
                - arena.nodes[predecessor].memory_increment;
            arena.clip(predecessor, id);
            // The predecessor takes over all of the fused node's outputs.
            for output in arena.nodes[id].outs.clone() {
                arena.connect(predecessor, output);
                arena.nodes[output].ins.remove(&id);
            }
            arena.nodes[id].outs.clear();
            arena.nodes[id].alive = false;
            active.remove(index);
            changed = true;
        }
    }
    changed
}

/// Remove transitive predecessor edges: for `a -> n`, if some other
/// predecessor `b` of `n` with a deeper layer is reachable from `a`, the
/// direct edge `a -> n` is redundant. Reachability is bounded by the
/// layer of `n` to keep the marking pass cheap.
pub(crate) fn clip_edges(arena: &mut NodeArena, active: &mut Vec<NodeId>) -> bool {
    arena.compute_layers(active);
    let mut changed = false;
    for position in 0..active.len() {
        let id = active[position];
        if arena.nodes[id].ins.len() < 2 {
            continue;
        }
        let max_layer = arena.nodes[id].min_layer - 1;
        let inputs: Vec<NodeId> = arena.nodes[id].ins.iter().copied().collect();
        for &input in &inputs {
            let generation = mark_descendants_to_layer(arena, input, max_layer);
            let redundant = arena.nodes[id].ins.iter().any(|&sibling| {
                sibling != input
                    && arena.nodes[sibling].min_layer > arena.nodes[input].min_layer
                    && arena.nodes[sibling].visited_descendant.is_marked(generation)
            });
            if redundant {
                arena.clip(input, id);
                changed = true;
            }
        }
    }
    changed
}

/// Mark `start` and its descendants whose layer stays below `max_layer`
/// on the descendant channel; returns the generation used.
fn mark_descendants_to_layer(arena: &mut NodeArena, start: NodeId, max_layer: i32) -> u32 {
    let generation = arena.bump_descendant_generation();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        if arena.nodes[id].visited_descendant.is_marked(generation) {
            continue;
        }
        arena.nodes[id].visited_descendant.mark(generation);
        if arena.nodes[id].min_layer < max_layer {
            stack.extend(arena.nodes[id].outs.iter().copied());
        }
    }
    generation
}

/// Add ordering edges between release nodes. If every predecessor of a
/// release node `d` is an ancestor of another release node `c` (and `d`
/// itself is not), then `d` becomes ready no later than `c` and must fire
/// first: add `d -> c`. Returns whether any edge was added.
pub(crate) fn order_releases(arena: &mut NodeArena, active: &[NodeId]) -> bool {
    let releases: Vec<NodeId> = active
        .iter()
        .copied()
        .filter(|&id| arena.nodes[id].memory_increment < 0)
        .collect();
    let mut changed = false;
    for &c in &releases {
        let generation = arena.bump_ancestor_generation();
        arena.mark_ancestors(c, generation);
        // Un-mark `c` itself so a direct predecessor never qualifies,
        // which would otherwise close a cycle.
        arena.nodes[c].visited_ancestor.unmark();
        for &d in &releases {
            if d == c
                || arena.nodes[d].peak_memory > 0
                || arena.nodes[d].visited_ancestor.is_marked(generation)
            {
                continue;
            }
            let all_inputs_reach_c = arena.nodes[d]
                .ins
                .iter()
                .all(|&input| arena.nodes[input].visited_ancestor.is_marked(generation));
            if all_inputs_reach_c {
                changed |= arena.connect(d, c);
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(arena: &mut NodeArena, n: usize) -> Vec<NodeId> {
        let ids: Vec<NodeId> = (0..n).map(|op| arena.new_op(op, true)).collect();
        for window in ids.windows(2) {
            arena.connect(window[0], window[1]);
        }
        ids
    }

    #[test]
    fn forward_fusion_collapses_a_chain() {
        let mut arena = NodeArena::new();
        let mut active = chain(&mut arena, 3);
        // Equal priorities (all zero-increment): everything fuses forward.
        fuse_nodes(&mut arena, &mut active);
        assert_eq!(active.len(), 1);
        let survivor = active[0];
        assert_eq!(arena.nodes[survivor].pre.len(), 2);
        assert!(arena.nodes[survivor].ins.is_empty());
        assert!(arena.nodes[survivor].outs.is_empty());
    }

    #[test]
    fn forward_fusion_combines_memory_fields() {
        let mut arena = NodeArena::new();
        let a = arena.new_op(0, true);
        let b = arena.new_op(1, true);
        arena.connect(a, b);
        // a: +10 then b: net 0 with a transient peak of 10.
        arena.nodes[a].memory_increment = 10;
        arena.nodes[a].peak_memory = 10;
        arena.nodes[b].peak_memory = 10;
        arena.nodes[b].max_difference = 10;
        let mut active = vec![a, b];
        fuse_nodes(&mut arena, &mut active);
        assert_eq!(active, vec![b]);
        assert_eq!(arena.nodes[b].memory_increment, 10);
        assert_eq!(arena.nodes[b].peak_memory, 20);
        assert_eq!(arena.nodes[b].max_difference, 10);
    }

    #[test]
    fn backward_fusion_attaches_release_to_its_producer() {
        let mut arena = NodeArena::new();
        let a = arena.new_op(0, true);
        let release = arena.new_release(0, 6);
        arena.connect(a, release);
        let c = arena.new_op(1, true);
        arena.connect(release, c);
        arena.nodes[a].memory_increment = 6;
        arena.nodes[a].peak_memory = 6;
        let mut active = vec![a, release, c];
        // The release has one predecessor and peak <= 0: fuses backward.
        fuse_nodes(&mut arena, &mut active);
        assert!(!active.contains(&release));
        assert!(arena.nodes[a].post.contains(&release) || arena.nodes[c].pre.contains(&release));
    }

    #[test]
    fn clip_removes_transitive_edge() {
        let mut arena = NodeArena::new();
        let a = arena.new_op(0, true);
        let b = arena.new_op(1, true);
        let c = arena.new_op(2, true);
        // a -> b -> c plus the redundant a -> c.
        arena.connect(a, b);
        arena.connect(b, c);
        arena.connect(a, c);
        let mut active = vec![a, b, c];
        let changed = clip_edges(&mut arena, &mut active);
        assert!(changed);
        assert!(!arena.nodes[c].ins.contains(&a));
        assert!(arena.nodes[c].ins.contains(&b));
    }

    #[test]
    fn release_ordering_adds_edge_between_ready_releases() {
        let mut arena = NodeArena::new();
        let a = arena.new_op(0, true);
        let b = arena.new_op(1, true);
        arena.connect(a, b);
        // d releases right after a; c releases after b (so after a too).
        let d = arena.new_release(0, 4);
        arena.connect(a, d);
        let c = arena.new_release(1, 4);
        arena.connect(b, c);
        let active = vec![a, b, d, c];
        let changed = order_releases(&mut arena, &active);
        assert!(changed);
        assert!(arena.nodes[c].ins.contains(&d), "expected edge d -> c");
        assert!(!arena.nodes[d].ins.contains(&c), "no cycle back");
    }
}
