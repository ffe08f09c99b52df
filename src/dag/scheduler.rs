// src/dag/scheduler.rs

//! Greedy memory-aware scheduling over the built (and optionally
//! simplified) node graph.
//!
//! The loop alternates two steps. "Prepare" walks descendants of the most
//! recently executed nodes (initially the sources) and inserts every
//! reachable, unblocked release node into a waiting map keyed by its
//! accumulated priority. "Execute" pops the best waiting node and runs it
//! together with all of its unexecuted ancestors in one batch, expanding
//! fused pre/post lists into the final order.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::dag::node::{NodeArena, NodeId, OpId};

/// Result of one planning call.
#[derive(Debug, Clone)]
pub struct MemoryPlan {
    /// Caller-visible ops in execution order; covers every input op
    /// exactly once and never exposes synthetic release nodes.
    pub order: Vec<OpId>,
    /// Highest live-memory level reached while simulating the order.
    pub peak_memory: i64,
    /// Live memory after the full order has run; zero when every
    /// reusable buffer has been released.
    pub final_memory: i64,
}

pub(crate) struct GreedyScheduler {
    arena: NodeArena,
    active: Vec<NodeId>,
    op_count: usize,

    /// Release nodes waiting for selection, keyed by accumulated
    /// priority. Buckets keep discovery order; the most recently
    /// discovered of equal priority wins.
    waiting: BTreeMap<i64, Vec<NodeId>>,
    /// Nodes whose descendants the next prepare step must visit.
    frontier: Vec<NodeId>,

    order: Vec<OpId>,
    total_memory: i64,
    peak_memory: i64,
}

impl GreedyScheduler {
    pub(crate) fn new(arena: NodeArena, active: Vec<NodeId>, op_count: usize) -> Self {
        Self {
            arena,
            active,
            op_count,
            waiting: BTreeMap::new(),
            frontier: Vec::new(),
            order: Vec::new(),
            total_memory: 0,
            peak_memory: 0,
        }
    }

    pub(crate) fn run(mut self) -> MemoryPlan {
        self.init_blocking();

        // Start from the sources.
        for &id in self.active.clone().iter() {
            debug_assert!(self.arena.nodes[id].alive, "fused node left in active list");
            if self.arena.nodes[id].ins.is_empty() {
                self.frontier.push(id);
            }
        }

        // Coverage alone is not a stop condition: a release can become
        // ready only once the final op has been emitted, and leaving it
        // waiting would strand its buffer.
        loop {
            self.prepare();
            self.frontier.clear();
            let Some(next) = self.pop_best_waiting() else {
                break;
            };
            self.execute(next);
        }

        // Whatever is left must not be holding memory back: a
        // negative-increment node that never ran means a buffer was never
        // released, which is a planner defect.
        for &id in self.active.clone().iter() {
            if !self.arena.nodes[id].executed {
                assert!(
                    self.arena.nodes[id].memory_increment >= 0,
                    "unexecuted release node left behind by the scheduler"
                );
                self.set_accumulation(id);
                self.execute(id);
            }
        }

        assert_eq!(
            self.order.len(),
            self.op_count,
            "planned order must cover every op exactly once"
        );

        debug!(
            ops = self.order.len(),
            peak_memory = self.peak_memory,
            final_memory = self.total_memory,
            "schedule complete"
        );

        MemoryPlan {
            order: self.order,
            peak_memory: self.peak_memory,
            final_memory: self.total_memory,
        }
    }

    /// A release node blocks every negative-increment descendant; such a
    /// descendant may not enter the waiting map until all of its blockers
    /// have fired. First-negative sets are found by a marking walk that
    /// stops at negative nodes, then closed transitively over the
    /// negative-node sub-DAG in deepest-first layer order.
    fn init_blocking(&mut self) {
        self.arena.compute_layers(&self.active);
        let mut releases: Vec<NodeId> = self
            .active
            .iter()
            .copied()
            .filter(|&id| self.arena.nodes[id].memory_increment < 0)
            .collect();
        releases.sort_by_key(|&id| (-(self.arena.nodes[id].min_layer as i64), id));

        for &release in &releases {
            let firsts = self.first_negative_descendants(release);
            let mut blocking: Vec<NodeId> = Vec::new();
            for first in firsts {
                blocking.push(first);
                blocking.extend(self.arena.nodes[first].blocking.iter().copied());
            }
            blocking.sort_unstable();
            blocking.dedup();
            self.arena.nodes[release].blocking = blocking;
            self.arena.nodes[release].blocking_count = 0;
        }
        for &release in &releases {
            for blocked in self.arena.nodes[release].blocking.clone() {
                self.arena.nodes[blocked].blocking_count += 1;
            }
        }
    }

    /// Negative-increment descendants of `id` reachable without crossing
    /// another negative node.
    fn first_negative_descendants(&mut self, id: NodeId) -> Vec<NodeId> {
        let generation = self.arena.bump_descendant_generation();
        let mut firsts = Vec::new();
        let mut stack: Vec<NodeId> = self.arena.nodes[id].outs.iter().copied().collect();
        while let Some(current) = stack.pop() {
            if self.arena.nodes[current]
                .visited_descendant
                .is_marked(generation)
            {
                continue;
            }
            self.arena.nodes[current].visited_descendant.mark(generation);
            if self.arena.nodes[current].memory_increment < 0 {
                firsts.push(current);
            } else {
                stack.extend(self.arena.nodes[current].outs.iter().copied());
            }
        }
        firsts
    }

    /// Walk descendants of the frontier and put every reachable,
    /// unexecuted, unblocked release node into the waiting map.
    fn prepare(&mut self) {
        let generation = self.arena.bump_descendant_generation();
        let mut stack: Vec<NodeId> = Vec::new();
        // Reverse push so the first frontier node is explored first.
        for &id in self.frontier.clone().iter().rev() {
            stack.push(id);
        }
        while let Some(id) = stack.pop() {
            if self.arena.nodes[id].visited_descendant.is_marked(generation) {
                continue;
            }
            self.arena.nodes[id].visited_descendant.mark(generation);
            if self.arena.nodes[id].memory_increment < 0 && !self.arena.nodes[id].executed {
                self.wait(id);
            } else {
                for &out in self.arena.nodes[id].outs.iter().rev() {
                    stack.push(out);
                }
            }
        }
    }

    /// Insert a release node into the waiting map with a freshly computed
    /// accumulated priority, unless it is executed or still blocked.
    fn wait(&mut self, id: NodeId) {
        if self.arena.nodes[id].executed || self.arena.nodes[id].blocking_count > 0 {
            return;
        }
        self.stop_waiting(id);
        self.set_accumulation(id);
        let priority = self.arena.nodes[id].accumulation_priority();
        self.waiting.entry(priority).or_default().push(id);
        self.arena.nodes[id].waiting = true;
        self.arena.nodes[id].waiting_priority = priority;
        trace!(node = id, priority, "release node waiting");
    }

    fn stop_waiting(&mut self, id: NodeId) {
        if !self.arena.nodes[id].waiting {
            return;
        }
        self.arena.nodes[id].waiting = false;
        // The key it was inserted under, which may predate the most
        // recent accumulation.
        let priority = self.arena.nodes[id].waiting_priority;
        let bucket = self
            .waiting
            .get_mut(&priority)
            .expect("waiting node must have a bucket");
        let position = bucket
            .iter()
            .rposition(|&entry| entry == id)
            .expect("waiting node must be in its bucket");
        bucket.remove(position);
        if bucket.is_empty() {
            self.waiting.remove(&priority);
        }
    }

    /// Pop the most recently discovered node of the best priority.
    fn pop_best_waiting(&mut self) -> Option<NodeId> {
        let (&priority, bucket) = self.waiting.iter_mut().next()?;
        let id = bucket.pop().expect("buckets are never left empty");
        if bucket.is_empty() {
            self.waiting.remove(&priority);
        }
        self.arena.nodes[id].waiting = false;
        Some(id)
    }

    /// Compute the accumulated memory effect of executing `id` together
    /// with all of its unexecuted ancestors, and the order those
    /// ancestors should run in.
    ///
    /// Ancestors drain best-standalone-priority first; among positive
    /// nodes that picks maximum `max_difference` first, which keeps the
    /// running peak of the batch as low as the heuristic can. Taking an
    /// ancestor forces its own ancestors to run before it.
    fn set_accumulation(&mut self, id: NodeId) {
        let generation = self.arena.bump_ancestor_generation();
        let mut ancestors = self.arena.collect_unexecuted_ancestors(id, generation);
        // The walk emits the node itself last; the buckets must cover its
        // ancestors only.
        let tail = ancestors.pop();
        debug_assert_eq!(tail, Some(id));

        let mut buckets: BTreeMap<i64, Vec<NodeId>> = BTreeMap::new();
        for &ancestor in &ancestors {
            buckets
                .entry(self.arena.nodes[ancestor].priority())
                .or_default()
                .push(ancestor);
        }

        let generation = self.arena.bump_ancestor_generation();
        let mut ordered: Vec<NodeId> = Vec::new();
        let mut increment: i64 = 0;
        let mut peak: i64 = 0;
        loop {
            let Some(candidate) = buckets.values().next().and_then(|b| b.last().copied()) else {
                break;
            };
            let batch = self
                .arena
                .collect_unexecuted_ancestors(candidate, generation);
            for node in batch {
                ordered.push(node);
                increment += self.arena.nodes[node].memory_increment;
                peak = peak.max(increment + self.arena.nodes[node].max_difference);
                remove_from_bucket(&mut buckets, self.arena.nodes[node].priority(), node);
            }
        }

        increment += self.arena.nodes[id].memory_increment;
        peak = peak.max(increment + self.arena.nodes[id].max_difference);

        let node = &mut self.arena.nodes[id];
        node.ordered_ancestors = ordered;
        node.acc_increment = increment;
        node.acc_peak = peak;
        node.acc_max_difference = peak - increment;
    }

    /// Execute a node: run its unexecuted ancestors in accumulation
    /// order, then the node itself, expanding fused pre/post lists into
    /// the final order and releasing everything each release node was
    /// blocking.
    fn execute(&mut self, id: NodeId) {
        for ancestor in self.arena.nodes[id].ordered_ancestors.clone() {
            if !self.arena.nodes[ancestor].executed {
                self.execute_single(ancestor);
            }
        }
        self.execute_single(id);
        self.total_memory += self.arena.nodes[id].acc_increment;
        self.peak_memory = self
            .peak_memory
            .max(self.total_memory + self.arena.nodes[id].acc_max_difference);
        trace!(
            node = id,
            total_memory = self.total_memory,
            peak_memory = self.peak_memory,
            "executed batch"
        );
    }

    fn execute_single(&mut self, id: NodeId) {
        self.emit(id);
        self.arena.nodes[id].executed = true;
        self.stop_waiting(id);
        self.frontier.push(id);
        if self.arena.nodes[id].memory_increment < 0 {
            for blocked in self.arena.nodes[id].blocking.clone() {
                self.arena.nodes[blocked].blocking_count -= 1;
            }
        }
    }

    /// Expand a node through its fused pre/post lists: pre-list in
    /// reverse order, the node itself, then the post-list forward. Only
    /// caller-visible ops reach the output.
    fn emit(&mut self, root: NodeId) {
        enum Frame {
            Expand(NodeId),
            Emit(NodeId),
        }
        let mut stack = vec![Frame::Expand(root)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Expand(id) => {
                    for &post in self.arena.nodes[id].post.iter().rev() {
                        stack.push(Frame::Expand(post));
                    }
                    stack.push(Frame::Emit(id));
                    // Forward push: the last pre entry ends on top and
                    // therefore runs first.
                    for &pre in self.arena.nodes[id].pre.iter() {
                        stack.push(Frame::Expand(pre));
                    }
                }
                Frame::Emit(id) => {
                    if let Some(op) = self.arena.nodes[id].origin {
                        self.order.push(op);
                    }
                }
            }
        }
    }
}

fn remove_from_bucket(buckets: &mut BTreeMap<i64, Vec<NodeId>>, priority: i64, id: NodeId) {
    if let Some(bucket) = buckets.get_mut(&priority) {
        if let Some(position) = bucket.iter().rposition(|&entry| entry == id) {
            bucket.remove(position);
        }
        if bucket.is_empty() {
            buckets.remove(&priority);
        }
    }
}
