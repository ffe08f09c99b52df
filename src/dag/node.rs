// src/dag/node.rs

//! Node arena for the memory planner.
//!
//! Every scheduling unit (a real op or a synthetic buffer release) is a
//! [`Node`] stored in a [`NodeArena`] and addressed by a stable `NodeId`
//! index. Fusion tombstones a node instead of deleting it, so indices held
//! in other nodes' edge sets and pre/post lists stay valid for the whole
//! planning call.

use std::collections::BTreeSet;

/// Index of a node inside a [`NodeArena`].
pub(crate) type NodeId = usize;

/// Caller-visible operation identity: index into the input op list.
pub type OpId = usize;

/// Buffer identity: index into the input buffer table.
pub type BufferId = usize;

/// Band width for the three-band priority encoding.
///
/// Priorities live in three disjoint bands of an `i64`: negative-increment
/// nodes below `PRIORITY_OFFSET`, zero-increment nodes around it, and
/// positive-increment nodes below `PRIORITY_BOUND`. Smaller is better, and
/// the sign category always dominates magnitude.
pub(crate) const PRIORITY_OFFSET: i64 = i64::MAX / 4;
pub(crate) const PRIORITY_BOUND: i64 = 2 * PRIORITY_OFFSET;

/// Generation-stamped visited marker.
///
/// A marker is "set" when its stamp equals the arena's current generation
/// for that channel. Bumping the generation invalidates every marker in
/// O(1); there is never a per-node clearing pass between traversals.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Marker {
    stamp: u32,
}

impl Marker {
    pub(crate) fn is_marked(&self, generation: u32) -> bool {
        self.stamp == generation
    }

    pub(crate) fn mark(&mut self, generation: u32) {
        self.stamp = generation;
    }

    /// Clear this one marker regardless of generation.
    pub(crate) fn unmark(&mut self) {
        self.stamp = 0;
    }
}

/// One scheduling unit: either a real operation or a synthetic release
/// event for a buffer with more than one consumer.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    /// The caller-visible op this node stands for, `None` for releases.
    pub origin: Option<OpId>,
    /// The buffer this release node frees, `None` for real ops.
    pub buffer: Option<BufferId>,

    /// Net bytes this node adds to live memory (produced minus freed).
    pub memory_increment: i64,
    /// Highest memory level reached while this node's own delta applies.
    ///
    /// Invariant: `peak_memory == memory_increment + max_difference`,
    /// always re-derived together.
    pub peak_memory: i64,
    pub max_difference: i64,

    /// Longest-path-from-source depth, memoized; -1 when stale.
    pub min_layer: i32,
    /// Whether the buffers this node produces may be released at all.
    pub is_reusable: bool,

    /// Dependency edges. Ordered sets so that every traversal and
    /// tie-break iterates in a fixed order.
    pub ins: BTreeSet<NodeId>,
    pub outs: BTreeSet<NodeId>,

    /// Nodes fused into this one that must run right before it, expanded
    /// in reverse list order.
    pub pre: Vec<NodeId>,
    /// Nodes fused into this one that must run right after it.
    pub post: Vec<NodeId>,

    /// For a release node: every release node it blocks, i.e. all of its
    /// negative-increment descendants.
    pub blocking: Vec<NodeId>,
    /// Live count of un-executed release nodes blocking this one.
    pub blocking_count: i32,

    pub executed: bool,
    pub waiting: bool,
    /// Waiting-map key this node was inserted under while `waiting`.
    pub waiting_priority: i64,
    /// False once this node has been fused away.
    pub alive: bool,

    pub visited_ancestor: Marker,
    pub visited_descendant: Marker,

    /// Results of the last ancestor accumulation for this node.
    pub acc_increment: i64,
    pub acc_peak: i64,
    pub acc_max_difference: i64,
    /// Unexecuted ancestors in the order they should run, excluding self.
    pub ordered_ancestors: Vec<NodeId>,
}

impl Node {
    fn new() -> Self {
        Self {
            origin: None,
            buffer: None,
            memory_increment: 0,
            peak_memory: 0,
            max_difference: 0,
            min_layer: -1,
            is_reusable: false,
            ins: BTreeSet::new(),
            outs: BTreeSet::new(),
            pre: Vec::new(),
            post: Vec::new(),
            blocking: Vec::new(),
            blocking_count: -1,
            executed: false,
            waiting: false,
            waiting_priority: 0,
            alive: true,
            visited_ancestor: Marker::default(),
            visited_descendant: Marker::default(),
            acc_increment: 0,
            acc_peak: 0,
            acc_max_difference: 0,
            ordered_ancestors: Vec::new(),
        }
    }

    /// Standalone scheduling priority of this node; smaller is better.
    pub(crate) fn priority(&self) -> i64 {
        assert_eq!(
            self.peak_memory,
            self.memory_increment + self.max_difference,
            "peak memory out of sync with increment + max difference"
        );
        if self.memory_increment < 0 {
            return self.peak_memory - PRIORITY_OFFSET;
        }
        if self.memory_increment > 0 {
            return PRIORITY_BOUND - self.max_difference;
        }
        PRIORITY_OFFSET - self.max_difference
    }

    /// Priority of executing this node together with all of its
    /// unexecuted ancestors, as computed by the last accumulation.
    pub(crate) fn accumulation_priority(&self) -> i64 {
        if self.acc_increment < 0 {
            return self.acc_peak - PRIORITY_OFFSET;
        }
        if self.acc_increment > 0 {
            return PRIORITY_OFFSET + self.acc_increment;
        }
        PRIORITY_OFFSET - self.acc_peak
    }
}

/// Arena of planner nodes plus the two traversal generation counters.
///
/// The counters are scoped to one planning call; they are never shared
/// across concurrent calls.
#[derive(Debug)]
pub(crate) struct NodeArena {
    pub nodes: Vec<Node>,
    ancestor_generation: u32,
    descendant_generation: u32,
}

impl NodeArena {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            ancestor_generation: 1,
            descendant_generation: 1,
        }
    }

    pub(crate) fn new_op(&mut self, op: OpId, is_reusable: bool) -> NodeId {
        let id = self.nodes.len();
        let mut node = Node::new();
        node.origin = Some(op);
        node.is_reusable = is_reusable;
        self.nodes.push(node);
        id
    }

    pub(crate) fn new_release(&mut self, buffer: BufferId, size: i64) -> NodeId {
        let id = self.nodes.len();
        let mut node = Node::new();
        node.buffer = Some(buffer);
        node.memory_increment = -size;
        node.peak_memory = -size;
        self.nodes.push(node);
        id
    }

    /// Add the edge `from -> to` unless it already exists. Returns whether
    /// a new edge was inserted.
    pub(crate) fn connect(&mut self, from: NodeId, to: NodeId) -> bool {
        if self.nodes[to].ins.insert(from) {
            self.nodes[from].outs.insert(to);
            return true;
        }
        false
    }

    /// Remove the edge `from -> to` from both endpoints.
    pub(crate) fn clip(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from].outs.remove(&to);
        self.nodes[to].ins.remove(&from);
    }

    /// Invalidate every ancestor marker and return the fresh generation.
    pub(crate) fn bump_ancestor_generation(&mut self) -> u32 {
        self.ancestor_generation += 1;
        self.ancestor_generation
    }

    /// Invalidate every descendant marker and return the fresh generation.
    pub(crate) fn bump_descendant_generation(&mut self) -> u32 {
        self.descendant_generation += 1;
        self.descendant_generation
    }

    /// Recompute `min_layer` (longest path from a source) for the given
    /// live nodes with an explicit work list, so stack usage does not
    /// scale with graph depth.
    pub(crate) fn compute_layers(&mut self, active: &[NodeId]) {
        for &id in active {
            self.nodes[id].min_layer = -1;
        }
        let mut stack: Vec<NodeId> = Vec::new();
        for &id in active {
            if self.nodes[id].min_layer >= 0 {
                continue;
            }
            stack.push(id);
            while let Some(&top) = stack.last() {
                if self.nodes[top].min_layer >= 0 {
                    stack.pop();
                    continue;
                }
                let mut layer = -1;
                let mut unresolved = false;
                for &input in self.nodes[top].ins.clone().iter() {
                    let input_layer = self.nodes[input].min_layer;
                    if input_layer < 0 {
                        stack.push(input);
                        unresolved = true;
                    } else {
                        layer = layer.max(input_layer);
                    }
                }
                if !unresolved {
                    self.nodes[top].min_layer = layer + 1;
                    stack.pop();
                }
            }
        }
    }

    /// Mark every ancestor of `start` (and `start` itself) on the ancestor
    /// channel under `generation`.
    pub(crate) fn mark_ancestors(&mut self, start: NodeId, generation: u32) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if self.nodes[id].visited_ancestor.is_marked(generation) {
                continue;
            }
            self.nodes[id].visited_ancestor.mark(generation);
            stack.extend(self.nodes[id].ins.iter().copied());
        }
    }

    /// Collect `start` plus all of its unexecuted, unmarked ancestors in
    /// post order (every ancestor before any node depending on it),
    /// marking each on the ancestor channel as it is emitted.
    pub(crate) fn collect_unexecuted_ancestors(
        &mut self,
        start: NodeId,
        generation: u32,
    ) -> Vec<NodeId> {
        enum Frame {
            Enter(NodeId),
            Exit(NodeId),
        }
        let mut collected = Vec::new();
        let mut stack = vec![Frame::Enter(start)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    if self.nodes[id].visited_ancestor.is_marked(generation) {
                        continue;
                    }
                    stack.push(Frame::Exit(id));
                    // Reverse push so the smallest input is explored first.
                    for &input in self.nodes[id].ins.iter().rev() {
                        if !self.nodes[input].executed
                            && !self.nodes[input].visited_ancestor.is_marked(generation)
                        {
                            stack.push(Frame::Enter(input));
                        }
                    }
                }
                Frame::Exit(id) => {
                    if !self.nodes[id].visited_ancestor.is_marked(generation) {
                        collected.push(id);
                        self.nodes[id].visited_ancestor.mark(generation);
                    }
                }
            }
        }
        collected
    }
}
