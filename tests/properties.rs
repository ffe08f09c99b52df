// tests/properties.rs

//! Property tests over randomly generated dataflow graphs.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use memdag::dag::{plan, BufferSpec, DataflowGraph, MemoryPlan, PlanOptions};

// Strategy to generate a valid dataflow graph.
// Acyclicity comes for free: op N may only depend on ops 0..N-1. Each op
// produces one buffer whose consumers are exactly its direct dependents,
// so buffer edges never contradict dependency edges.
fn graph_strategy(max_ops: usize) -> impl Strategy<Value = DataflowGraph> {
    (1..=max_ops).prop_flat_map(|num_ops| {
        let deps = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_ops),
            num_ops,
        );
        let sizes = proptest::collection::vec(0i64..64, num_ops);
        (deps, sizes).prop_map(move |(raw_deps, sizes)| {
            let mut ops = Vec::with_capacity(num_ops);
            for (i, potential_deps) in raw_deps.into_iter().enumerate() {
                // Sanitize: only allow deps < i.
                let mut data_deps: Vec<usize> = potential_deps
                    .into_iter()
                    .filter(|_| i > 0)
                    .map(|d| d % i)
                    .collect();
                data_deps.sort_unstable();
                data_deps.dedup();
                ops.push(memdag::dag::OpSpec {
                    data_deps,
                    control_deps: Vec::new(),
                    reusable: true,
                });
            }
            let buffers = (0..num_ops)
                .map(|producer| {
                    let consumers: Vec<usize> = (producer + 1..num_ops)
                        .filter(|&j| ops[j].data_deps.contains(&producer))
                        .collect();
                    BufferSpec {
                        size: sizes[producer],
                        producer,
                        consumers,
                    }
                })
                .collect();
            DataflowGraph { ops, buffers }
        })
    })
}

fn check_plan(result: &MemoryPlan, graph: &DataflowGraph) -> Result<(), TestCaseError> {
    // Coverage: every op exactly once.
    let mut seen = vec![false; graph.ops.len()];
    for &op in &result.order {
        prop_assert!(op < graph.ops.len(), "unknown op {} in order", op);
        prop_assert!(!seen[op], "op {} appears twice", op);
        seen[op] = true;
    }
    prop_assert!(seen.iter().all(|&s| s), "order does not cover every op");

    // Validity: every dependency runs before its dependent.
    let mut position = vec![0usize; graph.ops.len()];
    for (index, &op) in result.order.iter().enumerate() {
        position[op] = index;
    }
    for (op, spec) in graph.ops.iter().enumerate() {
        for &dep in spec.data_deps.iter().chain(spec.control_deps.iter()) {
            prop_assert!(
                position[dep] < position[op],
                "dep {} scheduled after op {}",
                dep,
                op
            );
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn random_graphs_produce_valid_orders(graph in graph_strategy(12)) {
        let result = plan(&graph, &PlanOptions { simplify: true });
        check_plan(&result, &graph)?;
    }

    #[test]
    fn random_graphs_plan_without_the_simplifier_too(graph in graph_strategy(12)) {
        let result = plan(&graph, &PlanOptions { simplify: false });
        check_plan(&result, &graph)?;
    }

    #[test]
    fn every_buffer_is_released(graph in graph_strategy(12)) {
        // Each reusable buffer has exactly one release point, so the net
        // memory delta over a full run is zero regardless of order.
        let simplified = plan(&graph, &PlanOptions { simplify: true });
        let raw = plan(&graph, &PlanOptions { simplify: false });
        prop_assert_eq!(simplified.final_memory, 0);
        prop_assert_eq!(raw.final_memory, 0);
    }

    #[test]
    fn planning_is_deterministic(graph in graph_strategy(12)) {
        let first = plan(&graph, &PlanOptions { simplify: true });
        let second = plan(&graph, &PlanOptions { simplify: true });
        prop_assert_eq!(first.order, second.order);
        prop_assert_eq!(first.peak_memory, second.peak_memory);
    }

    #[test]
    fn reported_peak_bounds_the_replayed_total(graph in graph_strategy(12)) {
        // Replay the raw plan against per-buffer lifetimes: bytes become
        // live when the producer runs and die when the last consumer has
        // run. The reported peak must be an upper bound on that replay.
        let result = plan(&graph, &PlanOptions { simplify: false });
        check_plan(&result, &graph)?;

        let mut position = vec![0usize; graph.ops.len()];
        for (index, &op) in result.order.iter().enumerate() {
            position[op] = index;
        }
        let mut live: i64 = 0;
        let mut running_peak: i64 = 0;
        for (index, &op) in result.order.iter().enumerate() {
            for buffer in graph.buffers.iter().filter(|b| b.producer == op) {
                live += buffer.size;
            }
            running_peak = running_peak.max(live);
            for buffer in graph.buffers.iter() {
                let released_at = buffer
                    .consumers
                    .iter()
                    .map(|&c| position[c])
                    .max()
                    .unwrap_or(position[buffer.producer]);
                if released_at == index {
                    live -= buffer.size;
                }
            }
        }
        prop_assert_eq!(live, 0, "replay must end with no live memory");
        prop_assert!(
            running_peak <= result.peak_memory,
            "replayed peak {} exceeds reported peak {}",
            running_peak,
            result.peak_memory
        );
    }
}
