// src/config/validate.rs

use anyhow::{anyhow, Result};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::GraphFile;

/// Run semantic validation against a loaded graph description.
///
/// This checks:
/// - there is at least one op
/// - all `after` / `control_after` references name existing ops
/// - every buffer names an existing producer and existing consumers
/// - buffer sizes are non-negative
/// - the dependency graph has no cycles
///
/// It does **not** check that buffer consumer lists are consistent with
/// the data edges; the planner tolerates consumers that are not direct
/// dependents.
pub fn validate_graph(file: &GraphFile) -> Result<()> {
    ensure_has_ops(file)?;
    validate_op_references(file)?;
    validate_buffers(file)?;
    validate_dag(file)?;
    Ok(())
}

fn ensure_has_ops(file: &GraphFile) -> Result<()> {
    if file.op.is_empty() {
        return Err(anyhow!("graph must contain at least one [op.<name>] section"));
    }
    Ok(())
}

fn validate_op_references(file: &GraphFile) -> Result<()> {
    for (name, op) in file.op.iter() {
        for dep in op.after.iter().chain(op.control_after.iter()) {
            if !file.op.contains_key(dep) {
                return Err(anyhow!(
                    "op '{}' has unknown dependency '{}'",
                    name,
                    dep
                ));
            }
            if dep == name {
                return Err(anyhow!("op '{}' cannot depend on itself", name));
            }
        }
    }
    Ok(())
}

fn validate_buffers(file: &GraphFile) -> Result<()> {
    for (name, buffer) in file.buffer.iter() {
        if buffer.size < 0 {
            return Err(anyhow!(
                "buffer '{}' has negative size {}",
                name,
                buffer.size
            ));
        }
        if !file.op.contains_key(&buffer.producer) {
            return Err(anyhow!(
                "buffer '{}' has unknown producer '{}'",
                name,
                buffer.producer
            ));
        }
        for consumer in buffer.consumers.iter() {
            if !file.op.contains_key(consumer) {
                return Err(anyhow!(
                    "buffer '{}' has unknown consumer '{}'",
                    name,
                    consumer
                ));
            }
        }
    }
    Ok(())
}

fn validate_dag(file: &GraphFile) -> Result<()> {
    // Build a petgraph graph over op names.
    //
    // Edge direction: dep -> op
    // For:
    //   [op.b]
    //   after = ["a"]
    // we add edge a -> b.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in file.op.keys() {
        graph.add_node(name.as_str());
    }

    for (name, op) in file.op.iter() {
        for dep in op.after.iter().chain(op.control_after.iter()) {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    // A topological sort fails exactly when there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(anyhow!(
                "cycle detected in op dependency graph involving op '{}'",
                node
            ))
        }
    }
}
