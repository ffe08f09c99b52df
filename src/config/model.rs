// src/config/model.rs

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::dag::{BufferSpec, DataflowGraph, OpId, OpSpec};

/// Top-level graph description as read from a TOML file.
///
/// ```toml
/// [op.load_a]
///
/// [op.matmul]
/// after = ["load_a", "load_b"]
///
/// [op.checkpoint]
/// control_after = ["matmul"]
/// reusable = false
///
/// [buffer.activations]
/// size = 4096
/// producer = "matmul"
/// consumers = ["relu", "grad_matmul"]
/// ```
///
/// Op and buffer names are only used in the file and in printed output;
/// the planner itself works on indices.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphFile {
    /// All ops from `[op.<name>]`, keyed by op name.
    #[serde(default)]
    pub op: BTreeMap<String, OpSection>,

    /// All buffers from `[buffer.<name>]`, keyed by buffer name.
    #[serde(default)]
    pub buffer: BTreeMap<String, BufferSection>,
}

/// `[op.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OpSection {
    /// Data dependencies: ops whose outputs this op reads.
    #[serde(default)]
    pub after: Vec<String>,

    /// Control dependencies: ops that must run first without a data edge.
    #[serde(default)]
    pub control_after: Vec<String>,

    /// Whether buffers produced by this op may be released once consumed.
    #[serde(default = "default_reusable")]
    pub reusable: bool,
}

fn default_reusable() -> bool {
    true
}

/// `[buffer.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferSection {
    /// Byte size of the buffer.
    pub size: i64,

    /// Name of the op producing this buffer.
    pub producer: String,

    /// Names of the ops reading this buffer. May be empty, in which case
    /// the producer releases it itself.
    #[serde(default)]
    pub consumers: Vec<String>,
}

impl GraphFile {
    /// Lower the named description to the index-based [`DataflowGraph`]
    /// the planner consumes. Returns the graph plus the op names in
    /// index order, for mapping the planned order back to names.
    ///
    /// Assumes the file already passed validation; an unknown name here
    /// still fails cleanly rather than panicking.
    pub fn to_dataflow(&self) -> Result<(DataflowGraph, Vec<String>)> {
        let names: Vec<String> = self.op.keys().cloned().collect();
        let index_of = |name: &str| -> Result<OpId> {
            names
                .binary_search_by(|probe| probe.as_str().cmp(name))
                .map_err(|_| anyhow!("unknown op '{}' referenced in graph file", name))
        };

        let mut ops = Vec::with_capacity(self.op.len());
        for section in self.op.values() {
            let data_deps = section
                .after
                .iter()
                .map(|dep| index_of(dep))
                .collect::<Result<Vec<_>>>()?;
            let control_deps = section
                .control_after
                .iter()
                .map(|dep| index_of(dep))
                .collect::<Result<Vec<_>>>()?;
            ops.push(OpSpec {
                data_deps,
                control_deps,
                reusable: section.reusable,
            });
        }

        let mut buffers = Vec::with_capacity(self.buffer.len());
        for section in self.buffer.values() {
            let producer = index_of(&section.producer)?;
            let consumers = section
                .consumers
                .iter()
                .map(|consumer| index_of(consumer))
                .collect::<Result<Vec<_>>>()?;
            buffers.push(BufferSpec {
                size: section.size,
                producer,
                consumers,
            });
        }

        Ok((DataflowGraph { ops, buffers }, names))
    }
}
