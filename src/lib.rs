// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod logging;

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::GraphFile;
use crate::dag::{plan, PlanOptions};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - graph file loading + validation
/// - the memory planner
/// - printed output (order + memory statistics)
pub fn run(args: CliArgs) -> Result<()> {
    let graph_path = PathBuf::from(&args.graph);
    let file = load_and_validate(&graph_path)?;

    if args.dry_run {
        print_dry_run(&file);
        return Ok(());
    }

    let (graph, names) = file.to_dataflow()?;
    info!(
        ops = graph.ops.len(),
        buffers = graph.buffers.len(),
        "planning execution order"
    );

    let options = PlanOptions {
        simplify: !args.no_simplify,
    };
    let result = plan(&graph, &options);

    for &op in &result.order {
        println!("{}", names[op]);
    }
    println!(
        "# peak memory: {} bytes, final memory: {} bytes",
        result.peak_memory, result.final_memory
    );

    Ok(())
}

/// Simple dry-run output: print ops, deps and buffers.
fn print_dry_run(file: &GraphFile) {
    println!("memdag dry-run");
    println!();

    println!("ops ({}):", file.op.len());
    for (name, op) in file.op.iter() {
        println!("  - {name}");
        if !op.after.is_empty() {
            println!("      after: {:?}", op.after);
        }
        if !op.control_after.is_empty() {
            println!("      control_after: {:?}", op.control_after);
        }
        if !op.reusable {
            println!("      reusable: false");
        }
    }

    println!("buffers ({}):", file.buffer.len());
    for (name, buffer) in file.buffer.iter() {
        println!("  - {name}");
        println!("      size: {}", buffer.size);
        println!("      producer: {}", buffer.producer);
        if !buffer.consumers.is_empty() {
            println!("      consumers: {:?}", buffer.consumers);
        }
    }

    debug!("dry-run complete (no planning)");
}
