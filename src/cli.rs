// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `memdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "memdag",
    version,
    about = "Compute a low-peak-memory execution order for a dataflow DAG.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the graph description file (TOML).
    ///
    /// Default: `memdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "memdag.toml")]
    pub graph: String,

    /// Skip the graph simplifier and schedule the raw graph.
    #[arg(long)]
    pub no_simplify: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `MEMDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print ops and buffers, but don't plan anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
