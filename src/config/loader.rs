// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::model::GraphFile;
use crate::config::validate::validate_graph;

/// Load a graph description from a given path and return the raw
/// [`GraphFile`].
///
/// This only performs TOML deserialization; it does **not** perform
/// semantic validation (reference checks, acyclicity). Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<GraphFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading graph file at {:?}", path))?;

    let file: GraphFile = toml::from_str(&contents)
        .with_context(|| format!("parsing TOML graph from {:?}", path))?;

    Ok(file)
}

/// Load a graph description from path and run semantic validation.
///
/// This is the recommended entry point for the rest of the application:
/// it reads TOML, applies serde defaults, and checks for unknown
/// references, negative sizes and dependency cycles before the planner
/// ever sees the graph.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<GraphFile> {
    let file = load_from_path(&path)?;
    validate_graph(&file)?;
    Ok(file)
}

/// Default graph file path: `memdag.toml` in the current working
/// directory.
pub fn default_graph_path() -> PathBuf {
    PathBuf::from("memdag.toml")
}
