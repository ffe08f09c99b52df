// src/config/mod.rs

//! Loading and validation of graph description files.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a graph file from disk (`loader.rs`).
//! - Validate references and acyclicity before planning (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{BufferSection, GraphFile, OpSection};
pub use validate::validate_graph;
