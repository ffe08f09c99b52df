// src/errors.rs

//! Crate-wide error aliases.
//!
//! Config loading and validation report recoverable errors through
//! `anyhow`. The planner core itself has none: its invariant violations
//! are fatal assertions, since no caller-visible recovery path exists.

pub use anyhow::{Error, Result};
