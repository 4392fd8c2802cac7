//! Shared types and utilities for torchview
//!
//! This crate contains the data model produced by the trace parsers, the
//! read-only calling-context tree the matcher resolves against, and small
//! helpers shared by the analysis library and the CLI.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{access::*, cct::*};
