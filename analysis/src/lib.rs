//! GPU access-context analysis
//!
//! Correlates GPU memory-access traces of tensor views and memory blocks with
//! the profiler's calling-context tree, attributes stall cycles to python call
//! states, and renders text reports plus a relation graph.
//!
//! The pipeline runs one trace file at a time:
//! parse ([`record`]) → resolve call paths ([`matcher`]) → attribute stalls
//! ([`aggregate`], fed by [`stall`]) → emit ([`output`], with relations from
//! [`forest`]). [`pipeline`] drives it; [`monitor`] is the companion analysis
//! for plain memory-event traces.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod forest;
pub mod matcher;
pub mod monitor;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod stall;

pub use aggregate::{Aggregator, Percent};
pub use config::AnalysisConfig;
pub use error::{FormatError, ForestError};
pub use matcher::ContextMatcher;
pub use pipeline::{MonitorAnalysis, RunSummary, ViewAnalysis};
