//! Output generation
//!
//! Text context reports, the run-wide relation graph, and JSON export.

pub mod context;
pub mod graph;
pub mod json;

pub use context::{
    describe_object, render_monitor_report, render_view_report, write_report, write_reports,
};
pub use graph::GraphEmitter;
pub use json::{generate_json, render_json};
