//! Command implementations

pub mod monitor;
pub mod view;

use crate::output;
use anyhow::{Context, Result};
use std::path::Path;
use torchview_analysis::RunSummary;
use torchview_shared::types::cct::CallingContextTree;
use tracing::info;

/// Load the calling-context tree dump
fn load_cct(path: &Path) -> Result<CallingContextTree> {
    let cct = CallingContextTree::from_json_file(path)
        .with_context(|| format!("Failed to load calling-context tree: {}", path.display()))?;
    info!(
        "Loaded calling-context tree {}: {} node(s), {} indexed id(s)",
        path.display(),
        cct.len(),
        cct.indexed_len()
    );
    Ok(cct)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Print the outcome; an error when no input succeeded
fn report_summary(summary: &RunSummary) -> Result<()> {
    for (path, reason) in &summary.failed {
        output::error(&format!("{}: {}", path.display(), reason));
    }
    if let Some(graph) = &summary.graph {
        output::info(&format!("Graph written to {}", graph.display()));
    }

    if summary.all_failed() {
        anyhow::bail!("All {} input file(s) failed", summary.failed.len());
    }
    if summary.failed.is_empty() {
        output::success(&format!("Processed {} file(s)", summary.processed.len()));
    } else {
        output::warning(&format!(
            "Processed {} file(s), {} failed",
            summary.processed.len(),
            summary.failed.len()
        ));
    }
    Ok(())
}
