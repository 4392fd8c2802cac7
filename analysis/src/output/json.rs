//! JSON output
//!
//! Exports the enriched object table of one trace for further analysis

use super::context::write_report;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use torchview_shared::types::access::ObjectAccessRecord;
use tracing::info;

#[derive(Serialize)]
struct ContextExport<'a> {
    source: String,
    gpa_total_stalls: Option<u64>,
    objects: &'a [ObjectAccessRecord],
}

/// Render one trace's records as pretty-printed JSON
pub fn render_json(
    source: &Path,
    records: &[ObjectAccessRecord],
    gpa_total_stalls: Option<u64>,
) -> Result<String> {
    let export = ContextExport {
        source: source.display().to_string(),
        gpa_total_stalls,
        objects: records,
    };
    serde_json::to_string_pretty(&export).context("Failed to serialize context table to JSON")
}

/// Generate JSON output for one trace's records
pub fn generate_json(
    source: &Path,
    records: &[ObjectAccessRecord],
    gpa_total_stalls: Option<u64>,
    output_path: &Path,
) -> Result<()> {
    info!("Generating JSON output: {}", output_path.display());
    let json = render_json(source, records, gpa_total_stalls)?;
    write_report(output_path, &json)
}
