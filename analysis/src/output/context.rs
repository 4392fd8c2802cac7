//! Context reports
//!
//! Human-readable `<trace>.context` files. A report is rendered into memory
//! and persisted with a single rename so a failed run never leaves a partial
//! file behind.

use crate::aggregate::Aggregator;
use crate::monitor::MonitorTable;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use torchview_shared::types::access::ObjectAccessRecord;
use torchview_shared::utils::format_pcs;
use tracing::{debug, info};

const OBJECT_SEPARATOR: &str = "---------------------------------------------";

fn stall_suffix(agg: &Aggregator<'_>, count: u64) -> String {
    match agg.percent(count) {
        Some(pct) => format!("{} ({})", count, pct),
        None => count.to_string(),
    }
}

/// Full attribution detail for one object
pub fn describe_object(record: &ObjectAccessRecord, agg: &Aggregator<'_>) -> String {
    let mut out = format!("{} / {}\n", record.global_id, record.access_type);
    if agg.has_data() {
        out.push_str(&format!(
            "lifetime stalls: {}\n",
            stall_suffix(agg, agg.object_stalls(record))
        ));
    }

    for (index, state) in record.states.iter().enumerate() {
        let py = &state.py_state;
        out.push_str(&format!("state {}\n", index));
        out.push_str(&format!(
            "arg index: {} num_states: {}\n",
            py.arg_index, py.num_states
        ));
        out.push_str(&format!(" pystates_hash: {}\n", py.hash));
        if agg.has_data() {
            out.push_str(&format!(
                " stalls: {}\n",
                stall_suffix(agg, agg.state_stalls(state))
            ));
        }
        for frame in &py.call_frames {
            out.push_str(&format!(
                "  {}:{}:{}:{}\n",
                frame.file, frame.function, frame.function_first_line, frame.line
            ));
        }
        for ctx in &state.contexts {
            out.push_str(&format!("ctx_id: {}\n", ctx.ctx_id));
            out.push_str(&ctx.path());
            out.push_str(&format!(" pcs: {}\n", format_pcs(&ctx.program_counters)));
        }
        out.push('\n');
    }
    out
}

/// Report over the view nodes of one trace; memory blocks are left out
pub fn render_view_report(records: &[ObjectAccessRecord], agg: &Aggregator<'_>) -> String {
    let mut out = String::new();
    for record in records.iter().filter(|r| r.is_view_node()) {
        out.push_str(&describe_object(record, agg));
        out.push_str(OBJECT_SEPARATOR);
        out.push_str("\n\n");
    }
    out
}

/// Report over a memory-event trace, in ascending context order
pub fn render_monitor_report(table: &MonitorTable) -> String {
    let mut out = String::new();
    for ctx in table.values() {
        out.push_str(&format!(
            "{}  {}  {} count(s)\n",
            ctx.ctx_id, ctx.kind, ctx.count
        ));
        out.push_str(&ctx.path());
        out.push('\n');
    }
    out
}

/// `<trace>.context`
pub fn report_path(trace: &Path) -> PathBuf {
    sibling_with_suffix(trace, ".context")
}

pub(crate) fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Persist a rendered report
pub fn write_report(path: &Path, text: &str) -> Result<()> {
    write_reports(&[(path.to_path_buf(), text.to_string())])
}

/// Persist several rendered outputs of one trace, all or none.
///
/// Every output is staged as `<path>.tmp` before any is renamed into place.
pub fn write_reports(outputs: &[(PathBuf, String)]) -> Result<()> {
    let staged: Vec<PathBuf> = outputs
        .iter()
        .map(|(path, _)| sibling_with_suffix(path, ".tmp"))
        .collect();

    for ((_, text), staging) in outputs.iter().zip(&staged) {
        if let Err(e) = std::fs::write(staging, text) {
            discard(&staged);
            return Err(e)
                .with_context(|| format!("Failed to write report: {}", staging.display()));
        }
    }

    for (i, ((path, _), staging)) in outputs.iter().zip(&staged).enumerate() {
        if let Err(e) = std::fs::rename(staging, path) {
            discard(&staged[i..]);
            let placed: Vec<PathBuf> = outputs[..i].iter().map(|(p, _)| p.clone()).collect();
            discard(&placed);
            return Err(e)
                .with_context(|| format!("Failed to move report into place: {}", path.display()));
        }
        info!("Report written to {}", path.display());
    }
    Ok(())
}

fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::parse_memory_events;
    use crate::stall::StallWeightTable;
    use torchview_shared::types::access::{
        AccessContext, AccessState, AccessType, PyState, PythonFrame,
    };

    fn scenario_record() -> ObjectAccessRecord {
        ObjectAccessRecord {
            global_id: 42,
            access_type: AccessType::ViewNode,
            total_stalls: 0,
            states: vec![AccessState {
                py_state: PyState {
                    arg_index: 0,
                    num_states: 1,
                    hash: "999".to_string(),
                    call_frames: vec![PythonFrame {
                        file: "a.py".to_string(),
                        function: "f".to_string(),
                        function_first_line: 1,
                        line: 2,
                    }],
                },
                contexts: vec![AccessContext {
                    ctx_id: 7,
                    resolved_path: vec!["a.cu:42\t <op>".to_string()],
                    program_counters: vec![100, 200],
                }],
            }],
        }
    }

    #[test]
    fn test_describe_with_stalls() {
        let table =
            StallWeightTable::parse("pystates_hash 999 pc 100 count 5 pc 200 count 3 total_stalls 80")
                .unwrap();
        let agg = Aggregator::new(Some(&table));
        let text = describe_object(&scenario_record(), &agg);
        assert_eq!(
            text,
            "42 / View Node\n\
             lifetime stalls: 8 (10%)\n\
             state 0\n\
             arg index: 0 num_states: 1\n \
             pystates_hash: 999\n \
             stalls: 8 (10%)\n  \
             a.py:f:1:2\n\
             ctx_id: 7\n\
             a.cu:42\t <op>#\n \
             pcs: 0x64, 0xc8\n\n"
        );
    }

    #[test]
    fn test_describe_without_stalls_omits_percentages() {
        let text = describe_object(&scenario_record(), &Aggregator::new(None));
        assert!(!text.contains("stalls"));
        assert!(text.contains("ctx_id: 7\n"));
    }

    #[test]
    fn test_view_report_skips_memory_blocks() {
        let mut block = scenario_record();
        block.global_id = 43;
        block.access_type = AccessType::MemoryBlock;
        let text = render_view_report(&[scenario_record(), block], &Aggregator::new(None));
        assert!(text.starts_with("42 / View Node\n"));
        assert!(!text.contains("43 /"));
        assert_eq!(text.matches(OBJECT_SEPARATOR).count(), 1);
    }

    #[test]
    fn test_monitor_report() {
        let mut table = parse_memory_events("ALLOC 3 ACCESS 3 FREE 1").unwrap();
        table
            .get_mut(&3)
            .unwrap()
            .resolved_path
            .push("m.cu:9\t <op>".to_string());
        assert_eq!(
            render_monitor_report(&table),
            "1  Free  1 count(s)\n\n3  Malloc  2 count(s)\nm.cu:9\t <op>#\n\n"
        );
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace.txt");
        let path = report_path(&trace);
        assert_eq!(path, dir.path().join("trace.txt.context"));

        write_report(&path, "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        assert!(!dir.path().join("trace.txt.context.tmp").exists());
    }

    #[test]
    fn test_write_reports_all_or_none() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("trace.txt.context");
        let json = dir.path().join("trace.txt.context.json");
        write_reports(&[
            (report.clone(), "report\n".to_string()),
            (json.clone(), "{}".to_string()),
        ])
        .unwrap();
        assert_eq!(std::fs::read_to_string(&report).unwrap(), "report\n");
        assert_eq!(std::fs::read_to_string(&json).unwrap(), "{}");

        let fresh = dir.path().join("other.txt.context");
        let unwritable = dir.path().join("missing").join("other.txt.context.json");
        assert!(write_reports(&[
            (fresh.clone(), "report\n".to_string()),
            (unwritable, "{}".to_string()),
        ])
        .is_err());
        assert!(!fresh.exists());
        assert!(!dir.path().join("other.txt.context.tmp").exists());
    }
}
