//! End-to-end runs over a temporary trace directory

use std::fs;
use std::path::{Path, PathBuf};
use torchview_analysis::{AnalysisConfig, MonitorAnalysis, ViewAnalysis};
use torchview_shared::types::cct::CallingContextTree;

const CCT_JSON: &str = r#"{
    "structure": [
        {"kind": "File", "name": "a.cu"},
        {"kind": "Proc", "name": "main", "line": 10, "parent": 0},
        {"kind": "Stmt", "line": 30, "parent": 1},
        {"kind": "Proc", "name": "kernel", "line": 40, "parent": 0},
        {"kind": "Stmt", "line": 42, "parent": 3}
    ],
    "nodes": [
        {"kind": "Root"},
        {"kind": "ProcFrame", "cp_id": 1, "parent": 0, "structure": 1},
        {"kind": "Call", "cp_id": 2, "parent": 1, "structure": 2},
        {"kind": "ProcFrame", "cp_id": 3, "parent": 2, "structure": 3},
        {"kind": "Statement", "cp_id": 4, "parent": 3, "structure": 4}
    ]
}"#;

const TRACE: &str = "\
id 42 object_type 0
  index 0 num_states 1 py_state
    file_name a.py function_name f function_first_lineno 1 lineno 2
    pytates_hash 999
  ctx_id 4 pc 100 pc 200
id 43 object_type 0
  index 0 num_states 2 pytates_hash 999 ctx_id 0
  index 1 num_states 2 pytates_hash 5 ctx_id -3 pc 300
id 44 object_type 1
  index 0 pytates_hash 1 ctx_id 9 pc 1
";

const STALLS: &str = "\
gpa_id 1 pystates_hash 999 leaf_lm_id 0 lm_ip 0x0
  pc 100 count 5
  pc 200 count 3
gpa_id 2 pystates_hash 5
  pc 300 count 8
total_stalls 80
";

struct Fixture {
    _root: tempfile::TempDir,
    trace_dir: PathBuf,
    cct: CallingContextTree,
}

impl Fixture {
    /// `<tmp>/run/traces` so the default stall path stays inside the temp dir
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let trace_dir = root.path().join("run").join("traces");
        fs::create_dir_all(&trace_dir).unwrap();

        let cct_path = root.path().join("cct.json");
        fs::write(&cct_path, CCT_JSON).unwrap();
        let cct = CallingContextTree::from_json_file(&cct_path).unwrap();

        Self {
            _root: root,
            trace_dir,
            cct,
        }
    }

    fn write(&self, name: &str, text: &str) -> PathBuf {
        let path = self.trace_dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn write_stalls(&self) {
        let path = self.trace_dir.join(AnalysisConfig::default().stall_file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, STALLS).unwrap();
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn test_view_run_writes_report_and_graph() {
    let fx = Fixture::new();
    fx.write_stalls();
    fx.write("forest.txt", "42{43{}43}42");
    fx.write("cross_tree_relations.txt", "42{43{}43}42");
    let trace = fx.write("trace.txt", TRACE);

    let summary = ViewAnalysis::new(&fx.cct, AnalysisConfig::default())
        .run(&[&trace])
        .unwrap();
    assert_eq!(summary.processed, vec![trace.clone()]);
    assert!(summary.failed.is_empty());

    let report = read(&fx.trace_dir.join("trace.txt.context"));
    assert!(report.starts_with("42 / View Node\nlifetime stalls: 8 (10%)\n"));
    assert!(report.contains("ctx_id: 4\na.cu:30\tkernel#\na.cu:42\t <op>#\n pcs: 0x64, 0xc8\n"));
    // the sentinel-only state of 43 is gone; the remaining one resolves through the sign fallback
    assert!(report.contains("43 / View Node\nlifetime stalls: 8 (10%)\nstate 0\narg index: 1"));
    assert!(report.contains("ctx_id: -3\na.cu:30\tkernel#\n pcs: 0x12c\n"));
    assert!(!report.contains("44 /"));

    let graph_path = fx.trace_dir.join("profile.dot");
    assert_eq!(summary.graph, Some(graph_path.clone()));
    let dot = read(&graph_path);
    assert!(dot.contains("  n42 [label=\"0\", style=solid, tooltip=\"42 / View Node\\n"));
    assert!(dot.contains("  n43 [label=\"1\", style=dashed"));
    assert!(dot.contains("  n42 -> n43;\n"));
    assert!(dot.contains("  n43 -> n42 [color=\"blue\"];\n"));
    assert!(!dot.contains("n44"));
}

#[test]
fn test_failed_file_is_isolated() {
    let fx = Fixture::new();
    let good = fx.write("good.txt", TRACE);
    let bad = fx.write("bad.txt", "id 1 index zero");

    let summary = ViewAnalysis::new(&fx.cct, AnalysisConfig::default())
        .run(&[&bad, &good])
        .unwrap();

    assert_eq!(summary.processed, vec![good]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, bad);
    assert!(summary.failed[0].1.contains("Malformed view trace"));
    assert!(!fx.trace_dir.join("bad.txt.context").exists());
    assert!(fx.trace_dir.join("good.txt.context").exists());
    assert!(read(&fx.trace_dir.join("profile.dot")).contains("n42"));
}

#[test]
fn test_all_inputs_failing() {
    let fx = Fixture::new();
    let missing = fx.trace_dir.join("missing.txt");
    let summary = ViewAnalysis::new(&fx.cct, AnalysisConfig::default())
        .run(&[&missing])
        .unwrap();
    assert!(summary.all_failed());
}

#[test]
fn test_without_stall_report() {
    let fx = Fixture::new();
    let trace = fx.write("trace.txt", TRACE);

    ViewAnalysis::new(&fx.cct, AnalysisConfig::default())
        .run(&[&trace])
        .unwrap();

    let report = read(&fx.trace_dir.join("trace.txt.context"));
    assert!(report.starts_with("42 / View Node\nstate 0\n"));
    assert!(!report.contains("stalls"));
}

#[test]
fn test_malformed_stall_report_degrades() {
    let fx = Fixture::new();
    let path = fx.trace_dir.join(AnalysisConfig::default().stall_file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "count 5").unwrap();
    let trace = fx.write("trace.txt", TRACE);

    let summary = ViewAnalysis::new(&fx.cct, AnalysisConfig::default())
        .run(&[&trace])
        .unwrap();
    assert_eq!(summary.processed.len(), 1);
    assert!(!read(&fx.trace_dir.join("trace.txt.context")).contains("stalls"));
}

#[test]
fn test_json_export_and_graph_override() {
    let fx = Fixture::new();
    fx.write_stalls();
    let trace = fx.write("trace.txt", TRACE);
    let graph_path = fx.trace_dir.join("custom.dot");

    let config = AnalysisConfig {
        emit_json: true,
        fractional_percentages: true,
        ..AnalysisConfig::default()
    };
    let summary = ViewAnalysis::new(&fx.cct, config)
        .with_graph_path(&graph_path)
        .run(&[&trace])
        .unwrap();

    assert_eq!(summary.graph, Some(graph_path.clone()));
    assert!(graph_path.exists());
    assert!(!fx.trace_dir.join("profile.dot").exists());
    assert!(read(&fx.trace_dir.join("trace.txt.context")).contains("lifetime stalls: 8 (10.00%)"));

    let json: serde_json::Value =
        serde_json::from_str(&read(&fx.trace_dir.join("trace.txt.context.json"))).unwrap();
    assert_eq!(json["gpa_total_stalls"], 80);
    assert_eq!(json["objects"].as_array().unwrap().len(), 3);
    assert_eq!(json["objects"][0]["total_stalls"], 8);
}

#[test]
fn test_monitor_run() {
    let fx = Fixture::new();
    let trace = fx.write("memory.txt", "ALLOC 4 ACCESS 4 ACCESS 3 FREE 77");

    let summary = MonitorAnalysis::new(&fx.cct, AnalysisConfig::default()).run(&[&trace]);
    assert_eq!(summary.processed.len(), 1);
    assert!(summary.graph.is_none());

    assert_eq!(
        read(&fx.trace_dir.join("memory.txt.context")),
        "3  Kernel  1 count(s)\na.cu:30\tkernel#\n\n\
         4  Malloc  2 count(s)\na.cu:30\tkernel#\na.cu:42\t <op>#\n\n\
         77  Free  1 count(s)\n\n"
    );
}
