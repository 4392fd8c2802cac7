//! Run driver
//!
//! Processes trace files one at a time. A file that fails is reported and
//! skipped; the rest of the run carries on, and the relation graph is written
//! from whatever succeeded.

use crate::aggregate::Aggregator;
use crate::config::AnalysisConfig;
use crate::forest::{CrossTreeRelations, Forest};
use crate::matcher::{ContextMatcher, MatchStats};
use crate::monitor::{parse_memory_events, resolve_contexts};
use crate::output::context::{report_path, sibling_with_suffix};
use crate::output::{
    render_json, render_monitor_report, render_view_report, write_report, write_reports,
};
use crate::output::GraphEmitter;
use crate::record::parse_records;
use crate::stall::StallWeightTable;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use torchview_shared::types::cct::CallingContextTree;
use tracing::{error, info, warn};

/// What one trace contributed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub objects: usize,
    pub contexts: MatchStats,
}

/// Outcome of a run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub processed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,

    /// Graph file, when one was written
    pub graph: Option<PathBuf>,
}

impl RunSummary {
    /// True when inputs were given and none of them succeeded
    pub fn all_failed(&self) -> bool {
        self.processed.is_empty() && !self.failed.is_empty()
    }

    fn record<T>(&mut self, path: &Path, result: &Result<T>) {
        match result {
            Ok(_) => self.processed.push(path.to_path_buf()),
            Err(e) => {
                error!("Failed to process {}: {:#}", path.display(), e);
                self.failed.push((path.to_path_buf(), format!("{:#}", e)));
            }
        }
    }
}

/// Directory a trace's companion files are resolved against
fn trace_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn read_trace(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace: {}", path.display()))
}

/// Missing or malformed stall reports mean no attribution, never a failed trace
fn load_stall_table(path: &Path) -> Option<StallWeightTable> {
    match StallWeightTable::load(path) {
        Ok(table) => table,
        Err(e) => {
            warn!("Ignoring stall report: {:#}", e);
            None
        }
    }
}

/// View-trace analysis over a whole run
pub struct ViewAnalysis<'a> {
    cct: &'a CallingContextTree,
    config: AnalysisConfig,
    graph: GraphEmitter,
    graph_path: Option<PathBuf>,
    first_dir: Option<PathBuf>,
    stall_tables: HashMap<PathBuf, Option<StallWeightTable>>,
    summary: RunSummary,
}

impl<'a> ViewAnalysis<'a> {
    pub fn new(cct: &'a CallingContextTree, config: AnalysisConfig) -> Self {
        Self {
            cct,
            config,
            graph: GraphEmitter::new(),
            graph_path: None,
            first_dir: None,
            stall_tables: HashMap::new(),
            summary: RunSummary::default(),
        }
    }

    /// Write the graph here instead of next to the first trace
    pub fn with_graph_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.graph_path = Some(path.into());
        self
    }

    /// Run every file and write the graph
    pub fn run<P: AsRef<Path>>(mut self, files: &[P]) -> Result<RunSummary> {
        for file in files {
            let _ = self.process_file(file.as_ref());
        }
        self.finish()
    }

    /// Analyze one trace, writing `<trace>.context`
    pub fn process_file(&mut self, path: &Path) -> Result<FileStats> {
        let result = self.analyze(path);
        self.summary.record(path, &result);
        result
    }

    fn analyze(&mut self, path: &Path) -> Result<FileStats> {
        info!("Processing view trace {}", path.display());
        let dir = trace_dir(path);
        if self.first_dir.is_none() {
            self.first_dir = Some(dir.clone());
        }

        let text = read_trace(path)?;
        let mut records = parse_records(&text)
            .with_context(|| format!("Malformed view trace: {}", path.display()))?;

        let matcher = ContextMatcher::new(self.cct)
            .with_limits(self.config.max_frames, self.config.max_name_len);
        let contexts = matcher.match_records(&mut records);

        let stall_path = dir.join(&self.config.stall_file);
        let table = self
            .stall_tables
            .entry(dir.clone())
            .or_insert_with(|| load_stall_table(&stall_path))
            .as_ref();
        let agg = Aggregator::new(table).fractional(self.config.fractional_percentages);
        agg.annotate(&mut records);

        let mut outputs = vec![(report_path(path), render_view_report(&records, &agg))];
        if self.config.emit_json {
            let json = render_json(path, &records, table.map(|t| t.total_stalls()))?;
            outputs.push((sibling_with_suffix(path, ".context.json"), json));
        }
        write_reports(&outputs)?;

        let forest = Forest::load(&dir.join(&self.config.forest_file));
        let cross = CrossTreeRelations::load(&dir.join(&self.config.cross_tree_file));
        self.graph.add_file(&records, &forest, &cross, &agg);

        info!(
            "{}: {} object(s), {} context(s) resolved, {} unresolved",
            path.display(),
            records.len(),
            contexts.resolved,
            contexts.unresolved
        );
        Ok(FileStats {
            objects: records.len(),
            contexts,
        })
    }

    /// Write the run-wide graph and hand back the summary
    pub fn finish(mut self) -> Result<RunSummary> {
        let graph_path = self.graph_path.take().or_else(|| {
            self.first_dir
                .as_ref()
                .map(|dir| dir.join(&self.config.graph_file))
        });
        if let Some(path) = graph_path {
            self.graph.write(&path)?;
            self.summary.graph = Some(path);
        }
        Ok(self.summary)
    }
}

/// Memory-event analysis over a whole run
pub struct MonitorAnalysis<'a> {
    cct: &'a CallingContextTree,
    config: AnalysisConfig,
    summary: RunSummary,
}

impl<'a> MonitorAnalysis<'a> {
    pub fn new(cct: &'a CallingContextTree, config: AnalysisConfig) -> Self {
        Self {
            cct,
            config,
            summary: RunSummary::default(),
        }
    }

    pub fn run<P: AsRef<Path>>(mut self, files: &[P]) -> RunSummary {
        for file in files {
            let _ = self.process_file(file.as_ref());
        }
        self.finish()
    }

    /// Analyze one memory-event trace; returns the number of contexts
    pub fn process_file(&mut self, path: &Path) -> Result<usize> {
        let result = self.analyze(path);
        self.summary.record(path, &result);
        result
    }

    fn analyze(&self, path: &Path) -> Result<usize> {
        info!("Processing memory trace {}", path.display());
        let text = read_trace(path)?;
        let mut table = parse_memory_events(&text)
            .with_context(|| format!("Malformed memory trace: {}", path.display()))?;

        let matcher = ContextMatcher::new(self.cct)
            .with_limits(self.config.max_frames, self.config.max_name_len);
        let resolved = resolve_contexts(&mut table, &matcher);

        write_report(&report_path(path), &render_monitor_report(&table))?;
        info!(
            "{}: {} context(s), {} resolved",
            path.display(),
            table.len(),
            resolved
        );
        Ok(table.len())
    }

    pub fn finish(self) -> RunSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_dir() {
        assert_eq!(trace_dir(Path::new("trace.txt")), PathBuf::from("."));
        assert_eq!(trace_dir(Path::new("run/trace.txt")), PathBuf::from("run"));
    }

    #[test]
    fn test_summary_all_failed() {
        let mut summary = RunSummary::default();
        assert!(!summary.all_failed());
        summary.record::<()>(Path::new("a"), &Err(anyhow::anyhow!("boom")));
        assert!(summary.all_failed());
        summary.record(Path::new("b"), &Ok(()));
        assert!(!summary.all_failed());
        assert_eq!(summary.failed[0].1, "boom");
    }
}
