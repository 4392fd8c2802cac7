//! View command implementation

use super::{file_label, load_cct, report_summary};
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use torchview_analysis::{AnalysisConfig, ViewAnalysis};

#[derive(Args, Debug)]
pub struct ViewArgs {
    /// Calling-context tree dump (JSON)
    #[arg(long, env = "TORCHVIEW_CCT")]
    pub cct: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Graph output path (default: profile.dot next to the first trace)
    #[arg(short, long)]
    pub graph: Option<PathBuf>,

    /// Also write <trace>.context.json
    #[arg(long)]
    pub json: bool,

    /// Show stall percentages with two decimals
    #[arg(long)]
    pub fractional: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// View trace files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

pub fn run(args: ViewArgs) -> Result<()> {
    let mut config =
        AnalysisConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.emit_json |= args.json;
    config.fractional_percentages |= args.fractional;

    let cct = load_cct(&args.cct)?;

    let mut analysis = ViewAnalysis::new(&cct, config);
    if let Some(graph) = args.graph {
        analysis = analysis.with_graph_path(graph);
    }

    let pb = output::file_progress(args.files.len())?;
    for file in &args.files {
        pb.set_message(file_label(file));
        if let Ok(stats) = analysis.process_file(file) {
            pb.println(format!(
                "{}: {} object(s), {}/{} context(s) resolved",
                file.display(),
                stats.objects,
                stats.contexts.resolved,
                stats.contexts.resolved + stats.contexts.unresolved
            ));
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let summary = analysis.finish()?;
    report_summary(&summary)
}
