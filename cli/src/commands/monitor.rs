//! Monitor command implementation

use super::{file_label, load_cct, report_summary};
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use torchview_analysis::{AnalysisConfig, MonitorAnalysis};

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Calling-context tree dump (JSON)
    #[arg(long, env = "TORCHVIEW_CCT")]
    pub cct: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Memory-event trace files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

pub fn run(args: MonitorArgs) -> Result<()> {
    let config =
        AnalysisConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let cct = load_cct(&args.cct)?;

    let mut analysis = MonitorAnalysis::new(&cct, config);
    let pb = output::file_progress(args.files.len())?;
    for file in &args.files {
        pb.set_message(file_label(file));
        if let Ok(contexts) = analysis.process_file(file) {
            pb.println(format!("{}: {} context(s)", file.display(), contexts));
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    report_summary(&analysis.finish())
}
