//! Analysis configuration
//!
//! Settings come from built-in defaults, an optional TOML file, and finally
//! `TORCHVIEW_*` environment variables, in that order of precedence.

use crate::matcher::MAX_FRAMES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use torchview_shared::utils::MAX_NAME_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Deepest procedure-frame chain rendered per context
    pub max_frames: usize,

    /// Longest symbol name kept in call paths
    pub max_name_len: usize,

    /// Intra-tree relation file, relative to each trace's directory
    pub forest_file: PathBuf,

    /// Cross-tree relation file, relative to each trace's directory
    pub cross_tree_file: PathBuf,

    /// Stall report, relative to each trace's directory
    pub stall_file: PathBuf,

    /// Graph output, relative to the first trace's directory
    pub graph_file: PathBuf,

    /// Two-decimal percentages instead of truncated integers
    pub fractional_percentages: bool,

    /// Also write `<trace>.context.json`
    pub emit_json: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_frames: MAX_FRAMES,
            max_name_len: MAX_NAME_LEN,
            forest_file: PathBuf::from("forest.txt"),
            cross_tree_file: PathBuf::from("cross_tree_relations.txt"),
            stall_file: PathBuf::from(
                "../../gpa-measurements/torch_view/torch_view_report.csv.context_v2",
            ),
            graph_file: PathBuf::from("profile.dot"),
            fractional_percentages: false,
            emit_json: false,
        }
    }
}

impl AnalysisConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML configuration")
    }

    /// Apply `TORCHVIEW_*` overrides; unparsable values are ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TORCHVIEW_MAX_FRAMES").and_then(|s| s.parse().ok()) {
            self.max_frames = v;
        }
        if let Some(v) = lookup("TORCHVIEW_MAX_NAME_LEN").and_then(|s| s.parse().ok()) {
            self.max_name_len = v;
        }
        if let Some(v) = lookup("TORCHVIEW_FRACTIONAL_PERCENT").and_then(|s| parse_flag(&s)) {
            self.fractional_percentages = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_frames == 0 {
            anyhow::bail!("max_frames must be greater than 0");
        }

        if self.max_name_len == 0 {
            anyhow::bail!("max_name_len must be greater than 0");
        }

        if self.graph_file.as_os_str().is_empty() {
            anyhow::bail!("graph_file must not be empty");
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
