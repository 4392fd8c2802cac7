//! Stall weight table
//!
//! Reads the instruction-level stall report produced by the GPU performance
//! advisor. Like the access trace it is a keyword/value word stream:
//!
//! ```text
//! gpa_id 3 pystates_hash 999 leaf_lm_id 2 lm_ip 0x40
//!   pc 100 count 5
//!   pc 200 count 3
//! total_stalls 80
//! ```
//!
//! Counts accumulate per (python-state hash, pc). `gpa_id`, `leaf_lm_id` and
//! `lm_ip` identify where a sample came from and are not needed here.

use crate::error::FormatError;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use torchview_shared::utils::parse_u64_token;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    GpaId,
    PystatesHash,
    LeafLmId,
    LmIp,
    Pc,
    Count,
    TotalStalls,
}

impl Field {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "gpa_id" => Some(Field::GpaId),
            "pystates_hash" => Some(Field::PystatesHash),
            "leaf_lm_id" => Some(Field::LeafLmId),
            "lm_ip" => Some(Field::LmIp),
            "pc" => Some(Field::Pc),
            "count" => Some(Field::Count),
            "total_stalls" => Some(Field::TotalStalls),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Field::GpaId => "gpa_id",
            Field::PystatesHash => "pystates_hash",
            Field::LeafLmId => "leaf_lm_id",
            Field::LmIp => "lm_ip",
            Field::Pc => "pc",
            Field::Count => "count",
            Field::TotalStalls => "total_stalls",
        }
    }
}

/// Stall cycles per python-state hash and program counter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StallWeightTable {
    weights: HashMap<u64, HashMap<u64, u64>>,
    total_stalls: u64,
}

impl StallWeightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the table from disk; `Ok(None)` when the report does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            info!("No stall report at {}, stall attribution disabled", path.display());
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stall report: {}", path.display()))?;
        let table = Self::parse(&text)
            .with_context(|| format!("Malformed stall report: {}", path.display()))?;
        info!(
            "Loaded stall report {}: {} state(s), {} total stalls",
            path.display(),
            table.weights.len(),
            table.total_stalls
        );
        Ok(Some(table))
    }

    /// Parse report text
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let mut table = Self::new();
        let mut mode: Option<Field> = None;
        let mut current_hash: Option<u64> = None;
        let mut current_pc: Option<u64> = None;

        for (idx, word) in text.split_whitespace().enumerate() {
            let position = idx + 1;
            let invalid = |field: Field| FormatError::InvalidValue {
                field: field.name(),
                token: word.to_string(),
                position,
            };
            let out_of_order = |field: Field, expected: &'static str| FormatError::OutOfOrder {
                field: field.name(),
                expected,
                position,
            };

            if let Some(field) = Field::from_word(word) {
                match field {
                    Field::Pc if current_hash.is_none() => {
                        return Err(out_of_order(field, "pystates_hash"))
                    }
                    Field::Count if current_pc.is_none() => return Err(out_of_order(field, "pc")),
                    _ => {}
                }
                mode = Some(field);
                continue;
            }

            let Some(field) = mode.take() else {
                continue;
            };
            match field {
                Field::GpaId | Field::LeafLmId | Field::LmIp => {}
                Field::PystatesHash => {
                    let hash = word.parse().map_err(|_| invalid(field))?;
                    table.weights.entry(hash).or_default();
                    current_hash = Some(hash);
                    current_pc = None;
                }
                Field::Pc => {
                    let pc = parse_u64_token(word).map_err(|_| invalid(field))?;
                    if let Some(hash) = current_hash {
                        table.weights.entry(hash).or_default().entry(pc).or_insert(0);
                    }
                    current_pc = Some(pc);
                }
                Field::Count => {
                    let count: u64 = word.parse().map_err(|_| invalid(field))?;
                    if let (Some(hash), Some(pc)) = (current_hash, current_pc) {
                        table.add(hash, pc, count);
                    }
                }
                Field::TotalStalls => {
                    table.total_stalls = word.parse().map_err(|_| invalid(field))?;
                }
            }
        }

        debug!("Parsed stall table with {} hash(es)", table.weights.len());
        Ok(table)
    }

    /// Accumulate stall cycles for a (hash, pc) pair
    pub fn add(&mut self, hash: u64, pc: u64, count: u64) {
        *self.weights.entry(hash).or_default().entry(pc).or_insert(0) += count;
    }

    /// Run-wide stall total used as the percentage denominator
    pub fn total_stalls(&self) -> u64 {
        self.total_stalls
    }

    /// Stall cycles for one pc under one python state (0 if unknown)
    pub fn weight(&self, hash: u64, pc: u64) -> u64 {
        self.weights
            .get(&hash)
            .and_then(|pcs| pcs.get(&pc))
            .copied()
            .unwrap_or(0)
    }

    pub fn pcs_for(&self, hash: u64) -> Option<&HashMap<u64, u64>> {
        self.weights.get(&hash)
    }

    /// Number of python-state hashes present
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_table() {
        let table =
            StallWeightTable::parse("pystates_hash 999 pc 100 count 5 pc 200 count 3 total_stalls 80")
                .unwrap();
        assert_eq!(table.total_stalls(), 80);
        assert_eq!(table.weight(999, 100), 5);
        assert_eq!(table.weight(999, 200), 3);
        assert_eq!(table.weight(999, 300), 0);
        assert_eq!(table.weight(1, 100), 0);
    }

    #[test]
    fn test_counts_accumulate() {
        let text = "gpa_id 1 pystates_hash 7 leaf_lm_id 2 lm_ip 0x10 pc 0x40 count 2 \
                    gpa_id 2 pystates_hash 7 pc 64 count 5";
        let table = StallWeightTable::parse(text).unwrap();
        assert_eq!(table.weight(7, 0x40), 7);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_pc_without_count_registers_zero() {
        let table = StallWeightTable::parse("pystates_hash 3 pc 9").unwrap();
        assert_eq!(table.pcs_for(3).unwrap().get(&9), Some(&0));
    }

    #[test]
    fn test_ordering_errors() {
        assert!(matches!(
            StallWeightTable::parse("pc 1 count 2").unwrap_err(),
            FormatError::OutOfOrder { field: "pc", .. }
        ));
        assert!(matches!(
            StallWeightTable::parse("pystates_hash 1 count 2").unwrap_err(),
            FormatError::OutOfOrder { field: "count", .. }
        ));
    }

    #[test]
    fn test_malformed_count() {
        assert!(matches!(
            StallWeightTable::parse("pystates_hash 1 pc 2 count many").unwrap_err(),
            FormatError::InvalidValue { field: "count", .. }
        ));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = StallWeightTable::load(&dir.path().join("absent.csv")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv.context_v2");
        std::fs::write(&path, "pystates_hash 5 pc 1 count 4\ntotal_stalls 40\n").unwrap();
        let table = StallWeightTable::load(&path).unwrap().unwrap();
        assert_eq!(table.weight(5, 1), 4);
        assert_eq!(table.total_stalls(), 40);
    }
}
