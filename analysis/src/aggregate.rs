//! Stall attribution
//!
//! Joins the program counters observed under each python state against the
//! stall table for that state's hash.

use crate::stall::StallWeightTable;
use std::fmt;
use torchview_shared::types::access::{AccessState, ObjectAccessRecord};

/// Share of the run-wide stall total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Percent {
    count: u64,
    total: u64,
    fractional: bool,
}

impl Percent {
    /// Integer percentage, truncated toward zero
    pub fn truncated(&self) -> u64 {
        (u128::from(self.count) * 100 / u128::from(self.total)) as u64
    }

    pub fn as_f64(&self) -> f64 {
        self.count as f64 * 100.0 / self.total as f64
    }

    /// Value in the configured precision
    pub fn value(&self) -> f64 {
        if self.fractional {
            self.as_f64()
        } else {
            self.truncated() as f64
        }
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fractional {
            write!(f, "{:.2}%", self.as_f64())
        } else {
            write!(f, "{}%", self.truncated())
        }
    }
}

/// Computes stall totals against an optional stall table
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator<'a> {
    table: Option<&'a StallWeightTable>,
    fractional: bool,
}

impl<'a> Aggregator<'a> {
    pub fn new(table: Option<&'a StallWeightTable>) -> Self {
        Self {
            table,
            fractional: false,
        }
    }

    /// Render percentages with two decimals instead of truncating
    pub fn fractional(mut self, fractional: bool) -> Self {
        self.fractional = fractional;
        self
    }

    /// Whether percentages can be computed at all
    pub fn has_data(&self) -> bool {
        self.table.map_or(false, |table| table.total_stalls() > 0)
    }

    /// Stall cycles attributed to one state
    pub fn state_stalls(&self, state: &AccessState) -> u64 {
        let (Some(table), Some(hash)) = (self.table, state.py_state.hash_key()) else {
            return 0;
        };
        let Some(weights) = table.pcs_for(hash) else {
            return 0;
        };
        state
            .unique_pcs()
            .iter()
            .filter_map(|pc| weights.get(pc))
            .sum()
    }

    /// Stall cycles over every state of an object
    pub fn object_stalls(&self, record: &ObjectAccessRecord) -> u64 {
        record.states.iter().map(|state| self.state_stalls(state)).sum()
    }

    /// Percentage of the run-wide total, if one is known
    pub fn percent(&self, count: u64) -> Option<Percent> {
        let total = self.table?.total_stalls();
        if total == 0 {
            return None;
        }
        Some(Percent {
            count,
            total,
            fractional: self.fractional,
        })
    }

    /// Fill `total_stalls` on every record
    pub fn annotate(&self, records: &mut [ObjectAccessRecord]) {
        for record in records.iter_mut() {
            record.total_stalls = self.object_stalls(record);
        }
    }
}
