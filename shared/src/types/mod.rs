//! Data structures shared across the analysis pipeline

pub mod access;
pub mod cct;
