//! Utility functions and helpers

pub mod registry;

pub use registry::IdRegistry;

use std::num::ParseIntError;

/// Longest symbol name kept in rendered call paths
pub const MAX_NAME_LEN: usize = 128;

/// Cut a symbol name down to at most `max` characters
pub fn truncate_name(name: &str, max: usize) -> String {
    match name.char_indices().nth(max) {
        Some((byte_idx, _)) => name[..byte_idx].to_string(),
        None => name.to_string(),
    }
}

/// Parse an unsigned token written in decimal or `0x`-prefixed hexadecimal
pub fn parse_u64_token(token: &str) -> Result<u64, ParseIntError> {
    match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => token.parse(),
    }
}

/// Render program counters as a comma-separated hex list
pub fn format_pcs(pcs: &[u64]) -> String {
    pcs.iter()
        .map(|pc| format!("{:#x}", pc))
        .collect::<Vec<_>>()
        .join(", ")
}
