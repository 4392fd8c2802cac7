//! Error types for the trace readers

use thiserror::Error;

/// A trace token stream that does not follow its grammar.
///
/// Fatal for the file being read, never for the run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("token {position}: invalid value {token:?} for `{field}`")]
    InvalidValue {
        field: &'static str,
        token: String,
        position: usize,
    },

    #[error("token {position}: `{field}` appears before any `{expected}`")]
    OutOfOrder {
        field: &'static str,
        expected: &'static str,
        position: usize,
    },
}

/// A bracketed forest file that does not parse.
///
/// Callers log it and carry on with an empty forest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForestError {
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: &'static str },

    #[error("byte {offset}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        offset: usize,
    },

    #[error("byte {offset}: integer {text:?} does not fit in 64 bits")]
    InvalidInteger { text: String, offset: usize },

    #[error("tree {open} is closed by {close}")]
    MismatchedId { open: u64, close: u64 },

    #[error("nesting deeper than {limit} levels")]
    TooDeep { limit: usize },
}
