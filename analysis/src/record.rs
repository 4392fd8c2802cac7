//! Object access trace reader
//!
//! The trace is a stream of whitespace-separated words. A keyword selects the
//! field the next word belongs to; once that value is consumed the reader goes
//! back to waiting for a keyword. Words that arrive while no field is selected
//! are skipped.
//!
//! ```text
//! id 42 object_type 0
//!   index 0 num_states 1 py_state
//!     file_name model.py function_name forward function_first_lineno 10 lineno 12
//!     pytates_hash 999
//!   ctx_id 7 pc 0x100 pc 0x200
//! ```
//!
//! Each `id` starts a new object record, each `index` a new python state of
//! that record, each `file_name` a new python frame of that state, and each
//! `ctx_id` an access context whose program counters follow as `pc` values.

use crate::error::FormatError;
use std::collections::HashSet;
use torchview_shared::types::access::{
    AccessContext, AccessState, AccessType, ObjectAccessRecord, PythonFrame,
};
use torchview_shared::utils::parse_u64_token;
use tracing::{debug, trace};

/// Fields a keyword can select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Index,
    NumStates,
    FileName,
    FunctionName,
    FunctionFirstLineno,
    Lineno,
    PystatesHash,
    ObjectType,
    CtxId,
    Pc,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Index => "index",
            Field::NumStates => "num_states",
            Field::FileName => "file_name",
            Field::FunctionName => "function_name",
            Field::FunctionFirstLineno => "function_first_lineno",
            Field::Lineno => "lineno",
            Field::PystatesHash => "pytates_hash",
            Field::ObjectType => "object_type",
            Field::CtxId => "ctx_id",
            Field::Pc => "pc",
        }
    }
}

enum Keyword {
    Field(Field),
    /// Section marker with no value of its own
    Section,
}

fn keyword(word: &str) -> Option<Keyword> {
    let field = match word {
        "id" => Field::Id,
        "index" => Field::Index,
        "num_states" => Field::NumStates,
        "file_name" => Field::FileName,
        "function_name" => Field::FunctionName,
        "function_first_lineno" => Field::FunctionFirstLineno,
        "lineno" => Field::Lineno,
        "pytates_hash" => Field::PystatesHash,
        "object_type" => Field::ObjectType,
        "ctx_id" => Field::CtxId,
        "pc" => Field::Pc,
        "py_state" | "python_state" => return Some(Keyword::Section),
        _ => return None,
    };
    Some(Keyword::Field(field))
}

/// Incremental reader for one access trace
#[derive(Debug, Default)]
pub struct RecordParser {
    records: Vec<ObjectAccessRecord>,
    current: Option<ObjectAccessRecord>,
    mode: Option<Field>,
    /// Context ids already seen in the current state
    seen_ctx: HashSet<i32>,
    /// Context receiving `pc` values
    current_ctx: Option<usize>,
    position: usize,
}

impl RecordParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one word of the trace
    pub fn feed(&mut self, word: &str) -> Result<(), FormatError> {
        self.position += 1;

        if let Some(kw) = keyword(word) {
            return match kw {
                Keyword::Section => {
                    self.mode = None;
                    Ok(())
                }
                Keyword::Field(field) => self.begin_field(field),
            };
        }

        match self.mode.take() {
            Some(field) => self.store(field, word),
            None => {
                trace!("skipping stray token {:?} at {}", word, self.position);
                Ok(())
            }
        }
    }

    /// Finalize the last record and return every record read, in file order
    pub fn finish(mut self) -> Vec<ObjectAccessRecord> {
        self.finalize_current();
        self.records
    }

    fn begin_field(&mut self, field: Field) -> Result<(), FormatError> {
        match field {
            Field::Id => {
                self.finalize_current();
                self.current = Some(ObjectAccessRecord::new());
            }
            Field::Index => {
                self.record_mut(field)?.states.push(AccessState::default());
                self.seen_ctx.clear();
                self.current_ctx = None;
            }
            Field::FileName => {
                self.state_mut(field)?
                    .py_state
                    .call_frames
                    .push(PythonFrame::default());
            }
            Field::ObjectType => {
                self.record_mut(field)?;
            }
            Field::NumStates | Field::PystatesHash | Field::CtxId => {
                self.state_mut(field)?;
            }
            Field::FunctionName | Field::FunctionFirstLineno | Field::Lineno => {
                self.frame_mut(field)?;
            }
            Field::Pc => {
                if self.current_ctx.is_none() {
                    return Err(self.out_of_order(field, "ctx_id"));
                }
            }
        }
        self.mode = Some(field);
        Ok(())
    }

    fn store(&mut self, field: Field, word: &str) -> Result<(), FormatError> {
        match field {
            Field::Id => {
                let id = self.parse_u64(field, word)?;
                self.record_mut(field)?.global_id = id;
            }
            Field::ObjectType => {
                let access_type = word
                    .parse::<u8>()
                    .ok()
                    .and_then(AccessType::from_code)
                    .ok_or_else(|| self.invalid(field, word))?;
                self.record_mut(field)?.access_type = access_type;
            }
            Field::Index => {
                let value = self.parse_i32(field, word)?;
                self.state_mut(field)?.py_state.arg_index = value;
            }
            Field::NumStates => {
                let value = self.parse_i32(field, word)?;
                self.state_mut(field)?.py_state.num_states = value;
            }
            Field::PystatesHash => {
                self.state_mut(field)?.py_state.hash = word.to_string();
            }
            Field::FileName => {
                self.frame_mut(field)?.file = word.to_string();
            }
            Field::FunctionName => {
                self.frame_mut(field)?.function = word.to_string();
            }
            Field::FunctionFirstLineno => {
                let value = self.parse_i32(field, word)?;
                self.frame_mut(field)?.function_first_line = value;
            }
            Field::Lineno => {
                let value = self.parse_i32(field, word)?;
                self.frame_mut(field)?.line = value;
            }
            Field::CtxId => {
                // Ids outside the i32 range wrap, matching the instrumentation's encoding
                let ctx_id = word
                    .parse::<i64>()
                    .map_err(|_| self.invalid(field, word))? as i32;
                let is_new = self.seen_ctx.insert(ctx_id);
                let state = self.state_mut(field)?;
                // A repeated id adds nothing; pcs keep going to the last added context
                if is_new {
                    state.contexts.push(AccessContext::new(ctx_id));
                    let idx = state.contexts.len() - 1;
                    self.current_ctx = Some(idx);
                }
            }
            Field::Pc => {
                let pc = self.parse_u64(field, word)?;
                let idx = self
                    .current_ctx
                    .ok_or_else(|| self.out_of_order(field, "ctx_id"))?;
                self.state_mut(field)?.contexts[idx].program_counters.push(pc);
            }
        }
        Ok(())
    }

    fn finalize_current(&mut self) {
        self.seen_ctx.clear();
        self.current_ctx = None;

        let Some(mut record) = self.current.take() else {
            return;
        };
        let pruned = record.prune_invalid_states();
        if pruned > 0 {
            debug!(
                "object {}: pruned {} state(s) without contexts",
                record.global_id, pruned
            );
        }
        if record.states.is_empty() {
            debug!("object {}: no valid states, dropped", record.global_id);
            return;
        }
        self.records.push(record);
    }

    fn record_mut(&mut self, field: Field) -> Result<&mut ObjectAccessRecord, FormatError> {
        let position = self.position;
        self.current.as_mut().ok_or(FormatError::OutOfOrder {
            field: field.name(),
            expected: "id",
            position,
        })
    }

    fn state_mut(&mut self, field: Field) -> Result<&mut AccessState, FormatError> {
        let position = self.position;
        self.record_mut(field)?
            .states
            .last_mut()
            .ok_or(FormatError::OutOfOrder {
                field: field.name(),
                expected: "index",
                position,
            })
    }

    fn frame_mut(&mut self, field: Field) -> Result<&mut PythonFrame, FormatError> {
        let position = self.position;
        self.state_mut(field)?
            .py_state
            .call_frames
            .last_mut()
            .ok_or(FormatError::OutOfOrder {
                field: field.name(),
                expected: "file_name",
                position,
            })
    }

    fn parse_u64(&self, field: Field, word: &str) -> Result<u64, FormatError> {
        parse_u64_token(word).map_err(|_| self.invalid(field, word))
    }

    fn parse_i32(&self, field: Field, word: &str) -> Result<i32, FormatError> {
        word.parse().map_err(|_| self.invalid(field, word))
    }

    fn invalid(&self, field: Field, word: &str) -> FormatError {
        FormatError::InvalidValue {
            field: field.name(),
            token: word.to_string(),
            position: self.position,
        }
    }

    fn out_of_order(&self, field: Field, expected: &'static str) -> FormatError {
        FormatError::OutOfOrder {
            field: field.name(),
            expected,
            position: self.position,
        }
    }
}

/// Parse a complete access trace
pub fn parse_records(text: &str) -> Result<Vec<ObjectAccessRecord>, FormatError> {
    let mut parser = RecordParser::new();
    for word in text.split_whitespace() {
        parser.feed(word)?;
    }
    Ok(parser.finish())
}
