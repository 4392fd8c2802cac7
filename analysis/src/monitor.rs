//! Memory-event monitor
//!
//! Reads the plain memory-event trace written alongside the view traces:
//! each of `ALLOC`, `ACCESS`, `FREE`, `SET`, `COPYT` and `COPYF` is followed by
//! the correlation id of the API call or kernel that produced the event.

use crate::error::FormatError;
use crate::matcher::ContextMatcher;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use torchview_shared::types::access::PATH_DELIMITER;
use tracing::debug;

/// Event kinds, named after the operation that produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemoryEventKind {
    Malloc,
    Kernel,
    Free,
    Set,
    CopyToDM,
    CopyFromDM,
}

impl MemoryEventKind {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "ALLOC" => Some(MemoryEventKind::Malloc),
            "ACCESS" => Some(MemoryEventKind::Kernel),
            "FREE" => Some(MemoryEventKind::Free),
            "SET" => Some(MemoryEventKind::Set),
            "COPYT" => Some(MemoryEventKind::CopyToDM),
            "COPYF" => Some(MemoryEventKind::CopyFromDM),
            _ => None,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            MemoryEventKind::Malloc => "ALLOC",
            MemoryEventKind::Kernel => "ACCESS",
            MemoryEventKind::Free => "FREE",
            MemoryEventKind::Set => "SET",
            MemoryEventKind::CopyToDM => "COPYT",
            MemoryEventKind::CopyFromDM => "COPYF",
        }
    }
}

impl fmt::Display for MemoryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryEventKind::Malloc => "Malloc",
            MemoryEventKind::Kernel => "Kernel",
            MemoryEventKind::Free => "Free",
            MemoryEventKind::Set => "Set",
            MemoryEventKind::CopyToDM => "CopyToDM",
            MemoryEventKind::CopyFromDM => "CopyFromDM",
        };
        f.write_str(name)
    }
}

/// Events attributed to one correlation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorContext {
    pub ctx_id: i32,

    /// Kind of the first event seen for this id
    pub kind: MemoryEventKind,

    /// Events of any kind naming this id
    pub count: u64,

    pub resolved_path: Vec<String>,
}

impl MonitorContext {
    fn new(ctx_id: i32, kind: MemoryEventKind) -> Self {
        Self {
            ctx_id,
            kind,
            count: 0,
            resolved_path: Vec::new(),
        }
    }

    pub fn path(&self) -> String {
        self.resolved_path
            .iter()
            .map(|fragment| format!("{}{}", fragment, PATH_DELIMITER))
            .collect()
    }
}

/// Contexts keyed by correlation id, ascending
pub type MonitorTable = BTreeMap<i32, MonitorContext>;

/// Parse a memory-event trace
pub fn parse_memory_events(text: &str) -> Result<MonitorTable, FormatError> {
    let mut table = MonitorTable::new();
    let mut pending: Option<MemoryEventKind> = None;

    for (idx, word) in text.split_whitespace().enumerate() {
        if let Some(kind) = pending.take() {
            let ctx_id: i32 = word.parse().map_err(|_| FormatError::InvalidValue {
                field: kind.keyword(),
                token: word.to_string(),
                position: idx + 1,
            })?;
            table
                .entry(ctx_id)
                .or_insert_with(|| MonitorContext::new(ctx_id, kind))
                .count += 1;
            continue;
        }
        pending = MemoryEventKind::from_keyword(word);
    }

    debug!("Parsed {} memory event context(s)", table.len());
    Ok(table)
}

/// Resolve call paths for every context; returns how many resolved
pub fn resolve_contexts(table: &mut MonitorTable, matcher: &ContextMatcher<'_>) -> usize {
    let mut resolved = 0;
    for ctx in table.values_mut() {
        ctx.resolved_path = matcher.resolve(ctx.ctx_id);
        if !ctx.resolved_path.is_empty() {
            resolved += 1;
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use torchview_shared::types::cct::{CallingContextTree, CctKind, StructKind};

    #[test]
    fn test_first_kind_wins_and_counts_accumulate() {
        let table = parse_memory_events("ALLOC 5 ACCESS 5 ACCESS 7 FREE 5 COPYT 9").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table[&5].kind, MemoryEventKind::Malloc);
        assert_eq!(table[&5].count, 3);
        assert_eq!(table[&7].kind, MemoryEventKind::Kernel);
        assert_eq!(table[&9].kind, MemoryEventKind::CopyToDM);
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec![5, 7, 9]);
    }

    #[test]
    fn test_negative_ids_and_noise() {
        let table = parse_memory_events("junk SET -3 42 COPYF 0").unwrap();
        assert_eq!(table[&-3].kind, MemoryEventKind::Set);
        assert_eq!(table[&0].kind, MemoryEventKind::CopyFromDM);
        // 42 follows no keyword
        assert!(!table.contains_key(&42));
    }

    #[test]
    fn test_malformed_id() {
        assert_eq!(
            parse_memory_events("ALLOC FREE 1").unwrap_err(),
            FormatError::InvalidValue {
                field: "ALLOC",
                token: "FREE".to_string(),
                position: 2,
            }
        );
    }

    #[test]
    fn test_trailing_keyword_ignored() {
        assert!(parse_memory_events("ALLOC 1 FREE").unwrap().contains_key(&1));
    }

    #[test]
    fn test_resolve_contexts() {
        let mut cct = CallingContextTree::new();
        let file = cct.add_struct(StructKind::File, "m.cu", 0, None).unwrap();
        let host = cct.add_struct(StructKind::Proc, "host", 1, Some(file)).unwrap();
        let stmt = cct.add_struct(StructKind::Stmt, "", 9, Some(host)).unwrap();
        let root = cct.add_node(CctKind::Root, None, None, None).unwrap();
        let frame = cct
            .add_node(CctKind::ProcFrame, Some(1), Some(root), Some(host))
            .unwrap();
        cct.add_node(CctKind::Statement, Some(2), Some(frame), Some(stmt))
            .unwrap();

        let mut table = parse_memory_events("ALLOC 2 ACCESS 8").unwrap();
        let matcher = ContextMatcher::new(&cct);
        assert_eq!(resolve_contexts(&mut table, &matcher), 1);
        assert_eq!(table[&2].path(), "m.cu:9\t <op>#\n");
        assert!(table[&8].resolved_path.is_empty());
    }
}
