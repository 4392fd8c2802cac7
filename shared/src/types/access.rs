//! Object access records
//!
//! These types represent the per-object access trace emitted by the GPU
//! instrumentation layer once it has been parsed: one record per tracked
//! tensor view or memory block, each holding a list of python call states and
//! the GPU contexts observed while that state was live.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delimiter appended to every fragment of a resolved call path
pub const PATH_DELIMITER: &str = "#\n";

/// Kind of tracked object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    /// Tensor view (`object_type 0`)
    #[default]
    ViewNode,

    /// Backing allocation (`object_type 1`)
    MemoryBlock,
}

impl AccessType {
    /// Map the numeric `object_type` code used by the trace format
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AccessType::ViewNode),
            1 => Some(AccessType::MemoryBlock),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            AccessType::ViewNode => 0,
            AccessType::MemoryBlock => 1,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::ViewNode => write!(f, "View Node"),
            AccessType::MemoryBlock => write!(f, "Memory Block"),
        }
    }
}

/// A GPU access context observed for one python state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    /// Correlation id as emitted by the instrumentation layer
    pub ctx_id: i32,

    /// Call path fragments, outermost frame first (empty until resolved)
    pub resolved_path: Vec<String>,

    /// Program counters in the order they were read
    pub program_counters: Vec<u64>,
}

impl AccessContext {
    /// Create an unresolved context with no program counters
    pub fn new(ctx_id: i32) -> Self {
        Self {
            ctx_id,
            resolved_path: Vec::new(),
            program_counters: Vec::new(),
        }
    }

    /// Check if the matcher found a calling-context node for this context
    pub fn is_resolved(&self) -> bool {
        !self.resolved_path.is_empty()
    }

    /// Render the resolved path, each fragment terminated by [`PATH_DELIMITER`]
    pub fn path(&self) -> String {
        self.resolved_path
            .iter()
            .map(|fragment| format!("{}{}", fragment, PATH_DELIMITER))
            .collect()
    }
}

/// One python frame of a captured interpreter call state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonFrame {
    pub file: String,
    pub function: String,
    pub function_first_line: i32,
    pub line: i32,
}

/// Python call state ("py_state") attached to an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyState {
    /// Argument index of the object in the captured operator call
    pub arg_index: i32,

    pub num_states: i32,

    /// Opaque state hash, kept as text because it does not round-trip
    /// through every numeric type the producers use
    pub hash: String,

    /// Frames in the order they were parsed
    pub call_frames: Vec<PythonFrame>,
}

impl PyState {
    /// Hash as a join key against stall tables
    pub fn hash_key(&self) -> Option<u64> {
        self.hash.parse().ok()
    }
}

/// A python state paired with the contexts observed under it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessState {
    pub py_state: PyState,
    pub contexts: Vec<AccessContext>,
}

impl AccessState {
    /// A state is kept only if it saw at least one real context.
    /// A lone `ctx_id 0` is the instrumentation's "no context" sentinel.
    pub fn is_valid(&self) -> bool {
        match self.contexts.as_slice() {
            [] => false,
            [only] => only.ctx_id != 0,
            _ => true,
        }
    }

    /// Program counters across every context of this state, first-seen order, no duplicates
    pub fn unique_pcs(&self) -> Vec<u64> {
        let mut seen = std::collections::HashSet::new();
        self.contexts
            .iter()
            .flat_map(|ctx| ctx.program_counters.iter().copied())
            .filter(|pc| seen.insert(*pc))
            .collect()
    }
}

/// All states recorded for one tensor view or memory block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAccessRecord {
    pub global_id: u64,

    pub access_type: AccessType,

    /// Attributed stall cycles, filled in by the aggregator
    pub total_stalls: u64,

    /// States in file order
    pub states: Vec<AccessState>,
}

impl ObjectAccessRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of python states (and aligned context lists) held
    pub fn map_size(&self) -> usize {
        self.states.len()
    }

    pub fn is_view_node(&self) -> bool {
        self.access_type == AccessType::ViewNode
    }

    /// Drop every state whose context list is invalid, scanning from the
    /// last state down to the first. Returns the number of states removed.
    pub fn prune_invalid_states(&mut self) -> usize {
        let before = self.states.len();
        for idx in (0..self.states.len()).rev() {
            if !self.states[idx].is_valid() {
                self.states.remove(idx);
            }
        }
        before - self.states.len()
    }
}
