//! Calling-context matcher
//!
//! Turns a GPU correlation id into a readable call path by locating its node
//! in the calling-context tree and walking outwards through the enclosing
//! procedure frames. Each frame contributes the source location of the call
//! site that entered it; inlined code contributes one line per inlined level.

use torchview_shared::types::access::ObjectAccessRecord;
use torchview_shared::types::cct::{CallingContextTree, CctKind, CctNodeId, StructId, StructKind};
use torchview_shared::utils::{truncate_name, MAX_NAME_LEN};
use tracing::debug;

/// Deepest procedure-frame chain rendered per context
pub const MAX_FRAMES: usize = 20;

/// Alien name used for macro expansions
const INLINE_MACRO: &str = "<inline>";

/// Marker in file names the structure recovery could not attribute
const UNKNOWN_FILE_MARKER: &str = "<unknown file>";

/// Counts from a matching pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub resolved: usize,
    pub unresolved: usize,
}

/// Resolves correlation ids against a calling-context tree
#[derive(Debug, Clone, Copy)]
pub struct ContextMatcher<'a> {
    cct: &'a CallingContextTree,
    max_frames: usize,
    max_name_len: usize,
}

impl<'a> ContextMatcher<'a> {
    pub fn new(cct: &'a CallingContextTree) -> Self {
        Self {
            cct,
            max_frames: MAX_FRAMES,
            max_name_len: MAX_NAME_LEN,
        }
    }

    pub fn with_limits(mut self, max_frames: usize, max_name_len: usize) -> Self {
        self.max_frames = max_frames;
        self.max_name_len = max_name_len;
        self
    }

    /// Find the node for a correlation id.
    ///
    /// The instrumentation may hand out ids under the opposite sign convention
    /// from the tree's index, so a miss is retried with the negated id
    /// reinterpreted as unsigned.
    pub fn locate(&self, ctx_id: i32) -> Option<CctNodeId> {
        self.cct
            .lookup(ctx_id as u32)
            .or_else(|| self.cct.lookup(ctx_id.wrapping_neg() as u32))
    }

    /// Call path for a correlation id, outermost frame first.
    /// Empty when the id has no node in the tree.
    pub fn resolve(&self, ctx_id: i32) -> Vec<String> {
        let Some(node) = self.locate(ctx_id) else {
            debug!("ctx {} not found in calling-context tree", ctx_id);
            return Vec::new();
        };

        let mut op_lines = Vec::new();
        let mut frame = match self.cct.kind(node) {
            CctKind::ProcFrame => Some(node),
            CctKind::Root => None,
            _ => {
                let frame = self.cct.ancestor_proc_frame(node);
                if frame.is_some() {
                    if let Some(stmt) = self.cct.structure_of(node) {
                        op_lines = self.operation_lines(stmt);
                    }
                }
                frame
            }
        };

        // innermost first
        let mut frames = Vec::new();
        while let Some(current) = frame {
            if frames.len() >= self.max_frames {
                break;
            }
            frames.push(current);
            frame = self
                .cct
                .parent(current)
                .and_then(|parent| self.cct.ancestor_proc_frame(parent));
        }

        let mut path: Vec<String> = frames
            .into_iter()
            .rev()
            .flat_map(|frame| self.call_site_lines(frame))
            .collect();
        path.extend(op_lines);
        path
    }

    /// Resolve every context of every record in place
    pub fn match_records(&self, records: &mut [ObjectAccessRecord]) -> MatchStats {
        let mut stats = MatchStats::default();
        for ctx in records
            .iter_mut()
            .flat_map(|record| record.states.iter_mut())
            .flat_map(|state| state.contexts.iter_mut())
        {
            ctx.resolved_path = self.resolve(ctx.ctx_id);
            if ctx.is_resolved() {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
        }
        stats
    }

    /// Location of the operation itself, preceded by any inlined levels
    fn operation_lines(&self, stmt: StructId) -> Vec<String> {
        let tree = self.cct.structure();
        let mut lines = Vec::new();
        if tree.ancestor_alien(stmt).is_some() {
            lines.extend(self.inline_stack(stmt));
        }
        let file = tree
            .ancestor_file(stmt)
            .map(|file| tree.get(file).name.as_str())
            .unwrap_or("Unknown");
        lines.push(format!("{}:{}\t <op>", file, tree.get(stmt).line));
        lines
    }

    /// Location of the call that entered `frame`
    fn call_site_lines(&self, frame: CctNodeId) -> Vec<String> {
        let tree = self.cct.structure();
        let Some(frame_struct) = self.cct.structure_of(frame) else {
            return Vec::new();
        };
        let Some(call_struct) = self
            .cct
            .ancestor_call(frame)
            .and_then(|call| self.cct.structure_of(call))
        else {
            return Vec::new();
        };

        let func_name = truncate_name(&tree.get(frame_struct).name, self.max_name_len);
        let line = tree.get(call_struct).line;

        let mut lines = Vec::new();
        let file_name = if let Some(alien) = tree.ancestor_alien(call_struct) {
            lines.extend(self.inline_stack(call_struct));
            tree.get(alien).file_name.as_str()
        } else if let Some(file) = tree.ancestor_file(call_struct) {
            tree.get(file).name.as_str()
        } else {
            return lines;
        };
        let file_name = if file_name.contains(UNKNOWN_FILE_MARKER) {
            "Unknown"
        } else {
            file_name
        };
        lines.push(format!("{}:{}\t{}", file_name, line, func_name));
        lines
    }

    /// Inlined levels enclosing `stmt`, outermost first.
    ///
    /// Each level is named after the inlined function and located at the
    /// alien it was inlined into; a macro expansion (`<inline>`) is located at
    /// itself.
    fn inline_stack(&self, stmt: StructId) -> Vec<String> {
        let tree = self.cct.structure();
        let mut levels = Vec::new();
        let Some(mut alien) = tree.ancestor_alien(stmt) else {
            return levels;
        };

        loop {
            let func_name = truncate_name(&tree.get(alien).name, self.max_name_len);
            let Some(parent) = tree.parent(alien) else {
                break;
            };
            if tree.get(alien).name != INLINE_MACRO {
                if tree.get(parent).kind == StructKind::Alien {
                    alien = parent;
                } else {
                    break;
                }
            }
            let site = tree.get(alien);
            levels.push(format!("{}:{}\t{}", site.file_name, site.line, func_name));

            let Some(next) = tree
                .parent(alien)
                .and_then(|outer| tree.ancestor_alien(outer))
            else {
                break;
            };
            alien = next;
        }

        levels.reverse();
        levels
    }
}
