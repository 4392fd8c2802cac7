//! Calling-context tree
//!
//! A read-only model of the profiler's calling-context tree (CCT) and the
//! static structure tree its nodes point into. Nodes live in flat arenas and
//! refer to each other by index; a parent always precedes its children, so
//! the trees are acyclic by construction.
//!
//! The analysis only needs a handful of capabilities from the tree: lookup by
//! correlation id, the node kind, the nearest enclosing procedure frame or
//! call site, and the static source location (file, line, inlined-code
//! ancestry) a node maps to.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Index of a node in the static structure tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructId(pub usize);

/// Index of a node in the calling-context tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CctNodeId(pub usize);

/// Errors raised while building or loading a calling-context tree
#[derive(Debug, Error)]
pub enum CctError {
    #[error("failed to read calling-context tree: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed calling-context tree dump: {0}")]
    Json(#[from] serde_json::Error),

    #[error("structure node {index} has parent {parent}, which does not precede it")]
    InvalidStructParent { index: usize, parent: usize },

    #[error("cct node {index} has parent {parent}, which does not precede it")]
    InvalidNodeParent { index: usize, parent: usize },

    #[error("cct node {index} refers to missing structure node {structure}")]
    DanglingStructure { index: usize, structure: usize },
}

/// Static structure node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructKind {
    Root,
    File,
    Proc,
    /// Code inlined from elsewhere (inline function or macro expansion)
    Alien,
    Loop,
    Stmt,
}

/// A node of the static structure tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructNode {
    pub kind: StructKind,

    /// File path for `File` nodes, symbol name for `Proc` and `Alien` nodes
    #[serde(default)]
    pub name: String,

    /// Source file an `Alien` node was inlined from
    #[serde(default)]
    pub file_name: String,

    /// First source line
    #[serde(default)]
    pub line: u32,

    #[serde(default)]
    pub parent: Option<StructId>,
}

/// Calling-context node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CctKind {
    Root,
    ProcFrame,
    Call,
    Statement,
    Loop,
}

/// A node of the calling-context tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CctNode {
    pub kind: CctKind,

    /// Correlation id for dynamic nodes
    #[serde(default)]
    pub cp_id: Option<u32>,

    #[serde(default)]
    pub parent: Option<CctNodeId>,

    #[serde(default)]
    pub structure: Option<StructId>,
}

/// Arena holding the static structure tree
#[derive(Debug, Clone, Default)]
pub struct StructTree {
    nodes: Vec<StructNode>,
}

impl StructTree {
    pub fn get(&self, id: StructId) -> &StructNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent(&self, id: StructId) -> Option<StructId> {
        self.get(id).parent
    }

    /// Nearest node of `kind`, starting with `id` itself
    pub fn ancestor(&self, id: StructId, kind: StructKind) -> Option<StructId> {
        let mut cur = Some(id);
        while let Some(node) = cur {
            if self.get(node).kind == kind {
                return Some(node);
            }
            cur = self.parent(node);
        }
        None
    }

    pub fn ancestor_alien(&self, id: StructId) -> Option<StructId> {
        self.ancestor(id, StructKind::Alien)
    }

    pub fn ancestor_file(&self, id: StructId) -> Option<StructId> {
        self.ancestor(id, StructKind::File)
    }
}

/// Calling-context tree with its static structure and correlation-id index
#[derive(Debug, Clone, Default)]
pub struct CallingContextTree {
    structure: StructTree,
    nodes: Vec<CctNode>,
    index: HashMap<u32, CctNodeId>,
}

/// Flat on-disk form of a calling-context tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CctDump {
    #[serde(default)]
    pub structure: Vec<StructNode>,
    #[serde(default)]
    pub nodes: Vec<CctNode>,
}

impl CallingContextTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a tree from a JSON dump on disk
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CctError> {
        let file = File::open(path.as_ref())?;
        Self::from_json_reader(BufReader::new(file))
    }

    /// Load a tree from a JSON dump
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, CctError> {
        let dump: CctDump = serde_json::from_reader(reader)?;
        Self::from_dump(dump)
    }

    /// Validate a flat dump and index its dynamic nodes
    pub fn from_dump(dump: CctDump) -> Result<Self, CctError> {
        let mut tree = Self::new();
        for node in dump.structure {
            tree.push_struct(node)?;
        }
        for node in dump.nodes {
            tree.push_node(node)?;
        }
        Ok(tree)
    }

    /// Convert back into the flat on-disk form
    pub fn to_dump(&self) -> CctDump {
        CctDump {
            structure: self.structure.nodes.clone(),
            nodes: self.nodes.clone(),
        }
    }

    /// Add a static structure node
    pub fn add_struct(
        &mut self,
        kind: StructKind,
        name: &str,
        line: u32,
        parent: Option<StructId>,
    ) -> Result<StructId, CctError> {
        self.push_struct(StructNode {
            kind,
            name: name.to_string(),
            file_name: String::new(),
            line,
            parent,
        })
    }

    /// Add an inlined-code node, recording the file it was inlined from
    pub fn add_alien(
        &mut self,
        name: &str,
        file_name: &str,
        line: u32,
        parent: Option<StructId>,
    ) -> Result<StructId, CctError> {
        self.push_struct(StructNode {
            kind: StructKind::Alien,
            name: name.to_string(),
            file_name: file_name.to_string(),
            line,
            parent,
        })
    }

    /// Add a calling-context node
    pub fn add_node(
        &mut self,
        kind: CctKind,
        cp_id: Option<u32>,
        parent: Option<CctNodeId>,
        structure: Option<StructId>,
    ) -> Result<CctNodeId, CctError> {
        self.push_node(CctNode {
            kind,
            cp_id,
            parent,
            structure,
        })
    }

    fn push_struct(&mut self, node: StructNode) -> Result<StructId, CctError> {
        let index = self.structure.nodes.len();
        if let Some(StructId(parent)) = node.parent {
            if parent >= index {
                return Err(CctError::InvalidStructParent { index, parent });
            }
        }
        self.structure.nodes.push(node);
        Ok(StructId(index))
    }

    fn push_node(&mut self, node: CctNode) -> Result<CctNodeId, CctError> {
        let index = self.nodes.len();
        if let Some(CctNodeId(parent)) = node.parent {
            if parent >= index {
                return Err(CctError::InvalidNodeParent { index, parent });
            }
        }
        if let Some(StructId(structure)) = node.structure {
            if structure >= self.structure.len() {
                return Err(CctError::DanglingStructure { index, structure });
            }
        }
        let id = CctNodeId(index);
        if let Some(cp_id) = node.cp_id {
            self.index.entry(cp_id).or_insert(id);
        }
        self.nodes.push(node);
        Ok(id)
    }

    /// Find the node registered for a correlation id
    pub fn lookup(&self, cp_id: u32) -> Option<CctNodeId> {
        self.index.get(&cp_id).copied()
    }

    /// Number of correlation ids indexed
    pub fn indexed_len(&self) -> usize {
        self.index.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: CctNodeId) -> &CctNode {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: CctNodeId) -> CctKind {
        self.node(id).kind
    }

    pub fn parent(&self, id: CctNodeId) -> Option<CctNodeId> {
        self.node(id).parent
    }

    /// Static structure a node maps to, if any
    pub fn structure_of(&self, id: CctNodeId) -> Option<StructId> {
        self.node(id).structure
    }

    pub fn structure(&self) -> &StructTree {
        &self.structure
    }

    /// Nearest node of `kind`, starting with `id` itself
    pub fn ancestor(&self, id: CctNodeId, kind: CctKind) -> Option<CctNodeId> {
        let mut cur = Some(id);
        while let Some(node) = cur {
            if self.kind(node) == kind {
                return Some(node);
            }
            cur = self.parent(node);
        }
        None
    }

    pub fn ancestor_proc_frame(&self, id: CctNodeId) -> Option<CctNodeId> {
        self.ancestor(id, CctKind::ProcFrame)
    }

    pub fn ancestor_call(&self, id: CctNodeId) -> Option<CctNodeId> {
        self.ancestor(id, CctKind::Call)
    }
}
