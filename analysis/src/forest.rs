//! Bracketed forest reader
//!
//! Object relations are serialized as a sequence of trees:
//!
//! ```text
//! tree := INT [":"] "{" tree* "}" INT
//! ```
//!
//! The closing integer repeats the opening one. Whitespace and any other
//! characters between tokens are ignored. The same grammar carries two kinds
//! of input: the intra-tree forest of view parent/child relations, and the
//! cross-tree relation file where each top-level root is an edge target and
//! each of its direct children an edge source.

use crate::error::ForestError;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Deepest nesting accepted before giving up. Parsing, walking and dropping
/// a tree all recurse per level, so this must fit a 2 MiB thread stack.
pub const MAX_DEPTH: usize = 256;

/// A node of a relation tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForestNode {
    pub id: u64,
    pub children: Vec<ForestNode>,
}

impl ForestNode {
    pub fn leaf(id: u64) -> Self {
        Self {
            id,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Int(u64),
    Open,
    Close,
    Colon,
}

impl Token {
    fn describe(self) -> String {
        match self {
            Token::Int(v) => format!("integer {}", v),
            Token::Open => "'{'".to_string(),
            Token::Close => "'}'".to_string(),
            Token::Colon => "':'".to_string(),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, ForestError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => tokens.push((Token::Open, i)),
            b'}' => tokens.push((Token::Close, i)),
            b':' => tokens.push((Token::Colon, i)),
            b'0'..=b'9' => {
                let start = i;
                while i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
                    i += 1;
                }
                let digits = &text[start..=i];
                let value = digits.parse().map_err(|_| ForestError::InvalidInteger {
                    text: digits.to_string(),
                    offset: start,
                })?;
                tokens.push((Token::Int(value), start));
            }
            _ => {}
        }
        i += 1;
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).map(|&(token, _)| token)
    }

    fn next(&mut self, expected: &'static str) -> Result<(Token, usize), ForestError> {
        let item = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or(ForestError::UnexpectedEof { expected })?;
        self.pos += 1;
        Ok(item)
    }

    fn expect_int(&mut self, expected: &'static str) -> Result<u64, ForestError> {
        match self.next(expected)? {
            (Token::Int(v), _) => Ok(v),
            (other, offset) => Err(ForestError::UnexpectedToken {
                expected,
                found: other.describe(),
                offset,
            }),
        }
    }

    fn expect(&mut self, want: Token, expected: &'static str) -> Result<(), ForestError> {
        match self.next(expected)? {
            (token, _) if token == want => Ok(()),
            (other, offset) => Err(ForestError::UnexpectedToken {
                expected,
                found: other.describe(),
                offset,
            }),
        }
    }

    fn tree(&mut self, depth: usize) -> Result<ForestNode, ForestError> {
        if depth >= MAX_DEPTH {
            return Err(ForestError::TooDeep { limit: MAX_DEPTH });
        }

        let open = self.expect_int("tree id")?;
        if self.peek() == Some(Token::Colon) {
            self.pos += 1;
        }
        self.expect(Token::Open, "'{'")?;

        let mut children = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Close) => break,
                Some(_) => children.push(self.tree(depth + 1)?),
                None => return Err(ForestError::UnexpectedEof { expected: "'}'" }),
            }
        }
        self.expect(Token::Close, "'}'")?;

        let close = self.expect_int("closing tree id")?;
        if close != open {
            return Err(ForestError::MismatchedId { open, close });
        }
        Ok(ForestNode { id: open, children })
    }
}

/// A parsed relation forest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Forest {
    pub roots: Vec<ForestNode>,
}

impl Forest {
    /// Parse forest text
    pub fn parse(text: &str) -> Result<Self, ForestError> {
        let mut parser = Parser {
            tokens: tokenize(text)?,
            pos: 0,
        };
        let mut roots = Vec::new();
        while parser.peek().is_some() {
            roots.push(parser.tree(0)?);
        }
        Ok(Self { roots })
    }

    /// Read a forest file. A missing or malformed file yields an empty forest.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("No forest file at {}", path.display());
            return Self::default();
        }
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read forest {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match Self::parse(&text) {
            Ok(forest) => {
                debug!("Read {} tree(s) from {}", forest.roots.len(), path.display());
                forest
            }
            Err(e) => {
                warn!("Ignoring malformed forest {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn root_ids(&self) -> HashSet<u64> {
        self.roots.iter().map(|root| root.id).collect()
    }

    /// Every id anywhere in the forest
    pub fn node_ids(&self) -> HashSet<u64> {
        let mut ids = HashSet::new();
        let mut stack: Vec<&ForestNode> = self.roots.iter().collect();
        while let Some(node) = stack.pop() {
            ids.insert(node.id);
            stack.extend(node.children.iter());
        }
        ids
    }

    /// Parent to child edges in pre-order
    pub fn edges(&self) -> Vec<(u64, u64)> {
        fn walk(node: &ForestNode, out: &mut Vec<(u64, u64)>) {
            for child in &node.children {
                out.push((node.id, child.id));
                walk(child, out);
            }
        }
        let mut out = Vec::new();
        for root in &self.roots {
            walk(root, &mut out);
        }
        out
    }
}

/// Cross-tree references, one entry per target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrossTreeRelations {
    pub relations: Vec<(u64, Vec<u64>)>,
}

impl CrossTreeRelations {
    /// Read the top level of a forest as target/sources pairs; deeper levels carry no meaning
    pub fn from_forest(forest: &Forest) -> Self {
        Self {
            relations: forest
                .roots
                .iter()
                .map(|root| (root.id, root.children.iter().map(|c| c.id).collect()))
                .collect(),
        }
    }

    pub fn load(path: &Path) -> Self {
        Self::from_forest(&Forest::load(path))
    }

    /// Source to target edges
    pub fn edges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.relations
            .iter()
            .flat_map(|(target, sources)| sources.iter().map(move |&source| (source, *target)))
    }
}
