//! Relation graph
//!
//! One DOT graph accumulates every trace processed in a run. Each view node
//! becomes a graph node labelled with a run-wide sequence number; intra-tree
//! relations and cross-tree references become edges; states after the first
//! get a small annotation node sized by their share of the stalls.

use crate::aggregate::Aggregator;
use crate::forest::{CrossTreeRelations, Forest};
use crate::output::context::describe_object;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use torchview_shared::types::access::ObjectAccessRecord;
use torchview_shared::utils::IdRegistry;
use tracing::{debug, info};

/// Accumulates graph statements across traces
#[derive(Debug, Default)]
pub struct GraphEmitter {
    labels: IdRegistry<u64>,
    roots: HashSet<u64>,
    emitted_nodes: HashSet<u64>,
    drawn_edges: HashSet<(u64, u64)>,
    statements: Vec<String>,
}

impl GraphEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the objects and relations of one trace
    pub fn add_file(
        &mut self,
        records: &[ObjectAccessRecord],
        forest: &Forest,
        cross: &CrossTreeRelations,
        agg: &Aggregator<'_>,
    ) {
        self.roots.extend(forest.root_ids());

        for record in records.iter().filter(|r| r.is_view_node()) {
            self.add_object(record, agg);
        }

        for (parent, child) in forest.edges() {
            if self.drawn_edges.insert((parent, child)) {
                self.labels.get_or_insert(parent);
                self.labels.get_or_insert(child);
                self.statements.push(format!("  n{} -> n{};", parent, child));
            }
        }

        // only references between objects the forest knows about
        let known = forest.node_ids();
        for (source, target) in cross.edges() {
            if !known.contains(&source) || !known.contains(&target) {
                continue;
            }
            if self.drawn_edges.insert((source, target)) {
                self.labels.get_or_insert(source);
                self.labels.get_or_insert(target);
                self.statements
                    .push(format!("  n{} -> n{} [color=\"blue\"];", source, target));
            }
        }

        debug!(
            "Graph now holds {} node(s), {} edge(s)",
            self.emitted_nodes.len(),
            self.drawn_edges.len()
        );
    }

    fn add_object(&mut self, record: &ObjectAccessRecord, agg: &Aggregator<'_>) {
        let id = record.global_id;
        if !self.emitted_nodes.insert(id) {
            return;
        }
        let label = self.labels.get_or_insert(id);
        let style = if self.roots.contains(&id) {
            "solid"
        } else {
            "dashed"
        };
        self.statements.push(format!(
            "  n{} [label=\"{}\", style={}, tooltip=\"{}\"];",
            id,
            label,
            style,
            escape(&describe_object(record, agg))
        ));

        for (index, state) in record.states.iter().enumerate().skip(1) {
            let Some(pct) = agg.percent(agg.state_stalls(state)) else {
                continue;
            };
            let size = 0.2 + 2.0 * pct.value() / 100.0;
            self.statements.push(format!(
                "  a{id}_{index} [shape=circle, label=\"{pct}\", width={size:.2}, height={size:.2}, fixedsize=true];",
            ));
            self.statements
                .push(format!("  a{}_{} -> n{} [style=dotted];", id, index, id));
        }
    }

    /// Number of objects drawn so far
    pub fn node_count(&self) -> usize {
        self.emitted_nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.drawn_edges.len()
    }

    /// Render the DOT text
    pub fn render(&self) -> String {
        let mut dot = String::from("digraph torchview {\n");
        dot.push_str("  node [shape=box];\n\n");

        // edge endpoints that no trace described
        for id in self.labels.keys() {
            if self.emitted_nodes.contains(id) {
                continue;
            }
            let style = if self.roots.contains(id) {
                "solid"
            } else {
                "dashed"
            };
            let label = self.labels.get(id).unwrap_or_default();
            dot.push_str(&format!(
                "  n{} [label=\"{}\", style={}];\n",
                id, label, style
            ));
        }

        for statement in &self.statements {
            dot.push_str(statement);
            dot.push('\n');
        }
        dot.push_str("}\n");
        dot
    }

    /// Write the graph to disk
    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())
            .with_context(|| format!("Failed to write graph: {}", path.display()))?;
        info!(
            "Graph written to {} ({} node(s), {} edge(s))",
            path.display(),
            self.node_count(),
            self.edge_count()
        );
        Ok(())
    }
}

/// Escape text for a quoted DOT attribute
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stall::StallWeightTable;
    use torchview_shared::types::access::{AccessContext, AccessState, AccessType, PyState};

    fn object(global_id: u64, states: Vec<(&str, Vec<u64>)>) -> ObjectAccessRecord {
        ObjectAccessRecord {
            global_id,
            states: states
                .into_iter()
                .enumerate()
                .map(|(i, (hash, pcs))| AccessState {
                    py_state: PyState {
                        hash: hash.to_string(),
                        ..Default::default()
                    },
                    contexts: vec![AccessContext {
                        program_counters: pcs,
                        ..AccessContext::new(i as i32 + 1)
                    }],
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_nodes_styles_and_edges() {
        let forest = Forest::parse("1{2{}2}1").unwrap();
        let cross = CrossTreeRelations::from_forest(&Forest::parse("1{2{}2}1 2{1{}1 9{}9}2").unwrap());
        let records = vec![object(1, vec![("0", vec![])]), object(2, vec![("0", vec![])])];

        let mut graph = GraphEmitter::new();
        graph.add_file(&records, &forest, &cross, &Aggregator::new(None));
        let dot = graph.render();

        assert!(dot.starts_with("digraph torchview {\n"));
        assert!(dot.contains("  n1 [label=\"0\", style=solid, tooltip="));
        assert!(dot.contains("  n2 [label=\"1\", style=dashed, tooltip="));
        assert!(dot.contains("  n1 -> n2;\n"));
        // 1 -> 2 was already drawn as an intra-tree edge; 9 is outside the forest
        assert!(!dot.contains("  n1 -> n2 [color=\"blue\"]"));
        assert!(dot.contains("  n2 -> n1 [color=\"blue\"];\n"));
        assert!(!dot.contains("n9"));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_state_annotations() {
        let table = StallWeightTable::parse(
            "pystates_hash 1 pc 10 count 20 pystates_hash 2 pc 20 count 40 total_stalls 80",
        )
        .unwrap();
        let agg = Aggregator::new(Some(&table));
        let records = vec![object(5, vec![("1", vec![10]), ("2", vec![20])])];

        let mut graph = GraphEmitter::new();
        graph.add_file(&records, &Forest::default(), &CrossTreeRelations::default(), &agg);
        let dot = graph.render();

        // state 0 never gets an annotation; state 1 has 40/80 = 50%
        assert!(!dot.contains("a5_0"));
        assert!(dot.contains(
            "  a5_1 [shape=circle, label=\"50%\", width=1.20, height=1.20, fixedsize=true];"
        ));
        assert!(dot.contains("  a5_1 -> n5 [style=dotted];"));
    }

    #[test]
    fn test_dedup_across_files_and_labels_persist() {
        let forest = Forest::parse("3{4{}4}3").unwrap();
        let cross = CrossTreeRelations::default();
        let agg = Aggregator::new(None);

        let mut graph = GraphEmitter::new();
        graph.add_file(&[object(3, vec![])], &forest, &cross, &agg);
        graph.add_file(&[object(3, vec![]), object(7, vec![])], &forest, &cross, &agg);
        let dot = graph.render();

        assert_eq!(dot.matches("  n3 [").count(), 1);
        assert_eq!(dot.matches("  n3 -> n4;").count(), 1);
        assert!(dot.contains("  n7 [label=\"2\", style=dashed"));
        // 4 appears only as an edge endpoint
        assert!(dot.contains("  n4 [label=\"1\", style=dashed];"));
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_memory_blocks_not_drawn() {
        let mut block = object(8, vec![]);
        block.access_type = AccessType::MemoryBlock;
        let mut graph = GraphEmitter::new();
        graph.add_file(
            &[block],
            &Forest::default(),
            &CrossTreeRelations::default(),
            &Aggregator::new(None),
        );
        assert_eq!(graph.node_count(), 0);
        assert!(!graph.render().contains("n8"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }

    #[test]
    fn test_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.dot");
        GraphEmitter::new().write(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "digraph torchview {\n  node [shape=box];\n\n}\n"
        );
    }
}
