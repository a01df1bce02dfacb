//! Renderer-neutral graph description
//!
//! The export is plain data; turning it into pixels is up to a
//! [`GraphRenderer`] supplied by the caller.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::WorkflowDAG;
use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{ParamKey, ParamValue, Parameters, WorkflowNode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeSummary>,
    pub edges: Vec<EdgeSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: String,
    pub action: String,
    /// Display label: the id over the call it makes
    pub label: String,
    pub parameters: Vec<ParamSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    /// Keyword name, or the positional index as text
    pub name: String,
    pub value: ParamValue,
    /// The value as it would be written in source
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSummary {
    pub from: String,
    pub to: String,
}

/// Turns an export into an artifact on disk (an image, a document, ...).
pub trait GraphRenderer {
    /// Render `export` at `path` in `format`, returning where the result was written.
    fn render(&self, export: &GraphExport, path: &Path, format: &str) -> anyhow::Result<PathBuf>;
}

impl NodeSummary {
    fn from_node(node: &WorkflowNode) -> Self {
        NodeSummary {
            id: node.id.clone(),
            action: node.action.to_string(),
            label: format!("{}\n{}", node.id, node.describe()),
            parameters: node
                .parameters
                .iter()
                .map(|(key, value)| ParamSummary {
                    name: key.to_string(),
                    value: value.clone(),
                    text: value.to_string(),
                })
                .collect(),
        }
    }
}

impl GraphExport {
    /// Graphviz DOT document for the export.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph workflow {\n");
        for node in &self.nodes {
            let _ = writeln!(dot, "    \"{}\" [label=\"{}\"];", escape_dot(&node.id), escape_dot(&node.label));
        }
        for edge in &self.edges {
            let _ = writeln!(dot, "    \"{}\" -> \"{}\";", escape_dot(&edge.from), escape_dot(&edge.to));
        }
        dot.push('}');
        dot
    }
}

fn escape_dot(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

impl WorkflowDAG {
    /// Plain description of the graph: node summaries and edges, in insertion order.
    pub fn export_representation(&self) -> GraphExport {
        GraphExport {
            nodes: self.nodes().values().map(NodeSummary::from_node).collect(),
            edges: self
                .edges()
                .iter()
                .map(|(from, to)| EdgeSummary {
                    from: from.clone(),
                    to: to.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a graph from an export, re-running every construction check.
    pub fn from_export(export: &GraphExport) -> WorkflowResult<Self> {
        let mut dag = WorkflowDAG::new();
        for summary in &export.nodes {
            let mut parameters = Parameters::new();
            for param in &summary.parameters {
                let key = ParamKey::try_from(param.name.clone()).map_err(|message| {
                    WorkflowError::Parse(crate::parser::ParseError::build(
                        format!("node '{}': {}", summary.id, message),
                        None,
                    ))
                })?;
                parameters.insert(key, param.value.clone());
            }
            dag.add_node(WorkflowNode::new(summary.id.clone(), summary.action.clone(), parameters))?;
        }
        for edge in &export.edges {
            dag.add_edge(&edge.from, &edge.to)?;
        }
        Ok(dag)
    }

    pub fn to_dot(&self) -> String {
        self.export_representation().to_dot()
    }
}
