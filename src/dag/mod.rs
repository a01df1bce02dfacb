//! Workflow graph: nodes keyed by id plus producer → consumer edges
//!
//! Every mutation keeps the graph valid. `add_node` rejects duplicate ids,
//! `add_edge` rejects unknown endpoints and any edge that would close a cycle,
//! and a failed call leaves the graph exactly as it was.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::{WorkflowError, WorkflowResult};
use crate::types::WorkflowNode;

pub mod export;

pub use export::{EdgeSummary, GraphExport, GraphRenderer, NodeSummary, ParamSummary};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "DagRepr", try_from = "DagRepr")]
pub struct WorkflowDAG {
    nodes: IndexMap<String, WorkflowNode>,
    edges: IndexSet<(String, String)>,
    /// node_id -> consumers, in edge insertion order
    downstream: IndexMap<String, Vec<String>>,
    /// node_id -> producers, in edge insertion order
    upstream: IndexMap<String, Vec<String>>,
}

/// Wire form: nodes in insertion order and edges as `[producer, consumer]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DagRepr {
    nodes: Vec<WorkflowNode>,
    #[serde(default)]
    edges: Vec<(String, String)>,
}

impl From<WorkflowDAG> for DagRepr {
    fn from(dag: WorkflowDAG) -> Self {
        DagRepr {
            nodes: dag.nodes.into_values().collect(),
            edges: dag.edges.into_iter().collect(),
        }
    }
}

impl TryFrom<DagRepr> for WorkflowDAG {
    type Error = WorkflowError;

    fn try_from(repr: DagRepr) -> Result<Self, Self::Error> {
        let mut dag = WorkflowDAG::new();
        for node in repr.nodes {
            dag.add_node(node)?;
        }
        for (producer, consumer) in &repr.edges {
            dag.add_edge(producer, consumer)?;
        }
        Ok(dag)
    }
}

impl WorkflowDAG {
    pub fn new() -> Self {
        Self::default()
    }

    /* ===================== Mutation ===================== */

    pub fn add_node(&mut self, node: WorkflowNode) -> WorkflowResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(WorkflowError::DuplicateNode { id: node.id });
        }
        self.downstream.insert(node.id.clone(), Vec::new());
        self.upstream.insert(node.id.clone(), Vec::new());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add `producer -> consumer`. Adding an existing edge again is a no-op.
    pub fn add_edge(&mut self, producer: &str, consumer: &str) -> WorkflowResult<()> {
        for id in [producer, consumer] {
            if !self.nodes.contains_key(id) {
                return Err(WorkflowError::unknown_node(id));
            }
        }
        let edge = (producer.to_string(), consumer.to_string());
        if self.edges.contains(&edge) {
            return Ok(());
        }
        if let Some(mut path) = self.path_between(consumer, producer) {
            path.insert(0, producer.to_string());
            return Err(WorkflowError::Cycle { path });
        }

        if let Some(consumers) = self.downstream.get_mut(producer) {
            consumers.push(consumer.to_string());
        }
        if let Some(producers) = self.upstream.get_mut(consumer) {
            producers.push(producer.to_string());
        }
        self.edges.insert(edge);
        Ok(())
    }

    /// Depth-first search for a path `from -> ... -> to` along existing edges.
    fn path_between(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut parent: IndexMap<&str, &str> = IndexMap::new();
        let mut stack = vec![from];
        let mut seen: IndexSet<&str> = IndexSet::new();
        seen.insert(from);

        while let Some(current) = stack.pop() {
            if current == to {
                let mut path = vec![current.to_string()];
                let mut cursor = current;
                while let Some(previous) = parent.get(cursor) {
                    path.push(previous.to_string());
                    cursor = previous;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.downstream(current) {
                if seen.insert(next.as_str()) {
                    parent.insert(next.as_str(), current);
                    stack.push(next.as_str());
                }
            }
        }
        None
    }

    /* ===================== Queries ===================== */

    /// Nodes keyed by id, in insertion order.
    pub fn nodes(&self) -> &IndexMap<String, WorkflowNode> {
        &self.nodes
    }

    /// Edges as `(producer, consumer)`, in insertion order.
    pub fn edges(&self) -> &IndexSet<(String, String)> {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Consumers of a node's output.
    pub fn downstream(&self, id: &str) -> &[String] {
        self.downstream.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Producers a node depends on.
    pub fn upstream(&self, id: &str) -> &[String] {
        self.upstream.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Nodes with no incoming edges.
    pub fn entry_points(&self) -> Vec<&str> {
        self.nodes
            .keys()
            .filter(|id| self.upstream(id).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Node ids with every producer before its consumers. Among nodes that are
    /// ready at the same time, the one inserted first comes first.
    pub fn topological_order(&self) -> WorkflowResult<Vec<&str>> {
        let mut in_degree: Vec<usize> = self
            .nodes
            .keys()
            .map(|id| self.upstream(id).len())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(index)) = ready.pop() {
            let Some((id, _)) = self.nodes.get_index(index) else {
                continue;
            };
            order.push(id.as_str());
            for consumer in self.downstream(id) {
                if let Some(next) = self.nodes.get_index_of(consumer.as_str()) {
                    in_degree[next] -= 1;
                    if in_degree[next] == 0 {
                        ready.push(Reverse(next));
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            // Unreachable through the public API; report what is left over.
            let mut path: Vec<String> = self
                .nodes
                .keys()
                .filter(|id| !order.contains(&id.as_str()))
                .cloned()
                .collect();
            if let Some(first) = path.first().cloned() {
                path.push(first);
            }
            return Err(WorkflowError::Cycle { path });
        }
        Ok(order)
    }

    /// Hand each node to `runner` in topological order.
    ///
    /// The runner sees the results of every node executed so far; nothing is
    /// invoked by the graph itself.
    pub fn execute<T, E, F>(&self, mut runner: F) -> Result<IndexMap<String, T>, E>
    where
        F: FnMut(&WorkflowNode, &IndexMap<String, T>) -> Result<T, E>,
        E: From<WorkflowError>,
    {
        let mut results = IndexMap::with_capacity(self.nodes.len());
        for id in self.topological_order()? {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let result = runner(node, &results)?;
            results.insert(id.to_string(), result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParamKey, ParamValue, Parameters};
    use maplit::hashset;
    use std::collections::HashSet;

    fn node(id: &str, action: &str) -> WorkflowNode {
        WorkflowNode::new(id, action, Parameters::new())
    }

    fn chain(ids: &[&str]) -> WorkflowDAG {
        let mut dag = WorkflowDAG::new();
        for id in ids {
            dag.add_node(node(id, "send_message")).unwrap();
        }
        for pair in ids.windows(2) {
            dag.add_edge(pair[0], pair[1]).unwrap();
        }
        dag
    }

    #[test]
    fn test_add_node_rejects_duplicates_and_leaves_graph_unchanged() {
        let mut dag = WorkflowDAG::new();
        dag.add_node(node("summarize", "generate_summary")).unwrap();
        let before = dag.clone();

        let err = dag.add_node(node("summarize", "send_email")).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::DuplicateNode {
                id: "summarize".into()
            }
        );
        assert_eq!(dag, before);
        assert_eq!(dag.node("summarize").unwrap().action.as_str(), "generate_summary");
    }

    #[test]
    fn test_add_edge_unknown_endpoint() {
        let mut dag = chain(&["a"]);
        assert_eq!(dag.add_edge("a", "missing").unwrap_err(), WorkflowError::unknown_node("missing"));
        assert_eq!(dag.add_edge("ghost", "a").unwrap_err(), WorkflowError::unknown_node("ghost"));
        assert!(dag.edges().is_empty());
    }

    #[test]
    fn test_duplicate_edge_is_noop() {
        let mut dag = chain(&["a", "b"]);
        dag.add_edge("a", "b").unwrap();
        assert_eq!(dag.edges().len(), 1);
        assert_eq!(dag.downstream("a"), ["b".to_string()]);
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let mut dag = chain(&["a", "b", "c"]);
        let before = dag.clone();

        let err = dag.add_edge("c", "a").unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Cycle {
                path: vec!["c".into(), "a".into(), "b".into(), "c".into()]
            }
        );
        assert_eq!(dag, before);
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let mut dag = chain(&["a"]);
        let err = dag.add_edge("a", "a").unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Cycle {
                path: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_topological_order_respects_edges_and_insertion_ties() {
        let mut dag = WorkflowDAG::new();
        for id in ["notify", "fetch", "summarize", "audit"] {
            dag.add_node(node(id, "send_message")).unwrap();
        }
        dag.add_edge("fetch", "summarize").unwrap();
        dag.add_edge("summarize", "notify").unwrap();

        let order = dag.topological_order().unwrap();
        assert_eq!(order, vec!["fetch", "summarize", "notify", "audit"]);

        let ids: HashSet<&str> = order.iter().copied().collect();
        assert_eq!(ids, hashset! {"notify", "fetch", "summarize", "audit"});
        for (producer, consumer) in dag.edges() {
            let p = order.iter().position(|id| id == producer).unwrap();
            let c = order.iter().position(|id| id == consumer).unwrap();
            assert!(p < c, "{} must precede {}", producer, consumer);
        }
    }

    #[test]
    fn test_graph_queries() {
        let mut dag = chain(&["a", "b"]);
        dag.add_node(node("c", "web_search")).unwrap();
        dag.add_edge("a", "c").unwrap();

        assert_eq!(dag.len(), 3);
        assert!(!dag.is_empty());
        assert!(dag.contains("c"));
        assert_eq!(dag.entry_points(), vec!["a"]);
        assert_eq!(dag.downstream("a"), ["b".to_string(), "c".to_string()]);
        assert_eq!(dag.upstream("c"), ["a".to_string()]);
        assert!(dag.upstream("missing").is_empty());
    }

    #[test]
    fn test_execute_feeds_runner_in_order() {
        let mut dag = WorkflowDAG::new();
        let mut params = Parameters::new();
        params.insert(ParamKey::Positional(0), ParamValue::reference("fetch"));
        dag.add_node(WorkflowNode::new("summarize", "generate_summary", params)).unwrap();
        dag.add_node(node("fetch", "web_search")).unwrap();
        dag.add_edge("fetch", "summarize").unwrap();

        let results = dag
            .execute(|node, done: &IndexMap<String, String>| -> Result<String, WorkflowError> {
                let inputs: Vec<&str> = node
                    .references()
                    .map(|id| done.get(id).map(String::as_str).unwrap_or("?"))
                    .collect();
                Ok(format!("{}({})", node.action, inputs.join(",")))
            })
            .unwrap();

        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["fetch", "summarize"]);
        assert_eq!(results["summarize"], "generate_summary(web_search())");
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let dag = chain(&["a", "b"]);
        let json = serde_json::to_string(&dag).unwrap();
        let back: WorkflowDAG = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dag);

        let cyclic = r##"{"nodes":[{"id":"a","action":"x"},{"id":"b","action":"y"}],"edges":[["a","b"],["b","a"]]}"##;
        assert!(serde_json::from_str::<WorkflowDAG>(cyclic).is_err());
    }

    #[test]
    fn test_public_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WorkflowDAG>();
        assert_send_sync::<WorkflowNode>();
        assert_send_sync::<crate::error::WorkflowError>();
        assert_send_sync::<crate::compiler::CompiledWorkflow>();
    }
}
