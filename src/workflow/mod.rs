//! Workflow graph
//!
//! Typed nodes and edges of the no-code canvas plus the static validation
//! that runs before execution begins: structural problems (unknown edge
//! endpoints, cycles, an evaluate node with no upstream model) are
//! configuration errors, not runtime failures.

mod executor;

pub use executor::{
    MetricEntry, RunReport, StatusCallback, WorkflowExecutor, WorkflowRun, WorkflowStatus,
};

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Stage kind of a workflow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Dataset,
    Preprocess,
    Model,
    Evaluate,
    Visualize,
}

/// Per-node execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One node of the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind, config: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind,
            config,
        }
    }
}

/// Directed edge from one node's output to another's input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A workflow definition as it arrives from the orchestration layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDefinition {
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of nodes with an edge into `id`.
    pub fn upstream(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source.as_str())
            .collect()
    }

    /// Ids of nodes with an edge out of `id`.
    pub fn downstream(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// Transitive closure of nodes reachable from `id` (excluding `id`).
    pub fn downstream_closure(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self.downstream(id).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.to_string()) {
                queue.extend(self.downstream(next));
            }
        }
        seen
    }

    fn upstream_closure(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self.upstream(id).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.to_string()) {
                queue.extend(self.upstream(next));
            }
        }
        seen
    }

    /// Structural validation, run before any node executes.
    pub fn validate(&self) -> Result<()> {
        // Unique ids
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(FlowError::ConfigError(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }

        // Edge endpoints must exist
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(FlowError::ConfigError(format!(
                        "edge references unknown node: {}",
                        endpoint
                    )));
                }
            }
        }

        // Cycle check via Kahn's algorithm
        self.topo_order()?;

        for node in &self.nodes {
            let upstream = self.upstream(&node.id);
            match node.kind {
                NodeKind::Dataset => {
                    if !upstream.is_empty() {
                        return Err(FlowError::ConfigError(format!(
                            "dataset node {} cannot have inputs",
                            node.id
                        )));
                    }
                }
                NodeKind::Preprocess => {
                    if upstream.is_empty() {
                        return Err(FlowError::ConfigError(format!(
                            "preprocess node {} has no upstream data node",
                            node.id
                        )));
                    }
                }
                NodeKind::Model => {
                    let closure = self.upstream_closure(&node.id);
                    let dataset_count = closure
                        .iter()
                        .filter(|id| {
                            self.node(id).map(|n| n.kind == NodeKind::Dataset).unwrap_or(false)
                        })
                        .count();
                    if dataset_count == 0 {
                        return Err(FlowError::ConfigError(format!(
                            "model node {} has no upstream dataset",
                            node.id
                        )));
                    }
                    if dataset_count > 1 {
                        return Err(FlowError::ConfigError(format!(
                            "model node {} is fed by more than one dataset",
                            node.id
                        )));
                    }
                }
                NodeKind::Evaluate | NodeKind::Visualize => {
                    let has_model = upstream.iter().any(|id| {
                        self.node(id).map(|n| n.kind == NodeKind::Model).unwrap_or(false)
                    });
                    if !has_model {
                        return Err(FlowError::ConfigError(format!(
                            "{} node {} has no upstream model",
                            match node.kind {
                                NodeKind::Evaluate => "evaluate",
                                _ => "visualize",
                            },
                            node.id
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Topological order of node indices; fails on cycles.
    pub(crate) fn topo_order(&self) -> Result<Vec<usize>> {
        let index: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            if let Some(&t) = index.get(edge.target.as_str()) {
                in_degree[t] += 1;
            }
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(i) = queue.pop_front() {
            order.push(i);
            for target in self.downstream(&self.nodes[i].id) {
                if let Some(&t) = index.get(target) {
                    in_degree[t] -= 1;
                    if in_degree[t] == 0 {
                        queue.push_back(t);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(FlowError::ConfigError(
                "workflow graph contains a cycle".to_string(),
            ));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_workflow() -> WorkflowDefinition {
        WorkflowDefinition::new(
            vec![
                WorkflowNode::new("d", NodeKind::Dataset, serde_json::json!({})),
                WorkflowNode::new("p", NodeKind::Preprocess, serde_json::json!({})),
                WorkflowNode::new("m", NodeKind::Model, serde_json::json!({})),
                WorkflowNode::new("e", NodeKind::Evaluate, serde_json::json!({})),
            ],
            vec![
                WorkflowEdge::new("d", "p"),
                WorkflowEdge::new("p", "m"),
                WorkflowEdge::new("m", "e"),
            ],
        )
    }

    #[test]
    fn test_valid_linear_graph() {
        assert!(linear_workflow().validate().is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let def = WorkflowDefinition::new(
            vec![
                WorkflowNode::new("a", NodeKind::Dataset, serde_json::json!({})),
                WorkflowNode::new("a", NodeKind::Model, serde_json::json!({})),
            ],
            vec![],
        );
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_evaluate_without_model_rejected() {
        let def = WorkflowDefinition::new(
            vec![
                WorkflowNode::new("d", NodeKind::Dataset, serde_json::json!({})),
                WorkflowNode::new("e", NodeKind::Evaluate, serde_json::json!({})),
            ],
            vec![WorkflowEdge::new("d", "e")],
        );
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("no upstream model"));
    }

    #[test]
    fn test_cycle_rejected() {
        let def = WorkflowDefinition::new(
            vec![
                WorkflowNode::new("a", NodeKind::Preprocess, serde_json::json!({})),
                WorkflowNode::new("b", NodeKind::Preprocess, serde_json::json!({})),
            ],
            vec![WorkflowEdge::new("a", "b"), WorkflowEdge::new("b", "a")],
        );
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_model_without_dataset_rejected() {
        let def = WorkflowDefinition::new(
            vec![WorkflowNode::new("m", NodeKind::Model, serde_json::json!({}))],
            vec![],
        );
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("no upstream dataset"));
    }

    #[test]
    fn test_downstream_closure() {
        let def = linear_workflow();
        let closure = def.downstream_closure("p");
        assert!(closure.contains("m"));
        assert!(closure.contains("e"));
        assert!(!closure.contains("d"));
    }
}
