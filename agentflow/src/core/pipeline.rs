//! Pipeline documents: nodes, edges and variables.

use super::node::{Node, NodeId};
use crate::errors::EngineError;
use crate::utils::Sha256Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// File suffix of pipeline documents.
pub const PIPELINE_FILE_SUFFIX: &str = ".pipeline.json";

/// Condition attached to an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EdgeCondition {
    /// Fires when the predecessor succeeded.
    Success,
    /// Fires when the predecessor failed.
    Failure,
    /// Always fires.
    #[default]
    Unconditional,
}

impl From<Option<String>> for EdgeCondition {
    fn from(value: Option<String>) -> Self {
        match value.as_deref().map(str::trim) {
            Some("success") => Self::Success,
            Some("failure") => Self::Failure,
            _ => Self::Unconditional,
        }
    }
}

impl From<EdgeCondition> for Option<String> {
    fn from(value: EdgeCondition) -> Self {
        match value {
            EdgeCondition::Success => Some("success".to_string()),
            EdgeCondition::Failure => Some("failure".to_string()),
            EdgeCondition::Unconditional => None,
        }
    }
}

impl Serialize for EdgeCondition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Option::<String>::from(*self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EdgeCondition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<String>::deserialize(deserializer).map(Self::from)
    }
}

impl EdgeCondition {
    /// Returns true if a predecessor that ended with `succeeded` satisfies
    /// this condition.
    #[must_use]
    pub fn is_satisfied_by(&self, succeeded: bool) -> bool {
        match self {
            Self::Success => succeeded,
            Self::Failure => !succeeded,
            Self::Unconditional => true,
        }
    }
}

/// A directed dependency between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge id.
    #[serde(default)]
    pub id: String,
    /// Predecessor node id.
    pub from: NodeId,
    /// Successor node id.
    pub to: NodeId,
    /// Firing condition.
    #[serde(default, skip_serializing_if = "is_unconditional")]
    pub condition: EdgeCondition,
}

fn is_unconditional(condition: &EdgeCondition) -> bool {
    *condition == EdgeCondition::Unconditional
}

impl Edge {
    /// Creates an unconditional edge.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{from}->{to}"),
            from,
            to,
            condition: EdgeCondition::Unconditional,
        }
    }

    /// Creates a success-conditioned edge.
    #[must_use]
    pub fn on_success(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to).with_condition(EdgeCondition::Success)
    }

    /// Creates a failure-conditioned edge.
    #[must_use]
    pub fn on_failure(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to).with_condition(EdgeCondition::Failure)
    }

    /// Sets the condition.
    #[must_use]
    pub fn with_condition(mut self, condition: EdgeCondition) -> Self {
        self.condition = condition;
        self
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// A pipeline document as stored in `{name}.pipeline.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Stable name, also used by sub-pipeline references.
    pub name: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Semantic version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// Default variable values.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Nodes in declaration order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges between nodes.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl PipelineDefinition {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: default_version(),
            variables: HashMap::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Adds a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an edge.
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Sets a default variable.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Parses a pipeline document.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Reads and parses a pipeline document from disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serializes the document as pretty JSON.
    pub fn to_json_string(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges ending at `id`.
    pub fn inbound_edges<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Edges starting at `id`.
    pub fn outbound_edges<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// SHA-256 over every node's instructions in declaration order.
    #[must_use]
    pub fn pipeline_hash(&self) -> String {
        let mut hasher = Sha256Builder::new();
        for node in &self.nodes {
            hasher.update(node.instructions.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finish()
    }

    /// File name under which this pipeline is stored.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}{PIPELINE_FILE_SUFFIX}", sanitize_pipeline_name(&self.name))
    }
}

/// Lowercases a pipeline name and replaces whitespace runs with `-`.
#[must_use]
pub fn sanitize_pipeline_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}
