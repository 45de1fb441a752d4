//! Error types for the agentflow engine.
//!
//! Structural problems with a pipeline document are reported as `Err` before
//! any run is created. Node-local failures never surface here: they are
//! recorded on the node's [`NodeResult`](crate::core::NodeResult) instead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The pipeline document is structurally invalid.
    #[error("{0}")]
    Validation(#[from] GraphValidationError),

    /// The edge set contains a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A sub-pipeline reference chain loops back on itself.
    #[error("{0}")]
    CircularReference(#[from] CircularReferenceError),

    /// A top-level run is already executing.
    #[error("A run is already active: {run_id}")]
    RunAlreadyActive {
        /// The active run.
        run_id: String,
    },

    /// No run with this id is known.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// No approval gate is waiting for a decision.
    #[error("No pending approval for run '{run_id}'{}", node_suffix(.node_id))]
    ApprovalNotPending {
        /// The run the decision was addressed to.
        run_id: String,
        /// The node, if one was named.
        node_id: Option<String>,
    },

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn node_suffix(node_id: &Option<String>) -> String {
    node_id
        .as_deref()
        .map(|n| format!(" node '{n}'"))
        .unwrap_or_default()
}

impl EngineError {
    /// Returns the contract info for structural errors.
    #[must_use]
    pub fn error_info(&self) -> Option<&ContractErrorInfo> {
        match self {
            Self::Validation(e) => Some(&e.error_info),
            Self::CycleDetected(e) => Some(&e.error_info),
            Self::CircularReference(e) => Some(&e.error_info),
            _ => None,
        }
    }

    /// Returns true for errors raised while building the graph.
    #[must_use]
    pub fn is_graph_error(&self) -> bool {
        self.error_info().is_some()
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-007-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info, using the default suggestion for
    /// the code as fix hint.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            fix_hint: ContractSuggestions::get(&code).map(ToString::to_string),
            code,
            summary: summary.into(),
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("summary".to_string(), serde_json::json!(self.summary));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if !self.context.is_empty() {
            map.insert("context".to_string(), serde_json::json!(self.context));
        }
        map
    }
}

/// Error raised when a pipeline document fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The nodes involved.
    pub nodes: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl GraphValidationError {
    fn new(code: &str, message: String, nodes: Vec<String>) -> Self {
        Self {
            error_info: ContractErrorInfo::new(code, message.clone()),
            message,
            nodes,
        }
    }

    /// Two nodes share an id.
    #[must_use]
    pub fn duplicate_id(pipeline: &str, node_id: &str) -> Self {
        Self::new(
            "GRAPH-001-DUPLICATE_ID",
            format!("Pipeline '{pipeline}' declares node '{node_id}' more than once"),
            vec![node_id.to_string()],
        )
    }

    /// An edge references an undeclared node.
    #[must_use]
    pub fn dangling_edge(pipeline: &str, edge_id: &str, missing: &str) -> Self {
        let mut err = Self::new(
            "GRAPH-002-DANGLING_EDGE",
            format!("Edge '{edge_id}' in pipeline '{pipeline}' references unknown node '{missing}'"),
            vec![missing.to_string()],
        );
        err.error_info = err.error_info.with_context_entry("edge", edge_id);
        err
    }

    /// A sub-pipeline reference is missing or unresolvable.
    #[must_use]
    pub fn missing_ref(pipeline: &str, node_id: &str, reference: Option<&str>) -> Self {
        let message = match reference {
            Some(r) => format!(
                "Sub-pipeline node '{node_id}' in '{pipeline}' references unknown pipeline '{r}'"
            ),
            None => format!("Sub-pipeline node '{node_id}' in '{pipeline}' has no pipeline_ref"),
        };
        Self::new("GRAPH-003-MISSING_REF", message, vec![node_id.to_string()])
    }

    /// A required MCP tool is not in the manifest.
    #[must_use]
    pub fn unknown_tool(pipeline: &str, node_id: &str, tool: &str) -> Self {
        let mut err = Self::new(
            "GRAPH-004-UNKNOWN_TOOL",
            format!("Node '{node_id}' in '{pipeline}' requires unknown MCP tool '{tool}'"),
            vec![node_id.to_string()],
        );
        err.error_info = err.error_info.with_context_entry("tool", tool);
        err
    }

    /// An edge touches a comment node.
    #[must_use]
    pub fn comment_edge(pipeline: &str, edge_id: &str, node_id: &str) -> Self {
        Self::new(
            "GRAPH-005-COMMENT_EDGE",
            format!("Edge '{edge_id}' in '{pipeline}' connects comment node '{node_id}'"),
            vec![node_id.to_string()],
        )
    }

    /// Container children are malformed.
    #[must_use]
    pub fn children(pipeline: &str, node_id: &str, detail: impl Into<String>) -> Self {
        Self::new(
            "GRAPH-006-CHILDREN",
            format!("Container '{node_id}' in '{pipeline}': {}", detail.into()),
            vec![node_id.to_string()],
        )
    }

    /// The pipeline has no executable nodes.
    #[must_use]
    pub fn empty(pipeline: &str) -> Self {
        Self::new(
            "GRAPH-009-EMPTY",
            format!("Pipeline '{pipeline}' has no executable nodes"),
            Vec::new(),
        )
    }
}

/// Error raised when a cycle is detected in the edge set.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline '{pipeline}': {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// Pipeline containing the cycle.
    pub pipeline: String,
    /// The path of nodes forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, cycle_path: Vec<String>) -> Self {
        let pipeline = pipeline.into();
        let info = ContractErrorInfo::new(
            "GRAPH-007-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_context_entry("pipeline", pipeline.clone());

        Self {
            pipeline,
            cycle_path,
            error_info: info,
        }
    }
}

/// Error raised when sub-pipeline references form a cycle.
#[derive(Debug, Clone, Error)]
#[error("Circular sub-pipeline reference: {}", chain.join(" -> "))]
pub struct CircularReferenceError {
    /// Pipeline names from the outermost to the repeated reference.
    pub chain: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CircularReferenceError {
    /// Creates a new circular reference error.
    #[must_use]
    pub fn new(chain: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "GRAPH-008-CIRCULAR_REF",
            format!("Sub-pipeline references loop back: {}", chain.join(" -> ")),
        );
        Self {
            chain,
            error_info: info,
        }
    }
}

/// Provides default suggestions for graph error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "GRAPH-001-DUPLICATE_ID" => Some("Give every node in the pipeline a unique id."),
            "GRAPH-002-DANGLING_EDGE" => Some(
                "Ensure every edge's from/to references a declared node id. \
                 Check for typos or nodes that were deleted.",
            ),
            "GRAPH-003-MISSING_REF" => Some(
                "Set pipeline_ref to the name of a saved pipeline in the pipelines directory.",
            ),
            "GRAPH-004-UNKNOWN_TOOL" => {
                Some("Add the MCP server to .mcp.json or remove it from requires_tools.")
            }
            "GRAPH-005-COMMENT_EDGE" => {
                Some("Comment nodes are annotations only. Remove edges to or from them.")
            }
            "GRAPH-006-CHILDREN" => Some(
                "Parallel and loop nodes need at least one child; each child must be a \
                 declared node owned by a single container and must not have edges.",
            ),
            "GRAPH-007-CYCLE" => Some(
                "Remove one of the edges in the cycle. Use a loop node for repeated work.",
            ),
            "GRAPH-008-CIRCULAR_REF" => {
                Some("A pipeline must not invoke itself directly or through other sub-pipelines.")
            }
            "GRAPH-009-EMPTY" => Some("Add at least one non-comment node to the pipeline."),
            _ => None,
        }
    }
}
