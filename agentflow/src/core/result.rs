//! Run and node records.

use super::node::{Node, NodeKindTag};
use super::status::{ApprovalState, FailureKind, NodeStatus, RunStatus};
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Outcome of one node attempt.
///
/// Finalized results are immutable; a retried node produces one result per
/// attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    /// Node id, qualified for nested executions (`sub/child`, `loop[0]/child`).
    pub node_id: String,
    /// Display name at execution time.
    #[serde(default)]
    pub node_name: String,
    /// Node kind.
    pub kind: NodeKindTag,
    /// Attempt number, starting at 1. Zero for nodes never dispatched.
    pub attempt: u32,
    /// Final status.
    pub status: NodeStatus,
    /// Process exit code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr.
    #[serde(default)]
    pub captured_output: String,
    /// Parsed cost; `None` when no cost line was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Model the AI CLI was invoked with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Decision of an approval gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_state: Option<ApprovalState>,
    /// SHA-256 of the fully interpolated instructions.
    #[serde(default)]
    pub instructions_hash: String,
    /// When the attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the attempt finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Why the node failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Human readable failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when this result was copied from a prior run.
    #[serde(default)]
    pub reused: bool,
}

impl NodeResult {
    /// Creates a running result for an attempt that starts now.
    #[must_use]
    pub fn started(node_id: impl Into<String>, node: &Node, attempt: u32, hash: &str) -> Self {
        Self {
            node_id: node_id.into(),
            node_name: node.display_name().to_string(),
            kind: node.tag(),
            attempt,
            status: NodeStatus::Running,
            exit_code: None,
            captured_output: String::new(),
            cost_usd: None,
            model: None,
            approval_state: None,
            instructions_hash: hash.to_string(),
            started_at: Some(iso_timestamp()),
            finished_at: None,
            failure: None,
            error: None,
            reused: false,
        }
    }

    /// Creates a terminal result for a node that was never dispatched.
    #[must_use]
    pub fn not_dispatched(node_id: impl Into<String>, node: &Node, status: NodeStatus) -> Self {
        let mut result = Self::started(node_id, node, 0, "");
        result.status = status;
        result.started_at = None;
        result.finished_at = Some(iso_timestamp());
        result
    }

    /// Marks the result successful and stamps the finish time.
    #[must_use]
    pub fn succeed(mut self) -> Self {
        self.status = NodeStatus::Success;
        self.finished_at = Some(iso_timestamp());
        self
    }

    /// Marks the result failed and stamps the finish time.
    #[must_use]
    pub fn fail(mut self, kind: FailureKind, error: impl Into<String>) -> Self {
        self.status = NodeStatus::Failed;
        self.failure = Some(kind);
        self.error = Some(error.into());
        self.finished_at = Some(iso_timestamp());
        self
    }

    /// Marks the result cancelled and stamps the finish time.
    #[must_use]
    pub fn cancel(mut self) -> Self {
        self.status = NodeStatus::Cancelled;
        self.finished_at = Some(iso_timestamp());
        self
    }

    /// Sets the exit code.
    #[must_use]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Sets the captured output.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.captured_output = output.into();
        self
    }

    /// Sets the cost.
    #[must_use]
    pub fn with_cost(mut self, cost: Option<f64>) -> Self {
        self.cost_usd = cost;
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Sets the approval decision.
    #[must_use]
    pub fn with_approval(mut self, state: ApprovalState) -> Self {
        self.approval_state = Some(state);
        self
    }

    /// Copies a prior result into the current run.
    ///
    /// Output, cost, model and approval decision are kept verbatim.
    #[must_use]
    pub fn reuse_of(prior: &Self, node_id: impl Into<String>, node: &Node) -> Self {
        let now = iso_timestamp();
        Self {
            node_id: node_id.into(),
            node_name: node.display_name().to_string(),
            kind: node.tag(),
            attempt: prior.attempt.max(1),
            status: NodeStatus::Success,
            exit_code: prior.exit_code,
            captured_output: prior.captured_output.clone(),
            cost_usd: prior.cost_usd,
            model: prior.model.clone(),
            approval_state: prior.approval_state,
            instructions_hash: prior.instructions_hash.clone(),
            started_at: Some(now.clone()),
            finished_at: Some(now),
            failure: None,
            error: None,
            reused: true,
        }
    }

    /// Returns true if this result was produced by work done in this run.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.attempt > 0 && !self.reused
    }

    /// Returns true if the node succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }
}

/// State of a run, mutated on every node transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    /// Run id (`run-{unix_ms}`).
    pub run_id: String,
    /// Name of the executed pipeline.
    pub pipeline_name: String,
    /// Global status.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: String,
    /// When the run finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Run this one resumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
    /// First node whose failure was not absorbed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node_id: Option<String>,
    /// Sum of all recorded costs, reused ones included.
    pub total_cost: f64,
    /// Sum of costs actually spent by this run.
    #[serde(default)]
    pub charged_cost: f64,
    /// Status of every node, keyed by (qualified) node id.
    pub node_states: BTreeMap<String, NodeStatus>,
    /// Input variables the run was triggered with.
    #[serde(default)]
    pub trigger_input: HashMap<String, String>,
    /// SHA-256 of all pipeline instructions.
    #[serde(default)]
    pub pipeline_hash: String,
}

impl RunState {
    /// Creates a running state.
    #[must_use]
    pub fn new(run_id: impl Into<String>, pipeline_name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_name: pipeline_name.into(),
            status: RunStatus::Running,
            started_at: iso_timestamp(),
            finished_at: None,
            resumed_from: None,
            failed_node_id: None,
            total_cost: 0.0,
            charged_cost: 0.0,
            node_states: BTreeMap::new(),
            trigger_input: HashMap::new(),
            pipeline_hash: String::new(),
        }
    }

    /// Status of a node, `Pending` when unknown.
    #[must_use]
    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.node_states.get(node_id).copied().unwrap_or_default()
    }

    /// Ids of nodes in the given status, sorted.
    #[must_use]
    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<&str> {
        self.node_states
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
