//! Live status stream payloads.

use crate::core::{NodeStatus, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot emitted on every node or run transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunUpdate {
    /// Run id.
    pub run_id: String,
    /// Global status.
    pub status: RunStatus,
    /// Status of every known node.
    pub node_states: BTreeMap<String, NodeStatus>,
    /// Accumulated cost, reused results included.
    pub total_cost: f64,
}

/// Which pipe a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One line of process output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLog {
    /// Run id.
    pub run_id: String,
    /// Qualified node id.
    pub node_id: String,
    /// The line, without trailing newline.
    pub line: String,
    /// Source pipe.
    pub stream: LogStream,
}

/// Emitted when an approval gate suspends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// Run id.
    pub run_id: String,
    /// Qualified node id of the gate.
    pub node_id: String,
    /// Display name of the gate.
    pub name: String,
    /// Interpolated gate message.
    pub rendered_instructions: String,
    /// Unique id of this request.
    pub request_id: String,
}

/// Anything the engine publishes to a live viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum RunEvent {
    /// `run-update`
    RunUpdate(RunUpdate),
    /// `node-log`
    NodeLog(NodeLog),
    /// `approval-requested`
    ApprovalRequested(ApprovalRequest),
}

impl RunEvent {
    /// Event name as seen by transports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunUpdate(_) => "run-update",
            Self::NodeLog(_) => "node-log",
            Self::ApprovalRequested(_) => "approval-requested",
        }
    }

    /// Run the event belongs to.
    #[must_use]
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunUpdate(e) => &e.run_id,
            Self::NodeLog(e) => &e.run_id,
            Self::ApprovalRequested(e) => &e.run_id,
        }
    }
}
