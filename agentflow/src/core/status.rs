//! Node and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not yet reached in execution order.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Completed with exit code 0 (or approved).
    Success,
    /// Non-zero exit, timeout, rejection, or error.
    Failed,
    /// No satisfied inbound edge.
    Skipped,
    /// The run was cancelled or halted before the node finished.
    Cancelled,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl NodeStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if the node actually ran to an outcome that edges can
    /// be evaluated against.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// The global status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The plan is still being executed.
    #[default]
    Running,
    /// Every node succeeded or every failure was absorbed.
    Success,
    /// At least one failure was not absorbed by a failure path.
    Failed,
    /// Cancelled by the user.
    Cancelled,
    /// Dispatch halted because the budget ceiling was exceeded.
    BudgetExceeded,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
        }
    }
}

impl RunStatus {
    /// Returns true once the run has finalized.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Decision recorded by an approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// The approver let the run continue.
    Approved,
    /// The approver stopped this branch.
    Rejected,
}

/// Why a node ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Non-zero exit or termination by signal.
    ProcessFailure,
    /// The process exceeded its timeout.
    Timeout,
    /// The process could not be started.
    SpawnFailed,
    /// The approver rejected the gate.
    ApprovalRejected,
    /// No approval arrived before the gate's timeout.
    ApprovalTimeout,
    /// A parallel child failed.
    ChildFailed,
    /// A loop iteration failed.
    IterationFailed,
    /// The nested pipeline did not succeed.
    SubPipelineFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ProcessFailure => "process_failure",
            Self::Timeout => "timeout",
            Self::SpawnFailed => "spawn_failed",
            Self::ApprovalRejected => "approval_rejected",
            Self::ApprovalTimeout => "approval_timeout",
            Self::ChildFailed => "child_failed",
            Self::IterationFailed => "iteration_failed",
            Self::SubPipelineFailed => "sub_pipeline_failed",
        };
        f.write_str(label)
    }
}

impl FailureKind {
    /// Returns true if another attempt may be made under a retry policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ApprovalRejected | Self::ApprovalTimeout)
    }
}
