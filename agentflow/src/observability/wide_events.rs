//! Wide event payloads: one self-contained record per node and per run.

use crate::core::{NodeResult, NodeStatus, RunState};
use serde_json::{json, Value};

/// Payload describing one finalized node attempt.
#[must_use]
pub fn build_node_payload(run_id: &str, result: &NodeResult) -> Value {
    let mut payload = json!({
        "run_id": run_id,
        "node_id": result.node_id,
        "kind": result.kind.to_string(),
        "attempt": result.attempt,
        "status": result.status,
        "reused": result.reused,
        "started_at": result.started_at,
        "finished_at": result.finished_at,
    });
    if let Some(code) = result.exit_code {
        payload["exit_code"] = json!(code);
    }
    if let Some(cost) = result.cost_usd {
        payload["cost_usd"] = json!(cost);
    }
    if let Some(failure) = result.failure {
        payload["failure"] = json!(failure);
        payload["error"] = json!(result.error);
    }
    payload
}

/// Payload summarizing a finalized run.
#[must_use]
pub fn build_run_payload(state: &RunState, results: &[NodeResult]) -> Value {
    let count = |status: NodeStatus| {
        state
            .node_states
            .values()
            .filter(|s| **s == status)
            .count()
    };
    let reused = results.iter().filter(|r| r.reused).count();
    let attempts = results.iter().filter(|r| r.attempt > 0 && !r.reused).count();

    json!({
        "run_id": state.run_id,
        "pipeline": state.pipeline_name,
        "status": state.status,
        "started_at": state.started_at,
        "finished_at": state.finished_at,
        "resumed_from": state.resumed_from,
        "failed_node_id": state.failed_node_id,
        "total_cost": state.total_cost,
        "charged_cost": state.charged_cost,
        "nodes": {
            "success": count(NodeStatus::Success),
            "failed": count(NodeStatus::Failed),
            "skipped": count(NodeStatus::Skipped),
            "cancelled": count(NodeStatus::Cancelled),
        },
        "attempts": attempts,
        "reused": reused,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailureKind, Node, RunStatus};

    #[test]
    fn test_node_payload() {
        let node = Node::shell("build", "make");
        let result = NodeResult::started("build", &node, 2, "h")
            .with_exit_code(Some(2))
            .fail(FailureKind::ProcessFailure, "exit code 2");
        let payload = build_node_payload("run-1", &result);

        assert_eq!(payload["node_id"], "build");
        assert_eq!(payload["attempt"], 2);
        assert_eq!(payload["exit_code"], 2);
        assert_eq!(payload["failure"], "process_failure");
        assert!(payload.get("cost_usd").is_none());
    }

    #[test]
    fn test_run_payload_counts_nodes() {
        let mut state = RunState::new("run-1", "deploy");
        state.status = RunStatus::Failed;
        state.node_states.insert("a".into(), NodeStatus::Success);
        state.node_states.insert("b".into(), NodeStatus::Failed);
        state.node_states.insert("c".into(), NodeStatus::Skipped);
        let payload = build_run_payload(&state, &[]);

        assert_eq!(payload["status"], "failed");
        assert_eq!(payload["nodes"]["success"], 1);
        assert_eq!(payload["nodes"]["skipped"], 1);
        assert_eq!(payload["reused"], 0);
    }
}
