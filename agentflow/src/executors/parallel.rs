//! Parallel containers: all children at once.

use super::{all_reused, execute as execute_node, sum_costs, Frame};
use crate::core::{FailureKind, Node, NodeResult, NodeStatus};
use crate::runner::RunContext;
use crate::utils::sha256_hex;
use futures::future::join_all;
use tracing::{debug, info};

pub(super) async fn execute(
    ctx: &RunContext,
    frame: Frame<'_>,
    node: &Node,
    children: &[String],
) -> NodeResult {
    let node_id = frame.qualify(&node.id);
    let hash = sha256_hex(frame.render(&node.instructions));
    ctx.mark_running(&node_id);
    debug!(run_id = %ctx.run_id, node_id = %node_id, children = children.len(), "Dispatching parallel children");

    let results = join_all(
        frame
            .children(children)
            .into_iter()
            .map(|child| execute_node(ctx, frame, child)),
    )
    .await;

    let started = NodeResult::started(&node_id, node, 1, &hash)
        .with_cost(sum_costs(&results))
        .with_output(
            results
                .iter()
                .filter(|r| r.is_success())
                .map(|r| r.captured_output.trim_end())
                .collect::<Vec<_>>()
                .join("\n"),
        );
    let result = aggregate(started, &results);
    info!(run_id = %ctx.run_id, node_id = %node_id, status = %result.status, "Parallel node finished");
    ctx.finalize(&result).await;
    result
}

fn aggregate(started: NodeResult, results: &[NodeResult]) -> NodeResult {
    let failed: Vec<&str> = results
        .iter()
        .filter(|r| r.status == NodeStatus::Failed)
        .map(|r| r.node_id.as_str())
        .collect();
    let cancelled = results.iter().any(|r| r.status == NodeStatus::Cancelled);

    if !failed.is_empty() {
        let error = format!("failed children: {}", failed.join(", "));
        started.fail(FailureKind::ChildFailed, error)
    } else if cancelled {
        started.cancel()
    } else {
        let mut result = started.succeed();
        result.reused = all_reused(results);
        result
    }
}
