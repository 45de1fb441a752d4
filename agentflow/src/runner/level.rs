//! Level-by-level execution of a plan.

use super::context::RunContext;
use crate::core::{Edge, NodeResult, NodeStatus};
use crate::executors::{execute, Frame, Inherited, PlanScope};
use crate::graph::ExecutionPlan;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::HashMap;
use tracing::debug;

/// Terminal status of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlanStatus {
    Success,
    /// Qualified id of the first failure not absorbed by a failure path.
    Failed(String),
    Cancelled,
    BudgetExceeded,
}

/// Final results of a plan's top-level nodes.
#[derive(Debug)]
pub(crate) struct PlanOutcome {
    pub(crate) status: PlanStatus,
    /// The last result of every planned node, in level order.
    pub(crate) results: Vec<NodeResult>,
    last_level_start: usize,
}

impl PlanOutcome {
    /// Trimmed outputs of the successful nodes of the last level.
    pub(crate) fn last_level_outputs(&self) -> Vec<&str> {
        self.results[self.last_level_start..]
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.captured_output.trim_end())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// Runnable; true when a satisfied dependency was freshly executed.
    Run(bool),
    Skip,
}

/// Applies edge conditions to the finalized predecessors of a node.
///
/// Edges from skipped or cancelled predecessors are inactive. A node runs
/// when every active edge is satisfied and at least one is active; entry
/// nodes always run.
fn readiness(inbound: &[Edge], finished: &HashMap<&str, NodeResult>) -> Readiness {
    if inbound.is_empty() {
        return Readiness::Run(false);
    }
    let mut active = 0;
    let mut fresh = false;
    for edge in inbound {
        let Some(pred) = finished.get(edge.from.as_str()) else {
            continue;
        };
        let succeeded = match pred.status {
            NodeStatus::Success => true,
            NodeStatus::Failed => false,
            _ => continue,
        };
        active += 1;
        if !edge.condition.is_satisfied_by(succeeded) {
            return Readiness::Skip;
        }
        fresh |= pred.is_fresh();
    }
    if active == 0 {
        Readiness::Skip
    } else {
        Readiness::Run(fresh)
    }
}

fn plan_status(
    plan: &ExecutionPlan,
    ctx: &RunContext,
    order: &[&str],
    results: &[NodeResult],
) -> PlanStatus {
    if ctx.cancel.is_cancelled() {
        return PlanStatus::Cancelled;
    }
    let any_cancelled = results.iter().any(|r| r.status == NodeStatus::Cancelled);
    if ctx.ledger.is_halted() && any_cancelled {
        return PlanStatus::BudgetExceeded;
    }
    let unabsorbed = order
        .iter()
        .zip(results)
        .find(|(id, r)| r.status == NodeStatus::Failed && !plan.has_failure_path(id));
    match unabsorbed {
        Some((_, failed)) => PlanStatus::Failed(failed.node_id.clone()),
        None if any_cancelled => PlanStatus::Cancelled,
        None => PlanStatus::Success,
    }
}

/// Runs every level of `scope`'s plan.
///
/// Level `k + 1` starts only after every node of level `k` is terminal.
/// Once the run stops, the remaining nodes are recorded as cancelled
/// without being dispatched.
pub(crate) fn run_plan<'a>(
    ctx: &'a RunContext,
    scope: &'a PlanScope,
    inherited: Inherited<'a>,
) -> BoxFuture<'a, PlanOutcome> {
    async move {
        let plan = &scope.plan;
        let frame = Frame::root(scope, inherited);
        let mut finished: HashMap<&str, NodeResult> = HashMap::new();
        let mut order = Vec::with_capacity(plan.top_level_count());
        let mut results = Vec::with_capacity(plan.top_level_count());
        let mut last_level_start = 0;

        for (index, level) in plan.levels().iter().enumerate() {
            last_level_start = results.len();
            let mut dispatch = Vec::with_capacity(level.len());
            for node_id in level {
                let Some(node) = plan.node(node_id) else {
                    continue;
                };
                if ctx.is_stopping() {
                    let result =
                        NodeResult::not_dispatched(frame.qualify(node_id), node, NodeStatus::Cancelled);
                    ctx.finalize(&result).await;
                    finished.insert(node_id.as_str(), result);
                    continue;
                }
                match readiness(plan.inbound(node_id), &finished) {
                    Readiness::Run(fresh) => dispatch.push((
                        node_id.as_str(),
                        node,
                        frame.with_upstream_fresh(inherited.upstream_fresh || fresh),
                    )),
                    Readiness::Skip => {
                        debug!(run_id = %ctx.run_id, node_id = %frame.qualify(node_id), "Skipping node");
                        let result =
                            NodeResult::not_dispatched(frame.qualify(node_id), node, NodeStatus::Skipped);
                        ctx.finalize(&result).await;
                        finished.insert(node_id.as_str(), result);
                    }
                }
            }

            debug!(run_id = %ctx.run_id, pipeline = %plan.name(), level = index, nodes = dispatch.len(), "Dispatching level");
            let ids: Vec<&str> = dispatch.iter().map(|(id, _, _)| *id).collect();
            let outcomes = join_all(
                dispatch
                    .into_iter()
                    .map(|(_, node, node_frame)| execute(ctx, node_frame, node)),
            )
            .await;
            for (id, result) in ids.into_iter().zip(outcomes) {
                finished.insert(id, result);
            }
            for node_id in level {
                if let Some(result) = finished.get(node_id.as_str()) {
                    order.push(node_id.as_str());
                    results.push(result.clone());
                }
            }
        }

        let status = plan_status(plan, ctx, &order, &results);
        PlanOutcome {
            status,
            results,
            last_level_start,
        }
    }
    .boxed()
}
