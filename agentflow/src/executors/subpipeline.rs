//! Sub-pipeline nodes: a nested plan sharing the parent run.

use super::{all_reused, sum_costs, Frame, PlanScope};
use crate::core::{FailureKind, Node, NodeResult};
use crate::interpolate::merge_variables;
use crate::runner::{run_plan, PlanStatus, RunContext};
use crate::utils::sha256_hex;
use tracing::{error, info};

pub(super) async fn execute(ctx: &RunContext, frame: Frame<'_>, node: &Node) -> NodeResult {
    let node_id = frame.qualify(&node.id);
    let hash = sha256_hex(frame.render(&node.instructions));
    let started = NodeResult::started(&node_id, node, 1, &hash);

    let Some(plan) = frame.scope.plan.subplan(&node.id).cloned() else {
        error!(run_id = %ctx.run_id, node_id = %node_id, "Sub-pipeline was not planned");
        let result = started.fail(FailureKind::SubPipelineFailed, "sub-pipeline was not planned");
        ctx.finalize(&result).await;
        return result;
    };

    ctx.mark_running(&node_id);
    info!(run_id = %ctx.run_id, node_id = %node_id, pipeline = %plan.name(), "Entering sub-pipeline");
    let variables = merge_variables(&plan.pipeline().variables, &ctx.inputs);
    let scope = PlanScope::new(plan, format!("{node_id}/"), variables);
    let outcome = run_plan(ctx, &scope, frame.inherited).await;

    let output = outcome.last_level_outputs().join("\n");
    let started = started
        .with_cost(sum_costs(&outcome.results))
        .with_output(output);
    let result = match &outcome.status {
        PlanStatus::Success => {
            let mut result = started.succeed();
            result.reused = all_reused(&outcome.results);
            result
        }
        PlanStatus::Failed(failed) => {
            started.fail(FailureKind::SubPipelineFailed, format!("{failed} failed"))
        }
        PlanStatus::Cancelled | PlanStatus::BudgetExceeded => started.cancel(),
    };
    info!(run_id = %ctx.run_id, node_id = %node_id, status = %result.status, "Sub-pipeline finished");
    ctx.finalize(&result).await;
    result
}
