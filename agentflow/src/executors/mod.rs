//! One execution strategy per node kind.
//!
//! `execute` is the single dispatch point: an exhaustive match over
//! [`NodeKind`]. Containers recurse through it for their children, and the
//! sub-pipeline executor recurses into the level runner, so every strategy
//! returns a boxed future.

mod approval;
mod leaf;
mod loop_node;
mod parallel;
mod subpipeline;

pub use approval::{ApprovalBroker, PendingApproval};

use crate::core::{Node, NodeKind, NodeResult, NodeStatus};
use crate::graph::ExecutionPlan;
use crate::interpolate::{LoopBinding, OutputSource, Scope};
use crate::runner::RunContext;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One pipeline being executed within a run: the top-level pipeline or an
/// expanded sub-pipeline.
pub(crate) struct PlanScope {
    pub(crate) plan: Arc<ExecutionPlan>,
    /// Prepended to the ids of this plan's nodes.
    pub(crate) prefix: String,
    pub(crate) variables: HashMap<String, String>,
    /// Captured output of finished nodes, keyed by unqualified id.
    pub(crate) outputs: DashMap<String, String>,
}

impl PlanScope {
    pub(crate) fn new(
        plan: Arc<ExecutionPlan>,
        prefix: impl Into<String>,
        variables: HashMap<String, String>,
    ) -> Self {
        Self {
            plan,
            prefix: prefix.into(),
            variables,
            outputs: DashMap::new(),
        }
    }
}

/// Context a node inherits from whatever encloses it.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Inherited<'a> {
    pub(crate) binding: Option<&'a LoopBinding>,
    pub(crate) model_override: Option<&'a str>,
    /// A dependency of the enclosing node was freshly executed.
    pub(crate) upstream_fresh: bool,
    pub(crate) deadline: Option<Instant>,
}

impl Inherited<'_> {
    pub(crate) fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Earliest of `timeout` and the inherited deadline.
    pub(crate) fn deadline_after(&self, timeout: Option<Duration>) -> Option<Instant> {
        let own = timeout.map(|t| Instant::now() + t);
        match (own, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time left before the effective deadline.
    pub(crate) fn remaining(&self, timeout: Option<Duration>) -> Option<Duration> {
        self.deadline_after(timeout)
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Where a node executes: its scope, id qualifier and output visibility.
#[derive(Clone, Copy)]
pub(crate) struct Frame<'a> {
    pub(crate) scope: &'a PlanScope,
    pub(crate) qualifier: &'a str,
    pub(crate) outputs: &'a (dyn OutputSource + Sync),
    pub(crate) writes: &'a DashMap<String, String>,
    pub(crate) inherited: Inherited<'a>,
}

impl<'a> Frame<'a> {
    pub(crate) fn root(scope: &'a PlanScope, inherited: Inherited<'a>) -> Self {
        Self {
            scope,
            qualifier: &scope.prefix,
            outputs: &scope.outputs,
            writes: &scope.outputs,
            inherited,
        }
    }

    pub(crate) fn qualify(&self, node_id: &str) -> String {
        format!("{}{node_id}", self.qualifier)
    }

    pub(crate) fn render(&self, template: &str) -> String {
        Scope::new(&self.scope.variables, self.outputs)
            .with_loop(self.inherited.binding)
            .render(template)
    }

    pub(crate) fn with_upstream_fresh(mut self, fresh: bool) -> Self {
        self.inherited.upstream_fresh = fresh;
        self
    }

    /// Resolves children, reporting ids missing from the plan.
    pub(crate) fn children(&self, ids: &'a [String]) -> Vec<&'a Node> {
        ids.iter()
            .filter_map(|id| {
                let node = self.scope.plan.node(id);
                if node.is_none() {
                    tracing::error!(node_id = %id, "Child missing from plan");
                }
                node
            })
            .collect()
    }
}

/// Executes `node` with the strategy for its kind and publishes its output.
pub(crate) fn execute<'a>(
    ctx: &'a RunContext,
    frame: Frame<'a>,
    node: &'a Node,
) -> BoxFuture<'a, NodeResult> {
    async move {
        let result = match &node.kind {
            NodeKind::AiTask { .. } | NodeKind::Shell | NodeKind::Git => {
                leaf::execute(ctx, frame, node).await
            }
            NodeKind::Parallel { children } => parallel::execute(ctx, frame, node, children).await,
            NodeKind::Loop {
                children,
                loop_config,
            } => loop_node::execute(ctx, frame, node, children, loop_config).await,
            NodeKind::ApprovalGate => approval::execute(ctx, frame, node).await,
            NodeKind::SubPipeline { .. } => subpipeline::execute(ctx, frame, node).await,
            NodeKind::Comment => {
                let result =
                    NodeResult::not_dispatched(frame.qualify(&node.id), node, NodeStatus::Skipped);
                ctx.finalize(&result).await;
                result
            }
        };
        if result.attempt > 0 {
            frame
                .writes
                .insert(node.id.clone(), result.captured_output.clone());
        }
        result
    }
    .boxed()
}

/// Sum of reported costs; `None` when no result reported one.
pub(crate) fn sum_costs<'r>(results: impl IntoIterator<Item = &'r NodeResult>) -> Option<f64> {
    results
        .into_iter()
        .filter_map(|r| r.cost_usd)
        .fold(None, |acc, c| Some(acc.unwrap_or(0.0) + c))
}

/// Returns true if every result was reused from a prior run.
pub(crate) fn all_reused(results: &[NodeResult]) -> bool {
    !results.is_empty() && results.iter().all(|r| r.reused)
}

/// Sleeps for `delay`, returning false if the run was cancelled meanwhile.
pub(crate) async fn pause(ctx: &RunContext, delay: Duration) -> bool {
    if delay.is_zero() {
        return !ctx.cancel.is_cancelled();
    }
    tokio::select! {
        () = ctx.cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Node;

    #[test]
    fn test_sum_costs() {
        let node = Node::ai_task("a", "p");
        let with = NodeResult::started("a", &node, 1, "h").with_cost(Some(0.25));
        let without = NodeResult::started("b", &node, 1, "h");

        assert_eq!(sum_costs([&without]), None);
        assert_eq!(sum_costs([&with, &without, &with]), Some(0.5));
    }

    #[test]
    fn test_deadline_picks_earliest() {
        let inherited = Inherited {
            deadline: Some(Instant::now() + Duration::from_secs(1)),
            ..Inherited::default()
        };
        let remaining = inherited.remaining(Some(Duration::from_secs(60))).unwrap();
        assert!(remaining <= Duration::from_secs(1));
        assert!(!inherited.expired());

        let none = Inherited::default();
        assert_eq!(none.remaining(None), None);
        assert!(none.remaining(Some(Duration::from_secs(5))).unwrap() <= Duration::from_secs(5));
    }
}
