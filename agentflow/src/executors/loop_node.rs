//! Loop containers: the children once per item.

use super::{all_reused, execute as execute_node, pause, sum_costs, Frame, Inherited};
use crate::core::{seconds, FailureKind, LoopConfig, Node, NodeResult, NodeStatus};
use crate::interpolate::{LoopBinding, OutputSource};
use crate::runner::RunContext;
use crate::utils::sha256_hex;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

/// Iteration-local outputs over the enclosing scope.
struct IterationOutputs<'a> {
    local: &'a DashMap<String, String>,
    parent: &'a (dyn OutputSource + Sync),
}

impl OutputSource for IterationOutputs<'_> {
    fn output_of(&self, node_id: &str) -> Option<String> {
        self.local
            .output_of(node_id)
            .or_else(|| self.parent.output_of(node_id))
    }
}

struct Iteration {
    index: usize,
    results: Vec<NodeResult>,
}

impl Iteration {
    fn succeeded(&self) -> bool {
        self.results.iter().all(NodeResult::is_success)
    }
}

pub(super) async fn execute(
    ctx: &RunContext,
    frame: Frame<'_>,
    node: &Node,
    children: &[String],
    config: &LoopConfig,
) -> NodeResult {
    let node_id = frame.qualify(&node.id);
    let rendered = frame.render(&node.instructions);
    let hash = sha256_hex(&rendered);

    let mut items = config.separator.split(&rendered);
    let cap = config.iteration_cap(ctx.config.max_loop_iterations);
    if items.len() > cap {
        warn!(run_id = %ctx.run_id, node_id = %node_id, items = items.len(), cap, "Truncating loop items");
        items.truncate(cap);
    }

    let timeout = match (node.timeout(), config.timeout_seconds.and_then(seconds)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    let policy = node.retry_policy();
    let mut attempt = 1;
    loop {
        ctx.mark_running(&node_id);
        let inherited = Inherited {
            deadline: frame.inherited.deadline_after(timeout),
            model_override: config.model_override.as_deref().or(frame.inherited.model_override),
            ..frame.inherited
        };
        let started = NodeResult::started(&node_id, node, attempt, &hash);
        let iterations = run_iterations(ctx, frame, inherited, node, children, &items).await;
        let result = aggregate(ctx, started, &iterations, items.len(), inherited.expired());
        info!(
            run_id = %ctx.run_id,
            node_id = %node_id,
            attempt,
            iterations = iterations.len(),
            status = %result.status,
            "Loop finished"
        );
        ctx.finalize(&result).await;

        let retryable = result.failure.is_some_and(|f| f.is_retryable());
        if !retryable || attempt >= policy.attempts() || ctx.is_stopping() {
            return result;
        }
        warn!(run_id = %ctx.run_id, node_id = %node_id, attempt, "Loop failed; retrying");
        if !pause(ctx, policy.delay()).await {
            let cancelled = NodeResult::started(&node_id, node, attempt + 1, &hash).cancel();
            ctx.finalize(&cancelled).await;
            return cancelled;
        }
        attempt += 1;
    }
}

/// Runs iterations concurrently; the first failure stops new dispatches.
/// Returned iterations are sorted by index.
async fn run_iterations(
    ctx: &RunContext,
    frame: Frame<'_>,
    inherited: Inherited<'_>,
    node: &Node,
    children: &[String],
    items: &[String],
) -> Vec<Iteration> {
    let count = items.len();
    let window = ctx.config.max_parallel_processes.max(1);
    let children = frame.children(children);
    let mut pending = FuturesUnordered::new();
    let mut finished = Vec::with_capacity(count);
    let mut next = 0;
    let mut halted = false;

    loop {
        while !halted && pending.len() < window && next < count {
            if ctx.is_stopping() || inherited.expired() {
                halted = true;
                break;
            }
            let binding = LoopBinding {
                item: items[next].clone(),
                index: next,
                count,
            };
            pending.push(run_iteration(ctx, frame, inherited, node, &children, binding));
            next += 1;
        }
        let Some(iteration) = pending.next().await else {
            break;
        };
        if !iteration.succeeded() && !halted {
            debug!(run_id = %ctx.run_id, node_id = %node.id, index = iteration.index, "Iteration failed; halting dispatch");
            halted = true;
        }
        finished.push(iteration);
    }

    finished.sort_by_key(|i| i.index);
    finished
}

async fn run_iteration(
    ctx: &RunContext,
    frame: Frame<'_>,
    inherited: Inherited<'_>,
    node: &Node,
    children: &[&Node],
    binding: LoopBinding,
) -> Iteration {
    let qualifier = format!("{}{}[{}]/", frame.qualifier, node.id, binding.index);
    let local = DashMap::new();
    let outputs = IterationOutputs {
        local: &local,
        parent: frame.outputs,
    };
    let mut results: Vec<NodeResult> = Vec::with_capacity(children.len());
    let mut upstream_fresh = inherited.upstream_fresh;

    for child in children {
        let child_id = format!("{qualifier}{}", child.id);
        if let Some(last) = results.last().filter(|r| !r.is_success()) {
            let status = if last.status == NodeStatus::Failed {
                NodeStatus::Skipped
            } else {
                NodeStatus::Cancelled
            };
            let skipped = NodeResult::not_dispatched(child_id, child, status);
            ctx.finalize(&skipped).await;
            results.push(skipped);
            continue;
        }

        let child_frame = Frame {
            scope: frame.scope,
            qualifier: &qualifier,
            outputs: &outputs,
            writes: &local,
            inherited: Inherited {
                binding: Some(&binding),
                upstream_fresh,
                ..inherited
            },
        };
        let result = execute_node(ctx, child_frame, child).await;
        upstream_fresh |= result.is_fresh();
        results.push(result);
    }

    Iteration {
        index: binding.index,
        results,
    }
}

fn aggregate(
    ctx: &RunContext,
    started: NodeResult,
    iterations: &[Iteration],
    expected: usize,
    expired: bool,
) -> NodeResult {
    let results: Vec<NodeResult> = iterations
        .iter()
        .flat_map(|i| i.results.iter().cloned())
        .collect();
    let output = iterations
        .iter()
        .filter_map(|i| i.results.last())
        .filter(|r| r.is_success())
        .map(|r| r.captured_output.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    let started = started.with_cost(sum_costs(&results)).with_output(output);

    let first_failed = iterations.iter().find(|i| !i.succeeded());
    let timed_out = expired
        && (iterations.len() < expected
            || results.iter().any(|r| r.failure == Some(FailureKind::Timeout)));

    if ctx.cancel.is_cancelled() {
        return started.cancel();
    }
    if timed_out {
        return started.fail(FailureKind::Timeout, "loop timed out");
    }
    if let Some(iteration) = first_failed {
        let all_cancelled = iteration
            .results
            .iter()
            .all(|r| r.is_success() || r.status == NodeStatus::Cancelled);
        if all_cancelled {
            return started.cancel();
        }
        return started.fail(
            FailureKind::IterationFailed,
            format!("iteration {} failed", iteration.index),
        );
    }
    if iterations.len() < expected {
        return started.cancel();
    }
    let mut result = started.succeed();
    result.reused = all_reused(&results);
    result
}
