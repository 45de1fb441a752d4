//! ai-task, shell and git nodes: one process per attempt.

use super::{pause, Frame};
use crate::core::{FailureKind, Node, NodeKind, NodeResult, NodeStatus};
use crate::events::LogStream;
use crate::ledger::extract_cost;
use crate::runner::RunContext;
use crate::supervisor::{CommandSpec, ProcessOutcome, Termination};
use crate::utils::sha256_hex;
use tracing::{debug, info, warn};

pub(super) async fn execute(ctx: &RunContext, frame: Frame<'_>, node: &Node) -> NodeResult {
    let node_id = frame.qualify(&node.id);
    let rendered = frame.render(&node.instructions);
    let hash = sha256_hex(&rendered);

    if !frame.inherited.upstream_fresh {
        if let Some(prior) = ctx.ledger.prior().reusable(&node_id, &hash) {
            debug!(run_id = %ctx.run_id, node_id = %node_id, "Reusing prior result");
            let result = NodeResult::reuse_of(prior, &node_id, node);
            ctx.finalize(&result).await;
            return result;
        }
    }

    let policy = node.retry_policy();
    let mut attempt = 1;
    loop {
        let result = run_attempt(ctx, &frame, node, &node_id, &rendered, &hash, attempt).await;
        ctx.finalize(&result).await;

        let retryable = result.failure.is_some_and(|f| f.is_retryable());
        if !retryable
            || attempt >= policy.attempts()
            || ctx.is_stopping()
            || frame.inherited.expired()
        {
            return result;
        }
        warn!(
            run_id = %ctx.run_id,
            node_id = %node_id,
            attempt,
            max_attempts = policy.attempts(),
            "Attempt failed; retrying"
        );
        if !pause(ctx, policy.delay()).await {
            let mut cancelled = NodeResult::not_dispatched(&node_id, node, NodeStatus::Cancelled);
            cancelled.attempt = attempt + 1;
            ctx.finalize(&cancelled).await;
            return cancelled;
        }
        attempt += 1;
    }
}

async fn run_attempt(
    ctx: &RunContext,
    frame: &Frame<'_>,
    node: &Node,
    node_id: &str,
    rendered: &str,
    hash: &str,
    attempt: u32,
) -> NodeResult {
    let cancelled = || {
        let mut result = NodeResult::not_dispatched(node_id, node, NodeStatus::Cancelled);
        result.attempt = attempt;
        result
    };

    let permit = tokio::select! {
        () = ctx.cancel.cancelled() => return cancelled(),
        permit = ctx.slots.acquire() => permit,
    };
    let Ok(_permit) = permit else {
        return cancelled();
    };
    if ctx.is_stopping() {
        return cancelled();
    }

    ctx.mark_running(node_id);
    let (command, model) = command_for(ctx, frame, node, rendered);
    let timeout = frame.inherited.remaining(node.timeout());
    info!(
        run_id = %ctx.run_id,
        node_id = %node_id,
        kind = %node.tag(),
        attempt,
        "Node started"
    );

    let started = NodeResult::started(node_id, node, attempt, hash);
    let lines = |stream: LogStream, line: &str| ctx.emit_line(node_id, stream, line);
    let outcome = ctx
        .launcher
        .launch(&command, timeout, &lines, &ctx.cancel)
        .await;

    let cost = match node.kind {
        NodeKind::AiTask { .. } => extract_cost(&outcome),
        _ => None,
    };
    let result = finish(
        started
            .with_exit_code(outcome.exit_code)
            .with_cost(cost)
            .with_model(model),
        outcome,
        timeout,
    );
    info!(
        run_id = %ctx.run_id,
        node_id = %node_id,
        attempt,
        status = %result.status,
        exit_code = ?result.exit_code,
        cost_usd = ?result.cost_usd,
        "Node finished"
    );
    result
}

fn command_for(
    ctx: &RunContext,
    frame: &Frame<'_>,
    node: &Node,
    rendered: &str,
) -> (CommandSpec, Option<String>) {
    let config = &ctx.config;
    let (command, model) = match &node.kind {
        NodeKind::AiTask { agent, model, .. } => {
            let model = frame
                .inherited
                .model_override
                .map(ToString::to_string)
                .or_else(|| model.clone().filter(|m| !m.is_empty()))
                .or_else(|| config.default_model.clone());
            let command = CommandSpec::ai_task(
                &config.claude_cli_path,
                agent.as_deref(),
                model.as_deref(),
                rendered,
            );
            (command, model)
        }
        _ => (CommandSpec::shell(&config.shell, rendered), None),
    };
    (command.with_cwd(config.project_path.clone()), model)
}

fn finish(
    result: NodeResult,
    outcome: ProcessOutcome,
    timeout: Option<std::time::Duration>,
) -> NodeResult {
    let result = result.with_output(outcome.combined);
    match outcome.termination {
        Termination::Exited => match outcome.exit_code {
            Some(0) => result.succeed(),
            Some(code) => result.fail(FailureKind::ProcessFailure, format!("exit code {code}")),
            None => result.fail(FailureKind::ProcessFailure, "terminated by signal"),
        },
        Termination::TimedOut => {
            let secs = timeout.map_or(0.0, |t| t.as_secs_f64());
            result.fail(FailureKind::Timeout, format!("timed out after {secs:.1}s"))
        }
        Termination::Cancelled => result.cancel(),
        Termination::SpawnFailed(error) => result.fail(FailureKind::SpawnFailed, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> NodeResult {
        NodeResult::started("n", &Node::shell("n", "x"), 1, "h")
    }

    #[test]
    fn test_finish_maps_terminations() {
        let ok = finish(running(), ProcessOutcome::exited(0, "done", ""), None);
        assert_eq!(ok.status, NodeStatus::Success);
        assert_eq!(ok.captured_output, "done");

        let failed = finish(running(), ProcessOutcome::exited(2, "", "boom"), None);
        assert_eq!(failed.failure, Some(FailureKind::ProcessFailure));
        assert_eq!(failed.error.as_deref(), Some("exit code 2"));

        let timed_out = finish(
            running(),
            ProcessOutcome::exited(0, "", "").with_termination(Termination::TimedOut),
            Some(std::time::Duration::from_secs(1)),
        );
        assert_eq!(timed_out.failure, Some(FailureKind::Timeout));

        let cancelled = finish(
            running(),
            ProcessOutcome::exited(0, "", "").with_termination(Termination::Cancelled),
            None,
        );
        assert_eq!(cancelled.status, NodeStatus::Cancelled);
        assert_eq!(cancelled.failure, None);

        let spawn = finish(running(), ProcessOutcome::spawn_failed("no such file"), None);
        assert_eq!(spawn.failure, Some(FailureKind::SpawnFailed));
    }
}
