//! End-to-end runs against a scripted launcher.

use crate::config::EngineConfig;
use crate::core::{
    ApprovalState, Edge, FailureKind, LoopConfig, Node, NodeStatus, PipelineDefinition, RunStatus,
    Separator,
};
use crate::errors::EngineError;
use crate::graph::DirectoryResolver;
use crate::runner::Engine;
use crate::store::RunLog;
use crate::testing::{
    ai_chain, assert_finished_before, assert_nodes_status, assert_run_status, shell_chain,
    Scripted, ScriptedLauncher, TestEngine,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn engine(launcher: ScriptedLauncher) -> TestEngine {
    TestEngine::new(launcher).unwrap()
}

fn costly(cost: f64) -> ScriptedLauncher {
    ScriptedLauncher::new().on("task", Scripted::ok("done").with_cost(cost))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn test_linear_chain_runs_in_order() {
    let harness = engine(ScriptedLauncher::new());
    let report = harness.run(shell_chain("p", &["a", "b", "c"])).await.unwrap();

    assert_run_status(&report, RunStatus::Success);
    assert_nodes_status(&report, &["a", "b", "c"], NodeStatus::Success);
    assert_eq!(harness.launcher.payloads(), vec!["echo a", "echo b", "echo c"]);
    assert_finished_before(&report, "a", "b");
    assert_finished_before(&report, "b", "c");
    assert!(report.state.finished_at.is_some());
}

#[tokio::test]
async fn test_diamond_waits_for_both_branches() {
    let pipeline = PipelineDefinition::new("diamond")
        .with_node(Node::shell("a", "echo a"))
        .with_node(Node::shell("b", "slow b"))
        .with_node(Node::shell("c", "echo c"))
        .with_node(Node::shell("d", "echo d"))
        .with_edge(Edge::on_success("a", "b"))
        .with_edge(Edge::on_success("a", "c"))
        .with_edge(Edge::on_success("b", "d"))
        .with_edge(Edge::on_success("c", "d"));
    let harness = engine(
        ScriptedLauncher::new().on("slow", Scripted::ok("b").with_delay(Duration::from_millis(50))),
    );
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Success);
    assert_finished_before(&report, "b", "d");
    assert_finished_before(&report, "c", "d");
    assert_eq!(harness.launcher.payloads().last().map(String::as_str), Some("echo d"));
}

#[tokio::test]
async fn test_cycles_are_rejected_before_any_spawn() {
    let harness = engine(ScriptedLauncher::new());
    let pipeline = shell_chain("p", &["a", "b"]).with_edge(Edge::on_success("b", "a"));

    let err = harness
        .engine
        .start_run(pipeline, HashMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::CycleDetected(_)), "{err}");
    assert_eq!(harness.launcher.spawn_count(), 0);
    assert!(harness.engine.active_run_id().is_none());
    assert!(harness.run_log.is_empty());
}

#[tokio::test]
async fn test_outputs_flow_downstream() {
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::shell("a", "produce"))
        .with_node(Node::shell("b", "use {output.a} for ${TARGET}"))
        .with_edge(Edge::on_success("a", "b"))
        .with_variable("TARGET", "staging");
    let harness = engine(ScriptedLauncher::new().on("produce", Scripted::ok("v1.2\n")));
    let inputs = HashMap::from([("TARGET".to_string(), "prod".to_string())]);
    let report = harness.run_with(pipeline, inputs).await.unwrap();

    assert_run_status(&report, RunStatus::Success);
    assert_eq!(harness.launcher.payloads()[1], "use v1.2 for prod");
    assert_eq!(report.state.trigger_input["TARGET"], "prod");
}

#[tokio::test]
async fn test_failure_skips_downstream() {
    let harness = engine(ScriptedLauncher::new().on("echo b", Scripted::fail(2, "broken")));
    let report = harness.run(shell_chain("p", &["a", "b", "c"])).await.unwrap();

    assert_run_status(&report, RunStatus::Failed);
    assert_eq!(report.state.failed_node_id.as_deref(), Some("b"));
    assert_nodes_status(&report, &["c"], NodeStatus::Skipped);
    let b = report.result("b").unwrap();
    assert_eq!(b.exit_code, Some(2));
    assert_eq!(b.failure, Some(FailureKind::ProcessFailure));
    assert!(b.captured_output.contains("broken"));
    assert_eq!(harness.launcher.spawn_count(), 2);
}

#[tokio::test]
async fn test_failure_path_absorbs_failure() {
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::shell("deploy", "deploy now"))
        .with_node(Node::shell("rollback", "rollback"))
        .with_node(Node::shell("announce", "announce"))
        .with_edge(Edge::on_failure("deploy", "rollback"))
        .with_edge(Edge::on_success("deploy", "announce"));
    let harness = engine(ScriptedLauncher::new().on("deploy", Scripted::fail(1, "")));
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Success);
    assert_nodes_status(&report, &["deploy"], NodeStatus::Failed);
    assert_nodes_status(&report, &["rollback"], NodeStatus::Success);
    assert_nodes_status(&report, &["announce"], NodeStatus::Skipped);
}

#[tokio::test]
async fn test_retry_until_success() {
    let pipeline =
        PipelineDefinition::new("p").with_node(Node::shell("n", "flaky step").with_retry(3, 0.01));
    let harness = engine(
        ScriptedLauncher::new()
            .on_sequence("flaky", vec![Scripted::fail(1, "first"), Scripted::ok("second")]),
    );
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Success);
    let attempts = report.attempts("n");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, NodeStatus::Failed);
    assert_eq!(attempts[1].attempt, 2);
    assert_eq!(harness.launcher.spawn_count(), 2);
}

#[tokio::test]
async fn test_node_timeout_fails_node() {
    let pipeline =
        PipelineDefinition::new("p").with_node(Node::shell("n", "sleep forever").with_timeout(0.05));
    let harness = engine(ScriptedLauncher::new().on("sleep", Scripted::hang()));
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Failed);
    assert_eq!(report.result("n").unwrap().failure, Some(FailureKind::Timeout));
}

#[tokio::test]
async fn test_resume_reuses_every_unchanged_result() {
    let harness = engine(costly(0.01));
    let pipeline = ai_chain("p", &["a", "b", "c"]);
    let first = harness.run(pipeline.clone()).await.unwrap();
    assert_run_status(&first, RunStatus::Success);
    assert_eq!(harness.launcher.spawn_count(), 3);

    let resumed = harness.resume(&first.state.run_id, pipeline).await.unwrap();

    assert_run_status(&resumed, RunStatus::Success);
    assert_eq!(harness.launcher.spawn_count(), 3);
    assert!(resumed.results.iter().all(|r| r.reused));
    assert!((resumed.state.total_cost - first.state.total_cost).abs() < 1e-9);
    assert!(resumed.state.charged_cost.abs() < 1e-9);
    assert_eq!(resumed.state.resumed_from.as_deref(), Some(first.state.run_id.as_str()));
}

#[tokio::test]
async fn test_resume_keeps_cost_of_failed_attempts() {
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::ai_task("n", "flaky task").with_retry(2, 0.0));
    let harness = engine(ScriptedLauncher::new().on_sequence(
        "flaky",
        vec![
            Scripted::fail(1, "rate limited").with_cost(0.01),
            Scripted::ok("done").with_cost(0.01),
        ],
    ));
    let first = harness.run(pipeline.clone()).await.unwrap();
    assert_run_status(&first, RunStatus::Success);
    assert!((first.state.total_cost - 0.02).abs() < 1e-9);

    let resumed = harness.resume(&first.state.run_id, pipeline).await.unwrap();

    assert_run_status(&resumed, RunStatus::Success);
    assert_eq!(harness.launcher.spawn_count(), 2);
    assert!(resumed.result("n").unwrap().reused);
    assert!((resumed.state.total_cost - first.state.total_cost).abs() < 1e-9);
    assert!(resumed.state.charged_cost.abs() < 1e-9);
}

#[tokio::test]
async fn test_resume_reruns_changed_node_and_downstream() {
    let harness = engine(costly(0.01));
    let first = harness.run(ai_chain("p", &["a", "b", "c"])).await.unwrap();

    let mut changed = ai_chain("p", &["a", "b", "c"]);
    changed.nodes[1].instructions = "task b, but better".to_string();
    let resumed = harness.resume(&first.state.run_id, changed).await.unwrap();

    assert_run_status(&resumed, RunStatus::Success);
    assert!(resumed.result("a").unwrap().reused);
    assert!(!resumed.result("b").unwrap().reused);
    assert!(!resumed.result("c").unwrap().reused);
    assert_eq!(
        harness.launcher.payloads()[3..].to_vec(),
        vec!["task b, but better".to_string(), "task c".to_string()]
    );
}

#[tokio::test]
async fn test_resume_of_unknown_run() {
    let harness = engine(ScriptedLauncher::new());
    let err = harness
        .resume("run-1", shell_chain("p", &["a"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RunNotFound(_)));
}

#[tokio::test]
async fn test_output_cache_reuses_latest_run() {
    let config = EngineConfig {
        output_cache: true,
        ..EngineConfig::default()
    };
    let harness = TestEngine::with_config(costly(0.02), config).unwrap();
    harness.run(ai_chain("p", &["a", "b"])).await.unwrap();
    let second = harness.run(ai_chain("p", &["a", "b"])).await.unwrap();

    assert_eq!(harness.launcher.spawn_count(), 2);
    assert!(second.results.iter().all(|r| r.reused));
    assert!(second.state.resumed_from.is_none());
}

#[tokio::test]
async fn test_parallel_failure_records_every_child() {
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::parallel("fan", &["a", "b"]))
        .with_node(Node::shell("a", "echo a"))
        .with_node(Node::shell("b", "explode"))
        .with_node(Node::shell("after", "echo after"))
        .with_edge(Edge::on_success("fan", "after"));
    let harness = engine(ScriptedLauncher::new().on("explode", Scripted::fail(1, "boom")));
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Failed);
    assert_eq!(report.state.failed_node_id.as_deref(), Some("fan"));
    assert_nodes_status(&report, &["a"], NodeStatus::Success);
    assert_nodes_status(&report, &["b", "fan"], NodeStatus::Failed);
    assert_nodes_status(&report, &["after"], NodeStatus::Skipped);
    assert_eq!(report.result("fan").unwrap().failure, Some(FailureKind::ChildFailed));
}

#[tokio::test]
async fn test_parallel_children_share_process_slots() {
    let config = EngineConfig {
        max_parallel_processes: 2,
        ..EngineConfig::default()
    };
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::parallel("fan", &["a", "b", "c", "d"]))
        .with_node(Node::shell("a", "work a"))
        .with_node(Node::shell("b", "work b"))
        .with_node(Node::shell("c", "work c"))
        .with_node(Node::shell("d", "work d"));
    let launcher =
        ScriptedLauncher::new().on("work", Scripted::ok("").with_delay(Duration::from_millis(30)));
    let harness = TestEngine::with_config(launcher, config).unwrap();
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Success);
    assert_eq!(harness.launcher.spawn_count(), 4);
    assert!(harness.launcher.max_concurrency() <= 2);
}

#[tokio::test]
async fn test_loop_binds_item_index_and_count() {
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::looping("each", "x\ny\nz", &["step"]))
        .with_node(Node::shell("step", "handle $LOOP_ITEM $LOOP_INDEX/$LOOP_COUNT"));
    let harness = engine(ScriptedLauncher::new());
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Success);
    let mut payloads = harness.launcher.payloads();
    payloads.sort();
    assert_eq!(payloads, vec!["handle x 0/3", "handle y 1/3", "handle z 2/3"]);
    assert_nodes_status(
        &report,
        &["each[0]/step", "each[1]/step", "each[2]/step", "each"],
        NodeStatus::Success,
    );
}

#[tokio::test]
async fn test_loop_iteration_failure_fails_loop() {
    let config = LoopConfig {
        separator: Separator::Comma,
        ..LoopConfig::default()
    };
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::looping("each", "ok,bad", &["step"]).with_loop_config(config))
        .with_node(Node::shell("step", "run $LOOP_ITEM"));
    let harness = engine(ScriptedLauncher::new().on("run bad", Scripted::fail(3, "")));
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Failed);
    let each = report.result("each").unwrap();
    assert_eq!(each.failure, Some(FailureKind::IterationFailed));
    assert_eq!(each.error.as_deref(), Some("iteration 1 failed"));
}

#[tokio::test]
async fn test_loop_failure_stops_dispatching_iterations() {
    let config = EngineConfig {
        max_parallel_processes: 1,
        ..EngineConfig::default()
    };
    let loop_config = LoopConfig {
        separator: Separator::Comma,
        ..LoopConfig::default()
    };
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::looping("each", "a,b,c,d", &["step"]).with_loop_config(loop_config))
        .with_node(Node::shell("step", "run $LOOP_ITEM"));
    let launcher = ScriptedLauncher::new().on("run b", Scripted::fail(1, ""));
    let harness = TestEngine::with_config(launcher, config).unwrap();
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Failed);
    assert_eq!(harness.launcher.payloads(), vec!["run a", "run b"]);
    assert!(report.result("each[2]/step").is_none());
    assert!(report.result("each[3]/step").is_none());
    assert_eq!(report.result("each").unwrap().error.as_deref(), Some("iteration 1 failed"));
}

#[tokio::test]
async fn test_sub_pipeline_runs_nested() {
    let child = PipelineDefinition::new("child")
        .with_node(Node::shell("inner", "greet ${WHO}"))
        .with_variable("WHO", "world");
    let pipeline = PipelineDefinition::new("parent")
        .with_node(Node::sub_pipeline("nested", "child"))
        .with_node(Node::shell("after", "saw {output.nested}"))
        .with_edge(Edge::on_success("nested", "after"));
    let harness = engine(ScriptedLauncher::new().on("greet", Scripted::ok("hi there"))).with_pipeline(child);
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Success);
    assert_nodes_status(&report, &["nested/inner", "nested", "after"], NodeStatus::Success);
    assert_eq!(
        harness.launcher.payloads(),
        vec!["greet world".to_string(), "saw hi there".to_string()]
    );
}

#[tokio::test]
async fn test_sub_pipeline_resolves_from_project_directory() {
    let project = tempfile::tempdir().unwrap();
    let pipelines = project.path().join(".claude").join("pipelines");
    std::fs::create_dir_all(&pipelines).unwrap();
    let child = PipelineDefinition::new("child").with_node(Node::shell("inner", "greet disk"));
    let resolver = DirectoryResolver::new(&pipelines);
    std::fs::write(resolver.path_for("child"), child.to_json_string().unwrap()).unwrap();

    let launcher = Arc::new(ScriptedLauncher::new());
    let engine = Engine::new(EngineConfig::default().with_project_path(project.path()))
        .unwrap()
        .with_launcher(launcher.clone());
    let parent = PipelineDefinition::new("parent").with_node(Node::sub_pipeline("nested", "child"));
    let report = engine
        .start_run(parent, HashMap::new())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_run_status(&report, RunStatus::Success);
    assert_nodes_status(&report, &["nested/inner", "nested"], NodeStatus::Success);
    assert_eq!(launcher.payloads(), vec!["greet disk"]);
}

#[tokio::test]
async fn test_budget_halts_dispatch() {
    let config = EngineConfig {
        budget_usd: Some(0.05),
        ..EngineConfig::default()
    };
    let harness = TestEngine::with_config(costly(0.03), config).unwrap();
    let report = harness
        .run(ai_chain("p", &["n1", "n2", "n3", "n4"]))
        .await
        .unwrap();

    assert_run_status(&report, RunStatus::BudgetExceeded);
    assert_nodes_status(&report, &["n1", "n2"], NodeStatus::Success);
    assert_nodes_status(&report, &["n3", "n4"], NodeStatus::Cancelled);
    assert_eq!(harness.launcher.spawn_count(), 2);
    assert!((report.state.charged_cost - 0.06).abs() < 1e-9);
}

#[tokio::test]
async fn test_approval_timeout_fails_gate() {
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::approval_gate("gate", "Ship it?").with_timeout(1.0))
        .with_node(Node::shell("ship", "ship"))
        .with_edge(Edge::on_success("gate", "ship"));
    let harness = engine(ScriptedLauncher::new());
    let report = harness.run(pipeline).await.unwrap();

    assert_run_status(&report, RunStatus::Failed);
    let gate = report.result("gate").unwrap();
    assert_eq!(gate.failure, Some(FailureKind::ApprovalTimeout));
    assert_eq!(gate.approval_state, None);
    assert_nodes_status(&report, &["ship"], NodeStatus::Skipped);
    assert_eq!(harness.launcher.spawn_count(), 0);
    assert!(harness.engine.pending_approvals().is_empty());
}

#[tokio::test]
async fn test_approval_decisions() {
    for (approved, status) in [(true, RunStatus::Success), (false, RunStatus::Failed)] {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::approval_gate("gate", "Deploy ${ENV}?"))
            .with_node(Node::shell("ship", "ship"))
            .with_edge(Edge::on_success("gate", "ship"))
            .with_variable("ENV", "prod");
        let harness = engine(ScriptedLauncher::new());
        let handle = harness.engine.start_run(pipeline, HashMap::new()).await.unwrap();
        let run_id = handle.run_id().to_string();

        wait_for(|| !harness.engine.pending_approvals().is_empty()).await;
        let requests = harness.sink.approval_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].rendered_instructions, "Deploy prod?");

        harness
            .engine
            .respond_to_approval(&run_id, Some("gate"), approved)
            .unwrap();
        let report = handle.wait().await.unwrap();

        assert_run_status(&report, status);
        let gate = report.result("gate").unwrap();
        if approved {
            assert_eq!(gate.approval_state, Some(ApprovalState::Approved));
            assert_eq!(harness.launcher.payloads(), vec!["ship"]);
        } else {
            assert_eq!(gate.failure, Some(FailureKind::ApprovalRejected));
            assert_nodes_status(&report, &["ship"], NodeStatus::Skipped);
        }
    }
}

#[tokio::test]
async fn test_resume_auto_approves_prior_approval() {
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::approval_gate("gate", "Ship it?"))
        .with_node(Node::shell("ship", "ship"))
        .with_edge(Edge::on_success("gate", "ship"));
    let harness = engine(ScriptedLauncher::new());
    let handle = harness
        .engine
        .start_run(pipeline.clone(), HashMap::new())
        .await
        .unwrap();
    let run_id = handle.run_id().to_string();
    wait_for(|| !harness.engine.pending_approvals().is_empty()).await;
    harness
        .engine
        .respond_to_approval(&run_id, Some("gate"), true)
        .unwrap();
    let first = handle.wait().await.unwrap();
    assert_run_status(&first, RunStatus::Success);

    let resumed = tokio::time::timeout(Duration::from_secs(5), harness.resume(&run_id, pipeline))
        .await
        .unwrap()
        .unwrap();

    assert_run_status(&resumed, RunStatus::Success);
    let gate = resumed.result("gate").unwrap();
    assert!(gate.reused);
    assert_eq!(gate.approval_state, Some(ApprovalState::Approved));
    assert_eq!(harness.sink.approval_requests().len(), 1);
    assert!(harness.engine.pending_approvals().is_empty());
    assert_eq!(harness.launcher.spawn_count(), 1);
}

#[tokio::test]
async fn test_response_without_pending_gate() {
    let harness = engine(ScriptedLauncher::new());
    let err = harness
        .engine
        .respond_to_approval("run-1", None, true)
        .unwrap_err();
    assert!(matches!(err, EngineError::ApprovalNotPending { .. }));
}

#[tokio::test]
async fn test_single_active_run_and_cancellation() {
    let harness = engine(ScriptedLauncher::new().on("hang", Scripted::hang()));
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::shell("wait", "hang around"))
        .with_node(Node::shell("next", "echo next"))
        .with_edge(Edge::on_success("wait", "next"));
    let handle = harness.engine.start_run(pipeline, HashMap::new()).await.unwrap();
    wait_for(|| harness.launcher.spawn_count() == 1).await;

    let err = harness
        .engine
        .start_run(shell_chain("other", &["x"]), HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RunAlreadyActive { ref run_id } if run_id == handle.run_id()));
    assert_eq!(
        harness.engine.run_state().map(|s| s.status),
        Some(RunStatus::Running)
    );

    assert_eq!(harness.engine.cancel_run().unwrap(), handle.run_id());
    let report = handle.wait().await.unwrap();

    assert_run_status(&report, RunStatus::Cancelled);
    assert_nodes_status(&report, &["wait", "next"], NodeStatus::Cancelled);
    assert!(harness.engine.active_run_id().is_none());
    assert!(harness.engine.cancel_run().is_err());
}

#[tokio::test]
async fn test_cancel_during_retry_delay_cancels_node() {
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::shell("n", "flaky step").with_retry(3, 5.0))
        .with_node(Node::shell("next", "echo next"))
        .with_edge(Edge::on_success("n", "next"));
    let harness = engine(ScriptedLauncher::new().on("flaky", Scripted::fail(1, "")));
    let handle = harness.engine.start_run(pipeline, HashMap::new()).await.unwrap();
    wait_for(|| {
        harness
            .engine
            .run_state()
            .and_then(|s| s.node_states.get("n").copied())
            == Some(NodeStatus::Failed)
    })
    .await;

    harness.engine.cancel_run().unwrap();
    let report = handle.wait().await.unwrap();

    assert_run_status(&report, RunStatus::Cancelled);
    assert_nodes_status(&report, &["n", "next"], NodeStatus::Cancelled);
    let attempts = report.attempts("n");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].status, NodeStatus::Cancelled);
    assert_eq!(harness.launcher.spawn_count(), 1);
}

#[tokio::test]
async fn test_status_stream_and_run_log() {
    let harness = engine(ScriptedLauncher::new().on("echo a", Scripted::ok("line one\nline two")));
    let report = harness.run(shell_chain("p", &["a"])).await.unwrap();

    assert_eq!(harness.sink.node_lines("a"), vec!["line one", "line two"]);
    let updates = harness.sink.run_updates();
    assert_eq!(updates.first().map(|u| u.status), Some(RunStatus::Running));
    assert_eq!(updates.last().map(|u| u.status), Some(RunStatus::Success));

    let record = harness.run_log.load_run(&report.state.run_id).await.unwrap();
    assert_eq!(record.state.status, RunStatus::Success);
    assert_eq!(record.results.len(), 1);
}

#[tokio::test]
async fn test_usage_stats_and_estimate() {
    let harness = engine(costly(0.02));
    harness.run(ai_chain("p", &["a", "b"])).await.unwrap();

    let stats = harness.engine.usage_stats().await.unwrap();
    assert_eq!(stats.total_runs, 1);
    assert_eq!(stats.total_ai_steps, 2);
    assert!((stats.total_cost - 0.04).abs() < 1e-9);

    let estimate = harness
        .engine
        .estimate_cost(&ai_chain("q", &["x", "y", "z"]))
        .await
        .unwrap()
        .unwrap();
    assert!((estimate - 0.06).abs() < 1e-9);
}

#[tokio::test]
async fn test_run_updates_never_regress_a_finished_node() {
    let pipeline = PipelineDefinition::new("p")
        .with_node(Node::parallel("fan", &["a", "b", "c", "d"]))
        .with_node(Node::shell("a", "work a"))
        .with_node(Node::shell("b", "work b"))
        .with_node(Node::shell("c", "work c"))
        .with_node(Node::shell("d", "work d"));
    let launcher =
        ScriptedLauncher::new().on("work", Scripted::ok("").with_delay(Duration::from_millis(5)));
    let harness = engine(launcher);
    let report = harness.run(pipeline).await.unwrap();
    assert_run_status(&report, RunStatus::Success);

    let updates = harness.sink.run_updates();
    for pair in updates.windows(2) {
        for (node_id, status) in &pair[0].node_states {
            if status.is_terminal() {
                assert_eq!(pair[1].node_states.get(node_id), Some(status), "{node_id}");
            }
        }
    }
    let last = updates.last().unwrap();
    assert!(["a", "b", "c", "d", "fan"]
        .iter()
        .all(|id| last.node_states.get(*id) == Some(&NodeStatus::Success)));
}
