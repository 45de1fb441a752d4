//! The engine façade.

use super::context::{RunContext, RunServices};
use super::level::{run_plan, PlanStatus};
use crate::config::EngineConfig;
use crate::core::{NodeResult, NodeStatus, PipelineDefinition, RunState, RunStatus};
use crate::errors::EngineError;
use crate::events::{NoOpRunEventSink, RunEventSink};
use crate::executors::{ApprovalBroker, Inherited, PendingApproval, PlanScope};
use crate::graph::{
    DirectoryResolver, ExecutionPlan, GraphBuilder, InMemoryResolver, PipelineResolver,
    ToolManifest,
};
use crate::interpolate::merge_variables;
use crate::ledger::{average_ai_cost, estimate_pipeline_cost, PriorResults, UsageStats};
use crate::observability::{build_run_payload, SpanTimer};
use crate::store::{InMemoryRunLog, JsonlRunLog, RunLog, RunRecord};
use crate::supervisor::{ProcessLauncher, ProcessSupervisor};
use crate::utils::RunIdGenerator;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

/// Final state of a run and every result it recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Finalized state.
    pub state: RunState,
    /// Results in finalization order.
    pub results: Vec<NodeResult>,
}

impl RunReport {
    /// Last result recorded for `node_id`.
    #[must_use]
    pub fn result(&self, node_id: &str) -> Option<&NodeResult> {
        self.results.iter().rev().find(|r| r.node_id == node_id)
    }

    /// Every attempt recorded for `node_id`.
    #[must_use]
    pub fn attempts(&self, node_id: &str) -> Vec<&NodeResult> {
        self.results.iter().filter(|r| r.node_id == node_id).collect()
    }

    /// Final status of `node_id`.
    #[must_use]
    pub fn status_of(&self, node_id: &str) -> NodeStatus {
        self.state.node_status(node_id)
    }

    /// Run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.state.status
    }
}

impl From<RunReport> for RunRecord {
    fn from(report: RunReport) -> Self {
        Self {
            state: report.state,
            results: report.results,
        }
    }
}

/// A started run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Id of the run.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Waits for the run to finalize.
    pub async fn wait(self) -> Result<RunReport, EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::Internal(format!("run task failed: {e}")))
    }
}

struct ActiveRun {
    run_id: String,
    ctx: Arc<RunContext>,
}

/// Executes pipelines, one top-level run at a time.
pub struct Engine {
    services: RunServices,
    resolver: Arc<dyn PipelineResolver>,
    tools: Arc<ToolManifest>,
    ids: RunIdGenerator,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.services.config)
            .field("active_run", &self.active_run_id())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine spawning real processes.
    ///
    /// Runs are logged to `run_log_dir` when configured, in memory
    /// otherwise. With a `project_path`, the tool manifest is read from
    /// `{project_path}/.mcp.json` and sub-pipelines resolve from
    /// `{project_path}/.claude/pipelines`.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let tools = match &config.project_path {
            Some(path) => ToolManifest::load_from_project(path)?,
            None => ToolManifest::new(),
        };
        let resolver: Arc<dyn PipelineResolver> = match &config.project_path {
            Some(path) => Arc::new(DirectoryResolver::new(path.join(".claude").join("pipelines"))),
            None => Arc::new(InMemoryResolver::new()),
        };
        let run_log: Arc<dyn RunLog> = match &config.run_log_dir {
            Some(dir) => Arc::new(JsonlRunLog::new(dir.clone())),
            None => Arc::new(InMemoryRunLog::new()),
        };
        let launcher = Arc::new(ProcessSupervisor::new(config.kill_grace()));
        Ok(Self {
            services: RunServices {
                config: Arc::new(config),
                launcher,
                sink: Arc::new(NoOpRunEventSink),
                approvals: Arc::new(ApprovalBroker::new()),
                run_log,
            },
            resolver,
            tools: Arc::new(tools),
            ids: RunIdGenerator::new(),
            active: Arc::new(Mutex::new(None)),
        })
    }

    /// Replaces the process launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.services.launcher = launcher;
        self
    }

    /// Replaces the status stream sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn RunEventSink>) -> Self {
        self.services.sink = sink;
        self
    }

    /// Replaces the sub-pipeline resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn PipelineResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replaces the tool manifest.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolManifest) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    /// Replaces the run log.
    #[must_use]
    pub fn with_run_log(mut self, run_log: Arc<dyn RunLog>) -> Self {
        self.services.run_log = run_log;
        self
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// Run log.
    #[must_use]
    pub fn run_log(&self) -> &Arc<dyn RunLog> {
        &self.services.run_log
    }

    /// Validates `pipeline` and returns its plan without running it.
    pub fn plan(&self, pipeline: &PipelineDefinition) -> Result<ExecutionPlan, EngineError> {
        GraphBuilder::new(self.resolver.as_ref(), &self.tools).build(pipeline)
    }

    /// Starts a fresh run.
    ///
    /// With `output_cache` enabled, unchanged results of the latest run of
    /// the same pipeline are reused.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before any run exists.
    /// [`EngineError::RunAlreadyActive`] if another run is executing.
    pub async fn start_run(
        &self,
        pipeline: PipelineDefinition,
        inputs: HashMap<String, String>,
    ) -> Result<RunHandle, EngineError> {
        let plan = self.plan(&pipeline)?;
        self.ensure_idle()?;
        let prior = if self.services.config.output_cache {
            match self.services.run_log.latest_run_for(&pipeline.name).await {
                Ok(Some(record)) => PriorResults::from_results(&record.results),
                Ok(None) => PriorResults::new(),
                Err(err) => {
                    warn!(pipeline = %pipeline.name, error = %err, "Output cache unavailable");
                    PriorResults::new()
                }
            }
        } else {
            PriorResults::new()
        };
        self.launch(plan, inputs, prior, None)
    }

    /// Re-runs a recorded run, reusing every unchanged successful result.
    ///
    /// `pipeline` may differ from the one originally run.
    pub async fn resume_run(
        &self,
        original_run_id: &str,
        pipeline: PipelineDefinition,
        inputs: HashMap<String, String>,
    ) -> Result<RunHandle, EngineError> {
        let plan = self.plan(&pipeline)?;
        self.ensure_idle()?;
        let record = self.services.run_log.load_run(original_run_id).await?;
        let prior = PriorResults::from_results(&record.results);
        info!(
            original_run_id,
            reusable = prior.len(),
            "Resuming run"
        );
        self.launch(plan, inputs, prior, Some(original_run_id.to_string()))
    }

    fn ensure_idle(&self) -> Result<(), EngineError> {
        match self.active.lock().as_ref() {
            Some(active) => Err(EngineError::RunAlreadyActive {
                run_id: active.run_id.clone(),
            }),
            None => Ok(()),
        }
    }

    fn launch(
        &self,
        plan: ExecutionPlan,
        inputs: HashMap<String, String>,
        prior: PriorResults,
        resumed_from: Option<String>,
    ) -> Result<RunHandle, EngineError> {
        let mut active = self.active.lock();
        if let Some(running) = active.as_ref() {
            return Err(EngineError::RunAlreadyActive {
                run_id: running.run_id.clone(),
            });
        }

        let run_id = self.ids.next_id();
        let mut state = RunState::new(&run_id, plan.name());
        state.resumed_from = resumed_from;
        state.trigger_input = inputs.clone();
        state.pipeline_hash = plan.pipeline().pipeline_hash();
        for id in plan.levels().iter().flatten() {
            state.node_states.insert(id.clone(), NodeStatus::Pending);
        }

        let ctx = Arc::new(RunContext::new(&self.services, state, prior, inputs));
        *active = Some(ActiveRun {
            run_id: run_id.clone(),
            ctx: ctx.clone(),
        });
        drop(active);

        let span = info_span!("run", run_id = %run_id, pipeline = %plan.name());
        let task = tokio::spawn(
            drive(ctx, Arc::new(plan), self.active.clone()).instrument(span),
        );
        Ok(RunHandle { run_id, task })
    }

    /// Cancels the active run. Returns its id.
    pub fn cancel_run(&self) -> Result<String, EngineError> {
        let active = self.active.lock();
        let running = active
            .as_ref()
            .ok_or_else(|| EngineError::RunNotFound("no active run".to_string()))?;
        if running.ctx.cancel.cancel("cancelled by user") {
            info!(run_id = %running.run_id, "Cancellation requested");
        }
        Ok(running.run_id.clone())
    }

    /// Resolves a waiting approval gate of `run_id`.
    ///
    /// Without `node_id` the oldest waiting gate is resolved.
    pub fn respond_to_approval(
        &self,
        run_id: &str,
        node_id: Option<&str>,
        approved: bool,
    ) -> Result<PendingApproval, EngineError> {
        self.services.approvals.respond(run_id, node_id, approved)
    }

    /// Gates currently waiting for a decision.
    #[must_use]
    pub fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.services.approvals.pending()
    }

    /// State of the active run.
    #[must_use]
    pub fn run_state(&self) -> Option<RunState> {
        self.active.lock().as_ref().map(|a| a.ctx.snapshot())
    }

    /// Id of the active run.
    #[must_use]
    pub fn active_run_id(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.run_id.clone())
    }

    /// Cost statistics over every recorded run.
    pub async fn usage_stats(&self) -> Result<UsageStats, EngineError> {
        let records = self.services.run_log.load_recent(usize::MAX).await?;
        Ok(UsageStats::from_records(&records))
    }

    /// Expected cost of running `pipeline`, from the recorded average cost
    /// of an AI execution. `None` without history.
    pub async fn estimate_cost(
        &self,
        pipeline: &PipelineDefinition,
    ) -> Result<Option<f64>, EngineError> {
        let records = self.services.run_log.load_recent(usize::MAX).await?;
        Ok(average_ai_cost(&records)
            .map(|avg| estimate_pipeline_cost(pipeline, self.resolver.as_ref(), avg)))
    }
}

async fn drive(
    ctx: Arc<RunContext>,
    plan: Arc<ExecutionPlan>,
    active: Arc<Mutex<Option<ActiveRun>>>,
) -> RunReport {
    let timer = SpanTimer::start(ctx.run_id.clone());
    ctx.begin().await;
    info!(levels = plan.levels().len(), nodes = plan.top_level_count(), "Run started");

    let variables = merge_variables(&plan.pipeline().variables, &ctx.inputs);
    let scope = PlanScope::new(plan, "", variables);
    let outcome = run_plan(&ctx, &scope, Inherited::default()).await;

    let (status, failed_node_id) = if ctx.cancel.is_cancelled() {
        (RunStatus::Cancelled, None)
    } else if ctx.ledger.is_halted() {
        (RunStatus::BudgetExceeded, None)
    } else {
        match outcome.status {
            PlanStatus::Success => (RunStatus::Success, None),
            PlanStatus::Failed(node_id) => (RunStatus::Failed, Some(node_id)),
            PlanStatus::Cancelled => (RunStatus::Cancelled, None),
            PlanStatus::BudgetExceeded => (RunStatus::BudgetExceeded, None),
        }
    };
    let state = ctx.finish(status, failed_node_id).await;
    ctx.approvals.withdraw_run(&ctx.run_id);
    let results = ctx.results().await;

    info!(
        status = %state.status,
        total_cost = state.total_cost,
        charged_cost = state.charged_cost,
        duration_ms = timer.finish(),
        "Run finished"
    );
    info!(payload = %build_run_payload(&state, &results), "Run summary");

    {
        let mut active = active.lock();
        if active.as_ref().is_some_and(|a| a.run_id == state.run_id) {
            *active = None;
        }
    }
    RunReport { state, results }
}
