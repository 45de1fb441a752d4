//! The run-scoped context handed to every executor.

use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::core::{NodeResult, NodeStatus, RunState, RunStatus};
use crate::events::{LogStream, NodeLog, RunEvent, RunEventSink, RunUpdate};
use crate::executors::ApprovalBroker;
use crate::ledger::{BudgetCheck, CostLedger, PriorResults};
use crate::observability::build_node_payload;
use crate::store::RunLog;
use crate::supervisor::ProcessLauncher;
use crate::utils::iso_timestamp;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, error, warn};

/// Collaborators shared by every run of an engine.
#[derive(Clone)]
pub(crate) struct RunServices {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) launcher: Arc<dyn ProcessLauncher>,
    pub(crate) sink: Arc<dyn RunEventSink>,
    pub(crate) approvals: Arc<ApprovalBroker>,
    pub(crate) run_log: Arc<dyn RunLog>,
}

/// Everything one run shares across its concurrent tasks.
///
/// The run state and the ledger are the only mutable aggregates; each
/// mutation happens inside a single lock section.
pub(crate) struct RunContext {
    pub(crate) run_id: String,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) launcher: Arc<dyn ProcessLauncher>,
    pub(crate) sink: Arc<dyn RunEventSink>,
    pub(crate) approvals: Arc<ApprovalBroker>,
    pub(crate) cancel: Arc<CancellationToken>,
    pub(crate) ledger: CostLedger,
    /// Process slots; containers never hold one.
    pub(crate) slots: Semaphore,
    /// Input variables the run was triggered with.
    pub(crate) inputs: HashMap<String, String>,
    state: Mutex<RunState>,
    results: AsyncMutex<Vec<NodeResult>>,
    run_log: Arc<dyn RunLog>,
}

impl RunContext {
    pub(crate) fn new(
        services: &RunServices,
        state: RunState,
        prior: PriorResults,
        inputs: HashMap<String, String>,
    ) -> Self {
        let config = services.config.clone();
        Self {
            run_id: state.run_id.clone(),
            launcher: services.launcher.clone(),
            sink: services.sink.clone(),
            approvals: services.approvals.clone(),
            cancel: Arc::new(CancellationToken::new()),
            ledger: CostLedger::new(config.budget_usd, prior),
            slots: Semaphore::new(config.max_parallel_processes.max(1)),
            inputs,
            state: Mutex::new(state),
            results: AsyncMutex::new(Vec::new()),
            run_log: services.run_log.clone(),
            config,
        }
    }

    /// True once the run was cancelled or the budget was exceeded.
    pub(crate) fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.ledger.is_halted()
    }

    fn update_of(state: &RunState) -> RunEvent {
        RunEvent::RunUpdate(RunUpdate {
            run_id: state.run_id.clone(),
            status: state.status,
            node_states: state.node_states.clone(),
            total_cost: state.total_cost,
        })
    }

    /// Current state.
    pub(crate) fn snapshot(&self) -> RunState {
        self.state.lock().clone()
    }

    /// Persists and publishes the initial state.
    pub(crate) async fn begin(&self) {
        let state = self.snapshot();
        if let Err(err) = self.run_log.append_state(&state).await {
            error!(run_id = %self.run_id, error = %err, "Failed to record run start");
        }
        self.sink.try_emit(Self::update_of(&state));
    }

    /// Updates are emitted while the state lock is held, so subscribers see
    /// snapshots in the order the state changed.
    pub(crate) fn mark_running(&self, node_id: &str) {
        let mut state = self.state.lock();
        state
            .node_states
            .insert(node_id.to_string(), NodeStatus::Running);
        self.sink.try_emit(Self::update_of(&state));
    }

    /// Records a finalized node result: ledger, state, log and stream.
    pub(crate) async fn finalize(&self, result: &NodeResult) {
        if !result.kind.is_aggregate() {
            if let BudgetCheck::Exceeded { charged, budget } = self.ledger.record(result) {
                warn!(
                    run_id = %self.run_id,
                    node_id = %result.node_id,
                    charged,
                    budget,
                    "Budget exceeded; halting dispatch"
                );
            }
        }

        let mut results = self.results.lock().await;
        results.push(result.clone());
        if let Err(err) = self.run_log.append_result(&self.run_id, result).await {
            error!(run_id = %self.run_id, node_id = %result.node_id, error = %err, "Failed to record node result");
        }
        debug!(payload = %build_node_payload(&self.run_id, result), "Node result");

        let totals = self.ledger.totals();
        let mut state = self.state.lock();
        state
            .node_states
            .insert(result.node_id.clone(), result.status);
        state.total_cost = totals.total;
        state.charged_cost = totals.charged;
        self.sink.try_emit(Self::update_of(&state));
        drop(state);
        drop(results);
    }

    pub(crate) fn emit_line(&self, node_id: &str, stream: LogStream, line: &str) {
        self.sink.try_emit(RunEvent::NodeLog(NodeLog {
            run_id: self.run_id.clone(),
            node_id: node_id.to_string(),
            line: line.to_string(),
            stream,
        }));
    }

    /// Finalizes the state, persists and publishes it.
    pub(crate) async fn finish(&self, status: RunStatus, failed_node_id: Option<String>) -> RunState {
        let totals = self.ledger.totals();
        let state = {
            let mut state = self.state.lock();
            state.status = status;
            state.finished_at = Some(iso_timestamp());
            state.failed_node_id = failed_node_id;
            state.total_cost = totals.total;
            state.charged_cost = totals.charged;
            self.sink.try_emit(Self::update_of(&state));
            state.clone()
        };
        if let Err(err) = self.run_log.append_state(&state).await {
            error!(run_id = %self.run_id, error = %err, "Failed to record run finalization");
        }
        state
    }

    /// Every result recorded so far, in finalization order.
    pub(crate) async fn results(&self) -> Vec<NodeResult> {
        self.results.lock().await.clone()
    }
}
