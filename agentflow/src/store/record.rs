//! Run records and the log trait.

use crate::core::{NodeResult, RunState};
use crate::errors::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A run and its results in finalization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// Last recorded state.
    pub state: RunState,
    /// Every node result, in the order it was appended.
    pub results: Vec<NodeResult>,
}

impl RunRecord {
    /// Creates a record without results.
    #[must_use]
    pub fn new(state: RunState) -> Self {
        Self {
            state,
            results: Vec::new(),
        }
    }

    /// Results recorded for `node_id`, in attempt order.
    pub fn results_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a NodeResult> + 'a {
        self.results.iter().filter(move |r| r.node_id == node_id)
    }

    /// Sum of costs spent by fresh node attempts.
    #[must_use]
    pub fn charged_cost(&self) -> f64 {
        self.results
            .iter()
            .filter(|r| !r.reused && !r.kind.is_aggregate())
            .filter_map(|r| r.cost_usd)
            .sum()
    }
}

/// Append-only storage for runs.
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Appends the current state of a run.
    async fn append_state(&self, state: &RunState) -> Result<(), EngineError>;

    /// Appends one finalized node result.
    async fn append_result(&self, run_id: &str, result: &NodeResult) -> Result<(), EngineError>;

    /// Loads a run.
    async fn load_run(&self, run_id: &str) -> Result<RunRecord, EngineError>;

    /// Latest states, newest first.
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunState>, EngineError>;

    /// Most recent run of `pipeline_name`.
    async fn latest_run_for(&self, pipeline_name: &str) -> Result<Option<RunRecord>, EngineError> {
        let latest = self
            .list_runs(usize::MAX)
            .await?
            .into_iter()
            .find(|s| s.pipeline_name == pipeline_name);
        match latest {
            Some(state) => self.load_run(&state.run_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Loads the newest `limit` runs.
    async fn load_recent(&self, limit: usize) -> Result<Vec<RunRecord>, EngineError> {
        let mut records = Vec::new();
        for state in self.list_runs(limit).await? {
            records.push(self.load_run(&state.run_id).await?);
        }
        Ok(records)
    }
}
