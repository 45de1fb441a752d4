//! In-process run log.

use super::record::{RunLog, RunRecord};
use crate::core::{NodeResult, RunState};
use crate::errors::EngineError;
use async_trait::async_trait;
use parking_lot::RwLock;

/// Keeps runs in memory, in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryRunLog {
    runs: RwLock<Vec<RunRecord>>,
}

impl InMemoryRunLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    /// Returns true if no run was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }

    /// Inserts a complete record, replacing any run with the same id.
    pub fn insert(&self, record: RunRecord) {
        let mut runs = self.runs.write();
        runs.retain(|r| r.state.run_id != record.state.run_id);
        runs.push(record);
    }
}

#[async_trait]
impl RunLog for InMemoryRunLog {
    async fn append_state(&self, state: &RunState) -> Result<(), EngineError> {
        let mut runs = self.runs.write();
        match runs.iter_mut().find(|r| r.state.run_id == state.run_id) {
            Some(record) => record.state = state.clone(),
            None => runs.push(RunRecord::new(state.clone())),
        }
        Ok(())
    }

    async fn append_result(&self, run_id: &str, result: &NodeResult) -> Result<(), EngineError> {
        let mut runs = self.runs.write();
        let record = runs
            .iter_mut()
            .find(|r| r.state.run_id == run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        record.results.push(result.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<RunRecord, EngineError> {
        self.runs
            .read()
            .iter()
            .find(|r| r.state.run_id == run_id)
            .cloned()
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunState>, EngineError> {
        Ok(self
            .runs
            .read()
            .iter()
            .rev()
            .take(limit)
            .map(|r| r.state.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Node;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_append_and_load() {
        let log = InMemoryRunLog::new();
        let state = RunState::new("run-1", "deploy");
        log.append_state(&state).await.unwrap();
        let result = NodeResult::started("a", &Node::shell("a", "true"), 1, "h").succeed();
        log.append_result("run-1", &result).await.unwrap();

        let record = log.load_run("run-1").await.unwrap();
        assert_eq!(record.state, state);
        assert_eq!(record.results, vec![result]);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let log = InMemoryRunLog::new();
        let result = NodeResult::started("a", &Node::shell("a", "true"), 1, "h");

        assert!(matches!(
            log.append_result("nope", &result).await,
            Err(EngineError::RunNotFound(_))
        ));
        assert!(matches!(log.load_run("nope").await, Err(EngineError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_newest_first_and_latest_for() {
        let log = InMemoryRunLog::new();
        for (id, pipeline) in [("run-1", "a"), ("run-2", "b"), ("run-3", "a")] {
            log.append_state(&RunState::new(id, pipeline)).await.unwrap();
        }

        let ids: Vec<_> = log
            .list_runs(2)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.run_id)
            .collect();
        assert_eq!(ids, vec!["run-3", "run-2"]);

        let latest = log.latest_run_for("a").await.unwrap().unwrap();
        assert_eq!(latest.state.run_id, "run-3");
        assert!(log.latest_run_for("zzz").await.unwrap().is_none());
    }
}
