//! One JSON Lines file per run.

use super::record::{RunLog, RunRecord};
use crate::core::{NodeResult, RunState};
use crate::errors::EngineError;
use crate::utils::ids::run_id_millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const LOG_EXTENSION: &str = "jsonl";

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "lowercase")]
enum LineRef<'a> {
    Step(&'a NodeResult),
    Run(&'a RunState),
}

#[derive(Deserialize)]
#[serde(tag = "record", rename_all = "lowercase")]
enum Line {
    Step(NodeResult),
    Run(RunState),
}

/// Stores each run as `{dir}/{run_id}.jsonl`.
///
/// Lines are `{"record":"run",...}` for run states and
/// `{"record":"step",...}` for node results. Appends are serialized, and a
/// truncated trailing line left by a crash is skipped on load.
#[derive(Debug)]
pub struct JsonlRunLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRunLog {
    /// Creates a log rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory holding the run files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `run_id`.
    #[must_use]
    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.{LOG_EXTENSION}"))
    }

    async fn append(&self, run_id: &str, line: &LineRef<'_>) -> Result<(), EngineError> {
        let mut json = serde_json::to_string(line)?;
        json.push('\n');

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(run_id))
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_record(&self, path: &Path) -> Result<Option<RunRecord>, EngineError> {
        let contents = fs::read_to_string(path).await?;
        let mut state = None;
        let mut results = Vec::new();
        for (number, raw) in contents.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Line>(raw) {
                Ok(Line::Run(s)) => state = Some(s),
                Ok(Line::Step(r)) => results.push(r),
                Err(err) => {
                    warn!(path = %path.display(), line = number + 1, error = %err, "Skipping unreadable run log line");
                }
            }
        }
        Ok(state.map(|state| RunRecord { state, results }))
    }
}

#[async_trait]
impl RunLog for JsonlRunLog {
    async fn append_state(&self, state: &RunState) -> Result<(), EngineError> {
        self.append(&state.run_id, &LineRef::Run(state)).await
    }

    async fn append_result(&self, run_id: &str, result: &NodeResult) -> Result<(), EngineError> {
        self.append(run_id, &LineRef::Step(result)).await
    }

    async fn load_run(&self, run_id: &str) -> Result<RunRecord, EngineError> {
        let path = self.path_for(run_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(EngineError::RunNotFound(run_id.to_string()));
        }
        self.read_record(&path)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunState>, EngineError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut states = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            match self.read_record(&path).await {
                Ok(Some(record)) => states.push(record.state),
                Ok(None) => debug!(path = %path.display(), "Run log has no state record"),
                Err(err) => warn!(path = %path.display(), error = %err, "Failed to read run log"),
            }
        }

        states.sort_by(|a, b| {
            run_id_millis(&b.run_id)
                .cmp(&run_id_millis(&a.run_id))
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        states.truncate(limit);
        Ok(states)
    }
}
