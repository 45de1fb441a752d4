//! Engine configuration.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for loop iteration caps.
pub const MAX_LOOP_ITERATIONS: usize = 1000;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Configuration for an [`Engine`](crate::runner::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// AI CLI executable.
    #[serde(default = "default_claude_cli_path")]
    pub claude_cli_path: String,
    /// Shell used for shell and git nodes.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Working directory of every spawned process.
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    /// Model used when neither the node nor its loop picks one.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Ceiling on fresh AI spend per run, in USD.
    #[serde(default)]
    pub budget_usd: Option<f64>,
    /// Wait between SIGTERM and SIGKILL.
    #[serde(default = "default_kill_grace")]
    pub kill_grace_seconds: f64,
    /// Concurrently running child processes.
    #[serde(default = "default_max_parallel_processes")]
    pub max_parallel_processes: usize,
    /// Hard cap applied to every loop.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,
    /// Reuse unchanged results from the latest run of the same pipeline.
    #[serde(default)]
    pub output_cache: bool,
    /// Directory of the JSON Lines run log.
    #[serde(default)]
    pub run_log_dir: Option<PathBuf>,
    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_claude_cli_path() -> String {
    "claude".to_string()
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_kill_grace() -> f64 {
    5.0
}

fn default_max_parallel_processes() -> usize {
    8
}

fn default_max_loop_iterations() -> usize {
    MAX_LOOP_ITERATIONS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claude_cli_path: default_claude_cli_path(),
            shell: default_shell(),
            project_path: None,
            default_model: None,
            budget_usd: None,
            kill_grace_seconds: default_kill_grace(),
            max_parallel_processes: default_max_parallel_processes(),
            max_loop_iterations: default_max_loop_iterations(),
            output_cache: false,
            run_log_dir: None,
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Reads a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Applies `AGENTFLOW_*` overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self, EngineError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(cli) = lookup("AGENTFLOW_CLAUDE_CLI") {
            self.claude_cli_path = cli;
        }
        if let Some(shell) = lookup("AGENTFLOW_SHELL") {
            self.shell = shell;
        }
        if let Some(budget) = lookup("AGENTFLOW_BUDGET_USD") {
            self.budget_usd = Some(parse_env("AGENTFLOW_BUDGET_USD", &budget)?);
        }
        if let Some(slots) = lookup("AGENTFLOW_MAX_PROCESSES") {
            self.max_parallel_processes = parse_env("AGENTFLOW_MAX_PROCESSES", &slots)?;
        }
        if let Some(level) = lookup("AGENTFLOW_LOG_LEVEL") {
            self.log.level = level;
        }
        Ok(self)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(budget) = self.budget_usd {
            if !(budget.is_finite() && budget > 0.0) {
                return Err(EngineError::Config(format!(
                    "budget_usd must be positive, got {budget}"
                )));
            }
        }
        if self.max_parallel_processes == 0 {
            return Err(EngineError::Config(
                "max_parallel_processes must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_LOOP_ITERATIONS).contains(&self.max_loop_iterations) {
            return Err(EngineError::Config(format!(
                "max_loop_iterations must be within 1..={MAX_LOOP_ITERATIONS}, got {}",
                self.max_loop_iterations
            )));
        }
        if !(self.kill_grace_seconds.is_finite() && self.kill_grace_seconds >= 0.0) {
            return Err(EngineError::Config(format!(
                "kill_grace_seconds must be non-negative, got {}",
                self.kill_grace_seconds
            )));
        }
        Ok(())
    }

    /// Sets the AI CLI executable.
    #[must_use]
    pub fn with_claude_cli_path(mut self, path: impl Into<String>) -> Self {
        self.claude_cli_path = path.into();
        self
    }

    /// Sets the shell.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Sets the project directory.
    #[must_use]
    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    /// Sets the default model.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Sets the budget.
    #[must_use]
    pub fn with_budget(mut self, usd: f64) -> Self {
        self.budget_usd = Some(usd);
        self
    }

    /// Sets the number of process slots.
    #[must_use]
    pub fn with_max_parallel_processes(mut self, slots: usize) -> Self {
        self.max_parallel_processes = slots;
        self
    }

    /// Sets the global loop cap.
    #[must_use]
    pub fn with_max_loop_iterations(mut self, cap: usize) -> Self {
        self.max_loop_iterations = cap;
        self
    }

    /// Sets the termination grace period.
    #[must_use]
    pub fn with_kill_grace(mut self, seconds: f64) -> Self {
        self.kill_grace_seconds = seconds;
        self
    }

    /// Enables or disables the output cache.
    #[must_use]
    pub fn with_output_cache(mut self, enabled: bool) -> Self {
        self.output_cache = enabled;
        self
    }

    /// Sets the run log directory.
    #[must_use]
    pub fn with_run_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.run_log_dir = Some(dir.into());
        self
    }

    /// Grace period as a duration.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::try_from_secs_f64(self.kill_grace_seconds).unwrap_or(Duration::ZERO)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, EngineError> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("{key}: invalid value {value:?}")))
}
