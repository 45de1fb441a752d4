//! The launcher seam between executors and real processes.

use super::command::CommandSpec;
use crate::cancellation::CancellationToken;
use crate::events::LogStream;
use async_trait::async_trait;
use std::time::Duration;

/// Receives output lines as they are produced.
pub trait LineSink: Send + Sync {
    /// Called once per line, without the trailing newline.
    fn line(&self, stream: LogStream, line: &str);
}

impl<F> LineSink for F
where
    F: Fn(LogStream, &str) + Send + Sync,
{
    fn line(&self, stream: LogStream, line: &str) {
        self(stream, line);
    }
}

/// How a process invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own.
    Exited,
    /// The timeout elapsed and the process was terminated.
    TimedOut,
    /// The run was cancelled and the process was terminated.
    Cancelled,
    /// The process could not be started.
    SpawnFailed(String),
}

/// Result of one process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code; `None` when killed by a signal or never started.
    pub exit_code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Stdout and stderr interleaved in arrival order.
    pub combined: String,
    /// How the invocation ended.
    pub termination: Termination,
}

impl ProcessOutcome {
    /// An outcome for a process that exited with `code`.
    #[must_use]
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let stdout = stdout.into();
        let stderr = stderr.into();
        let combined = [stdout.as_str(), stderr.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            exit_code: Some(code),
            stdout,
            stderr,
            combined,
            termination: Termination::Exited,
        }
    }

    /// An outcome for a process that could not be started.
    #[must_use]
    pub fn spawn_failed(error: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            combined: String::new(),
            termination: Termination::SpawnFailed(error.into()),
        }
    }

    /// Replaces the termination.
    #[must_use]
    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    /// Returns true for a clean zero exit.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == Some(0)
    }
}

/// Runs commands on behalf of node executors.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Runs `command` to completion, streaming lines to `lines`.
    ///
    /// Never returns an error: spawn failures, timeouts and cancellation
    /// are reported through [`ProcessOutcome::termination`].
    async fn launch(
        &self,
        command: &CommandSpec,
        timeout: Option<Duration>,
        lines: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> ProcessOutcome;
}
