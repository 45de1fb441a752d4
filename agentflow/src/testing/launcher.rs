//! A scripted process launcher.

use crate::cancellation::CancellationToken;
use crate::events::LogStream;
use crate::supervisor::{CommandSpec, LineSink, ProcessLauncher, ProcessOutcome, Termination};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Canned behaviour of one simulated process.
#[derive(Debug, Clone, PartialEq)]
pub struct Scripted {
    /// Exit code reported on completion.
    pub exit_code: i32,
    /// Stdout text.
    pub stdout: String,
    /// Stderr text.
    pub stderr: String,
    /// Simulated running time.
    pub delay: Duration,
    /// Never exits on its own.
    pub hang: bool,
}

impl Scripted {
    /// Exits 0 with `stdout`.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            delay: Duration::ZERO,
            hang: false,
        }
    }

    /// Exits with `code` and `stderr`.
    #[must_use]
    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: code,
            stderr: stderr.into(),
            ..Self::ok("")
        }
    }

    /// Runs until killed.
    #[must_use]
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::ok("")
        }
    }

    /// Appends an AI CLI cost line to stderr.
    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        if !self.stderr.is_empty() && !self.stderr.ends_with('\n') {
            self.stderr.push('\n');
        }
        self.stderr.push_str(&format!("Total cost: ${cost:.4}"));
        self
    }

    /// Delays the exit.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    queue: VecDeque<Scripted>,
    last: Scripted,
}

impl Rule {
    fn next(&mut self) -> Scripted {
        match self.queue.pop_front() {
            Some(scripted) => {
                self.last = scripted.clone();
                scripted
            }
            None => self.last.clone(),
        }
    }
}

/// A [`ProcessLauncher`] answering from a script instead of spawning.
///
/// Rules match when their pattern is a substring of the command payload
/// (the prompt or script). The first matching rule wins; unmatched
/// commands echo their payload and exit 0.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    rules: Mutex<Vec<Rule>>,
    invocations: Mutex<Vec<CommandSpec>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedLauncher {
    /// Creates a launcher without rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every command containing `pattern` with `scripted`.
    #[must_use]
    pub fn on(self, pattern: impl Into<String>, scripted: Scripted) -> Self {
        self.on_sequence(pattern, vec![scripted])
    }

    /// Answers successive matching commands with successive entries; the
    /// last entry repeats.
    #[must_use]
    pub fn on_sequence(self, pattern: impl Into<String>, sequence: Vec<Scripted>) -> Self {
        let mut queue: VecDeque<Scripted> = sequence.into();
        let last = queue.back().cloned().unwrap_or_else(|| Scripted::ok(""));
        if queue.is_empty() {
            queue.push_back(last.clone());
        }
        self.rules.lock().push(Rule {
            pattern: pattern.into(),
            queue,
            last,
        });
        self
    }

    /// Every command launched so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandSpec> {
        self.invocations.lock().clone()
    }

    /// Payloads of every command launched so far, in launch order.
    #[must_use]
    pub fn payloads(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .filter_map(|c| c.payload().map(ToString::to_string))
            .collect()
    }

    /// Number of processes launched.
    #[must_use]
    pub fn spawn_count(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Number of launched commands whose payload contains `pattern`.
    #[must_use]
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.payloads().iter().filter(|p| p.contains(pattern)).count()
    }

    /// Highest number of processes observed running at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn script_for(&self, payload: &str) -> Scripted {
        let mut rules = self.rules.lock();
        match rules.iter_mut().find(|r| payload.contains(r.pattern.as_str())) {
            Some(rule) => rule.next(),
            None => Scripted::ok(payload),
        }
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        command: &CommandSpec,
        timeout: Option<Duration>,
        lines: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> ProcessOutcome {
        self.invocations.lock().push(command.clone());
        let scripted = self.script_for(command.payload().unwrap_or_default());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let exit = async {
            if scripted.hang {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(scripted.delay).await;
            }
        };
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        let termination = tokio::select! {
            biased;
            () = cancel.cancelled() => Termination::Cancelled,
            () = deadline => Termination::TimedOut,
            () = exit => Termination::Exited,
        };
        if termination != Termination::Exited {
            return ProcessOutcome::exited(0, "", "").with_termination(termination);
        }

        for line in scripted.stdout.lines() {
            lines.line(LogStream::Stdout, line);
        }
        for line in scripted.stderr.lines() {
            lines.line(LogStream::Stderr, line);
        }
        ProcessOutcome::exited(scripted.exit_code, scripted.stdout, scripted.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn discard() -> impl LineSink {
        |_: LogStream, _: &str| {}
    }

    #[tokio::test]
    async fn test_unmatched_commands_echo_payload() {
        let launcher = ScriptedLauncher::new();
        let outcome = launcher
            .launch(
                &CommandSpec::shell("bash", "echo hi"),
                None,
                &discard(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.stdout, "echo hi");
        assert!(outcome.is_success());
        assert_eq!(launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last_entry() {
        let launcher = ScriptedLauncher::new().on_sequence(
            "flaky",
            vec![Scripted::fail(1, "boom"), Scripted::ok("fine")],
        );
        let mut codes = Vec::new();
        for _ in 0..3 {
            let outcome = launcher
                .launch(
                    &CommandSpec::shell("bash", "flaky step"),
                    None,
                    &discard(),
                    &CancellationToken::new(),
                )
                .await;
            codes.push(outcome.exit_code);
        }
        assert_eq!(codes, vec![Some(1), Some(0), Some(0)]);
    }

    #[tokio::test]
    async fn test_hanging_process_times_out() {
        let launcher = ScriptedLauncher::new().on("sleep", Scripted::hang());
        let outcome = launcher
            .launch(
                &CommandSpec::shell("bash", "sleep 100"),
                Some(Duration::from_millis(20)),
                &discard(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome.termination, Termination::TimedOut);
    }

    #[test]
    fn test_with_cost_appends_cost_line() {
        let scripted = Scripted::fail(1, "oops").with_cost(0.25);
        assert_eq!(scripted.stderr, "oops\nTotal cost: $0.2500");
    }
}
