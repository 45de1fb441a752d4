//! Real child processes via `tokio::process`.

use super::command::CommandSpec;
use super::launcher::{LineSink, ProcessLauncher, ProcessOutcome, Termination};
use crate::cancellation::CancellationToken;
use crate::events::LogStream;
use async_trait::async_trait;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default wait between the graceful and the forced termination signal.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Spawns and supervises child processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    kill_grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_GRACE)
    }
}

impl ProcessSupervisor {
    /// Creates a supervisor with the given termination grace period.
    #[must_use]
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        self.kill_grace
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        // Own process group so termination reaches grandchildren too.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// SIGTERM, then SIGKILL once the grace period has passed.
    async fn terminate(&self, child: &mut Child) -> io::Result<ExitStatus> {
        if let Some(pid) = child.id() {
            signal_group(pid, "TERM").await;
            if let Ok(status) = tokio::time::timeout(self.kill_grace, child.wait()).await {
                return status;
            }
            warn!(pid, grace_secs = self.kill_grace.as_secs_f64(), "Process ignored SIGTERM; killing");
            signal_group(pid, "KILL").await;
        }
        child.start_kill()?;
        child.wait().await
    }
}

enum Step {
    Line(Option<(LogStream, String)>),
    Exited(io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

#[derive(Default)]
struct Capture {
    stdout: String,
    stderr: String,
    combined: String,
}

impl Capture {
    fn push(&mut self, stream: LogStream, line: &str) {
        let target = match stream {
            LogStream::Stdout => &mut self.stdout,
            LogStream::Stderr => &mut self.stderr,
        };
        target.push_str(line);
        target.push('\n');
        self.combined.push_str(line);
        self.combined.push('\n');
    }

    fn into_outcome(self, exit_code: Option<i32>, termination: Termination) -> ProcessOutcome {
        ProcessOutcome {
            exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            combined: self.combined,
            termination,
        }
    }
}

#[async_trait]
impl ProcessLauncher for ProcessSupervisor {
    async fn launch(
        &self,
        spec: &CommandSpec,
        timeout: Option<Duration>,
        lines: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> ProcessOutcome {
        if cancel.is_cancelled() {
            return ProcessOutcome::spawn_failed("run cancelled before spawn")
                .with_termination(Termination::Cancelled);
        }

        let mut child = match Self::command(spec).spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(program = %spec.program, error = %err, "Failed to spawn process");
                return ProcessOutcome::spawn_failed(format!("{}: {err}", spec.program));
            }
        };
        debug!(pid = child.id(), command = %spec, "Spawned process");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, LogStream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, LogStream::Stderr, tx.clone())));
        }
        drop(tx);

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut capture = Capture::default();
        let mut streams_open = true;

        let (status, termination) = loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancelled,
                () = sleep_until(deadline) => Step::Deadline,
                line = rx.recv(), if streams_open => Step::Line(line),
                status = child.wait() => Step::Exited(status),
            };
            match step {
                Step::Line(Some((stream, line))) => {
                    lines.line(stream, &line);
                    capture.push(stream, &line);
                }
                Step::Line(None) => streams_open = false,
                Step::Exited(status) => break (status, Termination::Exited),
                Step::Deadline => {
                    debug!(pid = child.id(), "Process timed out");
                    break (self.terminate(&mut child).await, Termination::TimedOut);
                }
                Step::Cancelled => {
                    debug!(pid = child.id(), "Process cancelled");
                    break (self.terminate(&mut child).await, Termination::Cancelled);
                }
            }
        };

        // Orphaned grandchildren may hold the pipes open; bound the drain.
        if streams_open {
            let drain = async {
                while let Some((stream, line)) = rx.recv().await {
                    lines.line(stream, &line);
                    capture.push(stream, &line);
                }
            };
            if tokio::time::timeout(self.kill_grace, drain).await.is_err() {
                debug!("Output streams still open after exit; abandoning");
            }
        }
        for reader in readers {
            reader.abort();
        }

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(error = %err, "Failed to wait for process");
                None
            }
        };
        capture.into_outcome(exit_code, termination)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn forward_lines<R>(reader: R, stream: LogStream, tx: mpsc::UnboundedSender<(LogStream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, "Stopped reading process output");
                break;
            }
        }
    }
}

#[cfg(unix)]
async fn signal_group(pid: u32, signal: &str) {
    let result = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg("--")
        .arg(format!("-{pid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(err) = result {
        debug!(pid, signal, error = %err, "Failed to signal process group");
    }
}

#[cfg(not(unix))]
async fn signal_group(_pid: u32, _signal: &str) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn collect() -> (Arc<Mutex<Vec<String>>>, impl LineSink) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |_: LogStream, line: &str| seen.lock().push(line.to_string())
        };
        (seen, sink)
    }

    #[tokio::test]
    async fn test_streams_lines_and_exit_code() {
        let (seen, sink) = collect();
        let outcome = ProcessSupervisor::default()
            .launch(
                &CommandSpec::shell("sh", "echo one; echo two >&2; exit 3"),
                None,
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.termination, Termination::Exited);
        assert_eq!(outcome.stdout, "one\n");
        assert_eq!(outcome.stderr, "two\n");
        let mut lines = seen.lock().clone();
        lines.sort();
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (_, sink) = collect();
        let outcome = ProcessSupervisor::default()
            .launch(
                &CommandSpec::new("/definitely/not/a/binary"),
                None,
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(outcome.termination, Termination::SpawnFailed(_)));
        assert_eq!(outcome.exit_code, None);
    }

    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let (_, sink) = collect();
        let started = std::time::Instant::now();
        let outcome = ProcessSupervisor::new(Duration::from_millis(500))
            .launch(
                &CommandSpec::shell("sh", "echo start; sleep 30"),
                Some(Duration::from_millis(200)),
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.termination, Termination::TimedOut);
        assert!(!outcome.is_success());
        assert!(outcome.combined.contains("start"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates_to_kill() {
        let (_, sink) = collect();
        let started = std::time::Instant::now();
        let outcome = ProcessSupervisor::new(Duration::from_millis(300))
            .launch(
                &CommandSpec::shell("sh", "trap '' TERM; sleep 30"),
                Some(Duration::from_millis(100)),
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.termination, Termination::TimedOut);
        assert_eq!(outcome.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_terminates_process() {
        let (_, sink) = collect();
        let cancel = Arc::new(CancellationToken::new());
        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel("user");
            })
        };

        let outcome = ProcessSupervisor::new(Duration::from_millis(500))
            .launch(&CommandSpec::shell("sh", "sleep 30"), None, &sink, &cancel)
            .await;
        trigger.await.unwrap();

        assert_eq!(outcome.termination, Termination::Cancelled);
    }
}
