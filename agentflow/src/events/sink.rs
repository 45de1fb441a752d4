//! Run event sink trait and implementations.

use super::types::{ApprovalRequest, NodeLog, RunEvent, RunUpdate};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, Level};

/// Receiver of the live status stream.
///
/// The engine calls [`try_emit`](Self::try_emit) from inside state
/// transitions, so implementations must not block.
#[async_trait]
pub trait RunEventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: RunEvent);

    /// Emits an event without blocking. Errors are logged and suppressed.
    fn try_emit(&self, event: RunEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRunEventSink;

#[async_trait]
impl RunEventSink for NoOpRunEventSink {
    async fn emit(&self, _event: RunEvent) {}

    fn try_emit(&self, _event: RunEvent) {}
}

/// A sink that logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingRunEventSink {
    level: Level,
}

impl Default for LoggingRunEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingRunEventSink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &RunEvent) {
        // Output lines are always debug; they would drown everything else.
        if self.level == Level::DEBUG || matches!(event, RunEvent::NodeLog(_)) {
            debug!(event = event.name(), run_id = %event.run_id(), payload = ?event, "Run event");
        } else {
            info!(event = event.name(), run_id = %event.run_id(), "Run event");
        }
    }
}

#[async_trait]
impl RunEventSink for LoggingRunEventSink {
    async fn emit(&self, event: RunEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: RunEvent) {
        self.log_event(&event);
    }
}

/// A sink that records every event, for tests and replay.
#[derive(Debug, Default)]
pub struct CollectingRunEventSink {
    events: RwLock<Vec<RunEvent>>,
}

impl CollectingRunEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// All run-update payloads in emission order.
    #[must_use]
    pub fn run_updates(&self) -> Vec<RunUpdate> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                RunEvent::RunUpdate(u) => Some(u.clone()),
                _ => None,
            })
            .collect()
    }

    /// Output lines of one node in emission order.
    #[must_use]
    pub fn node_lines(&self, node_id: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                RunEvent::NodeLog(NodeLog { node_id: id, line, .. }) if id == node_id => {
                    Some(line.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// All approval requests in emission order.
    #[must_use]
    pub fn approval_requests(&self) -> Vec<ApprovalRequest> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                RunEvent::ApprovalRequested(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RunEventSink for CollectingRunEventSink {
    async fn emit(&self, event: RunEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: RunEvent) {
        self.events.write().push(event);
    }
}

/// A sink forwarding events to an unbounded channel, e.g. a transport task.
#[derive(Debug)]
pub struct ChannelRunEventSink {
    tx: mpsc::UnboundedSender<RunEvent>,
    dropped: AtomicU64,
}

impl ChannelRunEventSink {
    /// Creates a sink and the receiver its events arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events discarded because the receiver was gone.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RunEventSink for ChannelRunEventSink {
    async fn emit(&self, event: RunEvent) {
        self.try_emit(event);
    }

    fn try_emit(&self, event: RunEvent) {
        if self.tx.send(event).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 {
                debug!("Run event receiver closed; dropping events");
            }
        }
    }
}
