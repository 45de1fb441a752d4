//! Approval gates and the broker that resolves them.

use super::Frame;
use crate::core::{ApprovalState, FailureKind, Node, NodeResult};
use crate::errors::EngineError;
use crate::events::{ApprovalRequest, RunEvent};
use crate::runner::RunContext;
use crate::utils::{generate_uuid, sha256_hex};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// A gate waiting for a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    /// Run id.
    pub run_id: String,
    /// Qualified node id of the gate.
    pub node_id: String,
    /// Id of the emitted request.
    pub request_id: String,
}

struct Waiter {
    pending: PendingApproval,
    tx: oneshot::Sender<ApprovalState>,
}

/// Routes external decisions to suspended gates.
///
/// Each registration resolves at most once: the first response removes it,
/// and a gate that gives up removes it before returning, so late or
/// repeated responses are rejected with [`EngineError::ApprovalNotPending`].
#[derive(Default)]
pub struct ApprovalBroker {
    waiters: Mutex<Vec<Waiter>>,
}

impl std::fmt::Debug for ApprovalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalBroker")
            .field("pending", &self.pending())
            .finish()
    }
}

impl ApprovalBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        run_id: &str,
        node_id: &str,
    ) -> (PendingApproval, oneshot::Receiver<ApprovalState>) {
        let (tx, rx) = oneshot::channel();
        let pending = PendingApproval {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            request_id: generate_uuid().to_string(),
        };
        self.waiters.lock().push(Waiter {
            pending: pending.clone(),
            tx,
        });
        (pending, rx)
    }

    /// Removes a registration that is no longer awaited.
    ///
    /// Returns false when a response already claimed it; the decision is
    /// then sitting in the gate's receiver.
    pub(crate) fn withdraw(&self, request_id: &str) -> bool {
        let mut waiters = self.waiters.lock();
        let before = waiters.len();
        waiters.retain(|w| w.pending.request_id != request_id);
        waiters.len() != before
    }

    /// Removes every registration of a run.
    pub(crate) fn withdraw_run(&self, run_id: &str) {
        self.waiters.lock().retain(|w| w.pending.run_id != run_id);
    }

    /// Gates currently waiting, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingApproval> {
        self.waiters
            .lock()
            .iter()
            .map(|w| w.pending.clone())
            .collect()
    }

    /// Delivers a decision.
    ///
    /// Without `node_id` the oldest waiting gate of the run is resolved.
    pub fn respond(
        &self,
        run_id: &str,
        node_id: Option<&str>,
        approved: bool,
    ) -> Result<PendingApproval, EngineError> {
        let not_pending = || EngineError::ApprovalNotPending {
            run_id: run_id.to_string(),
            node_id: node_id.map(ToString::to_string),
        };
        let state = if approved {
            ApprovalState::Approved
        } else {
            ApprovalState::Rejected
        };
        // Sent under the lock so a gate withdrawing afterwards finds the decision.
        let mut waiters = self.waiters.lock();
        let index = waiters
            .iter()
            .position(|w| {
                w.pending.run_id == run_id && node_id.map_or(true, |id| w.pending.node_id == id)
            })
            .ok_or_else(not_pending)?;
        let waiter = waiters.remove(index);
        let sent = waiter.tx.send(state);
        drop(waiters);
        sent.map_err(|_| not_pending())?;
        Ok(waiter.pending)
    }
}

enum Decision {
    Decided(ApprovalState),
    TimedOut,
    Cancelled,
}

pub(super) async fn execute(ctx: &RunContext, frame: Frame<'_>, node: &Node) -> NodeResult {
    let node_id = frame.qualify(&node.id);
    let rendered = frame.render(&node.instructions);
    let hash = sha256_hex(&rendered);

    if let Some(prior) = ctx.ledger.prior().approved(&node_id) {
        info!(run_id = %ctx.run_id, node_id = %node_id, "Gate approved in an earlier run");
        let result = NodeResult::reuse_of(prior, &node_id, node);
        ctx.finalize(&result).await;
        return result;
    }

    ctx.mark_running(&node_id);
    let started = NodeResult::started(&node_id, node, 1, &hash);
    let deadline = frame.inherited.deadline_after(node.timeout());
    let (pending, mut rx) = ctx.approvals.register(&ctx.run_id, &node_id);
    ctx.sink.try_emit(RunEvent::ApprovalRequested(ApprovalRequest {
        run_id: ctx.run_id.clone(),
        node_id: node_id.clone(),
        name: node.display_name().to_string(),
        rendered_instructions: rendered.clone(),
        request_id: pending.request_id.clone(),
    }));
    info!(run_id = %ctx.run_id, node_id = %node_id, request_id = %pending.request_id, "Waiting for approval");

    let mut decision = tokio::select! {
        () = ctx.cancel.cancelled() => Decision::Cancelled,
        () = sleep_until(deadline) => Decision::TimedOut,
        decided = &mut rx => match decided {
            Ok(state) => Decision::Decided(state),
            Err(_) => Decision::Cancelled,
        },
    };
    if !ctx.approvals.withdraw(&pending.request_id) {
        // A response won the race; the responder was told it was accepted.
        if let Ok(state) = rx.try_recv() {
            decision = Decision::Decided(state);
        }
    }

    let result = match decision {
        Decision::Decided(ApprovalState::Approved) => {
            info!(run_id = %ctx.run_id, node_id = %node_id, "Approved");
            started.with_output(rendered).with_approval(ApprovalState::Approved).succeed()
        }
        Decision::Decided(ApprovalState::Rejected) => {
            info!(run_id = %ctx.run_id, node_id = %node_id, "Rejected");
            started
                .with_approval(ApprovalState::Rejected)
                .fail(FailureKind::ApprovalRejected, "rejected")
        }
        Decision::TimedOut => {
            warn!(run_id = %ctx.run_id, node_id = %node_id, "Approval timed out");
            started.fail(FailureKind::ApprovalTimeout, "no decision before timeout")
        }
        Decision::Cancelled => {
            debug!(run_id = %ctx.run_id, node_id = %node_id, "Approval wait cancelled");
            started.cancel()
        }
    };
    ctx.finalize(&result).await;
    result
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
