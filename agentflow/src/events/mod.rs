//! Live status stream.
//!
//! Every node transition produces a `run-update`, every output line a
//! `node-log`, and every suspended approval gate an `approval-requested`
//! event. Transport batching is left to the sink.

mod sink;
mod types;

pub use sink::{
    ChannelRunEventSink, CollectingRunEventSink, LoggingRunEventSink, NoOpRunEventSink,
    RunEventSink,
};
pub use types::{ApprovalRequest, LogStream, NodeLog, RunEvent, RunUpdate};
