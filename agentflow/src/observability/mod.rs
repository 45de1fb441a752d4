//! Tracing setup and run summaries.

mod tracing;
mod wide_events;

pub use tracing::{init_tracing, try_init_tracing, SpanTimer};
pub use wide_events::{build_node_payload, build_run_payload};
