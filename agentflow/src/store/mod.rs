//! Durable run log.
//!
//! Results are appended as they finalize and never rewritten. A run's
//! state is appended at start and again at finalization; the last state
//! record wins on load.

mod jsonl;
mod memory;
mod record;

pub use jsonl::JsonlRunLog;
pub use memory::InMemoryRunLog;
pub use record::{RunLog, RunRecord};
