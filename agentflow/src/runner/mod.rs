//! Run orchestration.
//!
//! [`Engine`] is the entry point: it validates a pipeline, builds its
//! plan, and drives the plan level by level on a spawned task while the
//! caller observes progress through a [`RunEventSink`](crate::events::RunEventSink).

mod context;
mod engine;
mod level;

#[cfg(test)]
mod integration_tests;

pub(crate) use context::RunContext;
pub use engine::{Engine, RunHandle, RunReport};
pub(crate) use level::{run_plan, PlanStatus};
