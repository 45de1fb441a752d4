//! Test harness for pipelines.
//!
//! [`ScriptedLauncher`] stands in for real processes, [`TestEngine`]
//! wires it into an engine, and the assertions read [`RunReport`]s.
//!
//! [`RunReport`]: crate::runner::RunReport

mod assertions;
mod fixtures;
mod launcher;

pub use assertions::{assert_finished_before, assert_nodes_status, assert_run_status};
pub use fixtures::{ai_chain, shell_chain, TestEngine};
pub use launcher::{Scripted, ScriptedLauncher};
