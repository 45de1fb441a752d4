//! # AgentFlow
//!
//! A local pipeline execution engine for AI, shell and git workflows.
//!
//! A pipeline is a directed acyclic graph of nodes. The engine validates the
//! graph, groups it into dependency levels and runs each level
//! concurrently, one child process per leaf node:
//!
//! - **Node kinds**: AI CLI tasks, shell and git commands, parallel and loop
//!   containers, approval gates and nested sub-pipelines
//! - **Conditional edges**: success and failure paths
//! - **Cost tracking**: model spend parsed from CLI output, with a budget
//!   that halts dispatch once exceeded
//! - **Resume**: unchanged results of a prior run are reused instead of
//!   re-executed
//! - **Live status**: run updates, log lines and approval requests
//!   streamed to a [`RunEventSink`](events::RunEventSink)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentflow::prelude::*;
//! use std::collections::HashMap;
//!
//! # async fn demo() -> Result<(), EngineError> {
//! let pipeline = PipelineDefinition::new("review")
//!     .with_node(Node::shell("test", "cargo test"))
//!     .with_node(Node::ai_task("review", "Review the diff: {output.test}"))
//!     .with_edge(Edge::on_success("test", "review"));
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let report = engine.start_run(pipeline, HashMap::new()).await?.wait().await?;
//! println!("{} cost ${:.2}", report.state.status, report.state.total_cost);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executors;
pub mod graph;
pub mod interpolate;
pub mod ledger;
pub mod observability;
pub mod runner;
pub mod store;
pub mod supervisor;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{EngineConfig, LogConfig};
    pub use crate::core::{
        ApprovalState, Edge, EdgeCondition, FailureKind, LoopConfig, Node, NodeKind, NodeResult,
        NodeStatus, PipelineDefinition, RunState, RunStatus, Separator,
    };
    pub use crate::errors::{ContractErrorInfo, EngineError};
    pub use crate::events::{
        ChannelRunEventSink, LoggingRunEventSink, NoOpRunEventSink, RunEvent, RunEventSink,
    };
    pub use crate::executors::{ApprovalBroker, PendingApproval};
    pub use crate::graph::{DirectoryResolver, ExecutionPlan, InMemoryResolver, PipelineResolver, ToolManifest};
    pub use crate::ledger::UsageStats;
    pub use crate::observability::init_tracing;
    pub use crate::runner::{Engine, RunHandle, RunReport};
    pub use crate::store::{JsonlRunLog, RunLog, RunRecord};
    pub use crate::supervisor::{ProcessLauncher, ProcessSupervisor};
}
