//! Core pipeline and run types.

mod node;
mod pipeline;
mod result;
mod status;

pub use node::{
    LoopConfig, Node, NodeId, NodeKind, NodeKindTag, Position, RetryPolicy, Separator,
    DEFAULT_MAX_ITERATIONS,
};
pub(crate) use node::seconds;
pub use pipeline::{
    sanitize_pipeline_name, Edge, EdgeCondition, PipelineDefinition, PIPELINE_FILE_SUFFIX,
};
pub use result::{NodeResult, RunState};
pub use status::{ApprovalState, FailureKind, NodeStatus, RunStatus};
