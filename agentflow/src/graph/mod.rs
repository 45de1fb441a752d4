//! Pipeline validation and level planning.
//!
//! [`GraphBuilder`] turns a [`PipelineDefinition`](crate::core::PipelineDefinition)
//! into an [`ExecutionPlan`]: an ordered list of levels in which every
//! predecessor of a node sits in an earlier level. Sub-pipeline references
//! are resolved and planned recursively with an explicit ancestor chain.

mod builder;
mod plan;
mod resolver;

pub use builder::GraphBuilder;
pub use plan::ExecutionPlan;
pub use resolver::{DirectoryResolver, InMemoryResolver, PipelineResolver, ToolManifest};
