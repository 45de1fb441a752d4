//! The leveled execution plan.

use crate::core::{Edge, EdgeCondition, Node, NodeId, PipelineDefinition};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Validated, leveled form of a pipeline.
///
/// Derived once per run and once per sub-pipeline; never persisted.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pipeline: Arc<PipelineDefinition>,
    ancestors: Vec<String>,
    levels: Vec<Vec<NodeId>>,
    level_of: HashMap<NodeId, usize>,
    inbound: HashMap<NodeId, Vec<Edge>>,
    failure_paths: HashSet<NodeId>,
    container_of: HashMap<NodeId, NodeId>,
    subplans: HashMap<NodeId, Arc<ExecutionPlan>>,
}

impl ExecutionPlan {
    pub(crate) fn new(
        pipeline: PipelineDefinition,
        ancestors: Vec<String>,
        levels: Vec<Vec<NodeId>>,
        container_of: HashMap<NodeId, NodeId>,
        subplans: HashMap<NodeId, Arc<ExecutionPlan>>,
    ) -> Self {
        let level_of = levels
            .iter()
            .enumerate()
            .flat_map(|(i, level)| level.iter().map(move |id| (id.clone(), i)))
            .collect();

        let mut inbound: HashMap<NodeId, Vec<Edge>> = HashMap::new();
        let mut failure_paths = HashSet::new();
        for edge in &pipeline.edges {
            inbound.entry(edge.to.clone()).or_default().push(edge.clone());
            if edge.condition == EdgeCondition::Failure {
                failure_paths.insert(edge.from.clone());
            }
        }

        Self {
            pipeline: Arc::new(pipeline),
            ancestors,
            levels,
            level_of,
            inbound,
            failure_paths,
            container_of,
            subplans,
        }
    }

    /// The planned pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &PipelineDefinition {
        &self.pipeline
    }

    /// Pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.pipeline.name
    }

    /// Pipeline names being expanded above this plan, outermost first.
    #[must_use]
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// Levels in execution order. Container children and comments are not
    /// part of any level.
    #[must_use]
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    /// Level index of a top-level node.
    #[must_use]
    pub fn level_of(&self, node_id: &str) -> Option<usize> {
        self.level_of.get(node_id).copied()
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.pipeline.node(node_id)
    }

    /// Edges ending at `node_id`.
    #[must_use]
    pub fn inbound(&self, node_id: &str) -> &[Edge] {
        self.inbound.get(node_id).map_or(&[], Vec::as_slice)
    }

    /// Returns true if a failure-conditioned edge leaves `node_id`.
    #[must_use]
    pub fn has_failure_path(&self, node_id: &str) -> bool {
        self.failure_paths.contains(node_id)
    }

    /// Container owning `node_id`, if it is a child.
    #[must_use]
    pub fn container_of(&self, node_id: &str) -> Option<&str> {
        self.container_of.get(node_id).map(String::as_str)
    }

    /// Plan of the pipeline referenced by a sub-pipeline node.
    #[must_use]
    pub fn subplan(&self, node_id: &str) -> Option<&Arc<ExecutionPlan>> {
        self.subplans.get(node_id)
    }

    /// Number of planned top-level nodes.
    #[must_use]
    pub fn top_level_count(&self) -> usize {
        self.level_of.len()
    }
}
