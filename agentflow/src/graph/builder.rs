//! Graph builder with validation.

use super::plan::ExecutionPlan;
use super::resolver::{PipelineResolver, ToolManifest};
use crate::core::{sanitize_pipeline_name, Node, NodeId, NodeKind, PipelineDefinition};
use crate::errors::{
    CircularReferenceError, CycleDetectedError, EngineError, GraphValidationError,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Validates pipeline documents and produces execution plans.
#[derive(Clone, Copy)]
pub struct GraphBuilder<'a> {
    resolver: &'a dyn PipelineResolver,
    tools: &'a ToolManifest,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder resolving sub-pipelines through `resolver` and
    /// checking `requires_tools` against `tools`.
    #[must_use]
    pub fn new(resolver: &'a dyn PipelineResolver, tools: &'a ToolManifest) -> Self {
        Self { resolver, tools }
    }

    /// Builds the plan of a top-level pipeline.
    pub fn build(&self, pipeline: &PipelineDefinition) -> Result<ExecutionPlan, EngineError> {
        self.build_with_ancestors(pipeline, &[])
    }

    /// Builds a plan for `pipeline`, expanded beneath `ancestors` (outermost
    /// first).
    ///
    /// # Errors
    ///
    /// Returns a validation, cycle or circular-reference error. Nothing is
    /// executed before the whole tree of sub-pipelines has been validated.
    pub fn build_with_ancestors(
        &self,
        pipeline: &PipelineDefinition,
        ancestors: &[String],
    ) -> Result<ExecutionPlan, EngineError> {
        let nodes = index_nodes(pipeline)?;
        if nodes.values().all(|n| n.is_comment()) {
            return Err(GraphValidationError::empty(&pipeline.name).into());
        }

        let container_of = check_containers(pipeline, &nodes)?;
        check_edges(pipeline, &nodes, &container_of)?;
        self.check_tools(pipeline)?;
        let subplans = self.plan_sub_pipelines(pipeline, ancestors)?;
        let levels = compute_levels(pipeline, &container_of)?;
        if levels.is_empty() {
            return Err(GraphValidationError::empty(&pipeline.name).into());
        }

        debug!(
            pipeline = %pipeline.name,
            levels = levels.len(),
            depth = ancestors.len(),
            "Built execution plan"
        );

        Ok(ExecutionPlan::new(
            pipeline.clone(),
            ancestors.to_vec(),
            levels,
            container_of,
            subplans,
        ))
    }

    fn check_tools(&self, pipeline: &PipelineDefinition) -> Result<(), GraphValidationError> {
        for node in &pipeline.nodes {
            if let NodeKind::AiTask { requires_tools, .. } = &node.kind {
                if let Some(tool) = requires_tools.iter().find(|t| !self.tools.contains(t)) {
                    return Err(GraphValidationError::unknown_tool(
                        &pipeline.name,
                        &node.id,
                        tool,
                    ));
                }
            }
        }
        Ok(())
    }

    fn plan_sub_pipelines(
        &self,
        pipeline: &PipelineDefinition,
        ancestors: &[String],
    ) -> Result<HashMap<NodeId, Arc<ExecutionPlan>>, EngineError> {
        let mut chain = ancestors.to_vec();
        chain.push(pipeline.name.clone());

        let mut subplans = HashMap::new();
        for node in &pipeline.nodes {
            let NodeKind::SubPipeline { pipeline_ref } = &node.kind else {
                continue;
            };
            let reference = pipeline_ref
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| GraphValidationError::missing_ref(&pipeline.name, &node.id, None))?;

            let wanted = sanitize_pipeline_name(reference);
            if chain.iter().any(|name| sanitize_pipeline_name(name) == wanted) {
                let mut cycle = chain.clone();
                cycle.push(reference.to_string());
                return Err(CircularReferenceError::new(cycle).into());
            }

            let sub = self.resolver.resolve(reference).ok_or_else(|| {
                GraphValidationError::missing_ref(&pipeline.name, &node.id, Some(reference))
            })?;
            let plan = self.build_with_ancestors(&sub, &chain)?;
            subplans.insert(node.id.clone(), Arc::new(plan));
        }
        Ok(subplans)
    }
}

fn index_nodes(pipeline: &PipelineDefinition) -> Result<HashMap<&str, &Node>, GraphValidationError> {
    let mut nodes = HashMap::with_capacity(pipeline.nodes.len());
    for node in &pipeline.nodes {
        if nodes.insert(node.id.as_str(), node).is_some() {
            return Err(GraphValidationError::duplicate_id(&pipeline.name, &node.id));
        }
    }
    Ok(nodes)
}

/// Maps every container child to its single owning container.
fn check_containers(
    pipeline: &PipelineDefinition,
    nodes: &HashMap<&str, &Node>,
) -> Result<HashMap<NodeId, NodeId>, EngineError> {
    let name = &pipeline.name;
    let mut container_of: HashMap<NodeId, NodeId> = HashMap::new();

    for node in pipeline.nodes.iter().filter(|n| n.is_container()) {
        if node.children().is_empty() {
            return Err(GraphValidationError::children(name, &node.id, "has no children").into());
        }
        for child in node.children() {
            if child == &node.id {
                return Err(
                    GraphValidationError::children(name, &node.id, "lists itself as a child")
                        .into(),
                );
            }
            let Some(child_node) = nodes.get(child.as_str()) else {
                return Err(GraphValidationError::children(
                    name,
                    &node.id,
                    format!("references unknown child '{child}'"),
                )
                .into());
            };
            if child_node.is_comment() {
                return Err(GraphValidationError::children(
                    name,
                    &node.id,
                    format!("child '{child}' is a comment"),
                )
                .into());
            }
            if let Some(owner) = container_of.insert(child.clone(), node.id.clone()) {
                return Err(GraphValidationError::children(
                    name,
                    &node.id,
                    format!("child '{child}' is also owned by '{owner}'"),
                )
                .into());
            }
        }
    }

    // Nesting must form a forest.
    for start in container_of.keys() {
        let mut path = vec![start.clone()];
        let mut current = start;
        while let Some(owner) = container_of.get(current) {
            if owner == start {
                path.push(owner.clone());
                path.reverse();
                return Err(CycleDetectedError::new(name.clone(), path).into());
            }
            if path.contains(owner) {
                break;
            }
            path.push(owner.clone());
            current = owner;
        }
    }

    Ok(container_of)
}

fn check_edges(
    pipeline: &PipelineDefinition,
    nodes: &HashMap<&str, &Node>,
    container_of: &HashMap<NodeId, NodeId>,
) -> Result<(), GraphValidationError> {
    let name = &pipeline.name;
    for edge in &pipeline.edges {
        for endpoint in [&edge.from, &edge.to] {
            let Some(node) = nodes.get(endpoint.as_str()) else {
                return Err(GraphValidationError::dangling_edge(name, &edge.id, endpoint));
            };
            if node.is_comment() {
                return Err(GraphValidationError::comment_edge(name, &edge.id, endpoint));
            }
            if let Some(owner) = container_of.get(endpoint) {
                return Err(GraphValidationError::children(
                    name,
                    owner,
                    format!("child '{endpoint}' must not have edges (edge '{}')", edge.id),
                ));
            }
        }
    }
    Ok(())
}

/// Levels by repeated removal of nodes whose predecessors are all leveled.
fn compute_levels(
    pipeline: &PipelineDefinition,
    container_of: &HashMap<NodeId, NodeId>,
) -> Result<Vec<Vec<NodeId>>, CycleDetectedError> {
    let mut predecessors: HashMap<&str, HashSet<&str>> = HashMap::new();
    for edge in &pipeline.edges {
        predecessors
            .entry(edge.to.as_str())
            .or_default()
            .insert(edge.from.as_str());
    }

    let mut remaining: Vec<&str> = pipeline
        .nodes
        .iter()
        .filter(|n| !n.is_comment() && !container_of.contains_key(&n.id))
        .map(|n| n.id.as_str())
        .collect();
    let mut leveled: HashSet<&str> = HashSet::new();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&str>, Vec<&str>) = remaining.into_iter().partition(|id| {
            predecessors
                .get(id)
                .map_or(true, |preds| preds.iter().all(|p| leveled.contains(p)))
        });
        if ready.is_empty() {
            let cycle = find_cycle(&blocked, &predecessors);
            return Err(CycleDetectedError::new(pipeline.name.clone(), cycle));
        }
        leveled.extend(ready.iter().copied());
        levels.push(ready.into_iter().map(ToString::to_string).collect());
        remaining = blocked;
    }

    Ok(levels)
}

/// Extracts one cycle from the unleveled residue. Every residual node has a
/// residual predecessor, so walking predecessors must revisit a node.
fn find_cycle(residual: &[&str], predecessors: &HashMap<&str, HashSet<&str>>) -> Vec<String> {
    let residual: HashSet<&str> = residual.iter().copied().collect();
    let Some(mut current) = residual.iter().min().copied() else {
        return Vec::new();
    };
    let mut path: Vec<&str> = Vec::new();

    loop {
        if let Some(start) = path.iter().position(|n| *n == current) {
            let mut cycle = vec![current.to_string()];
            cycle.extend(path[start + 1..].iter().rev().map(ToString::to_string));
            cycle.push(current.to_string());
            return cycle;
        }
        path.push(current);
        let next = predecessors
            .get(current)
            .and_then(|preds| preds.iter().filter(|p| residual.contains(*p)).min().copied());
        match next {
            Some(pred) => current = pred,
            None => return path.iter().rev().map(ToString::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Edge, LoopConfig, Node};
    use crate::graph::InMemoryResolver;
    use pretty_assertions::assert_eq;

    fn build(pipeline: &PipelineDefinition) -> Result<ExecutionPlan, EngineError> {
        let resolver = InMemoryResolver::new();
        let tools = ToolManifest::new();
        GraphBuilder::new(&resolver, &tools).build(pipeline)
    }

    fn code(err: &EngineError) -> &str {
        &err.error_info().unwrap().code
    }

    fn assert_topological(plan: &ExecutionPlan) {
        for edge in &plan.pipeline().edges {
            let from = plan.level_of(&edge.from).unwrap();
            let to = plan.level_of(&edge.to).unwrap();
            assert!(from < to, "{} (level {from}) must precede {} (level {to})", edge.from, edge.to);
        }
    }

    #[test]
    fn test_linear_pipeline_levels() {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::shell("a", "echo a"))
            .with_node(Node::shell("b", "echo b"))
            .with_node(Node::shell("c", "echo c"))
            .with_edge(Edge::on_success("a", "b"))
            .with_edge(Edge::on_success("b", "c"));
        let plan = build(&pipeline).unwrap();

        assert_eq!(
            plan.levels(),
            &[vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]
        );
    }

    #[test]
    fn test_diamond_pipeline_levels() {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::shell("a", "echo a"))
            .with_node(Node::shell("b", "echo b"))
            .with_node(Node::shell("c", "echo c"))
            .with_node(Node::shell("d", "echo d"))
            .with_edge(Edge::new("a", "b"))
            .with_edge(Edge::new("a", "c"))
            .with_edge(Edge::new("b", "d"))
            .with_edge(Edge::new("c", "d"));
        let plan = build(&pipeline).unwrap();

        assert_eq!(plan.levels().len(), 3);
        assert_eq!(plan.levels()[1], vec!["b".to_string(), "c".to_string()]);
        assert_topological(&plan);
    }

    #[test]
    fn test_generated_dags_are_topologically_leveled() {
        // Deterministic pseudo-random DAGs: edges only go from lower to
        // higher index, declared in shuffled order.
        let mut seed: u64 = 0x5eed;
        let mut next = move || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            seed >> 33
        };
        for size in [2usize, 5, 12, 30] {
            let mut order: Vec<usize> = (0..size).collect();
            for i in (1..size).rev() {
                let j = usize::try_from(next()).unwrap() % (i + 1);
                order.swap(i, j);
            }
            let mut pipeline = PipelineDefinition::new("generated");
            for i in &order {
                pipeline = pipeline.with_node(Node::shell(format!("n{i}"), "true"));
            }
            for to in 1..size {
                for from in 0..to {
                    if next() % 3 == 0 {
                        pipeline = pipeline.with_edge(Edge::new(format!("n{from}"), format!("n{to}")));
                    }
                }
            }
            let plan = build(&pipeline).unwrap();
            assert_eq!(plan.top_level_count(), size);
            assert_topological(&plan);
        }
    }

    #[test]
    fn test_cycle_is_detected_with_path() {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::shell("a", "echo a"))
            .with_node(Node::shell("b", "echo b"))
            .with_node(Node::shell("c", "echo c"))
            .with_node(Node::shell("entry", "echo entry"))
            .with_edge(Edge::new("entry", "a"))
            .with_edge(Edge::new("a", "b"))
            .with_edge(Edge::new("b", "c"))
            .with_edge(Edge::new("c", "a"));
        let err = build(&pipeline).unwrap_err();

        match err {
            EngineError::CycleDetected(e) => {
                assert_eq!(e.cycle_path.first(), e.cycle_path.last());
                assert_eq!(e.cycle_path.len(), 4);
                assert!(!e.cycle_path.contains(&"entry".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::shell("a", "echo a"))
            .with_edge(Edge::new("a", "a"));
        let err = build(&pipeline).unwrap_err();
        assert_eq!(code(&err), "GRAPH-007-CYCLE");
    }

    #[test]
    fn test_dangling_edge_is_rejected() {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::shell("a", "echo a"))
            .with_edge(Edge::new("a", "ghost"));
        let err = build(&pipeline).unwrap_err();

        assert_eq!(code(&err), "GRAPH-002-DANGLING_EDGE");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::shell("a", "echo a"))
            .with_node(Node::shell("a", "echo again"));
        assert_eq!(code(&build(&pipeline).unwrap_err()), "GRAPH-001-DUPLICATE_ID");
    }

    #[test]
    fn test_comments_are_excluded_and_cannot_have_edges() {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::comment("note", "remember to deploy"))
            .with_node(Node::shell("a", "echo a"));
        let plan = build(&pipeline).unwrap();
        assert_eq!(plan.levels(), &[vec!["a".to_string()]]);

        let with_edge = pipeline.with_edge(Edge::new("note", "a"));
        assert_eq!(code(&build(&with_edge).unwrap_err()), "GRAPH-005-COMMENT_EDGE");
    }

    #[test]
    fn test_only_comments_is_empty() {
        let pipeline = PipelineDefinition::new("p").with_node(Node::comment("note", "x"));
        assert_eq!(code(&build(&pipeline).unwrap_err()), "GRAPH-009-EMPTY");
        assert_eq!(
            code(&build(&PipelineDefinition::new("p")).unwrap_err()),
            "GRAPH-009-EMPTY"
        );
    }

    #[test]
    fn test_container_children_are_excluded_from_levels() {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::parallel("par", &["x", "y"]))
            .with_node(Node::shell("x", "echo x"))
            .with_node(Node::shell("y", "echo y"))
            .with_node(Node::shell("after", "echo after"))
            .with_edge(Edge::on_success("par", "after"));
        let plan = build(&pipeline).unwrap();

        assert_eq!(
            plan.levels(),
            &[vec!["par".to_string()], vec!["after".to_string()]]
        );
        assert_eq!(plan.container_of("x"), Some("par"));
        assert_eq!(plan.container_of("after"), None);
    }

    #[test]
    fn test_container_child_rules() {
        let empty = PipelineDefinition::new("p").with_node(Node::parallel("par", &[]));
        assert_eq!(code(&build(&empty).unwrap_err()), "GRAPH-006-CHILDREN");

        let unknown = PipelineDefinition::new("p").with_node(Node::looping("l", "a", &["ghost"]));
        assert_eq!(code(&build(&unknown).unwrap_err()), "GRAPH-006-CHILDREN");

        let shared = PipelineDefinition::new("p")
            .with_node(Node::parallel("p1", &["x"]))
            .with_node(Node::parallel("p2", &["x"]))
            .with_node(Node::shell("x", "echo"));
        assert!(build(&shared).unwrap_err().to_string().contains("also owned"));

        let child_edge = PipelineDefinition::new("p")
            .with_node(Node::parallel("par", &["x"]))
            .with_node(Node::shell("x", "echo"))
            .with_node(Node::shell("y", "echo"))
            .with_edge(Edge::new("x", "y"));
        assert_eq!(code(&build(&child_edge).unwrap_err()), "GRAPH-006-CHILDREN");
    }

    #[test]
    fn test_nested_containers_are_allowed_but_not_cyclic() {
        let nested = PipelineDefinition::new("p")
            .with_node(
                Node::looping("files", "a\nb", &["inner"])
                    .with_loop_config(LoopConfig::default()),
            )
            .with_node(Node::parallel("inner", &["lint", "test"]))
            .with_node(Node::shell("lint", "lint $LOOP_ITEM"))
            .with_node(Node::shell("test", "test $LOOP_ITEM"));
        let plan = build(&nested).unwrap();
        assert_eq!(plan.levels(), &[vec!["files".to_string()]]);
        assert_eq!(plan.container_of("lint"), Some("inner"));

        let cyclic = PipelineDefinition::new("p")
            .with_node(Node::parallel("a", &["b"]))
            .with_node(Node::parallel("b", &["a"]))
            .with_node(Node::shell("c", "echo"));
        assert_eq!(code(&build(&cyclic).unwrap_err()), "GRAPH-007-CYCLE");
    }

    #[test]
    fn test_required_tools_must_be_in_manifest() {
        let pipeline = PipelineDefinition::new("p")
            .with_node(Node::ai_task("review", "review").with_required_tools(&["github"]));
        let resolver = InMemoryResolver::new();

        let empty = ToolManifest::new();
        let err = GraphBuilder::new(&resolver, &empty).build(&pipeline).unwrap_err();
        assert_eq!(code(&err), "GRAPH-004-UNKNOWN_TOOL");

        let tools = ToolManifest::from_names(["github"]);
        assert!(GraphBuilder::new(&resolver, &tools).build(&pipeline).is_ok());
    }

    #[test]
    fn test_sub_pipeline_is_planned_recursively() {
        let resolver = InMemoryResolver::new().with_pipeline(
            PipelineDefinition::new("deploy-staging").with_node(Node::shell("ds-1", "make deploy")),
        );
        let tools = ToolManifest::new();
        let pipeline =
            PipelineDefinition::new("main").with_node(Node::sub_pipeline("deploy", "deploy-staging"));
        let plan = GraphBuilder::new(&resolver, &tools).build(&pipeline).unwrap();

        let sub = plan.subplan("deploy").unwrap();
        assert_eq!(sub.name(), "deploy-staging");
        assert_eq!(sub.ancestors(), &["main".to_string()]);
    }

    #[test]
    fn test_missing_sub_pipeline_reference() {
        let without_ref = PipelineDefinition::new("main").with_node(Node::new(
            "s",
            NodeKind::SubPipeline { pipeline_ref: None },
            "",
        ));
        assert_eq!(code(&build(&without_ref).unwrap_err()), "GRAPH-003-MISSING_REF");

        let unresolvable =
            PipelineDefinition::new("main").with_node(Node::sub_pipeline("s", "nowhere"));
        assert_eq!(code(&build(&unresolvable).unwrap_err()), "GRAPH-003-MISSING_REF");
    }

    #[test]
    fn test_circular_sub_pipeline_references() {
        let a = PipelineDefinition::new("A").with_node(Node::sub_pipeline("to-b", "B"));
        let b = PipelineDefinition::new("B").with_node(Node::sub_pipeline("to-a", "A"));
        let resolver = InMemoryResolver::new()
            .with_pipeline(a.clone())
            .with_pipeline(b);
        let tools = ToolManifest::new();

        let err = GraphBuilder::new(&resolver, &tools).build(&a).unwrap_err();
        match err {
            EngineError::CircularReference(e) => {
                assert_eq!(e.chain, vec!["A".to_string(), "B".to_string(), "A".to_string()]);
            }
            other => panic!("expected circular reference, got {other:?}"),
        }

        let selfish = PipelineDefinition::new("self").with_node(Node::sub_pipeline("me", "self"));
        let err = GraphBuilder::new(&resolver, &tools).build(&selfish).unwrap_err();
        assert_eq!(code(&err), "GRAPH-008-CIRCULAR_REF");
    }
}
