//! Usage analytics over recorded runs.

use crate::core::{
    sanitize_pipeline_name, NodeKind, NodeKindTag, NodeResult, PipelineDefinition, RunStatus,
    DEFAULT_MAX_ITERATIONS,
};
use crate::graph::PipelineResolver;
use crate::store::RunRecord;
use crate::utils::duration_between;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const TOP_N: usize = 10;

/// Cost of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCostSummary {
    /// Run id.
    pub run_id: String,
    /// Pipeline name.
    pub pipeline_name: String,
    /// Final status.
    pub status: RunStatus,
    /// Fresh spend of the run.
    pub cost: f64,
    /// Wall time, when the run finished.
    pub duration_secs: Option<f64>,
    /// Start time.
    pub started_at: String,
}

/// Cost of one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCost {
    /// Qualified node id.
    pub node_id: String,
    /// Display name.
    pub node_name: String,
    /// Run the execution belongs to.
    pub run_id: String,
    /// Cost of the execution.
    pub cost: f64,
}

/// Cumulative cost of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCost {
    /// Pipeline name.
    pub pipeline_name: String,
    /// Fresh spend across all its runs.
    pub total_cost: f64,
    /// Number of runs.
    pub run_count: usize,
}

/// Aggregate statistics over a set of runs.
///
/// Only fresh AI executions are counted; results reused from an earlier
/// run were already paid for by that run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    /// Sum of all fresh AI costs.
    pub total_cost: f64,
    /// Number of runs.
    pub total_runs: usize,
    /// Fresh AI executions that reported a positive cost.
    pub total_ai_steps: usize,
    /// `total_cost / total_runs`.
    pub avg_cost_per_run: f64,
    /// `total_cost / total_ai_steps`.
    pub avg_cost_per_ai_step: f64,
    /// Mean wall time of finished runs.
    pub avg_duration_secs: f64,
    /// Per-run breakdown, in input order.
    pub runs: Vec<RunCostSummary>,
    /// Most expensive node executions.
    pub top_nodes: Vec<NodeCost>,
    /// Most expensive pipelines.
    pub top_pipelines: Vec<PipelineCost>,
}

fn fresh_ai_costs(record: &RunRecord) -> impl Iterator<Item = (&NodeResult, f64)> {
    record
        .results
        .iter()
        .filter(|r| r.kind == NodeKindTag::AiTask && !r.reused)
        .filter_map(|r| r.cost_usd.filter(|c| *c > 0.0).map(|c| (r, c)))
}

#[allow(clippy::cast_precision_loss)]
fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

impl UsageStats {
    /// Computes statistics over `records`.
    #[must_use]
    pub fn from_records(records: &[RunRecord]) -> Self {
        let mut stats = Self::default();
        let mut pipelines: HashMap<&str, PipelineCost> = HashMap::new();
        let mut durations = Vec::new();

        for record in records {
            let state = &record.state;
            let mut run_cost = 0.0;
            for (result, cost) in fresh_ai_costs(record) {
                run_cost += cost;
                stats.total_ai_steps += 1;
                stats.top_nodes.push(NodeCost {
                    node_id: result.node_id.clone(),
                    node_name: result.node_name.clone(),
                    run_id: state.run_id.clone(),
                    cost,
                });
            }

            let duration = state
                .finished_at
                .as_deref()
                .and_then(|end| duration_between(&state.started_at, end))
                .map(|d| d.as_secs_f64());
            durations.extend(duration);

            let entry = pipelines
                .entry(state.pipeline_name.as_str())
                .or_insert_with(|| PipelineCost {
                    pipeline_name: state.pipeline_name.clone(),
                    total_cost: 0.0,
                    run_count: 0,
                });
            entry.total_cost += run_cost;
            entry.run_count += 1;

            stats.total_cost += run_cost;
            stats.runs.push(RunCostSummary {
                run_id: state.run_id.clone(),
                pipeline_name: state.pipeline_name.clone(),
                status: state.status,
                cost: run_cost,
                duration_secs: duration,
                started_at: state.started_at.clone(),
            });
        }

        stats.total_runs = records.len();
        stats.avg_cost_per_run = mean(stats.total_cost, stats.total_runs);
        stats.avg_cost_per_ai_step = mean(stats.total_cost, stats.total_ai_steps);
        stats.avg_duration_secs = mean(durations.iter().sum(), durations.len());

        stats.top_nodes.sort_by(|a, b| b.cost.total_cmp(&a.cost));
        stats.top_nodes.truncate(TOP_N);

        let mut top_pipelines: Vec<_> = pipelines.into_values().collect();
        top_pipelines.sort_by(|a, b| {
            b.total_cost
                .total_cmp(&a.total_cost)
                .then_with(|| a.pipeline_name.cmp(&b.pipeline_name))
        });
        top_pipelines.truncate(TOP_N);
        stats.top_pipelines = top_pipelines;
        stats
    }
}

/// Mean cost of a fresh AI execution, `None` without data.
#[must_use]
pub fn average_ai_cost(records: &[RunRecord]) -> Option<f64> {
    let (sum, count) = records
        .iter()
        .flat_map(fresh_ai_costs)
        .fold((0.0, 0usize), |(sum, count), (_, cost)| (sum + cost, count + 1));
    (count > 0).then(|| mean(sum, count))
}

/// Expected cost of one run of `pipeline` at `avg_ai_cost` per AI execution.
///
/// Loop children count once per item of the loop's raw instructions,
/// capped by its iteration limit. Sub-pipelines are expanded; a reference
/// already being expanded counts as zero.
#[must_use]
pub fn estimate_pipeline_cost(
    pipeline: &PipelineDefinition,
    resolver: &dyn PipelineResolver,
    avg_ai_cost: f64,
) -> f64 {
    let mut chain = vec![pipeline.name.clone()];
    expected_ai_invocations(pipeline, resolver, &mut chain) * avg_ai_cost
}

fn expected_ai_invocations(
    pipeline: &PipelineDefinition,
    resolver: &dyn PipelineResolver,
    chain: &mut Vec<String>,
) -> f64 {
    let owned: HashSet<&str> = pipeline
        .nodes
        .iter()
        .flat_map(|n| n.children().iter().map(String::as_str))
        .collect();
    pipeline
        .nodes
        .iter()
        .filter(|n| !owned.contains(n.id.as_str()))
        .map(|n| node_invocations(pipeline, &n.id, resolver, chain))
        .sum()
}

#[allow(clippy::cast_precision_loss)]
fn node_invocations(
    pipeline: &PipelineDefinition,
    node_id: &str,
    resolver: &dyn PipelineResolver,
    chain: &mut Vec<String>,
) -> f64 {
    let Some(node) = pipeline.node(node_id) else {
        return 0.0;
    };
    match &node.kind {
        NodeKind::AiTask { .. } => 1.0,
        NodeKind::Shell | NodeKind::Git | NodeKind::ApprovalGate | NodeKind::Comment => 0.0,
        NodeKind::Parallel { children } => children
            .iter()
            .map(|c| node_invocations(pipeline, c, resolver, chain))
            .sum(),
        NodeKind::Loop {
            children,
            loop_config,
        } => {
            let items = loop_config.separator.split(&node.instructions).len();
            let iterations = items.min(loop_config.iteration_cap(DEFAULT_MAX_ITERATIONS));
            let per_iteration: f64 = children
                .iter()
                .map(|c| node_invocations(pipeline, c, resolver, chain))
                .sum();
            per_iteration * iterations as f64
        }
        NodeKind::SubPipeline { pipeline_ref } => {
            let Some(reference) = pipeline_ref.as_deref() else {
                return 0.0;
            };
            let sanitized = sanitize_pipeline_name(reference);
            if chain
                .iter()
                .any(|name| sanitize_pipeline_name(name) == sanitized)
            {
                return 0.0;
            }
            let Some(sub) = resolver.resolve(reference) else {
                return 0.0;
            };
            chain.push(sub.name.clone());
            let count = expected_ai_invocations(&sub, resolver, chain);
            chain.pop();
            count
        }
    }
}
