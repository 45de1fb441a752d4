//! Pipelines and engines for tests.

use super::launcher::ScriptedLauncher;
use crate::config::EngineConfig;
use crate::core::{Edge, Node, PipelineDefinition};
use crate::errors::EngineError;
use crate::events::CollectingRunEventSink;
use crate::graph::InMemoryResolver;
use crate::runner::{Engine, RunReport};
use crate::store::InMemoryRunLog;
use std::collections::HashMap;
use std::sync::Arc;

/// `a -> b -> ...` of shell nodes running `echo {id}`.
#[must_use]
pub fn shell_chain(name: &str, ids: &[&str]) -> PipelineDefinition {
    chain(name, ids, |id| Node::shell(id, format!("echo {id}")))
}

/// `a -> b -> ...` of AI nodes prompted with `task {id}`.
#[must_use]
pub fn ai_chain(name: &str, ids: &[&str]) -> PipelineDefinition {
    chain(name, ids, |id| Node::ai_task(id, format!("task {id}")))
}

fn chain(name: &str, ids: &[&str], node: impl Fn(&str) -> Node) -> PipelineDefinition {
    let mut pipeline = PipelineDefinition::new(name);
    for id in ids {
        pipeline = pipeline.with_node(node(id));
    }
    for pair in ids.windows(2) {
        pipeline = pipeline.with_edge(Edge::on_success(pair[0], pair[1]));
    }
    pipeline
}

/// An engine wired to a scripted launcher, a collecting sink and an
/// in-memory run log.
pub struct TestEngine {
    /// The engine under test.
    pub engine: Engine,
    /// Scripted launcher shared with the engine.
    pub launcher: Arc<ScriptedLauncher>,
    /// Every event the engine emitted.
    pub sink: Arc<CollectingRunEventSink>,
    /// Run log shared with the engine.
    pub run_log: Arc<InMemoryRunLog>,
    /// Sub-pipeline resolver shared with the engine.
    pub resolver: Arc<InMemoryResolver>,
}

impl TestEngine {
    /// Default configuration.
    pub fn new(launcher: ScriptedLauncher) -> Result<Self, EngineError> {
        Self::with_config(launcher, EngineConfig::default())
    }

    /// Custom configuration; `run_log_dir` and `project_path` are ignored.
    pub fn with_config(launcher: ScriptedLauncher, config: EngineConfig) -> Result<Self, EngineError> {
        let config = EngineConfig {
            run_log_dir: None,
            project_path: None,
            ..config
        };
        let launcher = Arc::new(launcher);
        let sink = Arc::new(CollectingRunEventSink::new());
        let run_log = Arc::new(InMemoryRunLog::new());
        let resolver = Arc::new(InMemoryResolver::new());
        let engine = Engine::new(config)?
            .with_launcher(launcher.clone())
            .with_sink(sink.clone())
            .with_run_log(run_log.clone())
            .with_resolver(resolver.clone());
        Ok(Self {
            engine,
            launcher,
            sink,
            run_log,
            resolver,
        })
    }

    /// Registers a pipeline for sub-pipeline references.
    #[must_use]
    pub fn with_pipeline(self, pipeline: PipelineDefinition) -> Self {
        self.resolver.insert(pipeline);
        self
    }

    /// Runs `pipeline` without inputs and waits for it.
    pub async fn run(&self, pipeline: PipelineDefinition) -> Result<RunReport, EngineError> {
        self.run_with(pipeline, HashMap::new()).await
    }

    /// Runs `pipeline` with `inputs` and waits for it.
    pub async fn run_with(
        &self,
        pipeline: PipelineDefinition,
        inputs: HashMap<String, String>,
    ) -> Result<RunReport, EngineError> {
        self.engine.start_run(pipeline, inputs).await?.wait().await
    }

    /// Resumes `run_id` with `pipeline` and waits for it.
    pub async fn resume(
        &self,
        run_id: &str,
        pipeline: PipelineDefinition,
    ) -> Result<RunReport, EngineError> {
        self.engine
            .resume_run(run_id, pipeline, HashMap::new())
            .await?
            .wait()
            .await
    }
}
