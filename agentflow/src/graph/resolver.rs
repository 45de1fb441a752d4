//! Sub-pipeline resolution and the MCP tool manifest.

use crate::core::{sanitize_pipeline_name, PipelineDefinition, PIPELINE_FILE_SUFFIX};
use crate::errors::EngineError;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Resolves a `pipeline_ref` to a pipeline document.
pub trait PipelineResolver: Send + Sync {
    /// Returns the pipeline with the given name, if it exists.
    fn resolve(&self, name: &str) -> Option<PipelineDefinition>;
}

/// Resolver backed by an in-memory map keyed by sanitized name.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    pipelines: RwLock<HashMap<String, PipelineDefinition>>,
}

impl InMemoryResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pipeline under its own name.
    pub fn insert(&self, pipeline: PipelineDefinition) {
        self.pipelines
            .write()
            .insert(sanitize_pipeline_name(&pipeline.name), pipeline);
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with_pipeline(self, pipeline: PipelineDefinition) -> Self {
        self.insert(pipeline);
        self
    }

    /// Number of registered pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.read().is_empty()
    }
}

impl PipelineResolver for InMemoryResolver {
    fn resolve(&self, name: &str) -> Option<PipelineDefinition> {
        self.pipelines
            .read()
            .get(&sanitize_pipeline_name(name))
            .cloned()
    }
}

/// Resolver reading `{dir}/{name}.pipeline.json`.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    dir: PathBuf,
}

impl DirectoryResolver {
    /// Creates a resolver over a pipelines directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path a pipeline with this name is stored at.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}{PIPELINE_FILE_SUFFIX}", sanitize_pipeline_name(name)))
    }

    /// Names of every pipeline document in the directory, sorted.
    pub fn list(&self) -> Result<Vec<String>, EngineError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let file_name = entry?.file_name();
            if let Some(name) = file_name.to_string_lossy().strip_suffix(PIPELINE_FILE_SUFFIX) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl PipelineResolver for DirectoryResolver {
    fn resolve(&self, name: &str) -> Option<PipelineDefinition> {
        let path = self.path_for(name);
        if !path.is_file() {
            return None;
        }
        match PipelineDefinition::from_json_file(&path) {
            Ok(pipeline) => Some(pipeline),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to load pipeline");
                None
            }
        }
    }
}

/// Set of MCP tool names available to ai-task nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolManifest {
    tools: BTreeSet<String>,
}

impl ToolManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manifest from tool names.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses the `mcpServers` keys of a `.mcp.json` document.
    pub fn from_mcp_json(json: &str) -> Result<Self, EngineError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let servers = value
            .get("mcpServers")
            .and_then(serde_json::Value::as_object)
            .map(|servers| servers.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(Self::from_names(servers))
    }

    /// Reads `.mcp.json` from a project directory. A missing file yields an
    /// empty manifest.
    pub fn load_from_project(project_path: &Path) -> Result<Self, EngineError> {
        let path = project_path.join(".mcp.json");
        if !path.is_file() {
            return Ok(Self::new());
        }
        Self::from_mcp_json(&std::fs::read_to_string(path)?)
    }

    /// Returns true if the tool is available.
    #[must_use]
    pub fn contains(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }

    /// Available tool names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(String::as_str)
    }
}
