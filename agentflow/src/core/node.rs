//! Pipeline node model.
//!
//! A node is one unit of work. The set of kinds is closed: every kind is a
//! variant of [`NodeKind`], so dispatch over kinds is an exhaustive match.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default cap on loop iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Identifier of a node, unique within its pipeline.
pub type NodeId = String;

/// Retry policy shared by all node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (1 = no retries).
    #[serde(rename = "max", default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds to wait between attempts.
    #[serde(rename = "delay", default)]
    pub delay_seconds: f64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_seconds: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub fn new(max_attempts: u32, delay_seconds: f64) -> Self {
        Self {
            max_attempts,
            delay_seconds,
        }
    }

    /// Number of attempts to make, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        seconds(self.delay_seconds).unwrap_or(Duration::ZERO)
    }
}

/// How loop instructions are split into items.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Separator {
    /// One item per line.
    #[default]
    Newline,
    /// Comma separated items.
    Comma,
    /// A caller-specified literal separator.
    Literal(String),
}

impl From<String> for Separator {
    fn from(value: String) -> Self {
        match value.as_str() {
            "newline" | "\n" => Self::Newline,
            "comma" | "," => Self::Comma,
            _ => Self::Literal(value),
        }
    }
}

impl From<Separator> for String {
    fn from(value: Separator) -> Self {
        match value {
            Separator::Newline => "newline".to_string(),
            Separator::Comma => "comma".to_string(),
            Separator::Literal(s) => s,
        }
    }
}

impl Separator {
    /// Splits text into trimmed, non-empty items.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<String> {
        let parts: Vec<&str> = match self {
            Self::Newline => text.lines().collect(),
            Self::Comma => text.split(',').collect(),
            Self::Literal(sep) if sep.is_empty() => vec![text],
            Self::Literal(sep) => text.split(sep.as_str()).collect(),
        };
        parts
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

/// Loop behaviour.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoopConfig {
    /// How instructions are split into items.
    #[serde(default)]
    pub separator: Separator,
    /// Cap on the number of iterations (1-1000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    /// Timeout for the whole loop in seconds.
    #[serde(rename = "timeout", default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    /// Model override for AI children.
    #[serde(rename = "model", default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
}

impl LoopConfig {
    /// Effective iteration cap, clamped to `1..=limit`.
    #[must_use]
    pub fn iteration_cap(&self, limit: usize) -> usize {
        self.max_iterations
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
            .clamp(1, limit.max(1))
    }
}

/// Canvas coordinates; irrelevant to execution.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

/// Kind-specific node data, tagged by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeKind {
    /// Invokes the AI CLI with the instructions as prompt.
    AiTask {
        /// Agent name passed to the CLI.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        /// Model override for this node.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// MCP tools that must be available.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        requires_tools: Vec<String>,
    },
    /// Runs the instructions through the shell.
    Shell,
    /// Runs a git command through the shell.
    Git,
    /// Runs all children concurrently.
    Parallel {
        /// Child node ids.
        #[serde(default)]
        children: Vec<NodeId>,
    },
    /// Runs children once per item of the instructions list.
    Loop {
        /// Child node ids, executed in order within an iteration.
        #[serde(default)]
        children: Vec<NodeId>,
        /// Loop behaviour.
        #[serde(default)]
        loop_config: LoopConfig,
    },
    /// Suspends until an external approve/reject signal.
    ApprovalGate,
    /// Runs another pipeline as a nested execution.
    SubPipeline {
        /// Name of the referenced pipeline.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pipeline_ref: Option<String>,
    },
    /// Annotation only; never executed.
    Comment,
}

/// Discriminant of [`NodeKind`], used in records and analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKindTag {
    /// See [`NodeKind::AiTask`].
    AiTask,
    /// See [`NodeKind::Shell`].
    Shell,
    /// See [`NodeKind::Git`].
    Git,
    /// See [`NodeKind::Parallel`].
    Parallel,
    /// See [`NodeKind::Loop`].
    Loop,
    /// See [`NodeKind::ApprovalGate`].
    ApprovalGate,
    /// See [`NodeKind::SubPipeline`].
    SubPipeline,
    /// See [`NodeKind::Comment`].
    Comment,
}

impl fmt::Display for NodeKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AiTask => "ai-task",
            Self::Shell => "shell",
            Self::Git => "git",
            Self::Parallel => "parallel",
            Self::Loop => "loop",
            Self::ApprovalGate => "approval-gate",
            Self::SubPipeline => "sub-pipeline",
            Self::Comment => "comment",
        };
        f.write_str(label)
    }
}

impl NodeKindTag {
    /// Returns true for kinds whose cost is the sum of nested results.
    #[must_use]
    pub fn is_aggregate(self) -> bool {
        matches!(self, Self::Parallel | Self::Loop | Self::SubPipeline)
    }
}

impl NodeKind {
    /// Returns the discriminant.
    #[must_use]
    pub fn tag(&self) -> NodeKindTag {
        match self {
            Self::AiTask { .. } => NodeKindTag::AiTask,
            Self::Shell => NodeKindTag::Shell,
            Self::Git => NodeKindTag::Git,
            Self::Parallel { .. } => NodeKindTag::Parallel,
            Self::Loop { .. } => NodeKindTag::Loop,
            Self::ApprovalGate => NodeKindTag::ApprovalGate,
            Self::SubPipeline { .. } => NodeKindTag::SubPipeline,
            Self::Comment => NodeKindTag::Comment,
        }
    }
}

/// A single node of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id within the pipeline.
    pub id: NodeId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Templated command, prompt or message.
    #[serde(default)]
    pub instructions: String,
    /// Kind-specific data.
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Timeout in seconds.
    #[serde(rename = "timeout", default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    /// Input variable names (informational).
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Output variable names (informational).
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Canvas position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    /// Creates a node of the given kind.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: NodeKind, instructions: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            instructions: instructions.into(),
            kind,
            retry: None,
            timeout_seconds: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            position: None,
        }
    }

    /// Creates an ai-task node.
    #[must_use]
    pub fn ai_task(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::AiTask {
                agent: None,
                model: None,
                requires_tools: Vec::new(),
            },
            prompt,
        )
    }

    /// Creates a shell node.
    #[must_use]
    pub fn shell(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Shell, command)
    }

    /// Creates a git node.
    #[must_use]
    pub fn git(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Git, command)
    }

    /// Creates a parallel container.
    #[must_use]
    pub fn parallel(id: impl Into<String>, children: &[&str]) -> Self {
        Self::new(
            id,
            NodeKind::Parallel {
                children: children.iter().map(|c| (*c).to_string()).collect(),
            },
            "",
        )
    }

    /// Creates a loop container over the given item list.
    #[must_use]
    pub fn looping(id: impl Into<String>, items: impl Into<String>, children: &[&str]) -> Self {
        Self::new(
            id,
            NodeKind::Loop {
                children: children.iter().map(|c| (*c).to_string()).collect(),
                loop_config: LoopConfig::default(),
            },
            items,
        )
    }

    /// Creates an approval gate.
    #[must_use]
    pub fn approval_gate(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, NodeKind::ApprovalGate, message)
    }

    /// Creates a sub-pipeline node.
    #[must_use]
    pub fn sub_pipeline(id: impl Into<String>, pipeline_ref: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::SubPipeline {
                pipeline_ref: Some(pipeline_ref.into()),
            },
            "",
        )
    }

    /// Creates a comment node.
    #[must_use]
    pub fn comment(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Comment, text)
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, delay_seconds: f64) -> Self {
        self.retry = Some(RetryPolicy::new(max_attempts, delay_seconds));
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Sets the loop configuration. No-op for non-loop nodes.
    #[must_use]
    pub fn with_loop_config(mut self, config: LoopConfig) -> Self {
        if let NodeKind::Loop { loop_config, .. } = &mut self.kind {
            *loop_config = config;
        }
        self
    }

    /// Sets agent and model. No-op for non-AI nodes.
    #[must_use]
    pub fn with_agent(mut self, agent_name: Option<&str>, model_name: Option<&str>) -> Self {
        if let NodeKind::AiTask { agent, model, .. } = &mut self.kind {
            *agent = agent_name.map(ToString::to_string);
            *model = model_name.map(ToString::to_string);
        }
        self
    }

    /// Sets the required MCP tools. No-op for non-AI nodes.
    #[must_use]
    pub fn with_required_tools(mut self, tools: &[&str]) -> Self {
        if let NodeKind::AiTask { requires_tools, .. } = &mut self.kind {
            *requires_tools = tools.iter().map(|t| (*t).to_string()).collect();
        }
        self
    }

    /// Returns the kind discriminant.
    #[must_use]
    pub fn tag(&self) -> NodeKindTag {
        self.kind.tag()
    }

    /// Child ids of parallel and loop containers.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Parallel { children } | NodeKind::Loop { children, .. } => children,
            _ => &[],
        }
    }

    /// Returns true for parallel and loop containers.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Parallel { .. } | NodeKind::Loop { .. })
    }

    /// Returns true for comment nodes.
    #[must_use]
    pub fn is_comment(&self) -> bool {
        matches!(self.kind, NodeKind::Comment)
    }

    /// Display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Effective retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.unwrap_or_default()
    }

    /// Effective timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.and_then(seconds)
    }
}

/// Converts positive, finite seconds to a duration.
pub(crate) fn seconds(value: f64) -> Option<Duration> {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).ok()
    } else {
        None
    }
}
