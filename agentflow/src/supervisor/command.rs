//! Command descriptions handed to a launcher.

use std::fmt;
use std::path::PathBuf;

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, passed verbatim.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// `{shell} -c <script>`.
    #[must_use]
    pub fn shell(shell: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(shell).arg("-c").arg(script)
    }

    /// `{cli} [--agent <agent>] [--model <model>] --print <prompt>`.
    #[must_use]
    pub fn ai_task(
        cli: impl Into<String>,
        agent: Option<&str>,
        model: Option<&str>,
        prompt: impl Into<String>,
    ) -> Self {
        let mut spec = Self::new(cli);
        if let Some(agent) = agent.filter(|a| !a.is_empty()) {
            spec = spec.arg("--agent").arg(agent);
        }
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            spec = spec.arg("--model").arg(model);
        }
        spec.arg("--print").arg(prompt)
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The last argument: the prompt or script text.
    #[must_use]
    pub fn payload(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}
