//! `tracing-subscriber` installation.

use crate::config::LogConfig;
use crate::errors::EngineError;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global subscriber, failing if one is already set.
///
/// `RUST_LOG` takes precedence over [`LogConfig::level`].
pub fn try_init_tracing(config: &LogConfig) -> Result<(), EngineError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_target(true);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| EngineError::Config(format!("tracing subscriber: {e}")))
}

/// Installs the global subscriber; a second call is a no-op.
pub fn init_tracing(config: &LogConfig) {
    if try_init_tracing(config).is_err() {
        ::tracing::debug!("Tracing subscriber already installed");
    }
}

/// Measures the wall time of a run or node.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Elapsed milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Timer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns elapsed milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
