//! Run and request identifiers.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Produces `run-{unix_ms}` ids that never repeat within a generator.
///
/// Two runs started in the same millisecond get consecutive values.
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    last: AtomicU64,
}

impl RunIdGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next run id.
    pub fn next_id(&self) -> String {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return format!("run-{candidate}"),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Extracts the millisecond timestamp from a `run-{unix_ms}` id.
#[must_use]
pub fn run_id_millis(run_id: &str) -> Option<u64> {
    run_id.strip_prefix("run-")?.parse().ok()
}
