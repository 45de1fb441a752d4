//! ISO-8601 timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use thiserror::Error;

/// UTC timestamp.
pub type Timestamp = DateTime<Utc>;

/// Errors that can occur during timestamp parsing.
#[derive(Debug, Error)]
pub enum TimestampError {
    /// The timestamp string is empty.
    #[error("Empty timestamp string")]
    EmptyString,

    /// The timestamp value is invalid.
    #[error("Invalid timestamp: {0}")]
    InvalidFormat(String),
}

/// Returns the current UTC time as an ISO 8601 string with millisecond
/// precision, e.g. `2026-02-19T12:34:56.789Z`.
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&Utc::now())
}

/// Formats a timestamp as ISO 8601.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 / ISO 8601 timestamp.
pub fn parse_timestamp(input: &str) -> Result<Timestamp, TimestampError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TimestampError::EmptyString);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimestampError::InvalidFormat(trimmed.to_string()))
}

/// Elapsed time between two ISO timestamps; `None` if either fails to parse
/// or `end` precedes `start`.
#[must_use]
pub fn duration_between(start: &str, end: &str) -> Option<Duration> {
    let start = parse_timestamp(start).ok()?;
    let end = parse_timestamp(end).ok()?;
    (end - start).to_std().ok()
}
