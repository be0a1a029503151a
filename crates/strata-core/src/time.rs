//! Timestamp encoding for storage.
//!
//! Timestamps are persisted as fixed-width UTC RFC 3339 strings with
//! microsecond precision, so lexical order in SQL equals chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

/// Format an optional timestamp, mapping `None` to SQL `NULL`.
pub fn format_opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(format_ts)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
