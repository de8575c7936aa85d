//! Timestamp encoding shared with the external worker.
//!
//! The worker writes SQLite `CURRENT_TIMESTAMP` values (`YYYY-MM-DD HH:MM:SS`,
//! UTC), so the orchestrator stores the same shape. Parsing is lenient and
//! also accepts RFC 3339 and fractional seconds.

use chrono::{DateTime, NaiveDateTime, Utc};

const STORE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats a UTC instant the way SQLite's `CURRENT_TIMESTAMP` does.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format(STORE_FORMAT).to_string()
}

/// Parses a stored timestamp. Returns `None` for blank or unrecognised text.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parses an optional stored timestamp.
pub fn parse_optional(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(parse_timestamp)
}
