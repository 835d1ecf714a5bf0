//! Timestamp extraction for common log line layouts

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};

use tailpoll_types::TimeFormat;

/// Parses the timestamp embedded in a raw line. `None` falls back to the
/// time the line was observed.
pub type ExtractTimeFn = Arc<dyn Fn(&str) -> Option<DateTime<Utc>> + Send + Sync>;

/// Built-in extractor for a configured format
pub fn extractor(format: TimeFormat) -> Option<ExtractTimeFn> {
    match format {
        TimeFormat::None => None,
        TimeFormat::Rfc3339 => Some(Arc::new(rfc3339_prefix) as ExtractTimeFn),
        TimeFormat::Dmesg => Some(Arc::new(dmesg_iso) as ExtractTimeFn),
        TimeFormat::Bracketed => Some(Arc::new(bracketed) as ExtractTimeFn),
    }
}

/// RFC 3339 timestamp at the start of the line, as written by container
/// runtimes: `2024-01-15T10:30:00.123456789Z some log message`
pub fn rfc3339_prefix(raw: &str) -> Option<DateTime<Utc>> {
    let token = leading_token(raw)?;
    DateTime::parse_from_rfc3339(token)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// ISO timestamp written by `dmesg --time-format=iso`:
/// `2024-01-15T10:30:00,123456+00:00 kernel message`
pub fn dmesg_iso(raw: &str) -> Option<DateTime<Utc>> {
    let token = leading_token(raw)?;
    DateTime::parse_from_rfc3339(&token.replacen(',', ".", 1))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Bracketed local timestamp, read as UTC: `[Jan 15 2024 10:30:00] message`
pub fn bracketed(raw: &str) -> Option<DateTime<Utc>> {
    let rest = raw.strip_prefix('[')?;
    let end = rest.find(']')?;
    NaiveDateTime::parse_from_str(&rest[..end], "%b %d %Y %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// The first whitespace separated token, looked for only near the start
fn leading_token(raw: &str) -> Option<&str> {
    // nanosecond precision with a numeric offset is 35 chars
    let search_end = floor_char_boundary(raw, 40.min(raw.len()));
    let head = raw.get(..search_end)?;
    let token = head.split_whitespace().next()?;
    (token.len() >= 20).then_some(token)
}

/// Find the largest valid char boundary <= the given byte index
fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
