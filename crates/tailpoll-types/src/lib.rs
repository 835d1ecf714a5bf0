//! Shared types for tailpoll
//!
//! This crate contains data structures used across multiple tailpoll crates.

mod config;
mod filter;

use std::io::SeekFrom;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use config::{
    ConfigError, DEFAULT_BUFFER_SIZE, DEFAULT_LINES_TO_TAIL, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_QUEUE_SIZE, DEFAULT_TAIL_INTERVAL_MS, LogConfig, PollConfig, ScanConfig, TimeFormat,
};
pub use filter::{Filter, FilterError};

// ============================================================================
// Position Types
// ============================================================================

/// Reference point for a [`SeekInfo`] offset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Whence {
    #[default]
    Start,
    Current,
    End,
}

/// Resumable position inside a tailed source.
///
/// For files the offset is the byte position right after the last consumed
/// line. Command output has no stable position and always reports the default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeekInfo {
    pub offset: i64,
    pub whence: Whence,
}

impl SeekInfo {
    /// Absolute position from the start of the file
    pub fn start(offset: u64) -> Self {
        Self {
            offset: offset as i64,
            whence: Whence::Start,
        }
    }

    /// The current end of the file
    pub fn end() -> Self {
        Self {
            offset: 0,
            whence: Whence::End,
        }
    }

    /// Convert to the std seek target
    pub fn to_seek_from(&self) -> SeekFrom {
        match self.whence {
            Whence::Start => SeekFrom::Start(self.offset.max(0) as u64),
            Whence::Current => SeekFrom::Current(self.offset),
            Whence::End => SeekFrom::End(self.offset),
        }
    }
}

// ============================================================================
// Item Types
// ============================================================================

/// Errors decoding a persisted [`Item`]
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("invalid item json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// A single log line as exported by the poller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Embedded log timestamp, or the time the line was observed
    #[serde(default)]
    pub time: DateTime<Utc>,

    /// Raw line text
    #[serde(default)]
    pub line: String,

    /// Filter that selected this line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<Filter>,

    /// Read or parse failure for this line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Item {
    /// Create an item with no match and no error
    pub fn new(time: DateTime<Utc>, line: impl Into<String>) -> Self {
        Self {
            time,
            line: line.into(),
            matched: None,
            error: None,
        }
    }

    /// Create an item carrying an ingestion error
    pub fn from_error(time: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            time,
            line: String::new(),
            matched: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode an item, recompiling the matched filter's regex
    pub fn from_json(data: &str) -> Result<Self, ItemError> {
        let item: Item = serde_json::from_str(data)?;
        if let Some(matched) = &item.matched {
            matched.compile()?;
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jan_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_item_json_basic() {
        let item = Item::new(jan_first(), "test log line");
        let json = item.to_json().unwrap();
        assert_eq!(json, r#"{"time":"2024-01-01T00:00:00Z","line":"test log line"}"#);

        let parsed = Item::from_json(&json).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn test_item_json_with_error() {
        let mut item = Item::new(jan_first(), "test log line");
        item.error = Some("test error".to_string());
        let json = item.to_json().unwrap();
        assert!(json.ends_with(r#""error":"test error"}"#));
        assert_eq!(Item::from_json(&json).unwrap().error.as_deref(), Some("test error"));
    }

    #[test]
    fn test_item_json_matched_filter_round_trip() {
        let mut item = Item::new(jan_first(), "test log line");
        item.matched = Some(Filter::regex("test filter", "test.*"));

        let json = item.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"time":"2024-01-01T00:00:00Z","line":"test log line","matched":{"name":"test filter","regex":"test.*"}}"#
        );

        let parsed = Item::from_json(&json).unwrap();
        let original = item.matched.as_ref().unwrap();
        let decoded = parsed.matched.as_ref().unwrap();
        assert!(decoded.is_compiled());
        for sample in ["test sample", "testing", "no match here", "a test"] {
            assert_eq!(
                original.matches(sample).unwrap(),
                decoded.matches(sample).unwrap(),
                "line {sample:?}"
            );
        }
    }

    #[test]
    fn test_parse_item_json_errors() {
        assert!(Item::from_json("invalid json").is_err());
        assert!(Item::from_json("{}").is_ok());

        let err = Item::from_json(
            r#"{"time":"2024-01-01T00:00:00Z","line":"test","matched":{"regex":"[invalid"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ItemError::Filter(FilterError::InvalidRegex { .. })));
    }

    #[test]
    fn test_seek_info_conversion() {
        assert_eq!(SeekInfo::start(42).to_seek_from(), SeekFrom::Start(42));
        assert_eq!(SeekInfo::end().to_seek_from(), SeekFrom::End(0));
        assert_eq!(SeekInfo::default().to_seek_from(), SeekFrom::Start(0));
    }

    #[test]
    fn test_seek_info_json() {
        let json = serde_json::to_string(&SeekInfo::start(7)).unwrap();
        assert_eq!(json, r#"{"offset":7,"whence":"start"}"#);
    }
}
