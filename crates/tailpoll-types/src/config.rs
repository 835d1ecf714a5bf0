use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Filter, FilterError, SeekInfo};

/// Default number of items the live buffer is sized for
pub const DEFAULT_BUFFER_SIZE: usize = 2000;

/// Default flush interval of the poll scheduler
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;

/// Default number of flushed batches kept by the poll scheduler
pub const DEFAULT_QUEUE_SIZE: usize = 60;

/// Default number of lines read by a tail scan
pub const DEFAULT_LINES_TO_TAIL: usize = 10_000;

/// Default interval between two reads of a tailed file
pub const DEFAULT_TAIL_INTERVAL_MS: u64 = 100;

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("one of file or commands must be set")]
    NoSource,

    #[error("file and commands are mutually exclusive (file {file:?})")]
    BothSources { file: String },

    #[error("command #{index} has no arguments")]
    EmptyCommand { index: usize },

    #[error("select_filters and reject_filters are mutually exclusive ({select} select, {reject} reject)")]
    FilterConflict { select: usize, reject: usize },

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Settings for the periodic poll scheduler
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Interval between two polls in milliseconds
    pub interval_ms: u64,

    /// Timeout for a single poll in milliseconds (0 = none)
    pub get_timeout_ms: u64,

    /// Maximum number of results kept in the queue (0 = unbounded)
    pub queue_size: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            get_timeout_ms: 0,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        (self.get_timeout_ms > 0).then(|| Duration::from_millis(self.get_timeout_ms))
    }
}

/// Source used by tail scans when it differs from the live source
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub file: Option<String>,
    pub commands: Vec<Vec<String>>,
    pub lines_to_tail: usize,
}

/// Timestamp layout embedded in the tailed lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFormat {
    /// Use the time a line was observed
    #[default]
    None,
    /// RFC 3339 prefix, e.g. `2024-01-15T10:30:00.123456789Z msg`
    Rfc3339,
    /// `dmesg --time-format=iso` prefix, e.g. `2024-01-15T10:30:00,123456+00:00 msg`
    Dmesg,
    /// Bracketed prefix, e.g. `[Jan 15 2024 10:30:00] msg`
    Bracketed,
}

/// Configuration of one log poller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Display name; derived from the source when empty
    pub name: String,

    /// File to tail (mutually exclusive with `commands`)
    pub file: Option<String>,

    /// Long-running commands whose stdout is tailed
    pub commands: Vec<Vec<String>>,

    /// Keep a line only if one of these matches
    pub select_filters: Vec<Filter>,

    /// Drop a line if any of these matches
    pub reject_filters: Vec<Filter>,

    pub buffer_size: usize,

    /// Drop a line identical to the previously kept one
    pub dedup: bool,

    /// Start a fresh file tail at offset 0 instead of the current end
    pub start_at_beginning: bool,

    /// How often a tailed file is re-read for new lines
    pub tail_interval_ms: u64,

    pub time_format: TimeFormat,

    pub poll: PollConfig,

    pub scan: Option<ScanConfig>,

    /// Position to resume from, usually loaded from a previous run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_info: Option<SeekInfo>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            file: None,
            commands: Vec::new(),
            select_filters: Vec::new(),
            reject_filters: Vec::new(),
            buffer_size: 0,
            dedup: true,
            start_at_beginning: false,
            tail_interval_ms: 0,
            time_format: TimeFormat::default(),
            poll: PollConfig::default(),
            scan: None,
            seek_info: None,
        }
    }
}

impl LogConfig {
    /// Config tailing a file
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            file: Some(path.into()),
            ..Default::default()
        }
    }

    /// Config tailing command output
    pub fn commands(commands: Vec<Vec<String>>) -> Self {
        Self {
            commands,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.file, self.commands.is_empty()) {
            (None, true) => return Err(ConfigError::NoSource),
            (Some(file), false) => {
                return Err(ConfigError::BothSources { file: file.clone() });
            }
            _ => {}
        }
        if let Some(index) = self.commands.iter().position(|c| c.is_empty()) {
            return Err(ConfigError::EmptyCommand { index });
        }

        if !self.select_filters.is_empty() && !self.reject_filters.is_empty() {
            return Err(ConfigError::FilterConflict {
                select: self.select_filters.len(),
                reject: self.reject_filters.len(),
            });
        }
        for filter in self.select_filters.iter().chain(&self.reject_filters) {
            filter.validate()?;
        }

        if let Some(scan) = &self.scan
            && let Some(index) = scan.commands.iter().position(|c| c.is_empty())
        {
            return Err(ConfigError::EmptyCommand { index });
        }
        Ok(())
    }

    pub fn set_defaults(&mut self) {
        if self.buffer_size == 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if self.poll.interval_ms == 0 {
            self.poll.interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if self.tail_interval_ms == 0 {
            self.tail_interval_ms = DEFAULT_TAIL_INTERVAL_MS;
        }
        if self.poll.queue_size < self.buffer_size {
            self.poll.queue_size = self.buffer_size;
        }
        if let Some(scan) = &mut self.scan
            && scan.lines_to_tail == 0
        {
            scan.lines_to_tail = DEFAULT_LINES_TO_TAIL;
        }
    }

    pub fn tail_interval(&self) -> Duration {
        Duration::from_millis(self.tail_interval_ms)
    }

    /// Name used for logging and as the scheduler id
    pub fn source_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        if let Some(file) = &self.file {
            return file.clone();
        }
        self.commands
            .iter()
            .map(|args| args.join(" "))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
