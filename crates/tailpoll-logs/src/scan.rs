//! Bounded backward read of a file or of command output

use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;

use tailpoll_types::{ConfigError, DEFAULT_LINES_TO_TAIL, Filter, Item};

use crate::process::{Dedup, LineProcessor, ProcessMatchedFn, Processed};
use crate::time::ExtractTimeFn;

/// Default upper bound on a whole scan
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

const CHUNK_SIZE: usize = 4096;

/// Errors returned by [`scan`]
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to run command {command:?}: {source}")]
    Command {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("scan timed out after {0:?}")]
    Timeout(Duration),

    #[error("scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Options for a tail scan
#[derive(Clone)]
pub struct ScanOptions {
    pub file: Option<String>,
    pub commands: Vec<Vec<String>>,

    /// Number of lines to read back, 0 for the default
    pub lines_to_tail: usize,
    pub dedup: bool,
    pub select_filters: Vec<Filter>,
    pub reject_filters: Vec<Filter>,
    pub extract_time: Option<ExtractTimeFn>,
    pub process_matched: Option<ProcessMatchedFn>,
    pub timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            file: None,
            commands: Vec::new(),
            lines_to_tail: 0,
            dedup: false,
            select_filters: Vec::new(),
            reject_filters: Vec::new(),
            extract_time: None,
            process_matched: None,
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl ScanOptions {
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_commands(mut self, commands: Vec<Vec<String>>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_lines_to_tail(mut self, lines: usize) -> Self {
        self.lines_to_tail = lines;
        self
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_select_filters(mut self, filters: Vec<Filter>) -> Self {
        self.select_filters = filters;
        self
    }

    pub fn with_reject_filters(mut self, filters: Vec<Filter>) -> Self {
        self.reject_filters = filters;
        self
    }

    pub fn with_extract_time(mut self, extract: Option<ExtractTimeFn>) -> Self {
        self.extract_time = extract;
        self
    }

    pub fn with_process_matched(mut self, hook: Option<ProcessMatchedFn>) -> Self {
        self.process_matched = hook;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a file or command has been set
    pub fn has_source(&self) -> bool {
        self.file.is_some() || !self.commands.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match (&self.file, self.commands.is_empty()) {
            (None, true) => Err(ConfigError::NoSource),
            (Some(file), false) => Err(ConfigError::BothSources { file: file.clone() }),
            _ => match self.commands.iter().position(|c| c.is_empty()) {
                Some(index) => Err(ConfigError::EmptyCommand { index }),
                None => Ok(()),
            },
        }
    }
}

/// Read the last `lines_to_tail` lines, newest first, and call `f` with
/// every line that passes the filters. Returns the number of lines passed
/// to `f`.
///
/// Blank lines are always skipped and count towards `lines_to_tail`. With
/// dedup enabled a line already emitted by this scan is never emitted again.
pub async fn scan<F>(opts: ScanOptions, mut f: F) -> Result<usize, ScanError>
where
    F: FnMut(Item),
{
    opts.validate()?;
    let dedup = if opts.dedup {
        Dedup::Unique(HashSet::new())
    } else {
        Dedup::Off
    };
    let mut processor = LineProcessor::new(
        &opts.select_filters,
        &opts.reject_filters,
        dedup,
        true,
        opts.extract_time.clone(),
        opts.process_matched.clone(),
    )?;

    let lines_to_tail = if opts.lines_to_tail == 0 {
        DEFAULT_LINES_TO_TAIL
    } else {
        opts.lines_to_tail
    };

    let read = async {
        match &opts.file {
            Some(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || {
                    last_lines(Path::new(&path), lines_to_tail)
                        .map_err(|source| ScanError::Read { path, source })
                })
                .await?
            }
            None => command_last_lines(&opts.commands, lines_to_tail).await,
        }
    };
    let lines = tokio::time::timeout(opts.timeout, read)
        .await
        .map_err(|_| ScanError::Timeout(opts.timeout))??;

    tracing::debug!(
        file = opts.file.as_deref().unwrap_or_default(),
        commands = opts.commands.len(),
        lines = lines.len(),
        "scanned"
    );

    let observed = Utc::now();
    let mut count = 0;
    for raw in lines {
        let item = match processor.process(&raw, observed) {
            Processed::Keep {
                time,
                text,
                matched,
            } => Item {
                time,
                line: text,
                matched: matched.map(|filter| (*filter).clone()),
                error: None,
            },
            Processed::Drop => continue,
            Processed::Error(err) => Item::from_error(observed, err),
        };
        f(item);
        count += 1;
    }
    Ok(count)
}

/// Up to `n` lines from the end of a file, newest first.
///
/// The file is read backwards in fixed size chunks so only the scanned tail is
/// ever loaded. A final line without a trailing newline is still returned.
fn last_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let mut file = std::fs::File::open(path)?;
    let mut pos = file.seek(SeekFrom::End(0))?;

    let mut lines = Vec::new();
    // bytes of the line being assembled, in reverse order
    let mut current = Vec::new();
    let mut at_end = true;
    let mut chunk = vec![0u8; CHUNK_SIZE];

    while pos > 0 {
        let size = CHUNK_SIZE.min(pos as usize);
        pos -= size as u64;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut chunk[..size])?;

        for &byte in chunk[..size].iter().rev() {
            if byte == b'\n' {
                if at_end {
                    at_end = false;
                    continue;
                }
                lines.push(reversed_line(&mut current));
                if lines.len() >= n {
                    return Ok(lines);
                }
            } else {
                current.push(byte);
            }
            at_end = false;
        }
    }

    if !current.is_empty() && lines.len() < n {
        lines.push(reversed_line(&mut current));
    }
    Ok(lines)
}

fn reversed_line(current: &mut Vec<u8>) -> String {
    current.reverse();
    let line = String::from_utf8_lossy(current).into_owned();
    current.clear();
    line
}

/// Run every command to completion and return the last `n` lines of their
/// combined output, newest first
async fn command_last_lines(commands: &[Vec<String>], n: usize) -> Result<Vec<String>, ScanError> {
    let mut output = Vec::new();
    for args in commands {
        let Some((program, rest)) = args.split_first() else {
            continue;
        };
        let result = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ScanError::Command {
                command: args.join(" "),
                source,
            })?;
        if !result.status.success() {
            tracing::debug!(command = %args.join(" "), status = %result.status, "command exited with failure");
        }
        output.extend_from_slice(&result.stdout);
    }

    let text = String::from_utf8_lossy(&output);
    Ok(text.lines().rev().take(n).map(str::to_string).collect())
}
