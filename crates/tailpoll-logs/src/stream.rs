use std::collections::BTreeMap;
use std::io::{self, Seek};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncSeekExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tailpoll_types::{ConfigError, DEFAULT_TAIL_INTERVAL_MS, Filter, SeekInfo, Whence};

use crate::process::{Dedup, LineProcessor, ProcessMatchedFn, Processed};
use crate::time::ExtractTimeFn;

/// Default interval between two stats of a tailed file
pub const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_millis(DEFAULT_TAIL_INTERVAL_MS);

const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Errors starting a line source
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to open {path:?}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to seek {path:?} to {seek:?}: {source}")]
    Seek {
        path: String,
        seek: SeekInfo,
        #[source]
        source: io::Error,
    },

    #[error("no commands provided")]
    NoCommands,

    #[error("failed to start command {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Where lines come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    File(String),
    Commands(Vec<Vec<String>>),
}

/// A line produced by a [`Streamer`]
#[derive(Clone, Debug)]
pub struct Line {
    pub time: DateTime<Utc>,
    pub text: String,
    pub matched: Option<Arc<Filter>>,
    pub error: Option<String>,
    pub seek_info: SeekInfo,
}

impl Line {
    fn error(error: impl ToString, seek_info: SeekInfo) -> Self {
        Self {
            time: Utc::now(),
            text: String::new(),
            matched: None,
            error: Some(error.to_string()),
            seek_info,
        }
    }
}

/// What a [`Streamer`] reports
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Line(Line),

    /// Lines up to this position were read but none of them was kept
    Skipped(SeekInfo),
}

/// Options for a [`Streamer`]
#[derive(Clone)]
pub struct StreamOptions {
    pub dedup: bool,
    pub skip_empty_line: bool,
    pub select_filters: Vec<Filter>,
    pub reject_filters: Vec<Filter>,
    pub extract_time: Option<ExtractTimeFn>,
    pub process_matched: Option<ProcessMatchedFn>,
    pub labels: BTreeMap<String, String>,
    pub tail_interval: Duration,
    pub start_at_beginning: bool,
    pub channel_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            dedup: false,
            skip_empty_line: false,
            select_filters: Vec::new(),
            reject_filters: Vec::new(),
            extract_time: None,
            process_matched: None,
            labels: BTreeMap::new(),
            tail_interval: DEFAULT_TAIL_INTERVAL,
            start_at_beginning: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl StreamOptions {
    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_skip_empty_line(mut self, skip: bool) -> Self {
        self.skip_empty_line = skip;
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

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_tail_interval(mut self, interval: Duration) -> Self {
        self.tail_interval = interval;
        self
    }

    pub fn with_start_at_beginning(mut self, start: bool) -> Self {
        self.start_at_beginning = start;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    fn processor(&self) -> Result<LineProcessor, ConfigError> {
        let dedup = if self.dedup {
            Dedup::Consecutive(None)
        } else {
            Dedup::Off
        };
        LineProcessor::new(
            &self.select_filters,
            &self.reject_filters,
            dedup,
            self.skip_empty_line,
            self.extract_time.clone(),
            self.process_matched.clone(),
        )
    }

    fn span(&self) -> tracing::Span {
        let labels = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        tracing::info_span!("tail", %labels)
    }
}

/// Live tail of a file or of long-running command output.
///
/// Lines are produced by a background task and read with [`Streamer::line`].
/// Must be created inside a tokio runtime.
pub struct Streamer {
    source: Source,
    seek_info: SeekInfo,
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Streamer {
    /// Tail a file in polling mode, resuming from `seek_info` if given
    pub fn from_file(
        path: impl Into<String>,
        seek_info: Option<SeekInfo>,
        opts: StreamOptions,
        parent: &CancellationToken,
    ) -> Result<Self, StreamError> {
        let path = path.into();
        let processor = opts.processor()?;

        let mut file = std::fs::File::open(&path).map_err(|source| StreamError::Open {
            path: path.clone(),
            source,
        })?;
        let metadata = file.metadata().map_err(|source| StreamError::Open {
            path: path.clone(),
            source,
        })?;

        let seek = match seek_info {
            // file shrank while we were away, it is not the file we left
            Some(seek) if seek.whence == Whence::Start && seek.offset > metadata.len() as i64 => {
                tracing::info!(
                    path = %path,
                    ?seek,
                    len = metadata.len(),
                    "seek info past end of file, reading from the beginning"
                );
                SeekInfo::default()
            }
            Some(seek) => seek,
            None if opts.start_at_beginning => SeekInfo::default(),
            None => SeekInfo::end(),
        };
        let offset = file
            .seek(seek.to_seek_from())
            .map_err(|source| StreamError::Seek {
                path: path.clone(),
                seek,
                source,
            })?;

        let tail = FileTail {
            path: PathBuf::from(&path),
            reader: Some(BufReader::new(tokio::fs::File::from_std(file))),
            identity: file_identity(&metadata),
            offset,
            read_ahead: 0,
            partial: Vec::new(),
            failing: false,
        };

        let cancel = parent.child_token();
        let (tx, rx) = mpsc::channel(opts.channel_capacity);
        let task = tokio::spawn(
            tail_file(tail, processor, tx, opts.tail_interval, cancel.clone())
                .instrument(opts.span()),
        );

        Ok(Self {
            source: Source::File(path),
            seek_info: SeekInfo::start(offset),
            rx,
            cancel,
            task: Some(task),
        })
    }

    /// Tail the combined stdout of long-running commands
    pub fn from_commands(
        commands: Vec<Vec<String>>,
        opts: StreamOptions,
        parent: &CancellationToken,
    ) -> Result<Self, StreamError> {
        if commands.is_empty() {
            return Err(StreamError::NoCommands);
        }
        let processor = opts.processor()?;

        let mut children = Vec::with_capacity(commands.len());
        let mut streams = SelectAll::new();
        for (index, args) in commands.iter().enumerate() {
            let mut child = spawn(args).map_err(|source| match source {
                SpawnError::Empty => StreamError::Config(ConfigError::EmptyCommand { index }),
                SpawnError::Io(source) => StreamError::Spawn {
                    command: args.join(" "),
                    source,
                },
            })?;
            if let Some(stdout) = child.stdout.take() {
                streams.push(line_stream(stdout));
            }
            children.push(child);
        }

        let cancel = parent.child_token();
        let (tx, rx) = mpsc::channel(opts.channel_capacity);
        let task = tokio::spawn(
            tail_commands(children, streams, processor, tx, cancel.clone())
                .instrument(opts.span()),
        );

        Ok(Self {
            source: Source::Commands(commands),
            seek_info: SeekInfo::default(),
            rx,
            cancel,
            task: Some(task),
        })
    }

    /// Wait for the next event. `None` once the source is closed or exhausted.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Wait for the next line, ignoring position-only events
    pub async fn line(&mut self) -> Option<Line> {
        loop {
            if let StreamEvent::Line(line) = self.rx.recv().await? {
                return Some(line);
            }
        }
    }

    /// Position the file tail started from, default for commands
    pub fn seek_info(&self) -> SeekInfo {
        self.seek_info
    }

    /// The tailed file, empty for command sources
    pub fn file(&self) -> &str {
        match &self.source {
            Source::File(path) => path,
            Source::Commands(_) => "",
        }
    }

    /// The tailed commands, empty for file sources
    pub fn commands(&self) -> &[Vec<String>] {
        match &self.source {
            Source::File(_) => &[],
            Source::Commands(commands) => commands,
        }
    }

    /// Stop tailing. Kills subprocesses and releases the file handle.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    /// Close and wait for the background task to exit
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read position in a tailed file
struct FileTail {
    path: PathBuf,
    reader: Option<BufReader<tokio::fs::File>>,
    identity: Option<u64>,

    /// Byte position right after the last complete line
    offset: u64,

    /// Bytes of `partial` already read past `offset`
    read_ahead: u64,

    /// Incomplete trailing line waiting for its newline
    partial: Vec<u8>,

    /// Set while the file cannot be read, so the failure is reported once
    failing: bool,
}

impl FileTail {
    /// Reopen the file if it was rotated, truncated or lost after an error
    async fn refresh(&mut self) -> io::Result<()> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        let identity = file_identity(&metadata);
        let same_file =
            identity == self.identity && metadata.len() >= self.offset + self.read_ahead;
        if self.reader.is_some() && same_file {
            return Ok(());
        }

        let start = if same_file { self.offset } else { 0 };
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(start)).await?;
        if !same_file {
            tracing::info!(path = ?self.path, "file rotated or truncated, reading from the beginning");
        }

        self.reader = Some(BufReader::new(file));
        self.identity = identity;
        self.offset = start;
        self.read_ahead = 0;
        self.partial.clear();
        Ok(())
    }

    /// Next complete line, `None` at end of file
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        loop {
            let n = reader.read_until(b'\n', &mut self.partial).await?;
            if n == 0 {
                return Ok(None);
            }
            self.read_ahead += n as u64;
            if self.partial.last() == Some(&b'\n') {
                self.offset += self.read_ahead;
                self.read_ahead = 0;
                let raw = std::mem::take(&mut self.partial);
                return Ok(Some(String::from_utf8_lossy(&raw).into_owned()));
            }
        }
    }

    fn seek_info(&self) -> SeekInfo {
        SeekInfo::start(self.offset)
    }
}

#[cfg(unix)]
fn file_identity(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_identity(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

async fn send(
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    event: StreamEvent,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        result = tx.send(event) => result.is_ok(),
    }
}

async fn tail_file(
    mut tail: FileTail,
    mut processor: LineProcessor,
    tx: mpsc::Sender<StreamEvent>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!(path = ?tail.path, offset = tail.offset, "tailing file");

    // offset carried by the last event sent
    let mut reported = tail.offset;

    'poll: loop {
        match tail.refresh().await {
            Ok(()) if tail.failing => {
                tracing::info!(path = ?tail.path, "file readable again");
                tail.failing = false;
            }
            Ok(()) => {}
            Err(err) => {
                tail.reader = None;
                if !tail.failing {
                    tail.failing = true;
                    tracing::warn!(path = ?tail.path, error = %err, "failed to stat file");
                    reported = tail.offset;
                    let line = Line::error(err, tail.seek_info());
                    if !send(&tx, &cancel, StreamEvent::Line(line)).await {
                        break 'poll;
                    }
                }
            }
        }

        loop {
            match tail.next_line().await {
                Ok(Some(raw)) => {
                    let line = match processor.process(&raw, Utc::now()) {
                        Processed::Keep {
                            time,
                            text,
                            matched,
                        } => Line {
                            time,
                            text,
                            matched,
                            error: None,
                            seek_info: tail.seek_info(),
                        },
                        Processed::Drop => continue,
                        Processed::Error(err) => Line::error(err, tail.seek_info()),
                    };
                    reported = tail.offset;
                    if !send(&tx, &cancel, StreamEvent::Line(line)).await {
                        break 'poll;
                    }
                }
                Ok(None) => {
                    if tail.offset != reported {
                        reported = tail.offset;
                        let skipped = StreamEvent::Skipped(tail.seek_info());
                        if !send(&tx, &cancel, skipped).await {
                            break 'poll;
                        }
                    }
                    break;
                }
                Err(err) => {
                    tracing::warn!(path = ?tail.path, error = %err, "failed to read file");
                    tail.reader = None;
                    reported = tail.offset;
                    let line = Line::error(err, tail.seek_info());
                    if !send(&tx, &cancel, StreamEvent::Line(line)).await {
                        break 'poll;
                    }
                    break;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break 'poll,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(path = ?tail.path, "file tail stopped");
}

enum SpawnError {
    Empty,
    Io(io::Error),
}

fn spawn(args: &[String]) -> Result<Child, SpawnError> {
    let (program, rest) = args.split_first().ok_or(SpawnError::Empty)?;
    Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(SpawnError::Io)
}

/// Lines of a reader; a read error is yielded once and ends the stream
pub(crate) fn line_stream<R>(reader: R) -> BoxStream<'static, io::Result<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(BufReader::new(reader)), |reader| async move {
        let mut reader = reader?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(String::from_utf8_lossy(&buf).into_owned()), Some(reader))),
            Err(err) => Some((Err(err), None)),
        }
    })
    .boxed()
}

async fn tail_commands(
    mut children: Vec<Child>,
    mut lines: SelectAll<BoxStream<'static, io::Result<String>>>,
    mut processor: LineProcessor,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    tracing::debug!(commands = children.len(), "tailing command output");

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next() => next,
        };
        let line = match next {
            None => break,
            Some(Ok(raw)) => match processor.process(&raw, Utc::now()) {
                Processed::Keep {
                    time,
                    text,
                    matched,
                } => Line {
                    time,
                    text,
                    matched,
                    error: None,
                    seek_info: SeekInfo::default(),
                },
                Processed::Drop => continue,
                Processed::Error(err) => Line::error(err, SeekInfo::default()),
            },
            Some(Err(err)) => {
                tracing::warn!(error = %err, "failed to read command output");
                Line::error(err, SeekInfo::default())
            }
        };
        if !send(&tx, &cancel, StreamEvent::Line(line)).await {
            break;
        }
    }

    for child in &mut children {
        if let Err(err) = child.kill().await {
            tracing::debug!(error = %err, "failed to kill command");
        }
    }
    tracing::debug!("command tail stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn collect(streamer: &mut Streamer, n: usize) -> Vec<Line> {
        let mut lines = Vec::new();
        while lines.len() < n {
            match tokio::time::timeout(Duration::from_secs(5), streamer.line()).await {
                Ok(Some(line)) => lines.push(line),
                _ => break,
            }
        }
        lines
    }

    fn fast() -> StreamOptions {
        StreamOptions::default().with_tail_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_file_tail_from_end() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "old line").unwrap();

        let cancel = CancellationToken::new();
        let path = file.path().to_string_lossy().to_string();
        let mut streamer = Streamer::from_file(&path, None, fast(), &cancel).unwrap();
        assert_eq!(streamer.file(), path);
        assert!(streamer.commands().is_empty());
        assert_eq!(streamer.seek_info(), SeekInfo::start(9));

        writeln!(file, "new line").unwrap();
        let lines = collect(&mut streamer, 1).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "new line");
        assert_eq!(lines[0].seek_info, SeekInfo::start(18));
        assert_eq!(lines[0].seek_info.whence, Whence::Start);
    }

    #[tokio::test]
    async fn test_file_tail_resume_and_partial_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "one\ntwo\nthr").unwrap();

        let cancel = CancellationToken::new();
        let path = file.path().to_string_lossy().to_string();
        let mut streamer =
            Streamer::from_file(&path, Some(SeekInfo::start(4)), fast(), &cancel).unwrap();

        let lines = collect(&mut streamer, 1).await;
        assert_eq!(lines[0].text, "two");
        assert_eq!(lines[0].seek_info, SeekInfo::start(8));

        write!(file, "ee\n").unwrap();
        let lines = collect(&mut streamer, 1).await;
        assert_eq!(lines[0].text, "three");
        assert_eq!(lines[0].seek_info, SeekInfo::start(14));
    }

    #[tokio::test]
    async fn test_dropped_lines_report_their_position() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a\nx\nx\n\n").unwrap();

        let cancel = CancellationToken::new();
        let path = file.path().to_string_lossy().to_string();
        let opts = fast()
            .with_dedup(true)
            .with_skip_empty_line(true)
            .with_start_at_beginning(true);
        let mut streamer = Streamer::from_file(&path, None, opts, &cancel).unwrap();
        assert_eq!(streamer.seek_info(), SeekInfo::start(0));

        let mut events = Vec::new();
        while events.len() < 3 {
            match tokio::time::timeout(Duration::from_secs(5), streamer.next()).await {
                Ok(Some(event)) => events.push(event),
                _ => break,
            }
        }
        let kept: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Line(line) => Some((line.text.as_str(), line.seek_info)),
                StreamEvent::Skipped(_) => None,
            })
            .collect();
        assert_eq!(kept, vec![("a", SeekInfo::start(2)), ("x", SeekInfo::start(4))]);
        assert!(matches!(events[2], StreamEvent::Skipped(seek) if seek == SeekInfo::start(7)));

        // nothing new, no further position events
        let quiet = tokio::time::timeout(Duration::from_millis(100), streamer.next()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn test_seek_past_end_resolves_to_beginning() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "short").unwrap();

        let cancel = CancellationToken::new();
        let path = file.path().to_string_lossy().to_string();
        let streamer =
            Streamer::from_file(&path, Some(SeekInfo::start(1000)), fast(), &cancel).unwrap();
        assert_eq!(streamer.seek_info(), SeekInfo::start(0));
    }

    #[tokio::test]
    async fn test_file_truncation_restarts_from_beginning() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let cancel = CancellationToken::new();
        let path = file.path().to_string_lossy().to_string();
        let opts = fast().with_start_at_beginning(true);
        let mut streamer = Streamer::from_file(&path, None, opts, &cancel).unwrap();

        writeln!(file, "a fairly long first line").unwrap();
        assert_eq!(collect(&mut streamer, 1).await[0].text, "a fairly long first line");

        file.as_file().set_len(0).unwrap();
        file.as_file_mut().rewind().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        writeln!(file, "short").unwrap();

        let lines = collect(&mut streamer, 1).await;
        assert_eq!(lines[0].text, "short");
        assert_eq!(lines[0].seek_info, SeekInfo::start(6));
    }

    #[tokio::test]
    async fn test_missing_file_is_construction_error() {
        let cancel = CancellationToken::new();
        let err = Streamer::from_file("/nonexistent/tailpoll.log", None, fast(), &cancel)
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::Open { .. }));
    }

    #[tokio::test]
    async fn test_command_output() {
        let cancel = CancellationToken::new();
        let commands = vec![vec!["echo".to_string(), "[INFO] Test message".to_string()]];
        let mut streamer = Streamer::from_commands(commands.clone(), fast(), &cancel).unwrap();
        assert_eq!(streamer.commands(), commands.as_slice());
        assert_eq!(streamer.file(), "");

        let lines = collect(&mut streamer, 2).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "[INFO] Test message");
        assert_eq!(lines[0].seek_info, SeekInfo::default());
    }

    #[tokio::test]
    async fn test_command_errors() {
        let cancel = CancellationToken::new();
        assert!(matches!(
            Streamer::from_commands(vec![], fast(), &cancel).err().unwrap(),
            StreamError::NoCommands
        ));
        assert!(matches!(
            Streamer::from_commands(vec![vec![]], fast(), &cancel).err().unwrap(),
            StreamError::Config(ConfigError::EmptyCommand { index: 0 })
        ));
        assert!(matches!(
            Streamer::from_commands(
                vec![vec!["tailpoll-nonexistent-command".to_string()]],
                fast(),
                &cancel
            )
            .err()
            .unwrap(),
            StreamError::Spawn { .. }
        ));
    }

    #[tokio::test]
    async fn test_close_kills_long_running_command() {
        let cancel = CancellationToken::new();
        let commands = vec![vec!["sleep".to_string(), "30".to_string()]];
        let streamer = Streamer::from_commands(commands, fast(), &cancel).unwrap();

        tokio::time::timeout(Duration::from_secs(5), streamer.shutdown())
            .await
            .expect("shutdown should not wait for the command to finish");
    }

    #[tokio::test]
    async fn test_parent_cancel_ends_stream() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cancel = CancellationToken::new();
        let path = file.path().to_string_lossy().to_string();
        let mut streamer = Streamer::from_file(&path, None, fast(), &cancel).unwrap();

        cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(5), streamer.line()).await;
        assert!(matches!(next, Ok(None)));
    }
}
