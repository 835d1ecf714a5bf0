use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tailpoll_poller::{GetFn, GetFuture, PollError, PollItem, Poller};
use tailpoll_types::{ConfigError, Filter, FilterError, Item, LogConfig, SeekInfo};

use crate::buffer::{ItemBuffer, narrow};
use crate::process::ProcessMatchedFn;
use crate::scan::{self, ScanError, ScanOptions};
use crate::stream::{Line, StreamError, StreamEvent, StreamOptions, Streamer};
use crate::time::{self, ExtractTimeFn};

/// Persists the position of a tailed file, called with the file path
pub type SeekInfoSyncer = Arc<dyn Fn(&str, SeekInfo) + Send + Sync>;

/// Errors constructing a [`LogPoller`]
#[derive(Debug, thiserror::Error)]
pub enum LogPollerError {
    #[error("invalid log poller config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Errors returned by [`LogPoller::find`]
#[derive(Debug, thiserror::Error)]
pub enum FindError {
    #[error("no data collected yet in the poller")]
    NoData,

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Caller supplied callbacks
#[derive(Clone, Default)]
pub struct Hooks {
    /// Overrides the extractor selected by `time_format`
    pub extract_time: Option<ExtractTimeFn>,
    pub process_matched: Option<ProcessMatchedFn>,
    pub seek_info_syncer: Option<SeekInfoSyncer>,
}

struct SeekState {
    info: SeekInfo,
    syncer: Option<SeekInfoSyncer>,
}

struct Shared {
    file: String,
    buffer: ItemBuffer,

    /// Never held together with the buffer lock
    seek: RwLock<SeekState>,
}

impl Shared {
    fn record(&self, line: Line) {
        let seek_info = line.seek_info;
        self.buffer.push(Item {
            time: line.time,
            line: line.text,
            matched: line.matched.map(Arc::unwrap_or_clone),
            error: line.error,
        });

        self.advance(seek_info);
    }

    /// Move the position forward and hand it to the syncer
    fn advance(&self, seek_info: SeekInfo) {
        if self.file.is_empty() {
            return;
        }
        let mut seek = self.seek.write();
        seek.info = seek_info;
        if let Some(syncer) = &seek.syncer {
            syncer(&self.file, seek_info);
        }
    }
}

/// Tails one log source into a buffer that is periodically flushed into a
/// [`Poller`] queue.
///
/// Lines are ingested on a background task from construction on. The
/// scheduler only flushes once [`LogPoller::start`] has been called.
pub struct LogPoller {
    cfg: LogConfig,
    commands: Vec<Vec<String>>,
    extract_time: Option<ExtractTimeFn>,
    process_matched: Option<ProcessMatchedFn>,
    shared: Arc<Shared>,
    scheduler: Poller<Vec<Item>>,
    cancel: CancellationToken,
}

impl LogPoller {
    /// Validate the config, open the source and start ingesting.
    ///
    /// Must be called inside a tokio runtime. Everything stops when `parent`
    /// is cancelled or the poller is dropped.
    pub fn new(
        mut cfg: LogConfig,
        hooks: Hooks,
        parent: &CancellationToken,
    ) -> Result<Self, LogPollerError> {
        cfg.validate()?;
        cfg.set_defaults();

        let name = cfg.source_name();
        let extract_time = hooks
            .extract_time
            .clone()
            .or_else(|| time::extractor(cfg.time_format));

        let mut opts = StreamOptions::default()
            .with_dedup(cfg.dedup)
            .with_skip_empty_line(true)
            .with_select_filters(cfg.select_filters.clone())
            .with_reject_filters(cfg.reject_filters.clone())
            .with_extract_time(extract_time.clone())
            .with_process_matched(hooks.process_matched.clone())
            .with_tail_interval(cfg.tail_interval())
            .with_start_at_beginning(cfg.start_at_beginning)
            .with_channel_capacity(cfg.buffer_size);

        let cancel = parent.child_token();
        let streamer = match &cfg.file {
            Some(file) => {
                opts = opts.with_label("file", file.as_str());
                Streamer::from_file(file.as_str(), cfg.seek_info, opts, &cancel)?
            }
            None => {
                for (i, args) in cfg.commands.iter().enumerate() {
                    opts = opts.with_label(format!("command-{}", i + 1), args.join(" "));
                }
                Streamer::from_commands(cfg.commands.clone(), opts, &cancel)?
            }
        };

        let shared = Arc::new(Shared {
            file: streamer.file().to_string(),
            buffer: ItemBuffer::with_capacity(cfg.buffer_size),
            seek: RwLock::new(SeekState {
                info: streamer.seek_info(),
                syncer: hooks.seek_info_syncer,
            }),
        });
        let commands = streamer.commands().to_vec();

        tokio::spawn(
            ingest(streamer, Arc::clone(&shared), cancel.clone())
                .instrument(tracing::info_span!("log_poller", name = %name)),
        );

        let buffer = shared.buffer.clone();
        let flush: GetFn<Vec<Item>> = Arc::new(move || -> GetFuture<Vec<Item>> {
            let items = buffer.take();
            tracing::debug!(items = items.len(), "flushing buffered items");
            futures::future::ready(Ok(Some(items))).boxed()
        });
        let scheduler = Poller::new(name.clone(), cfg.poll.clone(), flush, None);

        tracing::info!(name = %name, "log poller created");

        Ok(Self {
            cfg,
            commands,
            extract_time,
            process_matched: hooks.process_matched,
            shared,
            scheduler,
            cancel,
        })
    }

    /// The effective config, with defaults applied
    pub fn log_config(&self) -> &LogConfig {
        &self.cfg
    }

    /// The tailed file, empty for command sources
    pub fn file(&self) -> &str {
        &self.shared.file
    }

    /// The tailed commands, empty for file sources
    pub fn commands(&self) -> &[Vec<String>] {
        &self.commands
    }

    /// Position right after the last consumed line, kept or not
    pub fn seek_info(&self) -> SeekInfo {
        self.shared.seek.read().info
    }

    pub fn set_seek_info_syncer(&self, syncer: Option<SeekInfoSyncer>) {
        self.shared.seek.write().syncer = syncer;
    }

    /// Start periodic flushing on behalf of `caller`
    pub fn start(&self, caller: &str) {
        self.scheduler.start(&self.cancel, caller);
    }

    /// Stop periodic flushing. Returns true if `caller` was the last one.
    /// Ingestion keeps running until the poller is dropped.
    pub fn stop(&self, caller: &str) -> bool {
        self.scheduler.stop(caller)
    }

    /// Move the buffer into the scheduler queue now
    pub fn flush_now(&self) {
        let items = self.shared.buffer.take();
        tracing::debug!(items = items.len(), "flushing buffered items");
        self.scheduler.push(PollItem::output(items));
    }

    pub fn scheduler(&self) -> &Poller<Vec<Item>> {
        &self.scheduler
    }

    /// Items flushed at or after `since` followed by still buffered items at
    /// or after `since`.
    ///
    /// With `filters` only items matching one of them are returned, with
    /// `matched` set to that filter. Flushed items come first and each part
    /// keeps ingestion order; there is no global sort across the two.
    pub fn find(
        &self,
        since: Option<DateTime<Utc>>,
        filters: &[Filter],
    ) -> Result<Vec<Item>, FindError> {
        for filter in filters {
            filter.validate()?;
        }

        let mut items = Vec::new();
        let has_history = match self.scheduler.all(since) {
            Ok(batches) => {
                for batch in batches {
                    if batch.error.is_some() {
                        continue;
                    }
                    let Some(output) = &batch.output else {
                        tracing::warn!(time = %batch.time, "flushed batch has no output");
                        continue;
                    };
                    items.extend(narrow(output, None, filters)?);
                }
                true
            }
            Err(PollError::NoData) => false,
        };

        items.extend(self.shared.buffer.select(since, filters)?);
        if items.is_empty() && !has_history {
            return Err(FindError::NoData);
        }
        Ok(items)
    }

    /// Read back the last lines of the scan source, newest first.
    ///
    /// Unset options fall back to the `scan` config, then to the live source
    /// and its filters. The live buffer and seek info are not touched.
    pub async fn tail_scan(&self, mut opts: ScanOptions) -> Result<Vec<Item>, ScanError> {
        let scan_cfg = self.cfg.scan.clone().unwrap_or_default();
        if !opts.has_source() {
            if scan_cfg.file.is_some() || !scan_cfg.commands.is_empty() {
                opts.file = scan_cfg.file;
                opts.commands = scan_cfg.commands;
            } else {
                opts.file = self.cfg.file.clone();
                opts.commands = self.cfg.commands.clone();
            }
        }
        if opts.lines_to_tail == 0 {
            opts.lines_to_tail = scan_cfg.lines_to_tail;
        }
        if opts.select_filters.is_empty() && opts.reject_filters.is_empty() {
            opts.select_filters = self.cfg.select_filters.clone();
            opts.reject_filters = self.cfg.reject_filters.clone();
        }
        if opts.extract_time.is_none() {
            opts.extract_time = self.extract_time.clone();
        }
        if opts.process_matched.is_none() {
            opts.process_matched = self.process_matched.clone();
        }

        let mut items = Vec::new();
        scan::scan(opts, |item| items.push(item)).await?;
        Ok(items)
    }
}

impl Drop for LogPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn ingest(mut streamer: Streamer, shared: Arc<Shared>, cancel: CancellationToken) {
    tracing::debug!("ingestion started");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = streamer.next() => event,
        };
        match event {
            Some(StreamEvent::Line(line)) => shared.record(line),
            Some(StreamEvent::Skipped(seek_info)) => shared.advance(seek_info),
            None => break,
        }
    }
    streamer.shutdown().await;
    tracing::info!("ingestion stopped");
}
