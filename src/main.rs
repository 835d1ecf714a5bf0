use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use tailpoll_logs::{Filter, Hooks, Item, LogPoller, ScanOptions, SeekInfo, scan, time};
use tailpoll_poller::PollError;
use tailpoll_types::TimeFormat;

mod config;
mod state;

use config::DaemonConfig;
use state::SeekStore;

/// Caller name used to start the scheduler of every poller
const CALLER: &str = "daemon";

/// Tailpoll - tail kernel and service logs into a queryable event history
#[derive(Parser, Debug)]
#[command(name = "tailpoll")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Tail every configured source until interrupted
    Run {
        /// Path to the TOML config file
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Print the last lines of a file or command output as JSON, newest first
    Scan {
        /// File to scan
        #[arg(long, conflicts_with = "command", required_unless_present = "command")]
        file: Option<String>,

        /// Command to run, with its arguments
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        command: Vec<String>,

        /// Number of lines to read back
        #[arg(long, default_value = "1000")]
        lines: usize,

        /// Keep only lines containing one of these substrings
        #[arg(long)]
        select: Vec<String>,

        /// Emit every distinct line only once
        #[arg(long)]
        dedup: bool,

        /// Timestamp layout embedded in the lines (rfc3339, dmesg, bracketed)
        #[arg(long)]
        time_format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match args.command {
        Cmd::Run { config } => run(config).await,
        Cmd::Scan {
            file,
            command,
            lines,
            select,
            dedup,
            time_format,
        } => {
            let mut opts = ScanOptions::default()
                .with_lines_to_tail(lines)
                .with_dedup(dedup)
                .with_select_filters(
                    select
                        .into_iter()
                        .enumerate()
                        .map(|(i, s)| Filter::substring(format!("select-{}", i + 1), s))
                        .collect(),
                );
            if let Some(format) = time_format {
                opts = opts.with_extract_time(time::extractor(parse_time_format(&format)?));
            }
            opts = match file {
                Some(file) => opts.with_file(file),
                None => opts.with_commands(vec![command]),
            };
            scan_once(opts).await
        }
    };

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

fn parse_time_format(s: &str) -> Result<TimeFormat> {
    Ok(match s {
        "none" => TimeFormat::None,
        "rfc3339" => TimeFormat::Rfc3339,
        "dmesg" => TimeFormat::Dmesg,
        "bracketed" => TimeFormat::Bracketed,
        other => bail!("unknown time format {other:?}"),
    })
}

async fn scan_once(opts: ScanOptions) -> Result<()> {
    let mut items = Vec::new();
    scan::scan(opts, |item| items.push(item)).await?;
    for item in items {
        println!("{}", item.to_json()?);
    }
    Ok(())
}

async fn run(config_path: PathBuf) -> Result<()> {
    let cfg = DaemonConfig::load(&config_path)?;
    let store = Arc::new(SeekStore::load(&cfg.state_file));
    let cancel = CancellationToken::new();

    let mut pollers = Vec::with_capacity(cfg.sources.len());
    for mut source in cfg.sources.clone() {
        let name = source.source_name();
        if source.seek_info.is_none() {
            source.seek_info = store.get(&name);
        }

        let poller = LogPoller::new(source, seek_hooks(&store, &name), &cancel)
            .with_context(|| format!("failed to start source {name:?}"))?;
        tracing::info!(
            source = %name,
            seek_info = ?poller.seek_info(),
            "tailing"
        );

        backfill(&name, &poller).await;
        poller.start(CALLER);
        pollers.push((name, poller));
    }

    // time of the newest batch already reported, per source
    let mut reported: HashMap<String, DateTime<Utc>> = HashMap::new();
    let mut ticker = tokio::time::interval(cfg.report_interval());
    ticker.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                tracing::info!("shutting down");
                break;
            }
            _ = ticker.tick() => {
                for (name, poller) in &pollers {
                    if let Some(newest) = report(name, poller, reported.get(name).copied()) {
                        reported.insert(name.clone(), newest);
                    }
                }
            }
        }
    }

    cancel.cancel();
    for (name, poller) in &pollers {
        poller.stop(CALLER);
        poller.flush_now();
        report(name, poller, reported.get(name).copied());
    }
    store
        .save()
        .with_context(|| format!("failed to save state to {}", store.path().display()))?;
    Ok(())
}

/// Persist the seek info of `name` on every ingested line
fn seek_hooks(store: &Arc<SeekStore>, name: &str) -> Hooks {
    let store = Arc::clone(store);
    let name = name.to_string();
    Hooks {
        seek_info_syncer: Some(Arc::new(move |_file: &str, seek_info: SeekInfo| {
            if let Err(err) = store.sync(&name, seek_info) {
                tracing::warn!(source = %name, error = %err, "failed to persist seek info");
            }
        })),
        ..Default::default()
    }
}

/// Log the matches already in the file before tailing started
async fn backfill(name: &str, poller: &LogPoller) {
    if poller.log_config().scan.is_none() {
        return;
    }
    match poller.tail_scan(ScanOptions::default().with_dedup(true)).await {
        Ok(items) => {
            tracing::info!(source = %name, items = items.len(), "backfilled");
            for item in items.iter().rev() {
                log_item(name, item);
            }
        }
        Err(err) => tracing::warn!(source = %name, error = %err, "backfill failed"),
    }
}

/// Log the items of every batch flushed after `since`. Returns the time of
/// the newest batch seen.
fn report(name: &str, poller: &LogPoller, since: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let batches = match poller.scheduler().all(since) {
        Ok(batches) => batches,
        Err(PollError::NoData) => {
            tracing::debug!(source = %name, "no new items");
            return since;
        }
    };

    let mut newest = since;
    for batch in batches {
        if since.is_some_and(|since| batch.time <= since) {
            continue;
        }
        newest = Some(batch.time);
        if let Some(error) = &batch.error {
            tracing::warn!(source = %name, error = %error, "flush failed");
            continue;
        }
        for item in batch.output.iter().flatten() {
            log_item(name, item);
        }
    }
    newest
}

fn log_item(source: &str, item: &Item) {
    let matched = item.matched.as_ref().map(|f| f.name.as_str()).unwrap_or_default();
    match &item.error {
        Some(error) => tracing::warn!(source, time = %item.time, error = %error, "read error"),
        None => tracing::info!(source, time = %item.time, matched, line = %item.line, "item"),
    }
}
