//! Log tailing for tailpoll
//!
//! A [`Streamer`] tails a file or long-running commands, a [`LogPoller`]
//! filters and dedups its lines into a buffer that is flushed into a
//! [`tailpoll_poller::Poller`] queue, and [`scan::scan`] reads back the end of
//! a log without tailing it.

mod buffer;
mod filter;
mod poller;
mod process;
pub mod scan;
mod stream;
pub mod time;

pub use buffer::ItemBuffer;
pub use filter::{Filters, Verdict, reject_match, select_match};
pub use poller::{FindError, Hooks, LogPoller, LogPollerError, SeekInfoSyncer};
pub use process::ProcessMatchedFn;
pub use scan::{ScanError, ScanOptions};
pub use stream::{
    DEFAULT_TAIL_INTERVAL, Line, Source, StreamError, StreamEvent, StreamOptions, Streamer,
};
pub use time::ExtractTimeFn;

// Re-export types used in our public API
pub use tailpoll_types::{Filter, FilterError, Item, LogConfig, SeekInfo, Whence};
