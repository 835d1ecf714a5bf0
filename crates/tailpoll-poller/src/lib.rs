//! Periodic poll scheduler for tailpoll
//!
//! A [`Poller`] runs a get function on a fixed interval and keeps the
//! results in a bounded in-memory queue. It polls rather than watches so
//! that several consumers can share one data source.

mod poller;

pub use poller::{ErrHandler, GetFn, GetFuture, PollError, PollItem, Poller};

// Re-export types used in our public API
pub use tailpoll_types::PollConfig;
