use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use tailpoll_types::{ConfigError, Filter};

use crate::filter::{Filters, Verdict};
use crate::time::ExtractTimeFn;

/// Called for every line kept by a select filter
pub type ProcessMatchedFn = Arc<dyn Fn(DateTime<Utc>, &str, &Filter) + Send + Sync>;

/// How repeated lines are suppressed
#[derive(Debug, Default)]
pub(crate) enum Dedup {
    #[default]
    Off,

    /// Drop a line identical to the previously kept one
    Consecutive(Option<String>),

    /// Drop every line already kept once
    Unique(HashSet<String>),
}

impl Dedup {
    /// Returns true if the line is a repeat and should be dropped
    fn is_repeat(&mut self, text: &str) -> bool {
        match self {
            Self::Off => false,
            Self::Consecutive(last) => {
                if last.as_deref() == Some(text) {
                    return true;
                }
                *last = Some(text.to_string());
                false
            }
            Self::Unique(seen) => !seen.insert(text.to_string()),
        }
    }
}

/// Outcome of processing one raw line
#[derive(Debug)]
pub(crate) enum Processed {
    Keep {
        time: DateTime<Utc>,
        text: String,
        matched: Option<Arc<Filter>>,
    },
    Drop,
    Error(String),
}

/// Turns raw lines into kept lines: trims, skips blanks, extracts the
/// timestamp, filters, dedups and runs the matched hook.
pub(crate) struct LineProcessor {
    filters: Filters,
    dedup: Dedup,
    skip_empty_line: bool,
    extract_time: Option<ExtractTimeFn>,
    process_matched: Option<ProcessMatchedFn>,
}

impl LineProcessor {
    pub(crate) fn new(
        select: &[Filter],
        reject: &[Filter],
        dedup: Dedup,
        skip_empty_line: bool,
        extract_time: Option<ExtractTimeFn>,
        process_matched: Option<ProcessMatchedFn>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            filters: Filters::new(select, reject)?,
            dedup,
            skip_empty_line,
            extract_time,
            process_matched,
        })
    }

    pub(crate) fn process(&mut self, raw: &str, observed: DateTime<Utc>) -> Processed {
        let text = raw.trim_end_matches(['\n', '\r']);
        if self.skip_empty_line && text.trim().is_empty() {
            return Processed::Drop;
        }

        let matched = match self.filters.apply(text) {
            Ok(Verdict::Keep(matched)) => matched,
            Ok(Verdict::Drop) => return Processed::Drop,
            Err(err) => return Processed::Error(err.to_string()),
        };

        // filtered before dedup so a rejected line never resets the last kept text
        if self.dedup.is_repeat(text) {
            return Processed::Drop;
        }

        let time = self
            .extract_time
            .as_ref()
            .and_then(|extract| extract(text))
            .unwrap_or(observed);

        if let (Some(hook), Some(filter)) = (&self.process_matched, &matched) {
            hook(time, text, filter);
        }

        Processed::Keep {
            time,
            text: text.to_string(),
            matched,
        }
    }
}
