use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use tailpoll_types::{Filter, FilterError, Item};

use crate::filter::select_match;

/// Thread-safe buffer of items not yet flushed to the scheduler
#[derive(Clone, Default)]
pub struct ItemBuffer {
    items: Arc<RwLock<Vec<Item>>>,
}

impl ItemBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Arc::new(RwLock::new(Vec::with_capacity(capacity))),
        }
    }

    pub fn push(&self, item: Item) {
        self.items.write().push(item);
    }

    /// Swap out every buffered item, leaving the buffer empty
    pub fn take(&self) -> Vec<Item> {
        let mut items = self.items.write();
        let capacity = items.capacity();
        std::mem::replace(&mut *items, Vec::with_capacity(capacity))
    }

    /// Buffered items at or after `since`, narrowed by `filters`
    pub fn select(
        &self,
        since: Option<DateTime<Utc>>,
        filters: &[Filter],
    ) -> Result<Vec<Item>, FilterError> {
        let items = self.items.read();
        narrow(items.iter(), since, filters)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.read().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

/// Keep items at or after `since` that match any of `filters`.
///
/// With no filters every item is kept unchanged. Otherwise only items matching
/// a filter are kept and their `matched` is replaced by that filter.
pub(crate) fn narrow<'a, I>(
    items: I,
    since: Option<DateTime<Utc>>,
    filters: &[Filter],
) -> Result<Vec<Item>, FilterError>
where
    I: IntoIterator<Item = &'a Item>,
{
    let mut selected = Vec::new();
    for item in items {
        if since.is_some_and(|since| item.time < since) {
            continue;
        }
        if filters.is_empty() {
            selected.push(item.clone());
            continue;
        }
        if let Some(filter) = select_match(filters, &item.line)? {
            let mut item = item.clone();
            item.matched = Some(filter.clone());
            selected.push(item);
        }
    }
    Ok(selected)
}
