use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use tailpoll_types::PollConfig;

/// Errors returned when reading the poll queue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("no data collected yet in the poller")]
    NoData,
}

/// Future returned by a [`GetFn`]
pub type GetFuture<T> = BoxFuture<'static, anyhow::Result<Option<T>>>;

/// Produces one poll result. `Ok(None)` means there is nothing to record.
pub type GetFn<T> = Arc<dyn Fn() -> GetFuture<T> + Send + Sync>;

/// Maps a get error before it is recorded; returning `None` discards it
pub type ErrHandler = Arc<dyn Fn(anyhow::Error) -> Option<anyhow::Error> + Send + Sync>;

/// One poll result kept in the queue
#[derive(Clone, Debug)]
pub struct PollItem<T> {
    pub time: DateTime<Utc>,
    pub output: Option<T>,
    pub error: Option<String>,
}

impl<T> PollItem<T> {
    pub fn output(output: T) -> Self {
        Self {
            time: Utc::now(),
            output: Some(output),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Running state of the poll task
#[derive(Default)]
struct RunState {
    /// Set while the poll task is running
    cancel: Option<CancellationToken>,

    /// Callers that asked for the poller to run
    callers: HashSet<String>,
}

struct Inner<T> {
    id: String,
    cfg: RwLock<PollConfig>,
    get_fn: GetFn<T>,
    err_handler: Option<ErrHandler>,
    state: Mutex<RunState>,
    items: RwLock<VecDeque<PollItem<T>>>,
}

/// Reference-counted periodic poller with a bounded result queue
pub struct Poller<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Poller<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Poller<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new poller. Nothing runs until [`Poller::start`].
    pub fn new(
        id: impl Into<String>,
        cfg: PollConfig,
        get_fn: GetFn<T>,
        err_handler: Option<ErrHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                cfg: RwLock::new(cfg),
                get_fn,
                err_handler,
                state: Mutex::new(RunState::default()),
                items: RwLock::new(VecDeque::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> PollConfig {
        self.inner.cfg.read().clone()
    }

    /// Start the poll task on behalf of `caller`.
    ///
    /// Redundant calls only register the caller. The task stops when `parent`
    /// is cancelled or the last caller calls [`Poller::stop`].
    pub fn start(&self, parent: &CancellationToken, caller: &str) {
        let mut state = self.inner.state.lock();
        state.callers.insert(caller.to_string());
        if state.cancel.as_ref().is_some_and(|c| !c.is_cancelled()) {
            return;
        }

        let cancel = parent.child_token();
        state.cancel = Some(cancel.clone());

        let cfg = self.config();
        tracing::debug!(
            id = %self.inner.id,
            interval = ?cfg.interval(),
            queue_size = cfg.queue_size,
            caller,
            "starting poller"
        );

        tokio::spawn(poll_loop(Arc::clone(&self.inner), cancel));
    }

    /// Unregister `caller`. Returns true if this stopped the poll task.
    pub fn stop(&self, caller: &str) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let Some(cancel) = state.cancel.as_ref() else {
            tracing::warn!(id = %self.inner.id, caller, "poller already stopped");
            return false;
        };

        state.callers.remove(caller);
        if !state.callers.is_empty() {
            tracing::debug!(
                id = %self.inner.id,
                inflight = state.callers.len(),
                "skipping poller stop, other callers remain"
            );
            return false;
        }

        cancel.cancel();
        state.cancel = None;
        tracing::debug!(id = %self.inner.id, caller, "stopped poller");
        true
    }

    /// Whether the poll task is running
    pub fn is_running(&self) -> bool {
        self.inner
            .state
            .lock()
            .cancel
            .as_ref()
            .is_some_and(|c| !c.is_cancelled())
    }

    /// Insert a result directly into the queue
    pub fn push(&self, item: PollItem<T>) {
        self.inner.insert(item);
    }

    /// The most recent result
    pub fn last(&self) -> Result<PollItem<T>, PollError> {
        self.inner.read_last(false)
    }

    /// The most recent result without an error
    pub fn last_success(&self) -> Result<PollItem<T>, PollError> {
        self.inner.read_last(true)
    }

    /// The most recent error, `Ok(None)` if the queue holds no errors
    pub fn last_error(&self) -> Result<Option<String>, PollError> {
        let items = self.inner.items.read();
        if items.is_empty() {
            return Err(PollError::NoData);
        }
        Ok(items.iter().rev().find_map(|item| item.error.clone()))
    }

    /// All results recorded at or after `since`
    pub fn all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<PollItem<T>>, PollError> {
        let items = self.inner.items.read();
        if items.is_empty() {
            return Err(PollError::NoData);
        }

        let selected: Vec<_> = items
            .iter()
            .filter(|item| since.is_none_or(|since| item.time >= since))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(PollError::NoData);
        }
        Ok(selected)
    }

    /// Number of results in the queue
    pub fn len(&self) -> usize {
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.read().is_empty()
    }
}

impl<T> Inner<T> {
    fn insert(&self, item: PollItem<T>) {
        let queue_size = self.cfg.read().queue_size;
        let mut items = self.items.write();
        if queue_size > 0 {
            while items.len() >= queue_size {
                items.pop_front();
            }
        }
        items.push_back(item);
    }

    fn read_last(&self, require_no_err: bool) -> Result<PollItem<T>, PollError>
    where
        T: Clone,
    {
        let items = self.items.read();
        items
            .iter()
            .rev()
            .find(|item| !require_no_err || item.error.is_none())
            .cloned()
            .ok_or(PollError::NoData)
    }
}

async fn poll_loop<T>(inner: Arc<Inner<T>>, cancel: CancellationToken)
where
    T: Send + Sync + 'static,
{
    let cfg = inner.cfg.read().clone();
    let period = cfg.interval().max(std::time::Duration::from_millis(1));

    // first tick completes immediately
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if cancel.is_cancelled() {
            break;
        }
        tracing::debug!(id = %inner.id, "polling");

        // once the get function ran its result is always recorded
        let result = with_timeout((inner.get_fn)(), cfg.get_timeout()).await;

        let item = match result {
            Ok(None) => continue,
            Ok(Some(output)) => PollItem::output(output),
            Err(err) => {
                let err = match &inner.err_handler {
                    Some(handler) => handler(err),
                    None => Some(err),
                };
                let Some(err) = err else {
                    continue;
                };
                tracing::debug!(id = %inner.id, error = %err, "polling error");
                PollItem::error(format!("{err:#}"))
            }
        };

        inner.insert(item);
    }

    tracing::debug!(id = %inner.id, "poll loop exited");
}

async fn with_timeout<T>(
    get: GetFuture<T>,
    timeout: Option<std::time::Duration>,
) -> anyhow::Result<Option<T>> {
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, get).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("poll timed out after {timeout:?}")),
        },
        None => get.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::TimeDelta;

    fn counting_poller(queue_size: usize, interval_ms: u64) -> (Poller<usize>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let get_fn: GetFn<usize> = Arc::new(move || -> GetFuture<usize> {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Ok(Some(n)) })
        });
        let cfg = PollConfig {
            interval_ms,
            get_timeout_ms: 0,
            queue_size,
        };
        (Poller::new("test", cfg, get_fn, None), counter)
    }

    fn item_at(time: DateTime<Utc>, output: usize, error: Option<&str>) -> PollItem<usize> {
        PollItem {
            time,
            output: error.is_none().then_some(output),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_read_last() {
        let (poller, _) = counting_poller(10, 1000);
        let now = Utc::now();
        poller.push(item_at(now - TimeDelta::seconds(1), 1, None));
        poller.push(item_at(now, 2, None));

        let last = poller.last_success().unwrap();
        assert_eq!(last.output, Some(2));
    }

    #[test]
    fn test_read_last_skips_errors() {
        let (poller, _) = counting_poller(10, 1000);
        let now = Utc::now();
        poller.push(item_at(now, 1, None));
        poller.push(item_at(now, 0, Some("test error")));
        poller.push(item_at(now, 0, Some("test error")));

        assert_eq!(poller.last_success().unwrap().output, Some(1));
        assert!(poller.last().unwrap().error.is_some());
        assert_eq!(poller.last_error().unwrap().as_deref(), Some("test error"));
    }

    #[test]
    fn test_read_last_no_data() {
        let (poller, _) = counting_poller(10, 1000);
        assert_eq!(poller.last().unwrap_err(), PollError::NoData);
        assert_eq!(poller.last_error().unwrap_err(), PollError::NoData);
        assert_eq!(poller.all(None).unwrap_err(), PollError::NoData);

        for _ in 0..3 {
            poller.push(item_at(Utc::now(), 0, Some("test error")));
        }
        assert_eq!(poller.last_success().unwrap_err(), PollError::NoData);
    }

    #[test]
    fn test_last_error_none_without_errors() {
        let (poller, _) = counting_poller(10, 1000);
        poller.push(item_at(Utc::now(), 1, None));
        assert_eq!(poller.last_error().unwrap(), None);
    }

    #[test]
    fn test_queue_is_bounded() {
        let (poller, _) = counting_poller(3, 1000);
        for i in 0..5 {
            poller.push(item_at(Utc::now(), i, None));
        }
        let all = poller.all(None).unwrap();
        let outputs: Vec<_> = all.iter().filter_map(|i| i.output).collect();
        assert_eq!(outputs, vec![2, 3, 4]);
    }

    #[test]
    fn test_all_since() {
        let (poller, _) = counting_poller(10, 1000);
        let now = Utc::now();
        poller.push(item_at(now - TimeDelta::minutes(10), 1, None));
        poller.push(item_at(now - TimeDelta::minutes(1), 2, None));
        poller.push(item_at(now, 3, None));

        let recent = poller.all(Some(now - TimeDelta::minutes(5))).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(
            poller.all(Some(now + TimeDelta::hours(1))).unwrap_err(),
            PollError::NoData
        );
    }

    #[tokio::test]
    async fn test_start_polls_immediately_and_periodically() {
        let (poller, counter) = counting_poller(100, 20);
        let cancel = CancellationToken::new();

        poller.start(&cancel, "test");
        assert!(poller.is_running());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(counter.load(Ordering::SeqCst) >= 3);
        assert!(poller.len() >= 3);
        assert!(poller.last().unwrap().output.is_some());

        assert!(poller.stop("test"));
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_start_stop_reference_counted() {
        let (poller, counter) = counting_poller(100, 10_000);
        let cancel = CancellationToken::new();

        poller.start(&cancel, "a");
        poller.start(&cancel, "b");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(!poller.stop("a"));
        assert!(poller.is_running());
        assert!(poller.stop("b"));
        assert!(!poller.stop("b"));
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_polling() {
        let (poller, counter) = counting_poller(100, 10);
        let cancel = CancellationToken::new();
        poller.start(&cancel, "test");
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let seen = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
        assert!(!poller.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_during_tick_keeps_taken_output() {
        for trial in 0..300u64 {
            let pending = Arc::new(Mutex::new(vec![1usize, 2, 3]));
            let p = pending.clone();
            let get_fn: GetFn<Vec<usize>> = Arc::new(move || -> GetFuture<Vec<usize>> {
                let taken = std::mem::take(&mut *p.lock());
                Box::pin(async move { Ok(Some(taken)) })
            });
            let poller = Poller::new("flush", PollConfig::default(), get_fn, None);
            let cancel = CancellationToken::new();

            poller.start(&cancel, "test");
            let spin = std::time::Instant::now();
            while spin.elapsed() < Duration::from_micros(trial % 300) {
                std::hint::spin_loop();
            }
            poller.stop("test");
            tokio::time::sleep(Duration::from_millis(5)).await;

            let queued: usize = poller
                .all(None)
                .map(|items| items.iter().flat_map(|i| i.output.iter().flatten()).count())
                .unwrap_or(0);
            assert_eq!(queued + pending.lock().len(), 3, "trial {trial}");
        }
    }

    #[tokio::test]
    async fn test_restart_after_parent_cancel() {
        let (poller, counter) = counting_poller(100, 10_000);
        let first = CancellationToken::new();
        poller.start(&first, "test");
        tokio::time::sleep(Duration::from_millis(20)).await;
        first.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!poller.is_running());

        let second = CancellationToken::new();
        poller.start(&second, "test");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(poller.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(poller.stop("test"));
    }

    #[tokio::test]
    async fn test_get_timeout_recorded_as_error() {
        let get_fn: GetFn<usize> = Arc::new(|| -> GetFuture<usize> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Some(1))
            })
        });
        let cfg = PollConfig {
            interval_ms: 10_000,
            get_timeout_ms: 20,
            queue_size: 10,
        };
        let poller = Poller::new("slow", cfg, get_fn, None);
        let cancel = CancellationToken::new();
        poller.start(&cancel, "test");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = poller.last_error().unwrap().unwrap();
        assert!(err.contains("timed out"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_err_handler_discards() {
        let get_fn: GetFn<usize> = Arc::new(|| -> GetFuture<usize> {
            Box::pin(async { Err(anyhow::anyhow!("transient")) })
        });
        let handler: ErrHandler = Arc::new(|_: anyhow::Error| None);
        let poller = Poller::new("quiet", PollConfig::default(), get_fn, Some(handler));
        let cancel = CancellationToken::new();
        poller.start(&cancel, "test");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(poller.is_empty());
        cancel.cancel();
    }
}
