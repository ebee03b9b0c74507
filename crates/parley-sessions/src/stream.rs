use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_step::{Failure, Step};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::StreamError;
use crate::hook::{FailureHook, IgnoreFailures};
use crate::types::GetOptions;

type Teardown = Box<dyn FnOnce(Uuid) + Send>;

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
    last_activity: Instant,
}

struct Shared<T> {
    id: Uuid,
    opened_at: DateTime<Utc>,
    opened: Instant,
    state: Mutex<State<T>>,
    notify: Notify,
    teardown: Mutex<Option<Teardown>>,
}

impl<T> Shared<T> {
    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` when the stream was already closed.
    fn close(&self) -> bool {
        let dropped = {
            let mut state = self.state();
            if state.closed {
                return false;
            }
            state.closed = true;
            std::mem::take(&mut state.queue)
        };
        // Queued items are discarded outside the lock.
        drop(dropped);
        self.notify.notify_one();

        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(teardown) = teardown {
            teardown(self.id);
        }
        debug!(stream = %self.id, "stream closed");
        true
    }

    fn info(&self) -> StreamInfo {
        let state = self.state();
        StreamInfo {
            id: self.id,
            opened_at: self.opened_at,
            age: self.opened.elapsed(),
            pending: state.queue.len(),
            closed: state.closed,
            idle: state.last_activity.elapsed(),
        }
    }
}

/// Point-in-time view of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: Uuid,
    pub opened_at: DateTime<Utc>,
    /// Time since the stream was opened.
    pub age: Duration,
    /// Items written but not yet fetched.
    pub pending: usize,
    pub closed: bool,
    /// Time since the last write or fetch.
    pub idle: Duration,
}

/// Create an open stream with no failure hook and no teardown.
pub fn channel<T>() -> (StreamHandle<T>, MessageStream<T>)
where
    T: Sync + 'static,
{
    channel_with(Arc::new(IgnoreFailures), |_| {})
}

/// Create an open stream.
///
/// `hook` runs on every rejected attempt of [`MessageStream::get`].
/// `teardown` runs exactly once, on the first close, with the stream id.
pub fn channel_with<T, F>(
    hook: Arc<dyn FailureHook<T>>,
    teardown: F,
) -> (StreamHandle<T>, MessageStream<T>)
where
    F: FnOnce(Uuid) + Send + 'static,
{
    let shared = Arc::new(Shared {
        id: Uuid::now_v7(),
        opened_at: Utc::now(),
        opened: Instant::now(),
        state: Mutex::new(State {
            queue: VecDeque::new(),
            closed: false,
            last_activity: Instant::now(),
        }),
        notify: Notify::new(),
        teardown: Mutex::new(Some(Box::new(teardown))),
    });
    (
        StreamHandle {
            shared: Arc::clone(&shared),
        },
        MessageStream { shared, hook },
    )
}

/// Writer side of a stream. Cheap to clone; writing never blocks.
pub struct StreamHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StreamHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> StreamHandle<T> {
    /// Enqueue `item`. A closed stream hands the item back untouched.
    pub fn write(&self, item: T) -> Result<(), T> {
        {
            let mut state = self.shared.state();
            if state.closed {
                return Err(item);
            }
            state.queue.push_back(item);
            state.last_activity = Instant::now();
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Close the stream. Idempotent; returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn info(&self) -> StreamInfo {
        self.shared.info()
    }

    pub fn idle_for(&self) -> Duration {
        self.shared.state().last_activity.elapsed()
    }
}

/// Reader side of a stream. Exactly one exists per stream; dropping it
/// closes the stream.
pub struct MessageStream<T> {
    shared: Arc<Shared<T>>,
    hook: Arc<dyn FailureHook<T>>,
}

impl<T> fmt::Debug for MessageStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}

impl<T> MessageStream<T> {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    pub fn info(&self) -> StreamInfo {
        self.shared.info()
    }

    /// Close the stream. Any later fetch fails with [`StreamError::Ended`].
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    fn try_next(&self) -> Result<Option<T>, StreamError> {
        let mut state = self.shared.state();
        if state.closed {
            return Err(StreamError::Ended);
        }
        let item = state.queue.pop_front();
        if item.is_some() {
            state.last_activity = Instant::now();
        }
        Ok(item)
    }

    /// Wait for the next item with no deadline.
    pub async fn fetch(&mut self) -> Result<T, StreamError> {
        loop {
            if let Some(item) = self.try_next()? {
                return Ok(item);
            }
            // notify_one stores a permit, so a write racing this check is not lost.
            self.shared.notify.notified().await;
        }
    }

    /// Wait for the next item for at most `timeout`.
    pub async fn fetch_timeout(&mut self, timeout: Duration) -> Result<T, StreamError> {
        self.fetch_until(Instant::now() + timeout, timeout).await
    }

    async fn fetch_until(&mut self, deadline: Instant, budget: Duration) -> Result<T, StreamError> {
        match tokio::time::timeout_at(deadline, self.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::Timeout {
                ms: budget.as_millis() as u64,
            }),
        }
    }
}

impl<T> MessageStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fetch items until one passes `step`.
    ///
    /// Every rejected item is reported to the stream's failure hook. The
    /// timeout in `options` is one budget shared by all attempts.
    pub async fn get<R>(&mut self, step: &Step<T, R>, options: GetOptions) -> Result<R, StreamError>
    where
        R: Send + 'static,
    {
        let attempts = options.max_attempts.max(1);
        let deadline = options.timeout.map(|budget| (Instant::now() + budget, budget));
        let mut last = Failure::silent();

        for attempt in 1..=attempts {
            let item = match deadline {
                Some((deadline, budget)) => self.fetch_until(deadline, budget).await?,
                None => self.fetch().await?,
            };
            match step.run(item.clone()).await {
                Ok(value) => return Ok(value),
                Err(failure) => {
                    trace!(stream = %self.shared.id, attempt, %failure, "item rejected");
                    self.hook.on_failure(&item, &failure).await;
                    last = failure;
                }
            }
        }

        Err(StreamError::MaxAttempts { attempts, last })
    }
}

impl<T> Drop for MessageStream<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_step::die;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHook {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FailureHook<i32> for CountingHook {
        async fn on_failure(&self, _item: &i32, _failure: &Failure) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn positive() -> Step<i32, i32> {
        Step::from_fn(|n: i32| if n > 0 { Ok(n) } else { die("positive please") })
    }

    #[tokio::test]
    async fn fetch_returns_items_in_write_order() {
        let (handle, mut stream) = channel::<i32>();
        for n in 1..=3 {
            handle.write(n).unwrap();
        }
        assert_eq!(stream.info().pending, 3);
        assert_eq!(stream.fetch().await.unwrap(), 1);
        assert_eq!(stream.fetch().await.unwrap(), 2);
        assert_eq!(stream.fetch().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn fetch_times_out_on_empty_stream() {
        let (_handle, mut stream) = channel::<i32>();
        let err = stream
            .fetch_timeout(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Timeout { ms: 100 }));
    }

    #[tokio::test]
    async fn write_before_deadline_resolves_fetch() {
        let (handle, mut stream) = channel::<i32>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.write(42).unwrap();
            // keep the writer alive past the fetch
            tokio::time::sleep(Duration::from_millis(200)).await;
        });
        let started = Instant::now();
        let item = stream.fetch_timeout(Duration::from_millis(100)).await.unwrap();
        assert_eq!(item, 42);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn close_ends_pending_fetch() {
        let (handle, mut stream) = channel::<i32>();
        let pending = tokio::spawn(async move { stream.fetch().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.close());

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::Ended));
    }

    #[tokio::test]
    async fn write_after_close_is_rejected_and_does_not_resurrect() {
        let (handle, mut stream) = channel::<i32>();
        assert!(stream.close());
        assert!(!stream.close(), "close is idempotent");
        assert_eq!(handle.write(7), Err(7));
        assert!(handle.is_closed());
        assert!(matches!(stream.fetch().await, Err(StreamError::Ended)));
    }

    #[tokio::test]
    async fn teardown_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (handle, stream) = channel_with::<i32, _>(Arc::new(IgnoreFailures), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.close();
        handle.close();
        drop(stream);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_reader_closes_stream() {
        let (handle, stream) = channel::<i32>();
        drop(stream);
        assert!(handle.is_closed());
        assert_eq!(handle.write(1), Err(1));
    }

    #[tokio::test]
    async fn get_retries_and_reports_each_rejection() {
        let hook = Arc::new(CountingHook::default());
        let (handle, mut stream) = channel_with::<i32, _>(hook.clone(), |_| {});
        for n in [-1, 0, 5] {
            handle.write(n).unwrap();
        }

        let value = stream.get(&positive(), GetOptions::attempts(3)).await.unwrap();
        assert_eq!(value, 5);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stream.info().pending, 0);
    }

    #[tokio::test]
    async fn get_gives_up_after_max_attempts() {
        let hook = Arc::new(CountingHook::default());
        let (handle, mut stream) = channel_with::<i32, _>(hook.clone(), |_| {});
        for n in [-1, -2, 9] {
            handle.write(n).unwrap();
        }

        let err = stream.get(&positive(), GetOptions::attempts(2)).await.unwrap_err();
        match err {
            StreamError::MaxAttempts { attempts, last } => {
                assert_eq!(attempts, 2);
                assert_eq!(last.message(), Some("positive please"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stream.fetch().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn get_treats_zero_attempts_as_one() {
        let (handle, mut stream) = channel::<i32>();
        handle.write(3).unwrap();
        assert_eq!(stream.get(&positive(), GetOptions::attempts(0)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn get_shares_timeout_budget_across_attempts() {
        let (handle, mut stream) = channel::<i32>();
        handle.write(-1).unwrap();
        let options = GetOptions::attempts(5).with_timeout(Duration::from_millis(80));

        let started = Instant::now();
        let err = stream.get(&positive(), options).await.unwrap_err();
        assert!(matches!(err, StreamError::Timeout { ms: 80 }));
        assert!(started.elapsed() < Duration::from_millis(200));
        drop(handle);
    }
}
