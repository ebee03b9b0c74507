use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info, trace, warn};

use crate::error::{HandlerResult, SessionError};
use crate::hook::FailureHook;
use crate::stream::{channel_with, MessageStream, StreamHandle};
use crate::template::{PredicateTemplate, SessionBody, Template};
use crate::types::{Identifier, Identify, SessionInfo};

/// Anything the dispatcher can fan an event out to.
#[async_trait]
pub trait Sessions<T>: Send + Sync {
    fn name(&self) -> &str;

    /// Route one item: queue it into a live session or start a new one.
    async fn run(&self, item: &T);

    /// Number of live sessions.
    fn live(&self) -> usize;

    /// Close sessions idle for at least `max_idle`; returns how many closed.
    fn close_idle(&self, max_idle: Duration) -> usize;

    fn sessions(&self) -> Vec<SessionInfo>;
}

/// Keyed registry of streams holding at most one live session per identifier.
///
/// Templates are shared: once any template has started a session for an
/// identifier, every later item with that identifier is queued into it until
/// the session ends.
pub struct SessionManager<T, K> {
    name: String,
    identify: Arc<dyn Identify<T, K>>,
    hook: Arc<dyn FailureHook<T>>,
    templates: RwLock<Vec<Arc<dyn Template<K, T>>>>,
    streams: Arc<DashMap<K, StreamHandle<T>>>,
}

impl<T, K> SessionManager<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Identifier,
{
    /// Manager keyed by a synchronous identifier function.
    pub fn new<F>(name: impl Into<String>, identify: F, hook: Arc<dyn FailureHook<T>>) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::with_identifier(name, Arc::new(identify), hook)
    }

    /// Manager keyed by an arbitrary (possibly async) identifier function.
    pub fn with_identifier(
        name: impl Into<String>,
        identify: Arc<dyn Identify<T, K>>,
        hook: Arc<dyn FailureHook<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            identify,
            hook,
            templates: RwLock::new(Vec::new()),
            streams: Arc::new(DashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a template from a predicate over the identifier and a body.
    pub fn register<P, B, Fut>(&self, predicate: P, body: B)
    where
        P: Fn(&K) -> bool + Send + Sync + 'static,
        B: Fn(MessageStream<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_template(Arc::new(PredicateTemplate::new(predicate, body)));
    }

    pub fn register_template(&self, template: Arc<dyn Template<K, T>>) {
        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        templates.push(template);
        debug!(manager = %self.name, templates = templates.len(), "session template registered");
    }

    fn templates(&self) -> Vec<Arc<dyn Template<K, T>>> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn identify(&self, item: &T) -> K {
        self.identify.identify(item).await
    }

    /// Route one item by its identifier.
    pub async fn run(&self, item: &T) {
        let identifier = self.identify(item).await;
        self.dispatch(identifier, item.clone()).await;
    }

    /// Route one item whose identifier is already known.
    pub async fn dispatch(&self, identifier: K, item: T) {
        let item = match self.write_live(&identifier, item) {
            Ok(()) => {
                trace!(manager = %self.name, identifier = ?identifier, "queued into live session");
                return;
            }
            Err(item) => item,
        };

        for template in self.templates() {
            if let Some(body) = template.open(&identifier, &item, self.hook.as_ref()).await {
                self.start(identifier, item, body);
                return;
            }
        }
        trace!(manager = %self.name, identifier = ?identifier, "no template matched");
    }

    fn write_live(&self, identifier: &K, item: T) -> Result<(), T> {
        // The registry guard must be released before touching the stream.
        let handle = self.streams.get(identifier).map(|entry| entry.value().clone());
        match handle {
            Some(handle) => handle.write(item),
            None => Err(item),
        }
    }

    fn open_stream(&self, identifier: K) -> (StreamHandle<T>, MessageStream<T>) {
        let registry = Arc::downgrade(&self.streams);
        let manager = self.name.clone();
        channel_with(Arc::clone(&self.hook), move |id| {
            if let Some(streams) = registry.upgrade() {
                if streams.remove_if(&identifier, |_, handle| handle.id() == id).is_some() {
                    debug!(manager = %manager, identifier = ?identifier, stream = %id, "session released");
                }
            }
        })
    }

    /// Insert `handle` unless a live stream already holds `identifier`.
    /// `first` is queued into the new stream before it becomes visible.
    fn insert_if_absent(
        &self,
        identifier: &K,
        handle: &StreamHandle<T>,
        first: Option<T>,
    ) -> Result<(), (StreamHandle<T>, Option<T>)> {
        match self.streams.entry(identifier.clone()) {
            Entry::Occupied(occupied) if !occupied.get().is_closed() => {
                Err((occupied.get().clone(), first))
            }
            Entry::Occupied(mut stale) => {
                if let Some(item) = first {
                    let _ = handle.write(item);
                }
                stale.insert(handle.clone());
                Ok(())
            }
            Entry::Vacant(vacant) => {
                if let Some(item) = first {
                    let _ = handle.write(item);
                }
                vacant.insert(handle.clone());
                Ok(())
            }
        }
    }

    fn start(&self, identifier: K, item: T, body: SessionBody<T>) {
        let (handle, stream) = self.open_stream(identifier.clone());

        if let Err((existing, item)) = self.insert_if_absent(&identifier, &handle, Some(item)) {
            debug!(manager = %self.name, identifier = ?identifier, "session started concurrently; queueing");
            if let Some(item) = item {
                if existing.write(item).is_err() {
                    warn!(manager = %self.name, identifier = ?identifier, "session closed before delivery; item dropped");
                }
            }
            return;
        }

        info!(manager = %self.name, identifier = ?identifier, stream = %handle.id(), "session started");
        self.supervise(identifier, handle, stream, body);
    }

    fn supervise(&self, identifier: K, handle: StreamHandle<T>, stream: MessageStream<T>, body: SessionBody<T>) {
        let manager = self.name.clone();
        let task = tokio::spawn(body(stream));
        tokio::spawn(async move {
            let id = handle.id();
            match task.await {
                Ok(Ok(())) => {
                    debug!(manager = %manager, identifier = ?identifier, stream = %id, "session finished")
                }
                Ok(Err(e)) => {
                    warn!(manager = %manager, identifier = ?identifier, stream = %id, error = %e, "session handler failed")
                }
                Err(e) if e.is_panic() => {
                    error!(manager = %manager, identifier = ?identifier, stream = %id, "session handler panicked")
                }
                Err(_) => {
                    debug!(manager = %manager, identifier = ?identifier, stream = %id, "session handler cancelled")
                }
            }
            handle.close();
        });
    }

    /// Create a stream for `item`'s identifier without a template.
    ///
    /// Unlike [`run`](Self::run), this refuses to share: an identifier with
    /// a live stream yields [`SessionError::InUse`]. The item itself is not
    /// queued.
    pub async fn create(&self, item: &T) -> Result<MessageStream<T>, SessionError> {
        let identifier = self.identify(item).await;
        let (handle, stream) = self.open_stream(identifier.clone());
        match self.insert_if_absent(&identifier, &handle, None) {
            Ok(()) => {
                info!(manager = %self.name, identifier = ?identifier, stream = %handle.id(), "session created");
                Ok(stream)
            }
            Err(_) => Err(SessionError::InUse {
                identifier: format!("{identifier:?}"),
            }),
        }
    }

    /// Close the session for `identifier`. Returns `false` if none was live.
    pub fn close(&self, identifier: &K) -> bool {
        let handle = self.streams.get(identifier).map(|entry| entry.value().clone());
        handle.map(|handle| handle.close()).unwrap_or(false)
    }

    pub fn contains(&self, identifier: &K) -> bool {
        self.streams
            .get(identifier)
            .map(|entry| !entry.value().is_closed())
            .unwrap_or(false)
    }

    pub fn identifiers(&self) -> Vec<K> {
        self.streams.iter().map(|entry| entry.key().clone()).collect()
    }

    fn handles(&self) -> Vec<(K, StreamHandle<T>)> {
        self.streams
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl<T, K> Sessions<T> for SessionManager<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Identifier,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, item: &T) {
        SessionManager::run(self, item).await
    }

    fn live(&self) -> usize {
        self.streams.iter().filter(|entry| !entry.value().is_closed()).count()
    }

    fn close_idle(&self, max_idle: Duration) -> usize {
        // Collect first: closing runs teardown, which needs the registry.
        let stale: Vec<_> = self
            .handles()
            .into_iter()
            .filter(|(_, handle)| handle.idle_for() >= max_idle)
            .collect();

        let mut closed = 0;
        for (identifier, handle) in stale {
            if handle.close() {
                info!(manager = %self.name, identifier = ?identifier, "idle session closed");
                closed += 1;
            }
        }
        closed
    }

    fn sessions(&self) -> Vec<SessionInfo> {
        self.handles()
            .into_iter()
            .map(|(identifier, handle)| SessionInfo {
                manager: self.name.clone(),
                identifier: format!("{identifier:?}"),
                stream: handle.info(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::IgnoreFailures;
    use crate::template::StepTemplate;
    use crate::GetOptions;
    use parley_step::{certain, die, Failure, Step};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq)]
    struct Msg {
        conv: &'static str,
        text: &'static str,
    }

    fn msg(conv: &'static str, text: &'static str) -> Msg {
        Msg { conv, text }
    }

    fn manager() -> SessionManager<Msg, &'static str> {
        SessionManager::new("test", |m: &Msg| m.conv, Arc::new(IgnoreFailures))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    /// Body that forwards every fetched text, tagged with the session's conv.
    fn recording(
        manager: &SessionManager<Msg, &'static str>,
        started: Arc<AtomicUsize>,
    ) -> mpsc::UnboundedReceiver<(&'static str, &'static str)> {
        let (tx, rx) = mpsc::unbounded_channel();
        manager.register(
            |_| true,
            move |mut stream| {
                let tx = tx.clone();
                started.fetch_add(1, Ordering::SeqCst);
                async move {
                    while let Ok(m) = stream.fetch().await {
                        let _ = tx.send((m.conv, m.text));
                    }
                    Ok(())
                }
            },
        );
        rx
    }

    #[tokio::test]
    async fn items_with_same_identifier_share_one_session() {
        let manager = manager();
        let started = Arc::new(AtomicUsize::new(0));
        let mut rx = recording(&manager, started.clone());

        manager.run(&msg("a", "1")).await;
        manager.run(&msg("a", "2")).await;
        manager.run(&msg("b", "x")).await;
        manager.run(&msg("a", "3")).await;

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv().await.unwrap());
        }
        let a: Vec<_> = seen.iter().filter(|(c, _)| *c == "a").map(|(_, t)| *t).collect();
        assert_eq!(a, vec!["1", "2", "3"]);
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(manager.live(), 2);
    }

    #[tokio::test]
    async fn concurrent_runs_never_start_two_sessions() {
        let manager = Arc::new(manager());
        let started = Arc::new(AtomicUsize::new(0));
        let mut rx = recording(&manager, started.clone());

        let runs: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.run(&msg("same", "hi")).await })
            })
            .collect();
        for run in runs {
            run.await.unwrap();
        }

        for _ in 0..16 {
            rx.recv().await.unwrap();
        }
        assert_eq!(manager.live(), 1);
        assert_eq!(manager.identifiers(), vec!["same"]);
    }

    #[tokio::test]
    async fn finished_session_releases_its_identifier() {
        let manager = manager();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);
        manager.register(
            |_| true,
            move |mut stream| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    stream.fetch().await?;
                    Ok(())
                }
            },
        );

        manager.run(&msg("a", "first")).await;
        wait_until(|| !manager.contains(&"a")).await;
        manager.run(&msg("a", "second")).await;
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_entry_awaiting_teardown_is_replaced() {
        let manager = manager();
        let (stale, _stale_stream) = crate::stream::channel::<Msg>();
        manager.streams.insert("a", stale.clone());
        stale.close();
        assert!(!manager.contains(&"a"));
        assert_eq!(manager.identifiers(), vec!["a"]);

        let (handle, mut stream) = manager.open_stream("a");
        assert!(manager
            .insert_if_absent(&"a", &handle, Some(msg("a", "1")))
            .is_ok());
        assert_eq!(manager.streams.get(&"a").map(|entry| entry.id()), Some(handle.id()));
        assert!(manager.contains(&"a"));
        assert_eq!(stream.fetch().await.unwrap(), msg("a", "1"));
    }

    struct SlowConv;

    #[async_trait]
    impl Identify<Msg, String> for SlowConv {
        async fn identify(&self, item: &Msg) -> String {
            tokio::time::sleep(Duration::from_millis(5)).await;
            item.conv.to_uppercase()
        }
    }

    #[tokio::test]
    async fn async_identifiers_key_the_registry() {
        let manager: SessionManager<Msg, String> =
            SessionManager::with_identifier("slow", Arc::new(SlowConv), Arc::new(IgnoreFailures));
        manager.register(|_| true, |mut stream| async move {
            while stream.fetch().await.is_ok() {}
            Ok(())
        });

        manager.run(&msg("a", "1")).await;
        manager.run(&msg("a", "2")).await;
        assert_eq!(manager.identifiers(), vec!["A".to_string()]);
        assert_eq!(manager.sessions()[0].manager, "slow");
    }

    #[tokio::test]
    async fn templates_are_tried_in_order() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for (label, only) in [("first", "x"), ("second", "y"), ("fallback", "")] {
            let tx = tx.clone();
            manager.register(
                move |conv: &&'static str| only.is_empty() || *conv == only,
                move |_stream| {
                    let _ = tx.send(label);
                    async { Ok(()) }
                },
            );
        }

        manager.run(&msg("y", "")).await;
        manager.run(&msg("z", "")).await;
        assert_eq!(rx.recv().await, Some("second"));
        assert_eq!(rx.recv().await, Some("fallback"));
    }

    #[tokio::test]
    async fn unmatched_items_are_dropped() {
        let manager = manager();
        manager.register(|conv| *conv == "only", |_stream| async { Ok(()) });
        manager.run(&msg("other", "hi")).await;
        assert_eq!(manager.live(), 0);
    }

    #[tokio::test]
    async fn create_refuses_identifier_in_use() {
        let manager = manager();
        let stream = manager.create(&msg("a", "")).await.unwrap();
        let err = manager.create(&msg("a", "")).await.unwrap_err();
        assert!(matches!(err, SessionError::InUse { .. }));

        drop(stream);
        assert!(!manager.contains(&"a"));
        assert!(manager.create(&msg("a", "")).await.is_ok());
    }

    #[tokio::test]
    async fn run_queues_into_created_stream() {
        let manager = manager();
        let mut stream = manager.create(&msg("a", "")).await.unwrap();
        manager.run(&msg("a", "hello")).await;
        assert_eq!(stream.fetch().await.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn close_ends_the_session() {
        let manager = manager();
        let mut stream = manager.create(&msg("a", "")).await.unwrap();
        assert!(manager.close(&"a"));
        assert!(!manager.close(&"a"));
        assert!(matches!(stream.fetch().await, Err(crate::StreamError::Ended)));
        assert!(manager.identifiers().is_empty());
    }

    #[tokio::test]
    async fn close_idle_reaps_only_stale_sessions() {
        let manager = manager();
        let _stale = manager.create(&msg("stale", "")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let _fresh = manager.create(&msg("fresh", "")).await.unwrap();

        assert_eq!(manager.close_idle(Duration::from_millis(30)), 1);
        assert!(!manager.contains(&"stale"));
        assert!(manager.contains(&"fresh"));
        assert_eq!(manager.sessions().len(), 1);
    }

    #[tokio::test]
    async fn handler_errors_and_panics_are_contained() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.register(
            |conv| *conv == "boom",
            |mut stream| async move {
                stream.fetch().await?;
                panic!("handler defect");
            },
        );
        manager.register(
            |conv| *conv == "err",
            |mut stream| async move {
                stream.fetch().await?;
                Err("nope".into())
            },
        );
        manager.register(
            |_| true,
            move |mut stream| {
                let tx = tx.clone();
                async move {
                    while let Ok(m) = stream.fetch().await {
                        let _ = tx.send(m.text);
                    }
                    Ok(())
                }
            },
        );

        manager.run(&msg("ok", "before")).await;
        manager.run(&msg("boom", "")).await;
        manager.run(&msg("err", "")).await;
        wait_until(|| !manager.contains(&"boom") && !manager.contains(&"err")).await;
        manager.run(&msg("ok", "after")).await;

        assert_eq!(rx.recv().await, Some("before"));
        assert_eq!(rx.recv().await, Some("after"));
    }

    #[derive(Default)]
    struct RecordingHook {
        messages: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl FailureHook<Msg> for RecordingHook {
        async fn on_failure(&self, _item: &Msg, failure: &Failure) {
            self.messages
                .lock()
                .unwrap()
                .push(failure.message().map(str::to_owned));
        }
    }

    #[tokio::test]
    async fn step_template_reports_failures_and_hands_over_value() {
        let hook = Arc::new(RecordingHook::default());
        let manager: SessionManager<Msg, &'static str> =
            SessionManager::new("steps", |m: &Msg| m.conv, hook.clone() as Arc<dyn FailureHook<Msg>>);

        let number: Step<Msg, i64> = certain::<Msg>()
            .try_map(|m: Msg| m.text.parse::<i64>().map_err(|_| Failure::silent()))
            .fail("send a number");
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.register_template(Arc::new(StepTemplate::new(number, move |n, mut stream| {
            let tx = tx.clone();
            async move {
                let next = stream
                    .get(&certain(), GetOptions::attempts(1))
                    .await?;
                let _ = tx.send((n, next.text));
                Ok(())
            }
        })));

        manager.run(&msg("a", "nope")).await;
        assert_eq!(manager.live(), 0);
        manager.run(&msg("a", "41")).await;
        manager.run(&msg("a", "then")).await;

        assert_eq!(rx.recv().await, Some((41, "then")));
        assert_eq!(
            *hook.messages.lock().unwrap(),
            vec![Some("send a number".to_string())]
        );
    }

    #[tokio::test]
    async fn get_inside_session_reports_rejections_to_manager_hook() {
        let hook = Arc::new(RecordingHook::default());
        let manager: SessionManager<Msg, &'static str> =
            SessionManager::new("get", |m: &Msg| m.conv, hook.clone() as Arc<dyn FailureHook<Msg>>);
        let yes = Step::from_fn(|m: Msg| if m.text == "yes" { Ok(()) } else { die("say yes") });
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.register(
            |_| true,
            move |mut stream| {
                let tx = tx.clone();
                let yes = yes.clone();
                async move {
                    stream.fetch().await?;
                    let outcome = stream.get(&yes, GetOptions::attempts(3)).await;
                    let _ = tx.send(outcome.is_ok());
                    Ok(())
                }
            },
        );

        for text in ["start", "no", "maybe", "yes"] {
            manager.run(&msg("a", text)).await;
        }
        assert_eq!(rx.recv().await, Some(true));
        assert_eq!(hook.messages.lock().unwrap().len(), 2);
    }
}
