use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use parley_channels::{Channel, EventSource};
use parley_core::{identify, Event, ParleyConfig, ParleyError, Result};
use parley_middleware::{MiddlewareChain, Outcome};
use parley_sessions::{
    CosessionManager, FailureHook, GetOptions, HandlerResult, MessageStream, SessionInfo,
    SessionManager, Sessions, StepTemplate,
};
use parley_step::{Extraction, Record, Step};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::reply::ReplyOnFailure;
use crate::steps::root;

type EventSessions = Arc<SessionManager<Event, String>>;
type EventCosessions = Arc<CosessionManager<Event, String>>;

/// The dispatcher.
///
/// Events are handled strictly one after another: the middleware chain runs
/// first, and only if it reaches its tail is the event fanned out to every
/// manager concurrently. Handling completes once every manager has queued
/// the event; session bodies keep running on their own tasks.
pub struct App {
    config: ParleyConfig,
    channel: Arc<dyn Channel>,
    middlewares: MiddlewareChain<Event>,
    sessions: BTreeMap<String, EventSessions>,
    cosessions: BTreeMap<String, EventCosessions>,
    managers: RwLock<Vec<Arc<dyn Sessions<Event>>>>,
    /// Fair lock: waiters are served in arrival order.
    turn: Mutex<()>,
    seq: AtomicU64,
}

impl App {
    /// Build an app with one session and one cosession manager per
    /// configured scope, all replying to failures through `channel`.
    pub fn new(channel: Arc<dyn Channel>, config: ParleyConfig) -> Result<Self> {
        let hook: Arc<dyn FailureHook<Event>> = Arc::new(ReplyOnFailure::new(Arc::clone(&channel)));

        let mut sessions = BTreeMap::new();
        let mut cosessions = BTreeMap::new();
        let mut managers: Vec<Arc<dyn Sessions<Event>>> = Vec::new();
        for scope in &config.dispatcher.scopes {
            let identify = identify::by_name(scope).ok_or_else(|| ParleyError::UnknownManager {
                name: scope.clone(),
            })?;

            let session = Arc::new(SessionManager::new(scope.clone(), identify, Arc::clone(&hook)));
            let cosession = Arc::new(CosessionManager::new(
                format!("co_{scope}"),
                identify,
                Arc::clone(&hook),
            ));
            managers.push(session.clone());
            managers.push(cosession.clone());
            sessions.insert(scope.clone(), session);
            cosessions.insert(scope.clone(), cosession);
        }
        info!(scopes = ?config.dispatcher.scopes, channel = %channel.name(), "app initialised");

        Ok(Self {
            config,
            channel,
            middlewares: MiddlewareChain::new(),
            sessions,
            cosessions,
            managers: RwLock::new(managers),
            turn: Mutex::new(()),
            seq: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    /// The outbound channel, for session bodies that reply.
    pub fn channel(&self) -> Arc<dyn Channel> {
        Arc::clone(&self.channel)
    }

    pub fn middlewares(&self) -> &MiddlewareChain<Event> {
        &self.middlewares
    }

    /// `get` options derived from the `[sessions]` config section.
    pub fn get_options(&self) -> GetOptions {
        GetOptions {
            max_attempts: self.config.sessions.max_attempts,
            timeout: self.config.sessions.fetch_timeout_secs.map(Duration::from_secs),
        }
    }

    /// The session manager for `scope` (`position`, `user`, `unique`, ...).
    pub fn session(&self, scope: &str) -> Result<&EventSessions> {
        self.sessions.get(scope).ok_or_else(|| ParleyError::UnknownManager {
            name: scope.to_string(),
        })
    }

    pub fn cosession(&self, scope: &str) -> Result<&EventCosessions> {
        self.cosessions.get(scope).ok_or_else(|| ParleyError::UnknownManager {
            name: scope.to_string(),
        })
    }

    /// Fan events out to an integrator-defined manager as well.
    pub fn add_sessions(&self, manager: Arc<dyn Sessions<Event>>) {
        debug!(manager = %manager.name(), "session manager added");
        self.managers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(manager);
    }

    fn managers(&self) -> Vec<Arc<dyn Sessions<Event>>> {
        self.managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start an exclusive session in `scope` whenever `step` accepts an
    /// event with no live session. Failures with a message are replied to.
    pub fn on_session<R, H, Fut>(&self, scope: &str, step: Step<Event, R>, handler: H) -> Result<()>
    where
        R: Send + 'static,
        H: Fn(R, MessageStream<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.session(scope)?
            .register_template(Arc::new(StepTemplate::new(step, handler)));
        Ok(())
    }

    /// Like [`on_session`](Self::on_session), but the session coexists with
    /// sessions started by other cosession flows for the same identifier.
    pub fn on_cosession<R, H, Fut>(&self, scope: &str, step: Step<Event, R>, handler: H) -> Result<()>
    where
        R: Send + 'static,
        H: Fn(R, MessageStream<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.cosession(scope)?
            .register_template(Arc::new(StepTemplate::new(step, handler)));
        Ok(())
    }

    /// Start a session when every entry of `extraction` accepts the event.
    pub fn on_session_map<V, H, Fut>(&self, scope: &str, extraction: Extraction<Event, V>, handler: H) -> Result<()>
    where
        V: Send + 'static,
        H: Fn(Record<V>, MessageStream<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on_session(scope, root().extract_all(extraction), handler)
    }

    /// Process one event. Concurrent callers are served in call order.
    ///
    /// The event reaches the session managers only if the middleware chain
    /// runs to its end; a middleware that stops, fails or panics drops it.
    pub async fn handle(&self, event: Event) {
        let _turn = self.turn.lock().await;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let span = info_span!(
            "dispatch",
            seq,
            scope = %event.scope,
            user_id = event.user_id,
            message_id = event.message_id
        );

        async {
            let outcome = self.middlewares.call(&event).await;
            if outcome != Outcome::Completed {
                debug!(?outcome, "event not dispatched");
                return;
            }
            let managers = self.managers();
            join_all(managers.iter().map(|manager| manager.run(&event))).await;
            debug!(managers = managers.len(), "event dispatched");
        }
        .instrument(span)
        .await
    }

    /// Drive the app from `source` until it is exhausted or `shutdown` fires.
    /// Returns the number of events handled.
    pub async fn serve<S>(&self, mut source: S, shutdown: CancellationToken) -> u64
    where
        S: EventSource,
    {
        let mut handled = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(handled, "shutdown requested; no longer accepting events");
                    break;
                }
                next = source.next_event() => match next {
                    Some(event) => {
                        self.handle(event).await;
                        handled += 1;
                    }
                    None => {
                        info!(handled, "event source exhausted");
                        break;
                    }
                },
            }
        }
        handled
    }

    /// Like [`serve`](Self::serve), over any stream of events.
    pub async fn serve_stream<S>(&self, events: S, shutdown: CancellationToken) -> u64
    where
        S: Stream<Item = Event> + Send,
    {
        tokio::pin!(events);
        let mut handled = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(handled, "shutdown requested; no longer accepting events");
                    break;
                }
                next = events.next() => match next {
                    Some(event) => {
                        self.handle(event).await;
                        handled += 1;
                    }
                    None => {
                        info!(handled, "event stream ended");
                        break;
                    }
                },
            }
        }
        handled
    }

    /// Live sessions across every manager.
    pub fn live(&self) -> usize {
        self.managers().iter().map(|manager| manager.live()).sum()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.managers()
            .iter()
            .flat_map(|manager| manager.sessions())
            .collect()
    }

    /// Log every session open for at least `threshold`. Nothing is closed:
    /// a handler that never returns keeps its stream until it is closed
    /// explicitly. Returns how many sessions were reported.
    pub fn report_long_lived(&self, threshold: Duration) -> usize {
        let long_lived: Vec<SessionInfo> = self
            .sessions()
            .into_iter()
            .filter(|info| !info.stream.closed && info.stream.age >= threshold)
            .collect();
        for info in &long_lived {
            warn!(
                manager = %info.manager,
                identifier = %info.identifier,
                stream = %info.stream.id,
                age_secs = info.stream.age.as_secs(),
                idle_secs = info.stream.idle.as_secs(),
                "session still running"
            );
        }
        long_lived.len()
    }

    /// Close sessions idle for at least `max_idle` in every manager.
    pub fn close_idle(&self, max_idle: Duration) -> usize {
        self.managers()
            .iter()
            .map(|manager| manager.close_idle(max_idle))
            .sum()
    }
}
