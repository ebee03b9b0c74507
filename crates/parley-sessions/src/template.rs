use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use parley_step::Step;
use tracing::trace;

use crate::error::HandlerResult;
use crate::hook::FailureHook;
use crate::stream::MessageStream;

/// A session body ready to be started on a freshly created stream.
pub type SessionBody<T> = Box<dyn FnOnce(MessageStream<T>) -> BoxFuture<'static, HandlerResult> + Send>;

type BodyFn<T> = dyn Fn(MessageStream<T>) -> BoxFuture<'static, HandlerResult> + Send + Sync;
type HandlerFn<R, T> = dyn Fn(R, MessageStream<T>) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// Decides whether a new session starts for an identifier, and with what body.
///
/// Templates are consulted in registration order only when no live stream
/// exists for the identifier; the first to return a body wins.
#[async_trait]
pub trait Template<K, T>: Send + Sync {
    async fn open(&self, identifier: &K, item: &T, hook: &dyn FailureHook<T>) -> Option<SessionBody<T>>;
}

/// Template built from a synchronous predicate over the identifier.
pub struct PredicateTemplate<K, T> {
    predicate: Box<dyn Fn(&K) -> bool + Send + Sync>,
    body: Arc<BodyFn<T>>,
}

impl<K, T> PredicateTemplate<K, T>
where
    T: 'static,
{
    pub fn new<P, B, Fut>(predicate: P, body: B) -> Self
    where
        P: Fn(&K) -> bool + Send + Sync + 'static,
        B: Fn(MessageStream<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            body: Arc::new(move |stream| body(stream).boxed()),
        }
    }
}

#[async_trait]
impl<K, T> Template<K, T> for PredicateTemplate<K, T>
where
    K: Sync,
    T: Sync + 'static,
{
    async fn open(&self, identifier: &K, _item: &T, _hook: &dyn FailureHook<T>) -> Option<SessionBody<T>> {
        if !(self.predicate)(identifier) {
            return None;
        }
        let body = Arc::clone(&self.body);
        Some(Box::new(move |stream| body(stream)))
    }
}

/// Template that matches by running a [`Step`] over the triggering item.
///
/// A Failure is reported through the manager's failure hook and the template
/// declines. On success the handler receives the step's output and the
/// stream, with the triggering item already consumed.
pub struct StepTemplate<T, R> {
    step: Step<T, R>,
    handler: Arc<HandlerFn<R, T>>,
}

impl<T, R> StepTemplate<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn new<H, Fut>(step: Step<T, R>, handler: H) -> Self
    where
        H: Fn(R, MessageStream<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            step,
            handler: Arc::new(move |value, stream| handler(value, stream).boxed()),
        }
    }
}

#[async_trait]
impl<K, T, R> Template<K, T> for StepTemplate<T, R>
where
    K: std::fmt::Debug + Sync,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    async fn open(&self, identifier: &K, item: &T, hook: &dyn FailureHook<T>) -> Option<SessionBody<T>> {
        match self.step.run(item.clone()).await {
            Ok(value) => {
                let handler = Arc::clone(&self.handler);
                Some(Box::new(move |mut stream: MessageStream<T>| {
                    async move {
                        stream.fetch().await?;
                        handler(value, stream).await
                    }
                    .boxed()
                }))
            }
            Err(failure) => {
                trace!(identifier = ?identifier, %failure, "step template declined");
                hook.on_failure(item, &failure).await;
                None
            }
        }
    }
}
