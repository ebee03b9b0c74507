use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::{self, BoxFuture, FutureExt};
use parley_core::BoxError;
use tracing::{debug, error, warn};

use crate::error::{MiddlewareError, MiddlewareResult};

/// One continuation-passing step of the chain.
///
/// Call `next.run(item)` to continue; returning without calling it
/// short-circuits everything after this middleware.
#[async_trait]
pub trait Middleware<T>: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, item: &T, next: Next<'_, T>) -> MiddlewareResult;
}

/// Handle returned by registration, used to remove the middleware again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MiddlewareId(u64);

/// How a call through the chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every middleware called `next`; the identity tail was reached.
    Completed,
    /// Some middleware returned without calling `next`.
    Stopped,
    /// A middleware returned an error or panicked. Already logged.
    Failed,
}

struct Registered<T> {
    id: MiddlewareId,
    name: String,
    middleware: Arc<dyn Middleware<T>>,
}

impl<T> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            middleware: Arc::clone(&self.middleware),
        }
    }
}

/// The remainder of the chain after the current middleware.
pub struct Next<'a, T> {
    rest: &'a [Registered<T>],
    tail: &'a AtomicBool,
}

impl<T> fmt::Debug for Next<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.rest.len())
            .finish()
    }
}

impl<'a, T> Next<'a, T>
where
    T: Sync,
{
    /// Run the rest of the chain. Past the last middleware this resolves
    /// immediately with `Ok(())`.
    pub fn run(self, item: &'a T) -> BoxFuture<'a, MiddlewareResult> {
        match self.rest.split_first() {
            None => {
                self.tail.store(true, Ordering::Release);
                future::ready(Ok(())).boxed()
            }
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    tail: self.tail,
                };
                let name = head.name.as_str();
                head.middleware
                    .handle(item, next)
                    .map(move |result| result.map_err(|e| attribute(name, e)))
                    .boxed()
            }
        }
    }
}

/// Tag an error with the middleware it escaped from, once.
fn attribute(name: &str, e: BoxError) -> BoxError {
    if e.is::<MiddlewareError>() {
        e
    } else {
        Box::new(MiddlewareError::Failed {
            name: name.to_string(),
            source: e,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Ordered list of middleware. Mutable at any time; a call in flight keeps
/// the snapshot it started with.
pub struct MiddlewareChain<T> {
    entries: RwLock<Vec<Registered<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for MiddlewareChain<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> MiddlewareChain<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn entry<M>(&self, middleware: M) -> Registered<T>
    where
        M: Middleware<T> + 'static,
    {
        let id = MiddlewareId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Registered {
            id,
            name: middleware.name().to_string(),
            middleware: Arc::new(middleware),
        }
    }

    /// Append to the end of the chain.
    pub fn register<M>(&self, middleware: M) -> MiddlewareId
    where
        M: Middleware<T> + 'static,
    {
        let entry = self.entry(middleware);
        let id = entry.id;
        debug!(name = %entry.name, "middleware registered");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        id
    }

    /// Insert at the front of the chain.
    pub fn register_first<M>(&self, middleware: M) -> MiddlewareId
    where
        M: Middleware<T> + 'static,
    {
        let entry = self.entry(middleware);
        let id = entry.id;
        debug!(name = %entry.name, "middleware registered first");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, entry);
        id
    }

    /// Remove a middleware. Silent no-op (returning `false`) for unknown ids.
    pub fn unregister(&self, id: MiddlewareId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                let removed = entries.remove(index);
                debug!(name = %removed.name, "middleware unregistered");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Run `item` through the chain. Errors and panics are logged here and
    /// reported as [`Outcome::Failed`]; they never reach the caller.
    pub async fn call(&self, item: &T) -> Outcome {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let tail = AtomicBool::new(false);
        let started = Instant::now();

        let next = Next {
            rest: &entries,
            tail: &tail,
        };
        let outcome = match AssertUnwindSafe(next.run(item)).catch_unwind().await {
            Ok(Ok(())) if tail.load(Ordering::Acquire) => Outcome::Completed,
            Ok(Ok(())) => Outcome::Stopped,
            Ok(Err(e)) => {
                warn!(error = %e, "middleware chain failed");
                Outcome::Failed
            }
            Err(payload) => {
                let e = MiddlewareError::Panicked {
                    message: panic_message(payload.as_ref()),
                };
                error!(error = %e, "middleware chain panicked");
                Outcome::Failed
            }
        };

        debug!(
            ?outcome,
            middlewares = entries.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "middleware chain finished"
        );
        outcome
    }
}
