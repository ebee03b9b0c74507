use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::error::{Failure, StepResult};
use crate::record::{Extraction, Record};

type StepFn<T, R> = dyn Fn(T) -> BoxFuture<'static, StepResult<R>> + Send + Sync;

/// An async, fallible, composable transformation from `T` to `R`.
///
/// Cloning is cheap (one `Arc` bump), so steps can be shared between
/// templates, handlers and extraction mappings.
pub struct Step<T, R> {
    f: Arc<StepFn<T, R>>,
}

impl<T, R> Clone for Step<T, R> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<T, R> Step<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Build a step from an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<R>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |input| f(input).boxed()),
        }
    }

    /// Build a step from a plain function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(T) -> StepResult<R> + Send + Sync + 'static,
    {
        Self::new(move |input| future::ready(f(input)))
    }

    /// Apply the step to `input`.
    pub fn run(&self, input: T) -> BoxFuture<'static, StepResult<R>> {
        (self.f)(input)
    }

    /// Sequence: feed this step's output into `next`.
    ///
    /// A failure from either side is returned as-is and short-circuits the rest.
    pub fn then<R2>(self, next: Step<R, R2>) -> Step<T, R2>
    where
        R2: Send + 'static,
    {
        Step::new(move |input| {
            let head = self.run(input);
            let next = next.clone();
            async move { next.run(head.await?).await }
        })
    }

    /// Transform the output with an infallible function.
    pub fn map<R2, F>(self, f: F) -> Step<T, R2>
    where
        R2: Send + 'static,
        F: Fn(R) -> R2 + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Step::new(move |input| {
            let head = self.run(input);
            let f = Arc::clone(&f);
            async move { head.await.map(|value| f(value)) }
        })
    }

    /// Transform the output with a function that may itself fail.
    pub fn try_map<R2, F>(self, f: F) -> Step<T, R2>
    where
        R2: Send + 'static,
        F: Fn(R) -> StepResult<R2> + Send + Sync + 'static,
    {
        self.then(Step::from_fn(f))
    }

    /// Replace the message of any failure with `message`.
    pub fn fail(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.fail_with(move |_| message.clone())
    }

    /// Replace the message of any failure with one rendered from the original
    /// failure. The renderer only runs when the step actually fails.
    pub fn fail_with<F>(self, render: F) -> Self
    where
        F: Fn(&Failure) -> String + Send + Sync + 'static,
    {
        let render = Arc::new(render);
        Step::new(move |input| {
            let head = self.run(input);
            let render = Arc::clone(&render);
            async move {
                head.await
                    .map_err(|failure| Failure::with_message(render(&failure)))
            }
        })
    }

    /// Filter: keep the output when `predicate` holds, otherwise fail silently.
    pub fn pass<P>(self, predicate: P) -> Self
    where
        P: Fn(&R) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Step::new(move |input| {
            let head = self.run(input);
            let predicate = Arc::clone(&predicate);
            async move {
                let value = head.await?;
                if predicate(&value) {
                    Ok(value)
                } else {
                    Err(Failure::silent())
                }
            }
        })
    }
}

impl<T, R> Step<T, R>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Filter with an async predicate step. A failing predicate fails the
    /// composite with the predicate's own failure.
    pub fn pass_step(self, predicate: Step<R, bool>) -> Self {
        Step::new(move |input| {
            let head = self.run(input);
            let predicate = predicate.clone();
            async move {
                let value = head.await?;
                if predicate.run(value.clone()).await? {
                    Ok(value)
                } else {
                    Err(Failure::silent())
                }
            }
        })
    }

    /// Run every entry of `mapping` concurrently over this step's output.
    ///
    /// All-or-nothing: every entry runs to completion, and if any of them
    /// failed the composite fails with the first failure in mapping order.
    pub fn extract_all<V>(self, mapping: Extraction<R, V>) -> Step<T, Record<V>>
    where
        V: Send + 'static,
    {
        self.then(mapping.all())
    }

    /// Try the entries of `mapping` in order and keep the first success as a
    /// single-field record. Fails silently when none succeed.
    pub fn extract_first<V>(self, mapping: Extraction<R, V>) -> Step<T, Record<V>>
    where
        V: Send + 'static,
    {
        self.then(mapping.first())
    }

    /// Recover from a failure with `fallback`. The resulting step never fails.
    pub fn or(self, fallback: R) -> Self {
        Step::new(move |input| {
            let head = self.run(input);
            let fallback = fallback.clone();
            async move { Ok(head.await.unwrap_or(fallback)) }
        })
    }
}

impl<T, R> Step<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Run this step and `other` concurrently over the same input.
    ///
    /// Both always run to completion; the composite fails with this step's
    /// failure first, then `other`'s.
    pub fn join<R2>(self, other: Step<T, R2>) -> Step<T, (R, R2)>
    where
        R2: Send + 'static,
    {
        Step::new(move |input: T| {
            let left = self.run(input.clone());
            let right = other.run(input);
            async move {
                let (left, right) = future::join(left, right).await;
                Ok((left?, right?))
            }
        })
    }
}

/// The identity step, used as the root of a pipeline.
pub fn certain<T>() -> Step<T, T>
where
    T: Send + 'static,
{
    Step::from_fn(Ok)
}

/// Fail with a user-facing message.
pub fn die<R>(message: impl Into<String>) -> StepResult<R> {
    Err(Failure::with_message(message))
}
