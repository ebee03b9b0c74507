use async_trait::async_trait;
use parley_step::Failure;

/// Side effect run whenever a step rejects an event inside a session:
/// both when a template fails to match and on every rejected `get` attempt.
///
/// The typical implementation replies to the sender when the failure carries
/// a message and stays silent otherwise.
#[async_trait]
pub trait FailureHook<T>: Send + Sync {
    async fn on_failure(&self, item: &T, failure: &Failure);
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreFailures;

#[async_trait]
impl<T: Sync> FailureHook<T> for IgnoreFailures {
    async fn on_failure(&self, _item: &T, _failure: &Failure) {}
}
