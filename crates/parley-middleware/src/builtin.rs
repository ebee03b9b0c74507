use std::time::Instant;

use async_trait::async_trait;
use parley_core::Event;
use tracing::{debug, trace};

use crate::chain::{Middleware, Next};
use crate::error::MiddlewareResult;

/// Logs every event at debug level, plus how long the rest of the chain took.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEvents;

#[async_trait]
impl Middleware<Event> for LogEvents {
    fn name(&self) -> &str {
        "log_events"
    }

    async fn handle(&self, event: &Event, next: Next<'_, Event>) -> MiddlewareResult {
        debug!(
            scope = %event.scope,
            user_id = event.user_id,
            message_id = event.message_id,
            message = %event.message,
            "event received"
        );
        let started = Instant::now();
        let result = next.run(event).await;
        debug!(
            message_id = event.message_id,
            duration_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "event passed downstream"
        );
        result
    }
}

/// Drops events the bot sent itself, so echoes never start sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreSelf;

#[async_trait]
impl Middleware<Event> for IgnoreSelf {
    fn name(&self) -> &str {
        "ignore_self"
    }

    async fn handle(&self, event: &Event, next: Next<'_, Event>) -> MiddlewareResult {
        if event.is_from_self() {
            trace!(user_id = event.user_id, "ignoring own message");
            return Ok(());
        }
        next.run(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MiddlewareChain, Outcome};

    #[tokio::test]
    async fn ignore_self_stops_own_messages() {
        let chain = MiddlewareChain::new();
        chain.register(IgnoreSelf);

        let own = Event::private(42, "echo").with_self_id(42);
        let other = Event::private(7, "hi").with_self_id(42);
        assert_eq!(chain.call(&own).await, Outcome::Stopped);
        assert_eq!(chain.call(&other).await, Outcome::Completed);
    }

    #[tokio::test]
    async fn log_events_is_transparent() {
        let chain = MiddlewareChain::new();
        chain.register(LogEvents);
        chain.register(IgnoreSelf);
        assert_eq!(chain.names(), vec!["log_events", "ignore_self"]);

        let own = Event::group(1, 42, "echo").with_self_id(42);
        assert_eq!(chain.call(&own).await, Outcome::Stopped);
        assert_eq!(chain.call(&Event::group(1, 7, "hi")).await, Outcome::Completed);
    }
}
