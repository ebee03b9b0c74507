use async_trait::async_trait;
use parley_core::Event;

use crate::{
    error::ChannelError,
    types::{ChannelStatus, OutboundMessage},
};

/// Outbound side of an adapter: delivers replies to the chat platform.
///
/// Implementations must be `Send + Sync` so a single adapter can be shared
/// by the dispatcher, failure hooks and every session body.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"console"`).
    fn name(&self) -> &str;

    /// Establish the connection to the external service.
    ///
    /// Implementations should transition their internal state to
    /// [`ChannelStatus::Connected`] on success.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Deliver a single outbound message.
    ///
    /// This is intentionally `&self` so that concurrent sessions can reply
    /// without a mutable borrow.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;

    /// Reply with plain text into the conversation `event` came from.
    async fn reply(&self, event: &Event, text: &str) -> Result<(), ChannelError> {
        self.send(&OutboundMessage::reply_to(self.name(), event, text))
            .await
    }
}

/// Inbound side of an adapter: yields already-parsed events in arrival order.
#[async_trait]
pub trait EventSource: Send {
    /// The next event, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<Event>;
}
