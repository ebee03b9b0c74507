use std::sync::Arc;

use async_trait::async_trait;
use parley_channels::Channel;
use parley_core::Event;
use parley_sessions::FailureHook;
use parley_step::Failure;
use tracing::warn;

/// Failure hook that answers the sender with the failure's message.
///
/// Message-less failures ("not for me") stay silent.
pub struct ReplyOnFailure {
    channel: Arc<dyn Channel>,
}

impl ReplyOnFailure {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl FailureHook<Event> for ReplyOnFailure {
    async fn on_failure(&self, event: &Event, failure: &Failure) {
        let Some(message) = failure.message() else {
            return;
        };
        if let Err(e) = self.channel.reply(event, message).await {
            warn!(
                channel = %self.channel.name(),
                message_id = event.message_id,
                error = %e,
                "failed to deliver failure reply"
            );
        }
    }
}
