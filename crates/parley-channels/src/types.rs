use parley_core::{Event, Scope};
use serde::{Deserialize, Serialize};

/// Where an outbound message is delivered. Mirrors the conversation kinds
/// of [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "message_type")]
pub enum Target {
    Private { user_id: u64 },
    Group { group_id: u64 },
    Discuss { discuss_id: u64 },
}

impl Target {
    /// The conversation `event` was posted in.
    pub fn of(event: &Event) -> Self {
        match event.scope {
            Scope::Private { .. } => Target::Private {
                user_id: event.user_id,
            },
            Scope::Group { group_id, .. } => Target::Group { group_id },
            Scope::Discuss { discuss_id } => Target::Discuss { discuss_id },
        }
    }
}

/// A message to be delivered to an external channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Logical channel name (e.g. "console").
    pub channel: String,

    #[serde(flatten)]
    pub target: Target,

    /// Content to deliver.
    pub content: String,

    /// Formatting hint for the target platform.
    #[serde(default)]
    pub format: MessageFormat,

    /// Id of the event being answered, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<i64>,
}

impl OutboundMessage {
    pub fn new(channel: impl Into<String>, target: Target, content: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            target,
            content: content.into(),
            format: MessageFormat::default(),
            in_reply_to: None,
        }
    }

    /// A plain-text reply into the conversation `event` came from.
    pub fn reply_to(channel: impl Into<String>, event: &Event, content: impl Into<String>) -> Self {
        Self {
            in_reply_to: Some(event.message_id),
            ..Self::new(channel, Target::of(event), content)
        }
    }

    pub fn with_format(mut self, format: MessageFormat) -> Self {
        self.format = format;
        self
    }
}

/// Formatting hint for outbound message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    /// Raw text with no special markup.
    #[default]
    PlainText,

    /// Markdown as understood by the target platform.
    Markdown,
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Fully connected and ready to send.
    Connected,

    /// Cleanly disconnected (not an error condition).
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_follows_event_scope() {
        assert_eq!(
            Target::of(&Event::private(5, "hi")),
            Target::Private { user_id: 5 }
        );
        assert_eq!(
            Target::of(&Event::group(9, 5, "hi")),
            Target::Group { group_id: 9 }
        );
        assert_eq!(
            Target::of(&Event::discuss(3, 5, "hi")),
            Target::Discuss { discuss_id: 3 }
        );
    }

    #[test]
    fn reply_serializes_flat() {
        let event = Event::group(9, 5, "hi").with_message_id(77);
        let reply = OutboundMessage::reply_to("console", &event, "hello");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["message_type"], "group");
        assert_eq!(json["group_id"], 9);
        assert_eq!(json["content"], "hello");
        assert_eq!(json["format"], "plain_text");
        assert_eq!(json["in_reply_to"], 77);

        let back: OutboundMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, reply);
    }
}
