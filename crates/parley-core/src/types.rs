use serde::{Deserialize, Serialize};
use std::fmt;

/// One inbound chat message, as produced by the external receiver.
///
/// Events are immutable once they enter the dispatcher. The conversation kind
/// lives in [`Scope`], a closed sum type, so a group event always carries a
/// group id and a private event never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unix timestamp (seconds) reported by the upstream platform.
    #[serde(default)]
    pub time: i64,
    /// Account id of the bot that received the event.
    #[serde(default)]
    pub self_id: u64,
    #[serde(default)]
    pub message_id: i64,
    /// Sender identity.
    pub user_id: u64,
    /// Message body in the upstream text format.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderProfile>,
    #[serde(flatten)]
    pub scope: Scope,
}

impl Event {
    /// A private (direct) message from `user_id`.
    pub fn private(user_id: u64, message: impl Into<String>) -> Self {
        Self::new(user_id, message, Scope::Private { sub_type: PrivateKind::default() })
    }

    /// A message posted by `user_id` in group `group_id`.
    pub fn group(group_id: u64, user_id: u64, message: impl Into<String>) -> Self {
        Self::new(
            user_id,
            message,
            Scope::Group {
                group_id,
                sub_type: GroupKind::default(),
                anonymous: None,
            },
        )
    }

    /// A message posted by `user_id` in discussion `discuss_id`.
    pub fn discuss(discuss_id: u64, user_id: u64, message: impl Into<String>) -> Self {
        Self::new(user_id, message, Scope::Discuss { discuss_id })
    }

    fn new(user_id: u64, message: impl Into<String>, scope: Scope) -> Self {
        Self {
            time: 0,
            self_id: 0,
            message_id: 0,
            user_id,
            message: message.into(),
            sender: None,
            scope,
        }
    }

    pub fn with_self_id(mut self, self_id: u64) -> Self {
        self.self_id = self_id;
        self
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn text(&self) -> &str {
        &self.message
    }

    pub fn is_private(&self) -> bool {
        matches!(self.scope, Scope::Private { .. })
    }

    pub fn is_group(&self) -> bool {
        matches!(self.scope, Scope::Group { .. })
    }

    pub fn is_discuss(&self) -> bool {
        matches!(self.scope, Scope::Discuss { .. })
    }

    /// True when the bot itself is the sender (e.g. an echo of its own reply).
    pub fn is_from_self(&self) -> bool {
        self.self_id != 0 && self.self_id == self.user_id
    }
}

/// Conversation kind, tagged by `message_type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum Scope {
    Private {
        #[serde(default)]
        sub_type: PrivateKind,
    },
    Group {
        group_id: u64,
        #[serde(default)]
        sub_type: GroupKind,
        /// Present only for anonymous group posts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anonymous: Option<Anonymous>,
    },
    Discuss {
        discuss_id: u64,
    },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Private { .. } => write!(f, "private"),
            Scope::Group { .. } => write!(f, "group"),
            Scope::Discuss { .. } => write!(f, "discuss"),
        }
    }
}

/// How a private conversation was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivateKind {
    #[default]
    Friend,
    Group,
    Discuss,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    #[default]
    Normal,
    Anonymous,
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anonymous {
    pub id: u64,
    pub name: String,
    pub flag: String,
}

/// Sender details attached by the upstream platform. Every field is optional
/// because private, group and discussion payloads carry different subsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    #[serde(default)]
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Group member role hierarchy: owner > admin > member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_group_event() {
        let json = r#"{
            "post_type": "message",
            "message_type": "group",
            "sub_type": "normal",
            "time": 1700000000,
            "self_id": 10000,
            "message_id": 7,
            "group_id": 123,
            "user_id": 42,
            "anonymous": null,
            "message": "hello",
            "raw_message": "hello",
            "font": 0,
            "sender": {"nickname": "alice", "role": "admin"}
        }"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.user_id, 42);
        assert_eq!(event.text(), "hello");
        assert_eq!(
            event.scope,
            Scope::Group { group_id: 123, sub_type: GroupKind::Normal, anonymous: None }
        );
        assert!(event.sender.unwrap().role.unwrap().is_admin());
    }

    #[test]
    fn deserialize_private_event_defaults_sub_type() {
        let json = r#"{"message_type":"private","user_id":5,"message":"hi"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert!(event.is_private());
        assert_eq!(event.scope, Scope::Private { sub_type: PrivateKind::Friend });
    }

    #[test]
    fn discuss_event_requires_discuss_id() {
        let json = r#"{"message_type":"discuss","user_id":5,"message":"hi"}"#;
        assert!(serde_json::from_str::<Event>(json).is_err());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let json = r#"{"message_type":"channel","user_id":5,"message":"hi"}"#;
        assert!(serde_json::from_str::<Event>(json).is_err());
    }

    #[test]
    fn from_self_requires_known_self_id() {
        assert!(!Event::private(1, "x").is_from_self());
        assert!(Event::private(9, "x").with_self_id(9).is_from_self());
        assert!(!Event::private(1, "x").with_self_id(9).is_from_self());
    }

    #[test]
    fn scope_display() {
        assert_eq!(Event::group(1, 2, "x").scope.to_string(), "group");
        assert_eq!(Event::discuss(1, 2, "x").scope.to_string(), "discuss");
    }
}
