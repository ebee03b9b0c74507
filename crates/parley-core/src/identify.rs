//! Identifier functions: pure mappings from an [`Event`] to the key that
//! groups it into a conversation.
//!
//! | Name       | Key                                                   |
//! |------------|-------------------------------------------------------|
//! | `position` | where the message was posted: `G{group}`, `D{discuss}`, `P{user}` |
//! | `user`     | who sent it, across every conversation                |
//! | `unique`   | one sender inside one conversation                    |

use crate::types::{Event, Scope};

/// Scopes a default app registers managers for.
pub const DEFAULT_SCOPES: [&str; 3] = ["position", "user", "unique"];

pub fn position(event: &Event) -> String {
    match event.scope {
        Scope::Discuss { discuss_id } => format!("D{discuss_id}"),
        Scope::Group { group_id, .. } => format!("G{group_id}"),
        Scope::Private { .. } => format!("P{}", event.user_id),
    }
}

pub fn user(event: &Event) -> String {
    event.user_id.to_string()
}

pub fn unique(event: &Event) -> String {
    format!("{}{}", event.user_id, position(event))
}

/// Look up a built-in identifier function by scope name.
pub fn by_name(name: &str) -> Option<fn(&Event) -> String> {
    match name {
        "position" => Some(position),
        "user" => Some(user),
        "unique" => Some(unique),
        _ => None,
    }
}
