//! Inbound message variants and the user/room identity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A person (or synthetic actor) that messages are attributed to.
///
/// Users are deduplicated by id in memory's `users` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    /// Room the user was last seen in, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, serde_json::Value>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            room: None,
            meta: HashMap::new(),
        }
    }

    /// The synthetic user attributed to server-originated events.
    pub fn system() -> Self {
        Self::new("system", "system")
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room = Some(room_id.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// A conversation location. `direct` is the pseudo-room for one-on-one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, serde_json::Value>,
}

impl Room {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta: HashMap::new(),
        }
    }

    /// The pseudo-room used when a message has no room context.
    pub fn direct() -> Self {
        Self::new("direct", "direct")
    }
}

/// Message content variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// A textual chat message.
    Text { text: String },
    /// A user entered a room.
    Enter,
    /// A user left a room.
    Leave,
    /// A room topic changed.
    Topic { topic: String },
    /// A server-originated event with an arbitrary structured payload.
    Server { payload: serde_json::Value },
    /// Wraps a message that produced no match, for catch-all handling.
    CatchAll { original: Box<Message> },
}

/// An inbound event from an adapter (or the server collaborator).
///
/// Every message references a user (possibly the synthetic system user) and
/// a room (possibly `direct`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub user: User,
    pub room: Room,
    pub kind: MessageKind,
}

impl Message {
    fn with_kind(user: User, room: Room, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            user,
            room,
            kind,
        }
    }

    pub fn text(user: User, room: Room, text: impl Into<String>) -> Self {
        Self::with_kind(user, room, MessageKind::Text { text: text.into() })
    }

    pub fn enter(user: User, room: Room) -> Self {
        Self::with_kind(user, room, MessageKind::Enter)
    }

    pub fn leave(user: User, room: Room) -> Self {
        Self::with_kind(user, room, MessageKind::Leave)
    }

    pub fn topic(user: User, room: Room, topic: impl Into<String>) -> Self {
        Self::with_kind(user, room, MessageKind::Topic { topic: topic.into() })
    }

    /// A server event; attributed to the system user unless one is given.
    pub fn server(payload: serde_json::Value) -> Self {
        Self::with_kind(User::system(), Room::new("server", "server"), MessageKind::Server {
            payload,
        })
    }

    /// Wrap an unmatched message for catch-all evaluation. The wrapper keeps
    /// the original user and room so envelopes still target the right place.
    pub fn catch_all(original: Message) -> Self {
        let user = original.user.clone();
        let room = original.room.clone();
        Self::with_kind(user, room, MessageKind::CatchAll {
            original: Box::new(original),
        })
    }

    /// The message text, for text messages (and text wrapped in catch-all).
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { text } => Some(text),
            MessageKind::CatchAll { original } => original.text_content(),
            _ => None,
        }
    }

    /// The server payload, also visible through a catch-all wrapper.
    pub fn server_payload(&self) -> Option<&serde_json::Value> {
        match &self.kind {
            MessageKind::Server { payload } => Some(payload),
            MessageKind::CatchAll { original } => original.server_payload(),
            _ => None,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self.kind, MessageKind::CatchAll { .. })
    }

    /// Whether the listen stage applies to this message.
    pub fn is_audible(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::Text { .. }
                | MessageKind::Enter
                | MessageKind::Leave
                | MessageKind::Topic { .. }
        )
    }

    pub fn is_server(&self) -> bool {
        matches!(self.kind, MessageKind::Server { .. })
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            MessageKind::Text { text } => write!(f, "{}", text),
            MessageKind::Enter => write!(f, "[enter: {}]", self.user.name),
            MessageKind::Leave => write!(f, "[leave: {}]", self.user.name),
            MessageKind::Topic { topic } => write!(f, "[topic: {}]", topic),
            MessageKind::Server { .. } => write!(f, "[server event]"),
            MessageKind::CatchAll { original } => write!(f, "[catch-all: {}]", original),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_all_preserves_user_room_and_text() {
        let msg = Message::text(User::new("u1", "alice"), Room::new("r1", "general"), "hello");
        let original_id = msg.id;
        let wrapped = Message::catch_all(msg);

        assert!(wrapped.is_catch_all());
        assert_ne!(wrapped.id, original_id);
        assert_eq!(wrapped.user.id, "u1");
        assert_eq!(wrapped.room.id, "r1");
        assert_eq!(wrapped.text_content(), Some("hello"));
    }

    #[test]
    fn server_messages_carry_the_system_user() {
        let msg = Message::server(serde_json::json!({"deploy": "done"}));
        assert_eq!(msg.user.id, "system");
        assert!(msg.is_server());
        assert!(!msg.is_audible());
    }
}
