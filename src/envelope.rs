//! Outgoing payloads queued on a state and drained through the message
//! adapter.

use crate::error::EnvelopeError;
use crate::message::{Message, Room, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an envelope should be delivered by the message adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Send,
    Reply,
    React,
    Emote,
    Topic,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Send => write!(f, "send"),
            Method::Reply => write!(f, "reply"),
            Method::React => write!(f, "react"),
            Method::Emote => write!(f, "emote"),
            Method::Topic => write!(f, "topic"),
        }
    }
}

/// One outgoing message: target room and/or user, strings to deliver, an
/// optional structured payload, and a delivery method settable exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub room: Option<Room>,
    pub user: Option<User>,
    pub strings: Vec<String>,
    pub payload: Option<serde_json::Value>,
    method: Option<Method>,
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            room: None,
            user: None,
            strings: Vec::new(),
            payload: None,
            method: None,
        }
    }

    /// An envelope addressed back at the source of a message.
    pub fn for_message(message: &Message) -> Self {
        let mut envelope = Self::new();
        envelope.room = Some(message.room.clone());
        envelope.user = Some(message.user.clone());
        envelope
    }

    pub fn to_room(mut self, room: Room) -> Self {
        self.room = Some(room);
        self
    }

    pub fn to_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    /// Append strings to deliver.
    pub fn write<I, S>(&mut self, strings: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strings.extend(strings.into_iter().map(Into::into));
        self
    }

    /// Attach a structured payload for rich-format adapters.
    pub fn compose(&mut self, payload: serde_json::Value) -> &mut Self {
        self.payload = Some(payload);
        self
    }

    /// Set the delivery method. The method can be set once; a second set
    /// with a different method fails.
    pub fn via(&mut self, method: Method) -> Result<&mut Self, EnvelopeError> {
        match self.method {
            Some(current) if current != method => Err(EnvelopeError::MethodConflict {
                current: current.to_string(),
                requested: method.to_string(),
            }),
            _ => {
                self.method = Some(method);
                Ok(self)
            }
        }
    }

    /// The delivery method, defaulting to `send`.
    pub fn method(&self) -> Method {
        self.method.unwrap_or(Method::Send)
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}
