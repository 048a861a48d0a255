use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

/// Frames sent FROM client TO server over a room connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Post a chat message to the bound room
    Message {
        #[serde(default)]
        message: String,
    },

    /// Indicate typing. The declared name is trusted unless the server is
    /// configured to substitute the authenticated identity.
    Typing {
        #[serde(default)]
        username: Option<String>,
    },

    /// Acknowledge a message. Clients send `null` when they fail to parse an id.
    Read {
        #[serde(default)]
        message_id: Option<i64>,
    },

    /// Any tag this server does not know about.
    #[serde(other)]
    Unknown,
}

impl ClientCommand {
    /// Decode a raw text frame. Malformed frames yield `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Join,
    Leave,
}

/// Events sent FROM server TO every member of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// A message was persisted in the room
    Message {
        id: i64,
        username: String,
        content: String,
        attachment_url: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Someone is typing
    Typing { username: String },

    /// A member acknowledged a message
    Read { message_id: i64, username: String },

    /// A connection joined or left the room
    Presence {
        action: PresenceAction,
        username: String,
    },
}

impl From<&ChatMessage> for RoomEvent {
    fn from(msg: &ChatMessage) -> Self {
        Self::Message {
            id: msg.id,
            username: msg.username.clone(),
            content: msg.content.clone(),
            attachment_url: msg.attachment_url.clone(),
            timestamp: msg.timestamp,
        }
    }
}
