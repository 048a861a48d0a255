use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, Room};

// -- JWT Claims --

/// JWT claims shared across parley-api (REST middleware) and the WebSocket
/// upgrade in parley-server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room: String,
    pub created: bool,
}

/// Returned when a user enters a room: the room plus its most recent messages.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoomView {
    pub room: Room,
    pub messages: Vec<MessageResponse>,
}

// -- Messages --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: i64,
    pub username: String,
    pub content: String,
    pub attachment_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub read_by: Vec<String>,
}

impl From<ChatMessage> for MessageResponse {
    fn from(msg: ChatMessage) -> Self {
        Self {
            id: msg.id,
            username: msg.username,
            content: msg.content,
            attachment_url: msg.attachment_url,
            timestamp: msg.timestamp,
            read_by: msg.read_by,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<MessageResponse>,
    pub page: i64,
    pub num_pages: i64,
}

// -- Attachments --

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub text: String,
    pub filename: Option<String>,
}
