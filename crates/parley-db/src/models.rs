//! Database row types: these map directly to SQLite rows.
//! Distinct from parley-types models to keep the DB layer independent.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use parley_types::models::{ChatMessage, Room};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct RoomRow {
    pub id: i64,
    pub name: String,
    pub is_private: bool,
    pub created_at: String,
}

impl RoomRow {
    pub fn to_room(&self) -> Result<Room> {
        Ok(Room {
            name: self.name.clone(),
            is_private: self.is_private,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct MessageRow {
    pub id: i64,
    pub room: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub attachment_url: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self, read_by: Vec<String>) -> Result<ChatMessage> {
        Ok(ChatMessage {
            author_id: Uuid::parse_str(&self.author_id)
                .with_context(|| format!("corrupt author_id on message {}", self.id))?,
            timestamp: parse_timestamp(&self.created_at)
                .with_context(|| format!("corrupt created_at on message {}", self.id))?,
            id: self.id,
            room: self.room,
            username: self.author_username,
            content: self.content,
            attachment_url: self.attachment_url,
            read_by,
        })
    }
}

/// A page of history, oldest message first.
#[derive(Debug)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub page: i64,
    pub num_pages: i64,
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
