use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::{ClientCommand, PresenceAction, RoomEvent};
use parley_types::models::{ChatMessage, Identity};

use crate::registry::RoomRegistry;

/// Whose name goes into a `typing` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypingIdentity {
    /// Rebroadcast whatever name the client declared.
    #[default]
    Declared,
    /// Always use the connection's own identity.
    Authenticated,
}

impl FromStr for TypingIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "declared" => Ok(Self::Declared),
            "authenticated" => Ok(Self::Authenticated),
            other => Err(format!("unknown typing identity mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub typing_identity: TypingIdentity,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            typing_identity: TypingIdentity::Declared,
            outbound_buffer: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("message has no content and no attachment")]
    EmptyMessage,

    #[error("anonymous connections cannot {0}")]
    Anonymous(&'static str),

    #[error("persistence failed: {0:#}")]
    Persistence(#[from] anyhow::Error),

    #[error("store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),
}

/// A connection's registration in a room.
pub struct Membership {
    pub conn_id: Uuid,
    pub events: mpsc::Receiver<RoomEvent>,
}

/// Mediates between connections, the message store and the room registry.
///
/// Every action that is both persisted and broadcast goes through here:
/// the store write completes before anything is sent to the room.
#[derive(Clone)]
pub struct Engine {
    db: Arc<Database>,
    registry: RoomRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(db: Arc<Database>, registry: RoomRegistry, config: EngineConfig) -> Self {
        Self {
            db,
            registry,
            config,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Register a new connection in `room` and announce it to everyone there,
    /// the new connection included.
    pub async fn join(&self, room: &str, identity: &Identity) -> Membership {
        let conn_id = Uuid::new_v4();
        let (tx, events) = mpsc::channel(self.config.outbound_buffer);
        self.registry.join(room, conn_id, tx).await;
        self.registry
            .broadcast(room, presence(PresenceAction::Join, identity))
            .await;
        Membership { conn_id, events }
    }

    /// Deregister first so the leaving connection is not sent its own leave.
    pub async fn leave(&self, room: &str, conn_id: Uuid, identity: &Identity) {
        self.registry.leave(room, conn_id).await;
        self.registry
            .broadcast(room, presence(PresenceAction::Leave, identity))
            .await;
    }

    /// Dispatch one decoded client frame.
    pub async fn handle(
        &self,
        room: &str,
        identity: &Identity,
        cmd: ClientCommand,
    ) -> Result<(), EngineError> {
        match cmd {
            ClientCommand::Message { message } => {
                self.post_message(room, identity, message).await?;
            }
            ClientCommand::Typing { username } => {
                self.typing(room, identity, username).await;
            }
            ClientCommand::Read {
                message_id: Some(message_id),
            } => {
                self.acknowledge(room, identity, message_id).await?;
            }
            ClientCommand::Read { message_id: None } => {}
            ClientCommand::Unknown => {}
        }
        Ok(())
    }

    /// Persist a text message and broadcast it to the room.
    pub async fn post_message(
        &self,
        room: &str,
        identity: &Identity,
        content: String,
    ) -> Result<ChatMessage, EngineError> {
        self.persist_and_broadcast(room, identity, content, None).await
    }

    /// Persist a message that carries an uploaded attachment and broadcast it
    /// exactly like a live message.
    pub async fn publish_attachment(
        &self,
        room: &str,
        identity: &Identity,
        text: String,
        attachment_url: String,
    ) -> Result<ChatMessage, EngineError> {
        self.persist_and_broadcast(room, identity, text, Some(attachment_url))
            .await
    }

    async fn persist_and_broadcast(
        &self,
        room: &str,
        identity: &Identity,
        content: String,
        attachment_url: Option<String>,
    ) -> Result<ChatMessage, EngineError> {
        if content.trim().is_empty() && attachment_url.is_none() {
            return Err(EngineError::EmptyMessage);
        }
        let author_id = identity
            .user_id()
            .ok_or(EngineError::Anonymous("post messages"))?;

        let db = self.db.clone();
        let room_name = room.to_string();
        let msg = tokio::task::spawn_blocking(move || {
            db.create_message(
                &room_name,
                &author_id.to_string(),
                &content,
                attachment_url.as_deref(),
            )
        })
        .await??;

        debug!("Message {} stored in {} by {}", msg.id, room, msg.username);
        self.registry.broadcast(room, RoomEvent::from(&msg)).await;
        Ok(msg)
    }

    /// Record a read receipt. Returns whether the message exists in `room`;
    /// receipts for unknown messages or messages of another room are neither
    /// stored nor broadcast.
    pub async fn acknowledge(
        &self,
        room: &str,
        identity: &Identity,
        message_id: i64,
    ) -> Result<bool, EngineError> {
        let reader_id = identity
            .user_id()
            .ok_or(EngineError::Anonymous("acknowledge messages"))?;

        let db = self.db.clone();
        let room_name = room.to_string();
        let found = tokio::task::spawn_blocking(move || {
            db.mark_read(&room_name, message_id, &reader_id.to_string())
        })
        .await??;

        if found {
            self.registry
                .broadcast(
                    room,
                    RoomEvent::Read {
                        message_id,
                        username: identity.display_name().to_string(),
                    },
                )
                .await;
        } else {
            debug!("Read receipt for unknown message {} in {} dropped", message_id, room);
        }
        Ok(found)
    }

    /// Ephemeral typing indicator; nothing is stored.
    pub async fn typing(&self, room: &str, identity: &Identity, declared: Option<String>) {
        let username = match (self.config.typing_identity, declared) {
            (TypingIdentity::Declared, Some(name)) => name,
            _ => identity.display_name().to_string(),
        };
        self.registry
            .broadcast(room, RoomEvent::Typing { username })
            .await;
    }
}

fn presence(action: PresenceAction, identity: &Identity) -> RoomEvent {
    RoomEvent::Presence {
        action,
        username: identity.display_name().to_string(),
    }
}
