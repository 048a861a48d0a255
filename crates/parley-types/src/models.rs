use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display name used for connections without an authenticated user.
pub const ANONYMOUS: &str = "Anonymous";

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User { id: Uuid, username: String },
    Anonymous,
}

impl Identity {
    pub fn user(id: Uuid, username: impl Into<String>) -> Self {
        Self::User {
            id,
            username: username.into(),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User { id, .. } => Some(*id),
            Self::Anonymous => None,
        }
    }

    /// Name shown to other room members.
    pub fn display_name(&self) -> &str {
        match self {
            Self::User { username, .. } => username,
            Self::Anonymous => ANONYMOUS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub name: String,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
}

/// A persisted chat message as handed back by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub room: String,
    pub author_id: Uuid,
    pub username: String,
    pub content: String,
    pub attachment_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub read_by: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let id = Uuid::new_v4();
        assert_eq!(Identity::user(id, "alice").display_name(), "alice");
        assert_eq!(Identity::Anonymous.display_name(), ANONYMOUS);
        assert_eq!(Identity::user(id, "alice").user_id(), Some(id));
        assert_eq!(Identity::Anonymous.user_id(), None);
    }
}
