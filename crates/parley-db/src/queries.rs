use std::collections::HashMap;

use crate::Database;
use crate::models::{MessagePage, MessageRow, RoomRow, UserRow, format_timestamp};
use anyhow::{Result, anyhow};
use chrono::Utc;
use parley_types::models::ChatMessage;
use rusqlite::Connection;

/// Largest page size the history query will honour.
pub const MAX_PAGE_SIZE: i64 = 200;

const MESSAGE_COLUMNS: &str =
    "m.id, r.name, m.author_id, u.username, m.content, m.attachment_url, m.created_at";

impl Database {
    // -- Users --

    /// Insert a user. Returns false if the username is already taken.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(username) DO NOTHING",
                (id, username, password_hash, now()),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Rooms --

    /// Get-or-create a room by name. New rooms are public.
    pub fn ensure_room(&self, name: &str) -> Result<RoomRow> {
        self.with_conn(|conn| ensure_room_in(conn, name))
    }

    /// Explicit room creation. Returns the room and whether it was newly created.
    /// Asking for a private room always enrolls the creator, even if the room
    /// already existed.
    pub fn create_room(
        &self,
        name: &str,
        is_private: bool,
        creator_id: &str,
    ) -> Result<(RoomRow, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created = tx.execute(
                "INSERT OR IGNORE INTO rooms (name, is_private, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, is_private, now()],
            )? == 1;
            let room = query_room(&tx, name)?.ok_or_else(|| anyhow!("Room vanished: {}", name))?;
            if is_private {
                insert_participant(&tx, room.id, creator_id)?;
            }
            tx.commit()?;
            Ok((room, created))
        })
    }

    pub fn get_room(&self, name: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, name))
    }

    /// Public rooms, newest first.
    pub fn list_public_rooms(&self) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, is_private, created_at FROM rooms
                 WHERE is_private = 0
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([], room_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn add_participant(&self, room_id: i64, user_id: &str) -> Result<()> {
        self.with_conn(|conn| insert_participant(conn, room_id, user_id))
    }

    pub fn is_participant(&self, room_id: i64, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM room_participants WHERE room_id = ?1 AND user_id = ?2",
                    rusqlite::params![room_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Public rooms are open to everyone, private rooms only to participants.
    pub fn can_access(&self, room: &RoomRow, user_id: Option<&str>) -> Result<bool> {
        if !room.is_private {
            return Ok(true);
        }
        match user_id {
            Some(uid) => self.is_participant(room.id, uid),
            None => Ok(false),
        }
    }

    // -- Messages --

    /// Persist a message, creating the room on first reference. The returned
    /// record is durable by the time this returns.
    pub fn create_message(
        &self,
        room: &str,
        author_id: &str,
        content: &str,
        attachment_url: Option<&str>,
    ) -> Result<ChatMessage> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let room = ensure_room_in(&tx, room)?;
            tx.execute(
                "INSERT INTO messages (room_id, author_id, content, attachment_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![room.id, author_id, content, attachment_url, now()],
            )?;
            let id = tx.last_insert_rowid();
            let row = query_message(&tx, id)?.ok_or_else(|| anyhow!("Message vanished: {}", id))?;
            tx.commit()?;
            row.into_message(Vec::new())
        })
    }

    /// Record that `reader_id` has seen a message of `room`. Returns whether the
    /// message exists in that room; repeated acknowledgments are no-ops that
    /// still return true.
    pub fn mark_read(&self, room: &str, message_id: i64, reader_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT m.id FROM messages m
                     JOIN rooms r ON r.id = m.room_id
                     WHERE m.id = ?1 AND r.name = ?2",
                    rusqlite::params![message_id, room],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(false);
            }

            conn.execute(
                "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![message_id, reader_id, now()],
            )?;
            Ok(true)
        })
    }

    pub fn get_message(&self, message_id: i64) -> Result<Option<ChatMessage>> {
        self.with_conn(|conn| {
            let Some(row) = query_message(conn, message_id)? else {
                return Ok(None);
            };
            let mut readers = query_readers(conn, &[row.id])?;
            let read_by = readers.remove(&row.id).unwrap_or_default();
            Ok(Some(row.into_message(read_by)?))
        })
    }

    /// Offset pagination over the room's history, newest page first.
    ///
    /// Page 1 holds the most recent `per_page` messages. Within a page messages
    /// are returned oldest first. Out-of-range pages resolve to the nearest
    /// valid page, and an empty room still has one (empty) page.
    pub fn list_messages(&self, room_id: i64, page: i64, per_page: i64) -> Result<MessagePage> {
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE room_id = ?1",
                [room_id],
                |row| row.get(0),
            )?;
            let num_pages = ((total + per_page - 1) / per_page).max(1);
            let page = page.clamp(1, num_pages);

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 JOIN rooms r ON m.room_id = r.id
                 LEFT JOIN users u ON m.author_id = u.id
                 WHERE m.room_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    rusqlite::params![room_id, per_page, (page - 1) * per_page],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();

            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            let mut readers = query_readers(conn, &ids)?;

            let messages = rows
                .into_iter()
                .map(|row| {
                    let read_by = readers.remove(&row.id).unwrap_or_default();
                    row.into_message(read_by)
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(MessagePage {
                messages,
                page,
                num_pages,
            })
        })
    }
}

fn now() -> String {
    format_timestamp(Utc::now())
}

fn ensure_room_in(conn: &Connection, name: &str) -> Result<RoomRow> {
    conn.execute(
        "INSERT OR IGNORE INTO rooms (name, is_private, created_at) VALUES (?1, 0, ?2)",
        (name, now()),
    )?;
    query_room(conn, name)?.ok_or_else(|| anyhow!("Room vanished: {}", name))
}

fn insert_participant(conn: &Connection, room_id: i64, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO room_participants (room_id, user_id) VALUES (?1, ?2)",
        rusqlite::params![room_id, user_id],
    )?;
    Ok(())
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, created_at FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_room(conn: &Connection, name: &str) -> Result<Option<RoomRow>> {
    let mut stmt =
        conn.prepare("SELECT id, name, is_private, created_at FROM rooms WHERE name = ?1")?;
    let row = stmt.query_row([name], room_from_row).optional()?;
    Ok(row)
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         JOIN rooms r ON m.room_id = r.id
         LEFT JOIN users u ON m.author_id = u.id
         WHERE m.id = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([id], message_from_row).optional()?;
    Ok(row)
}

/// Batch-fetch reader usernames for a set of message ids, in acknowledgment order.
fn query_readers(conn: &Connection, message_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
    let mut readers: HashMap<i64, Vec<String>> = HashMap::new();
    if message_ids.is_empty() {
        return Ok(readers);
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT rr.message_id, u.username
         FROM read_receipts rr
         JOIN users u ON rr.user_id = u.id
         WHERE rr.message_id IN ({})
         ORDER BY rr.rowid",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (message_id, username) in rows {
        readers.entry(message_id).or_default().push(username);
    }
    Ok(readers)
}

fn room_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        name: row.get(1)?,
        is_private: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room: row.get(1)?,
        author_id: row.get(2)?,
        author_username: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(4)?,
        attachment_url: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(db: &Database, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, name, "hash").unwrap();
        id
    }

    #[test]
    fn test_ensure_room_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let first = db.ensure_room("lobby").unwrap();
        let second = db.ensure_room("lobby").unwrap();
        assert_eq!(first.id, second.id);
        assert!(!first.is_private);
        assert_eq!(db.list_public_rooms().unwrap().len(), 1);
    }

    #[test]
    fn test_create_message_assigns_increasing_ids() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");

        let a = db.create_message("lobby", &alice, "one", None).unwrap();
        let b = db.create_message("other", &alice, "two", None).unwrap();
        let c = db.create_message("lobby", &alice, "", Some("/attachments/x.png")).unwrap();

        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(a.username, "alice");
        assert_eq!(a.room, "lobby");
        assert_eq!(b.room, "other");
        assert_eq!(c.attachment_url.as_deref(), Some("/attachments/x.png"));
        assert!(a.read_by.is_empty());
        // room "other" was created implicitly
        assert!(db.get_room("other").unwrap().is_some());
    }

    #[test]
    fn test_create_message_unknown_author_fails() {
        let db = Database::open_in_memory().unwrap();
        let ghost = Uuid::new_v4().to_string();
        assert!(db.create_message("lobby", &ghost, "boo", None).is_err());
    }

    #[test]
    fn test_mark_read_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let msg = db.create_message("lobby", &alice, "hi", None).unwrap();

        assert!(db.mark_read("lobby", msg.id, &bob).unwrap());
        let once = db.get_message(msg.id).unwrap().unwrap().read_by;
        assert!(db.mark_read("lobby", msg.id, &bob).unwrap());
        let twice = db.get_message(msg.id).unwrap().unwrap().read_by;

        assert_eq!(once, vec!["bob".to_string()]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_mark_read_missing_message() {
        let db = Database::open_in_memory().unwrap();
        let bob = user(&db, "bob");
        assert!(!db.mark_read("lobby", 999, &bob).unwrap());
        let receipts: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM read_receipts", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(receipts, 0);
    }

    #[test]
    fn test_mark_read_other_room() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        db.create_room("secret", true, &alice).unwrap();
        let msg = db.create_message("secret", &alice, "psst", None).unwrap();

        assert!(!db.mark_read("lobby", msg.id, &bob).unwrap());
        assert!(db.get_message(msg.id).unwrap().unwrap().read_by.is_empty());
        assert!(db.mark_read("secret", msg.id, &alice).unwrap());
    }

    #[test]
    fn test_create_user_duplicate_name() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_user(&Uuid::new_v4().to_string(), "alice", "hash").unwrap());
        assert!(!db.create_user(&Uuid::new_v4().to_string(), "alice", "other").unwrap());
        assert!(db.get_user_by_username("alice").unwrap().is_some());
    }

    #[test]
    fn test_pagination_covers_history() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let room = db.ensure_room("lobby").unwrap();
        let created: Vec<i64> = (0..23)
            .map(|i| db.create_message("lobby", &alice, &format!("m{i}"), None).unwrap().id)
            .collect();

        let first = db.list_messages(room.id, 1, 5).unwrap();
        assert_eq!(first.num_pages, 5);
        assert_eq!(first.page, 1);
        // newest page, oldest first within it
        let ids: Vec<i64> = first.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, created[18..].to_vec());

        let mut all = Vec::new();
        for page in (1..=first.num_pages).rev() {
            let p = db.list_messages(room.id, page, 5).unwrap();
            all.extend(p.messages.into_iter().map(|m| m.id));
        }
        assert_eq!(all, created);
    }

    #[test]
    fn test_pagination_clamps() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let room = db.ensure_room("lobby").unwrap();

        let empty = db.list_messages(room.id, 3, 50).unwrap();
        assert_eq!(empty.num_pages, 1);
        assert_eq!(empty.page, 1);
        assert!(empty.messages.is_empty());

        for i in 0..3 {
            db.create_message("lobby", &alice, &format!("m{i}"), None).unwrap();
        }
        let last = db.list_messages(room.id, 99, 2).unwrap();
        assert_eq!(last.page, 2);
        assert_eq!(last.messages.len(), 1);
        assert_eq!(last.messages[0].content, "m0");

        let zero = db.list_messages(room.id, 0, 0).unwrap();
        assert_eq!(zero.page, 1);
        assert_eq!(zero.num_pages, 3);
    }

    #[test]
    fn test_history_includes_readers() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let carol = user(&db, "carol");
        let room = db.ensure_room("lobby").unwrap();
        let msg = db.create_message("lobby", &alice, "hi", None).unwrap();
        db.mark_read("lobby", msg.id, &carol).unwrap();
        db.mark_read("lobby", msg.id, &bob).unwrap();

        let page = db.list_messages(room.id, 1, 50).unwrap();
        assert_eq!(page.messages[0].read_by, vec!["carol".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_private_room_access() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");

        let (room, created) = db.create_room("secret", true, &alice).unwrap();
        assert!(created);
        assert!(room.is_private);
        assert!(db.can_access(&room, Some(&alice)).unwrap());
        assert!(!db.can_access(&room, Some(&bob)).unwrap());
        assert!(!db.can_access(&room, None).unwrap());

        db.add_participant(room.id, &bob).unwrap();
        assert!(db.can_access(&room, Some(&bob)).unwrap());

        let (_, created_again) = db.create_room("secret", true, &alice).unwrap();
        assert!(!created_again);
        assert!(db.list_public_rooms().unwrap().is_empty());
    }
}
