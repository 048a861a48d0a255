use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Timestamps are stored as RFC 3339 text with microsecond precision in UTC,
/// so lexical order matches chronological order.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            is_private  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS room_participants (
            room_id     INTEGER NOT NULL REFERENCES rooms(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (room_id, user_id)
        );

        -- AUTOINCREMENT: ids are never reused, even after the highest row is gone
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id         INTEGER NOT NULL REFERENCES rooms(id),
            author_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL DEFAULT '',
            attachment_url  TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at, id);

        CREATE TABLE IF NOT EXISTS read_receipts (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            read_at     TEXT NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_read_receipts_message
            ON read_receipts(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
