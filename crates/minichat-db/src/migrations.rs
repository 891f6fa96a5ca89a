use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            display_name  TEXT NOT NULL,
            photo_url     TEXT,
            created_at    TEXT NOT NULL DEFAULT (datetime('now')),
            last_seen_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Append-only. seq is the feed order and is never reused.
        CREATE TABLE IF NOT EXISTS messages (
            seq           INTEGER PRIMARY KEY AUTOINCREMENT,
            id            TEXT NOT NULL UNIQUE,
            author_id     TEXT NOT NULL,
            author_name   TEXT NOT NULL,
            author_photo  TEXT,
            text          TEXT NOT NULL,
            created_at    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_author
            ON messages(author_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
