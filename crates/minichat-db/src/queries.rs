use crate::models::{MessageRow, NewMessage, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const MESSAGE_COLUMNS: &str = "seq, id, author_id, author_name, author_photo, text, created_at";

impl Database {
    // -- Users --

    /// Insert the profile, or refresh name/photo if the user signed in before.
    pub fn upsert_user(&self, id: &str, display_name: &str, photo_url: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, photo_url) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     display_name = excluded.display_name,
                     photo_url = excluded.photo_url,
                     last_seen_at = datetime('now')",
                rusqlite::params![id, display_name, photo_url],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    // -- Messages --

    /// Insert a message and return it with its assigned `seq`, together with
    /// the feed length after the insert. Both are read under the same lock, so
    /// the length is exact for this insert.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<(MessageRow, i64)> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, author_id, author_name, author_photo, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    msg.id,
                    msg.author_id,
                    msg.author_name,
                    msg.author_photo,
                    msg.text,
                    msg.created_at
                ],
            )?;
            let seq = conn.last_insert_rowid();
            let count = count(conn)?;

            Ok((
                MessageRow {
                    seq,
                    id: msg.id.to_string(),
                    author_id: msg.author_id.to_string(),
                    author_name: msg.author_name.to_string(),
                    author_photo: msg.author_photo.map(str::to_string),
                    text: msg.text.to_string(),
                    created_at: msg.created_at,
                },
                count,
            ))
        })
    }

    /// The newest `limit` messages (all when `None`), oldest first.
    pub fn latest_messages(&self, limit: Option<u32>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {cols} FROM (
                     SELECT {cols} FROM messages ORDER BY seq DESC LIMIT ?1
                 ) ORDER BY seq ASC",
                cols = MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([sql_limit(limit)], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Messages with `seq > after`, oldest first.
    pub fn messages_after(&self, after: i64, limit: Option<u32>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![after, sql_limit(limit)], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_messages(&self) -> Result<i64> {
        self.with_conn(count)
    }

    /// Number of messages with `seq <= seq`, i.e. the feed position just after it.
    pub fn count_messages_through(&self, seq: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let n = conn.query_row("SELECT COUNT(*) FROM messages WHERE seq <= ?1", [seq], |row| {
                row.get(0)
            })?;
            Ok(n)
        })
    }
}

fn count(conn: &Connection) -> Result<i64> {
    let n = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
    Ok(n)
}

// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<u32>) -> i64 {
    limit.map(i64::from).unwrap_or(-1)
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        author_photo: row.get(4)?,
        text: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, display_name, photo_url, created_at, last_seen_at FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                display_name: row.get(1)?,
                photo_url: row.get(2)?,
                created_at: row.get(3)?,
                last_seen_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(db: &Database, id: &str, text: &str) -> MessageRow {
        db.insert_message(&NewMessage {
            id,
            author_id: "u-1",
            author_name: "Ada",
            author_photo: None,
            text,
            created_at: 1_700_000_000_000,
        })
        .unwrap()
        .0
    }

    #[test]
    fn seq_follows_insert_order() {
        let db = Database::open_in_memory().unwrap();
        let a = insert(&db, "m-a", "a");
        let b = insert(&db, "m-b", "b");
        assert!(b.seq > a.seq);

        let all = db.latest_messages(None).unwrap();
        let texts: Vec<_> = all.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["a", "b"]);
    }

    #[test]
    fn insert_reports_feed_length() {
        let db = Database::open_in_memory().unwrap();
        let first = db
            .insert_message(&NewMessage {
                id: "m-1",
                author_id: "u-1",
                author_name: "Ada",
                author_photo: Some("https://example.com/a.png"),
                text: "x",
                created_at: 1,
            })
            .unwrap();
        assert_eq!(first.1, 1);
        assert_eq!(first.0.author_photo.as_deref(), Some("https://example.com/a.png"));
    }

    #[test]
    fn latest_window_is_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            insert(&db, &format!("m-{i}"), &i.to_string());
        }

        let window = db.latest_messages(Some(2)).unwrap();
        let texts: Vec<_> = window.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["3", "4"]);
    }

    #[test]
    fn after_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let a = insert(&db, "m-a", "a");
        insert(&db, "m-b", "b");
        insert(&db, "m-c", "c");

        let rest = db.messages_after(a.seq, None).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].text, "b");

        let one = db.messages_after(a.seq, Some(1)).unwrap();
        assert_eq!(one.len(), 1);

        assert_eq!(db.count_messages().unwrap(), 3);
        assert_eq!(db.count_messages_through(a.seq).unwrap(), 1);
        assert_eq!(db.count_messages_through(0).unwrap(), 0);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "m-a", "a");
        let dup = db.insert_message(&NewMessage {
            id: "m-a",
            author_id: "u-1",
            author_name: "Ada",
            author_photo: None,
            text: "again",
            created_at: 0,
        });
        assert!(dup.is_err());
        assert_eq!(db.count_messages().unwrap(), 1);
    }

    #[test]
    fn upsert_refreshes_profile() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user("u-1", "Ada", None).unwrap();
        db.upsert_user("u-1", "Ada L.", Some("https://example.com/p.png")).unwrap();

        let user = db.get_user("u-1").unwrap().unwrap();
        assert_eq!(user.display_name, "Ada L.");
        assert_eq!(user.photo_url.as_deref(), Some("https://example.com/p.png"));
        assert!(db.get_user("nobody").unwrap().is_none());
    }
}
