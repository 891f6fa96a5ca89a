/// Database row types. These map directly to SQLite rows.
/// Distinct from minichat-types models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub created_at: String,
    pub last_seen_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_photo: Option<String>,
    pub text: String,
    pub created_at: i64,
}

/// Fields the caller supplies for a new message; `seq` comes from SQLite.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub author_id: &'a str,
    pub author_name: &'a str,
    pub author_photo: Option<&'a str>,
    pub text: &'a str,
    pub created_at: i64,
}
