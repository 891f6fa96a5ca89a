use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};
use uuid::Uuid;

use minichat_db::Database;
use minichat_db::models::{MessageRow, NewMessage};
use minichat_types::error::FeedError;
use minichat_types::models::{Candidate, Message, Session, compose};
use minichat_types::validation::validate_text;

use crate::dispatcher::{Dispatcher, FeedInsert};

/// The shared, append-only feed. Every write goes through [`FeedStore::append`];
/// there is no way to edit or remove a message.
#[derive(Clone)]
pub struct FeedStore {
    inner: Arc<FeedStoreInner>,
}

struct FeedStoreInner {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    /// Held across insert + broadcast so fan-out order matches `seq` order.
    append_gate: Mutex<()>,
}

impl FeedStore {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(FeedStoreInner {
                db,
                dispatcher,
                append_gate: Mutex::new(()),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Append `text` on behalf of `session`.
    pub async fn append(&self, session: Option<&Session>, text: &str) -> Result<Message, FeedError> {
        let candidate = compose(session, text)?;
        self.append_candidate(candidate).await
    }

    /// Validate and store an already composed candidate. Invalid text is
    /// refused before anything touches the database.
    pub async fn append_candidate(&self, candidate: Candidate) -> Result<Message, FeedError> {
        let text = validate_text(&candidate.text)?.to_string();

        let inner = self.inner.clone();
        let message = tokio::task::spawn_blocking(move || inner.insert_and_broadcast(&candidate, &text))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                FeedError::Connectivity("append task failed".into())
            })??;

        info!("{} appended message #{}", message.author_name, message.seq);
        Ok(message)
    }

    /// Current messages oldest-to-newest; with `limit`, only the newest
    /// `limit` of them, still oldest first.
    pub async fn snapshot(&self, limit: Option<u32>) -> Result<Vec<Message>, FeedError> {
        let db = self.inner.db.clone();
        let rows = blocking(move || db.latest_messages(limit)).await?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    /// Messages appended after `after` (a `seq`), oldest first.
    pub async fn since(&self, after: i64, limit: Option<u32>) -> Result<Vec<Message>, FeedError> {
        let db = self.inner.db.clone();
        let rows = blocking(move || db.messages_after(after, limit)).await?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    pub async fn len(&self) -> Result<usize, FeedError> {
        let db = self.inner.db.clone();
        let n = blocking(move || db.count_messages()).await?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    pub async fn is_empty(&self) -> Result<bool, FeedError> {
        Ok(self.len().await? == 0)
    }

    /// Number of messages at or before `seq`.
    pub(crate) async fn count_through(&self, seq: i64) -> Result<usize, FeedError> {
        let db = self.inner.db.clone();
        let n = blocking(move || db.count_messages_through(seq)).await?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

impl FeedStoreInner {
    fn insert_and_broadcast(&self, candidate: &Candidate, text: &str) -> Result<Message, FeedError> {
        let _gate = self
            .append_gate
            .lock()
            .map_err(|_| FeedError::Connectivity("append gate poisoned".into()))?;

        let id = Uuid::new_v4().to_string();
        let (row, count) = self
            .db
            .insert_message(&NewMessage {
                id: &id,
                author_id: &candidate.author_id,
                author_name: &candidate.author_name,
                author_photo: candidate.author_photo.as_deref(),
                text,
                created_at: chrono::Utc::now().timestamp_millis(),
            })
            .map_err(db_error)?;

        let message = message_from_row(row);
        self.dispatcher.broadcast(FeedInsert {
            message: message.clone(),
            count: usize::try_from(count).unwrap_or_default(),
        });

        Ok(message)
    }
}

async fn blocking<F, T>(f: F) -> Result<T, FeedError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            FeedError::Connectivity("store task failed".into())
        })?
        .map_err(db_error)
}

fn db_error(e: anyhow::Error) -> FeedError {
    warn!("Feed store error: {:#}", e);
    FeedError::Connectivity(e.to_string())
}

fn message_from_row(row: MessageRow) -> Message {
    Message {
        id: row.id,
        seq: row.seq,
        text: row.text,
        author_id: row.author_id,
        author_name: row.author_name,
        author_photo: row.author_photo,
        created_at: row.created_at,
    }
}
