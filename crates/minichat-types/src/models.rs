use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// A message as stored in the feed. Never mutated after the store assigns
/// `id`, `seq` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Position in the global append order. Strictly increasing.
    pub seq: i64,
    pub text: String,
    pub author_id: String,
    pub author_name: String,
    pub author_photo: Option<String>,
    /// Unix milliseconds, server clock.
    pub created_at: i64,
}

impl Message {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_at).single()
    }
}

/// Profile fields handed back by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

/// The signed-in user. Held in memory for as long as the user stays signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

impl From<Profile> for Session {
    fn from(p: Profile) -> Self {
        Self {
            user_id: p.user_id,
            display_name: p.display_name,
            photo_url: p.photo_url,
        }
    }
}

/// A message waiting to be appended: author snapshot plus the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub author_id: String,
    pub author_name: String,
    pub author_photo: Option<String>,
    pub text: String,
}

/// Build a candidate from the current session. The author fields are copied,
/// so later profile changes do not leak into messages already composed.
pub fn compose(session: Option<&Session>, text: &str) -> Result<Candidate, FeedError> {
    let session = session.ok_or(FeedError::Unauthenticated)?;
    Ok(Candidate {
        author_id: session.user_id.clone(),
        author_name: session.display_name.clone(),
        author_photo: session.photo_url.clone(),
        text: text.to_string(),
    })
}

pub fn welcome_message(session: &Session) -> String {
    format!("Welcome, {}!", session.display_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ada() -> Session {
        Session {
            user_id: "u-1".into(),
            display_name: "Ada".into(),
            photo_url: Some("https://example.com/ada.png".into()),
        }
    }

    #[test]
    fn compose_without_session_is_unauthenticated() {
        let err = compose(None, "hello").unwrap_err();
        assert!(matches!(err, FeedError::Unauthenticated));
    }

    #[test]
    fn compose_snapshots_author() {
        let mut session = ada();
        let candidate = compose(Some(&session), "hi").unwrap();
        session.display_name = "Countess".into();

        assert_eq!(candidate.author_name, "Ada");
        assert_eq!(candidate.author_id, "u-1");
        assert_eq!(candidate.author_photo.as_deref(), Some("https://example.com/ada.png"));
        assert_eq!(candidate.text, "hi");
    }

    #[test]
    fn message_json_shape() {
        let msg = Message {
            id: "abc".into(),
            seq: 3,
            text: "hi".into(),
            author_id: "u-1".into(),
            author_name: "Ada".into(),
            author_photo: None,
            created_at: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["author_photo"], serde_json::Value::Null);
        assert_eq!(json["created_at"], 1_700_000_000_000i64);
        assert_eq!(msg.created_at_utc().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn welcome_uses_display_name() {
        assert_eq!(welcome_message(&ada()), "Welcome, Ada!");
    }
}
