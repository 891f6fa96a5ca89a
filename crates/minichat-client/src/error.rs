use thiserror::Error;

use minichat_types::api::ErrorBody;
use minichat_types::error::{FeedError, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("already signed in")]
    AlreadySignedIn,
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
}

impl From<ValidationError> for ClientError {
    fn from(e: ValidationError) -> Self {
        Self::Feed(FeedError::Validation(e))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Feed(FeedError::Connectivity(e.to_string()))
    }
}

impl ClientError {
    /// Rebuild the typed error from a server error body.
    pub(crate) fn from_body(status: u16, body: ErrorBody) -> Self {
        let feed = match body.code.as_str() {
            "unauthenticated" => FeedError::Unauthenticated,
            "auth_provider" => FeedError::AuthProvider(body.message),
            "connectivity" => FeedError::Connectivity(body.message),
            // Validation is checked locally before sending, so a server-side
            // refusal only carries its text
            _ => {
                return Self::Server {
                    status,
                    message: body.message,
                };
            }
        };
        Self::Feed(feed)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Feed(e) => e.is_retryable(),
            Self::Server { status, .. } => *status >= 500,
            Self::AlreadySignedIn => false,
        }
    }
}
