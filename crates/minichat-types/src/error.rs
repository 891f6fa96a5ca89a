use thiserror::Error;

/// Why a message text was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message text is empty")]
    Empty,
    #[error("message text is {len} characters, limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// Errors shared by the store, the HTTP surface and the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("no active session")]
    Unauthenticated,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("feed store unreachable: {0}")]
    Connectivity(String),
    #[error("sign-in failed: {0}")]
    AuthProvider(String),
}

impl FeedError {
    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Validation(_) => "validation",
            Self::Connectivity(_) => "connectivity",
            Self::AuthProvider(_) => "auth_provider",
        }
    }

    /// Only connectivity failures are worth retrying without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}
