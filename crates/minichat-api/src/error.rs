use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use thiserror::Error;
use tracing::error;

use minichat_types::api::ErrorBody;
use minichat_types::error::FeedError;

/// Everything a handler can fail with, mapped onto a status and a JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Feed(FeedError::Unauthenticated) => StatusCode::UNAUTHORIZED,
            Self::Feed(FeedError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Feed(FeedError::Connectivity(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Feed(FeedError::AuthProvider(_)) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Feed(e) => e.code(),
            Self::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("Internal error: {:#}", e);
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code().to_string(),
            message: match &self {
                // Do not leak internals to clients
                Self::Internal(_) => "internal server error".to_string(),
                other => other.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
