use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use minichat_types::api::SendMessageRequest;
use minichat_types::models::Session;

use crate::auth::AppState;
use crate::error::ApiError;

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Only messages with a greater `seq`. Without it the newest page is
    /// returned.
    pub after: Option<i64>,
}

fn default_limit() -> u32 {
    50
}

/// Append a message as the signed-in user.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state.store.append(Some(&session), &req.text).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Read the feed, oldest first. Open to signed-out readers.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.min(MAX_PAGE);

    let messages = match query.after {
        Some(after) => state.store.since(after, Some(limit)).await?,
        None => state.store.snapshot(Some(limit)).await?,
    };

    Ok(Json(messages))
}
