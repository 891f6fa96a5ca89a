use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info, warn};

use minichat_gateway::feed::FeedStore;
use minichat_gateway::token;
use minichat_types::api::{SignInRequest, SignInResponse};
use minichat_types::error::FeedError;
use minichat_types::models::Session;

use crate::error::ApiError;
use crate::identity::IdentityProvider;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: FeedStore,
    pub jwt_secret: String,
    pub session_ttl: chrono::Duration,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Exchange an identity-provider token for a session token.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.identity.verify(&req.id_token).await.inspect_err(|e| {
        warn!("Sign-in refused: {}", e);
    })?;
    let session = Session::from(profile);

    // Remember the latest profile; messages keep their own snapshot anyway
    let db = state.store.database().clone();
    let user = session.clone();
    let returning = tokio::task::spawn_blocking(move || {
        let returning = db.get_user(&user.user_id)?.is_some();
        db.upsert_user(&user.user_id, &user.display_name, user.photo_url.as_deref())?;
        anyhow::Ok(returning)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        FeedError::Connectivity("profile store task failed".into())
    })?
    .map_err(|e| FeedError::Connectivity(e.to_string()))?;

    let token = token::issue(&state.jwt_secret, &session, state.session_ttl)?;

    info!(
        "{} ({}) signed in{}",
        session.display_name,
        session.user_id,
        if returning { "" } else { " for the first time" }
    );

    Ok(Json(SignInResponse {
        token,
        user_id: session.user_id,
        display_name: session.display_name,
        photo_url: session.photo_url,
    }))
}

/// Close every gateway connection the user has open.
pub async fn sign_out(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> StatusCode {
    let closed = state.store.dispatcher().sign_out(&session.user_id).await;
    info!(
        "{} ({}) signed out, {} gateway connections closed",
        session.display_name, session.user_id, closed
    );
    StatusCode::NO_CONTENT
}
