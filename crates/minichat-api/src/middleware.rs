use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use minichat_gateway::token;
use minichat_types::error::FeedError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Validate the bearer session token and make the [`Session`] available to
/// handlers as an extension.
///
/// [`Session`]: minichat_types::models::Session
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(FeedError::Unauthenticated)?;

    let session = token::verify(&state.jwt_secret, bearer.token())?;

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
