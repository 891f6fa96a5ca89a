use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use minichat_types::api::Claims;
use minichat_types::error::FeedError;
use minichat_types::models::Session;

/// Sign a session token for `session`, valid for `ttl`.
pub fn issue(secret: &str, session: &Session, ttl: chrono::Duration) -> anyhow::Result<String> {
    let exp = (chrono::Utc::now() + ttl).timestamp();
    let claims = Claims {
        sub: session.user_id.clone(),
        name: session.display_name.clone(),
        picture: session.photo_url.clone(),
        exp: usize::try_from(exp)?,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Check a session token and recover the session it was issued for.
pub fn verify(secret: &str, token: &str) -> Result<Session, FeedError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| FeedError::Unauthenticated)?;

    Ok(Session {
        user_id: data.claims.sub,
        display_name: data.claims.name,
        photo_url: data.claims.picture,
    })
}
