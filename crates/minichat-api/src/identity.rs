use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use minichat_types::error::FeedError;
use minichat_types::models::Profile;

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Turns an identity-provider token into a user profile. The OAuth/OpenID
/// flow that produced the token happens elsewhere.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<Profile, FeedError>;
}

/// Verifies Google OpenID `id_token`s with the `tokeninfo` endpoint.
pub struct GoogleIdentityProvider {
    http: reqwest::Client,
    client_id: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

impl GoogleIdentityProvider {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_endpoint(client_id, GOOGLE_TOKENINFO_URL)
    }

    pub fn with_endpoint(client_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: client_id.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    async fn verify(&self, id_token: &str) -> Result<Profile, FeedError> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                warn!("tokeninfo request failed: {}", e);
                FeedError::AuthProvider("identity provider unreachable".into())
            })?;

        if !resp.status().is_success() {
            debug!("tokeninfo rejected token with {}", resp.status());
            return Err(FeedError::AuthProvider("token rejected".into()));
        }

        let info: TokenInfo = resp
            .json()
            .await
            .map_err(|e| FeedError::AuthProvider(format!("malformed tokeninfo response: {e}")))?;

        if info.aud != self.client_id {
            warn!("Token issued for another client: {}", info.aud);
            return Err(FeedError::AuthProvider("token audience mismatch".into()));
        }

        let display_name = info
            .name
            .or(info.email)
            .unwrap_or_else(|| "Anonymous".to_string());

        Ok(Profile {
            user_id: info.sub,
            display_name,
            photo_url: info.picture,
        })
    }
}

/// Local-development provider. Accepts `dev:<user_id>:<display name>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevIdentityProvider;

#[async_trait]
impl IdentityProvider for DevIdentityProvider {
    async fn verify(&self, id_token: &str) -> Result<Profile, FeedError> {
        let mut parts = id_token.splitn(3, ':');
        let (Some("dev"), Some(user_id), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(FeedError::AuthProvider("expected dev:<user_id>:<name>".into()));
        };

        let (user_id, name) = (user_id.trim(), name.trim());
        if user_id.is_empty() || name.is_empty() {
            return Err(FeedError::AuthProvider("empty user id or name".into()));
        }

        Ok(Profile {
            user_id: user_id.to_string(),
            display_name: name.to_string(),
            photo_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dev_tokens_parse() {
        let profile = DevIdentityProvider.verify("dev:u-1:Ada Lovelace").await.unwrap();
        assert_eq!(profile.user_id, "u-1");
        assert_eq!(profile.display_name, "Ada Lovelace");

        let with_colon = DevIdentityProvider.verify("dev:u-2:Bob: the builder").await.unwrap();
        assert_eq!(with_colon.display_name, "Bob: the builder");
    }

    #[tokio::test]
    async fn bad_dev_tokens_are_auth_provider_errors() {
        for token in ["", "dev", "dev:u-1", "prod:u-1:Ada", "dev::Ada", "dev:u-1: "] {
            let err = DevIdentityProvider.verify(token).await.unwrap_err();
            assert!(matches!(err, FeedError::AuthProvider(_)), "{token}");
        }
    }

    #[tokio::test]
    async fn unreachable_google_endpoint_is_auth_provider_error() {
        let provider = GoogleIdentityProvider::with_endpoint("client", "http://127.0.0.1:9/tokeninfo");
        let err = provider.verify("token").await.unwrap_err();
        assert!(matches!(err, FeedError::AuthProvider(_)));
    }
}
