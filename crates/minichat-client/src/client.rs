use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use minichat_types::api::{ErrorBody, SendMessageRequest, SignInRequest, SignInResponse};
use minichat_types::error::FeedError;
use minichat_types::models::{self, Candidate, Message, Session};
use minichat_types::validation::validate_text;

use crate::error::ClientError;
use crate::feed::{Connector, FeedSubscription, ReconnectPolicy};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://127.0.0.1:3000`.
    pub base_url: String,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    fn http_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn gateway_url(&self) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{base}/gateway")
    }
}

struct SignedIn {
    session: Session,
    token: String,
}

struct ClientInner {
    http: reqwest::Client,
    config: ClientConfig,
    signed_in: RwLock<Option<SignedIn>>,
    /// Bumped on every sign-out; open subscriptions close when it moves.
    epoch: watch::Sender<u64>,
}

/// Holds the session for the life of the process and talks to one server.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

/// An accepted send that has not been acknowledged yet.
///
/// Dropping it does not cancel the send.
pub struct PendingSend {
    rx: oneshot::Receiver<Result<Message, ClientError>>,
}

impl PendingSend {
    /// Wait for the server to store the message.
    pub async fn acknowledged(self) -> Result<Message, ClientError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(FeedError::Connectivity("send task ended early".into()).into()))
    }
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(ClientInner {
                http: reqwest::Client::new(),
                config,
                signed_in: RwLock::new(None),
                epoch,
            }),
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.read().as_ref().map(|s| s.session.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.read().is_some()
    }

    /// Exchange an identity-provider token for a session.
    pub async fn sign_in(&self, id_token: &str) -> Result<Session, ClientError> {
        if self.is_signed_in() {
            return Err(ClientError::AlreadySignedIn);
        }

        let resp = self
            .inner
            .http
            .post(self.inner.config.http_url("/auth/sign-in"))
            .json(&SignInRequest {
                id_token: id_token.to_string(),
            })
            .send()
            .await?;
        let body: SignInResponse = read_json(resp).await?;

        let session = Session {
            user_id: body.user_id,
            display_name: body.display_name,
            photo_url: body.photo_url,
        };

        let mut guard = self.write();
        if guard.is_some() {
            return Err(ClientError::AlreadySignedIn);
        }
        *guard = Some(SignedIn {
            session: session.clone(),
            token: body.token,
        });

        info!("Signed in as {} ({})", session.display_name, session.user_id);
        Ok(session)
    }

    /// Drop the session and close every open subscription. The server is
    /// told too, but a failure there does not keep the session alive.
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        let signed_in = self.write().take().ok_or(FeedError::Unauthenticated)?;
        self.inner.epoch.send_modify(|epoch| *epoch += 1);
        info!("Signed out {}", signed_in.session.user_id);

        let result = self
            .inner
            .http
            .post(self.inner.config.http_url("/auth/sign-out"))
            .bearer_auth(&signed_in.token)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Server refused sign-out: {}", resp.status()),
            Err(e) => warn!("Could not reach server for sign-out: {}", e),
        }
        Ok(())
    }

    /// Build a message from the current session without sending it.
    pub fn compose(&self, text: &str) -> Result<Candidate, ClientError> {
        let session = self.session();
        let candidate = models::compose(session.as_ref(), text)?;
        validate_text(&candidate.text)?;
        Ok(candidate)
    }

    /// Fire-and-forget send. Session and text are checked here, before
    /// anything leaves the process; the network part runs in the background.
    /// Must be called from within a tokio runtime.
    pub fn send(&self, text: &str) -> Result<PendingSend, ClientError> {
        let token = self.read().as_ref().map(|s| s.token.clone());
        let candidate = self.compose(text)?;
        let token = token.ok_or(FeedError::Unauthenticated)?;
        let text = validate_text(&candidate.text)?.to_string();

        let (tx, rx) = oneshot::channel();
        let http = self.inner.http.clone();
        let url = self.inner.config.http_url("/messages");

        tokio::spawn(async move {
            let result = post_message(&http, &url, &token, text).await;
            match &result {
                Ok(message) => debug!("Message {} acknowledged at seq {}", message.id, message.seq),
                Err(e) => warn!("Send failed: {}", e),
            }
            let _ = tx.send(result);
        });

        Ok(PendingSend { rx })
    }

    /// The latest `limit` messages, oldest first. Works signed out.
    pub async fn snapshot(&self, limit: Option<u32>) -> Result<Vec<Message>, ClientError> {
        let mut url = self.inner.config.http_url("/messages");
        if let Some(limit) = limit {
            url.push_str(&format!("?limit={limit}"));
        }
        let resp = self.inner.http.get(url).send().await?;
        read_json(resp).await
    }

    /// Messages with `seq > after`, oldest first.
    pub async fn since(&self, after: i64, limit: Option<u32>) -> Result<Vec<Message>, ClientError> {
        let mut url = self.inner.config.http_url(&format!("/messages?after={after}"));
        if let Some(limit) = limit {
            url.push_str(&format!("&limit={limit}"));
        }
        let resp = self.inner.http.get(url).send().await?;
        read_json(resp).await
    }

    /// Open a live subscription over the gateway, replaying the whole feed
    /// first. Identifies with the session if there is one. Must be called
    /// from within a tokio runtime.
    pub fn subscribe(&self) -> FeedSubscription {
        let token = self.read().as_ref().map(|s| s.token.clone());
        let connector = Connector {
            ws_url: self.inner.config.gateway_url(),
            token,
            policy: self.inner.config.reconnect.clone(),
        };
        FeedSubscription::spawn(connector, self.inner.epoch.subscribe())
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<SignedIn>> {
        self.inner.signed_in.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<SignedIn>> {
        self.inner.signed_in.write().unwrap_or_else(|e| e.into_inner())
    }
}

async fn post_message(http: &reqwest::Client, url: &str, token: &str, text: String) -> Result<Message, ClientError> {
    let resp = http
        .post(url)
        .bearer_auth(token)
        .json(&SendMessageRequest { text })
        .send()
        .await?;
    read_json(resp).await
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let code = status.as_u16();
    match resp.json::<ErrorBody>().await {
        Ok(body) => Err(ClientError::from_body(code, body)),
        Err(_) => Err(ClientError::Server {
            status: code,
            message: status.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minichat_types::error::ValidationError;

    fn client() -> ChatClient {
        ChatClient::new(ClientConfig::new("http://127.0.0.1:3000/"))
    }

    #[test]
    fn urls_follow_base() {
        let config = ClientConfig::new("http://127.0.0.1:3000/");
        assert_eq!(config.http_url("/messages"), "http://127.0.0.1:3000/messages");
        assert_eq!(config.gateway_url(), "ws://127.0.0.1:3000/gateway");

        let config = ClientConfig::new("https://chat.example.com");
        assert_eq!(config.gateway_url(), "wss://chat.example.com/gateway");
    }

    #[test]
    fn send_without_session_is_unauthenticated() {
        let err = client().send("hello").err().unwrap();
        assert_eq!(err, ClientError::Feed(FeedError::Unauthenticated));
        assert!(!err.is_retryable());
    }

    #[test]
    fn compose_without_session_is_unauthenticated() {
        let err = client().compose("hello").unwrap_err();
        assert_eq!(err, ClientError::Feed(FeedError::Unauthenticated));
    }

    #[tokio::test]
    async fn sign_out_without_session_fails() {
        let err = client().sign_out().await.unwrap_err();
        assert_eq!(err, ClientError::Feed(FeedError::Unauthenticated));
    }

    #[test]
    fn validation_runs_before_any_network_call() {
        let client = client();
        *client.write() = Some(SignedIn {
            session: Session {
                user_id: "u-1".into(),
                display_name: "Ada".into(),
                photo_url: None,
            },
            token: "t".into(),
        });

        // No runtime here: reaching the spawn would panic
        let err = client.send("   ").err().unwrap();
        assert_eq!(err, ClientError::from(ValidationError::Empty));

        let err = client.send(&"x".repeat(141)).err().unwrap();
        assert_eq!(err, ClientError::from(ValidationError::TooLong { len: 141, max: 140 }));
    }
}
