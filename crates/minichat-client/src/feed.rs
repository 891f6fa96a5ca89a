use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use minichat_types::error::FeedError;
use minichat_types::events::{GatewayCommand, GatewayEvent, InsertEvent};

use crate::backoff::Backoff;
use crate::error::ClientError;
use crate::tracker::FeedTracker;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time the server gets to answer Identify with Ready.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const UPDATE_BUFFER: usize = 256;

/// How the subscription retries a lost gateway connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before the listener hears about it.
    pub failure_threshold: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            failure_threshold: 5,
        }
    }
}

/// What a listener receives from a [`FeedSubscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    /// A message joined the feed. Delivered once per message, in feed order.
    Insert(InsertEvent),
    /// Reconnecting has failed `attempts` times in a row. Retrying continues.
    ConnectivityLost { attempts: u32 },
    /// The gateway is answering again after a drop or a reported loss.
    /// Inserts missed in between follow this update.
    Reconnected,
    /// The server ended the session. No further updates follow.
    SignedOut,
    /// The gateway refused the session token, e.g. because it expired.
    /// Not retried; no further updates follow.
    Unauthenticated,
}

pub(crate) struct Connector {
    pub ws_url: String,
    pub token: Option<String>,
    pub policy: ReconnectPolicy,
}

/// A reconnecting view over the server feed.
///
/// The gateway delivers at least once; this side drops repeats by `seq`, so
/// the listener sees each message exactly once even across reconnects.
pub struct FeedSubscription {
    updates: mpsc::Receiver<FeedUpdate>,
    stop: watch::Sender<bool>,
    epoch: watch::Receiver<u64>,
    opened_epoch: u64,
    closed: bool,
}

impl FeedSubscription {
    /// Start the background connection. `epoch` changes when the owning
    /// client signs out, which closes the subscription.
    pub(crate) fn spawn(connector: Connector, mut epoch: watch::Receiver<u64>) -> Self {
        let (tx, updates) = mpsc::channel(UPDATE_BUFFER);
        let (stop, stop_rx) = watch::channel(false);
        let opened_epoch = *epoch.borrow_and_update();

        tokio::spawn(run(connector, tx, stop_rx, epoch.clone(), opened_epoch));

        Self {
            updates,
            stop,
            epoch,
            opened_epoch,
            closed: false,
        }
    }

    /// Next update, or `None` once closed (by `close`, by sign-out, or
    /// because the server ended the session).
    pub async fn next(&mut self) -> Option<FeedUpdate> {
        if self.is_closed() {
            self.close();
            return None;
        }

        let update = tokio::select! {
            biased;
            _ = signed_out(&mut self.epoch, self.opened_epoch) => None,
            update = self.updates.recv() => update,
        };

        if update.is_none() {
            self.close();
        }
        update
    }

    pub fn is_closed(&self) -> bool {
        self.closed || *self.epoch.borrow() != self.opened_epoch
    }

    /// Stop delivery and drop the connection. Safe to call twice.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop.send_replace(true);
        self.updates.close();
        while self.updates.try_recv().is_ok() {}
        debug!("Feed subscription closed");
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

enum Outcome {
    SignedOut,
    ListenerGone,
    /// `healthy` is set once the server sent anything after the handshake.
    Dropped { reason: String, healthy: bool },
}

async fn run(
    connector: Connector,
    tx: mpsc::Sender<FeedUpdate>,
    mut stop: watch::Receiver<bool>,
    mut epoch: watch::Receiver<u64>,
    opened_epoch: u64,
) {
    let policy = connector.policy.clone();
    let mut backoff = Backoff::new(policy.base_delay, policy.max_delay);
    let mut tracker = FeedTracker::default();
    let mut failures: u32 = 0;
    // Set after a healthy connection drops or a loss was reported
    let mut announce = false;

    loop {
        let connected = tokio::select! {
            _ = stopped(&mut stop, &mut epoch, opened_epoch) => break,
            result = connect(&connector, tracker.last_seq()) => result,
        };

        let failed = match connected {
            Ok(ws) => {
                let outcome = tokio::select! {
                    _ = stopped(&mut stop, &mut epoch, opened_epoch) => break,
                    outcome = pump(ws, &mut tracker, &tx, &mut announce) => outcome,
                };
                match outcome {
                    Outcome::SignedOut => {
                        info!("Server ended the session, closing feed");
                        let _ = tx.send(FeedUpdate::SignedOut).await;
                        break;
                    }
                    Outcome::ListenerGone => break,
                    Outcome::Dropped { reason, healthy: true } => {
                        warn!("Feed connection dropped: {}", reason);
                        failures = 0;
                        backoff.reset();
                        announce = true;
                        None
                    }
                    Outcome::Dropped { reason, healthy: false } => Some(reason),
                }
            }
            Err(ClientError::Feed(FeedError::Unauthenticated)) => {
                warn!("Gateway refused the session token, not retrying");
                let _ = tx.send(FeedUpdate::Unauthenticated).await;
                break;
            }
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failed {
            failures = failures.saturating_add(1);
            warn!("Feed attempt {} failed: {}", failures, reason);
            if failures == policy.failure_threshold {
                announce = true;
                let lost = FeedUpdate::ConnectivityLost { attempts: failures };
                if tx.send(lost).await.is_err() {
                    break;
                }
            }
        }

        let delay = backoff.next_delay();
        debug!("Reconnecting feed in {:?}", delay);
        tokio::select! {
            _ = stopped(&mut stop, &mut epoch, opened_epoch) => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("Feed task finished after seq {:?}", tracker.last_seq());
}

/// Open the socket, identify if there is a token and subscribe after `after`.
async fn connect(connector: &Connector, after: Option<i64>) -> Result<WsStream, ClientError> {
    let (mut ws, _) = connect_async(connector.ws_url.as_str())
        .await
        .map_err(|e| FeedError::Connectivity(e.to_string()))?;

    if let Some(token) = &connector.token {
        send_command(&mut ws, &GatewayCommand::Identify { token: token.clone() }).await?;
        tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_for_ready(&mut ws))
            .await
            .map_err(|_| FeedError::Connectivity("gateway did not answer identify".into()))??;
    }

    send_command(&mut ws, &GatewayCommand::Subscribe { after }).await?;
    Ok(ws)
}

async fn wait_for_ready(ws: &mut WsStream) -> Result<(), ClientError> {
    while let Some(frame) = ws.next().await {
        let frame = frame.map_err(|e| FeedError::Connectivity(e.to_string()))?;
        match frame {
            WsMessage::Text(text) => {
                if let Ok(GatewayEvent::Ready { user_id, .. }) = serde_json::from_str::<GatewayEvent>(&text) {
                    debug!("Gateway identified {}", user_id);
                    return Ok(());
                }
            }
            // The server refuses tokens it does not accept with a policy close
            WsMessage::Close(Some(frame)) if frame.code == CloseCode::Policy => {
                return Err(FeedError::Unauthenticated.into());
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    Err(FeedError::Connectivity("gateway closed before identify completed".into()).into())
}

async fn send_command(ws: &mut WsStream, command: &GatewayCommand) -> Result<(), ClientError> {
    let text = serde_json::to_string(command).map_err(|e| FeedError::Connectivity(e.to_string()))?;
    ws.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| FeedError::Connectivity(e.to_string()).into())
}

/// Forward inserts to the listener until the connection ends.
///
/// The connection counts as healthy once any frame other than a close
/// arrives; the server pings idle sockets, so a working one always does.
/// Pings are answered by tungstenite while reading.
async fn pump(
    mut ws: WsStream,
    tracker: &mut FeedTracker,
    tx: &mpsc::Sender<FeedUpdate>,
    announce: &mut bool,
) -> Outcome {
    let mut healthy = false;

    while let Some(frame) = ws.next().await {
        let frame = match frame {
            Ok(WsMessage::Close(_)) => {
                return Outcome::Dropped {
                    reason: "closed by server".into(),
                    healthy,
                };
            }
            Ok(frame) => frame,
            Err(e) => {
                return Outcome::Dropped {
                    reason: e.to_string(),
                    healthy,
                };
            }
        };

        if !healthy {
            healthy = true;
            if std::mem::take(announce) {
                info!("Feed reconnected, resuming after seq {:?}", tracker.last_seq());
                if tx.send(FeedUpdate::Reconnected).await.is_err() {
                    return Outcome::ListenerGone;
                }
            }
        }

        let WsMessage::Text(text) = frame else {
            continue;
        };
        match serde_json::from_str::<GatewayEvent>(&text) {
            Ok(GatewayEvent::MessageCreate { message, .. }) => {
                let Some(event) = tracker.accept(message) else {
                    continue;
                };
                if tx.send(FeedUpdate::Insert(event)).await.is_err() {
                    return Outcome::ListenerGone;
                }
            }
            Ok(GatewayEvent::SignedOut) => return Outcome::SignedOut,
            Ok(GatewayEvent::Ready { .. }) => {}
            Err(e) => warn!("Bad gateway event: {}", e),
        }
    }

    Outcome::Dropped {
        reason: "stream ended".into(),
        healthy,
    }
}

/// Resolves once the subscription is closed or the client signs out.
async fn stopped(stop: &mut watch::Receiver<bool>, epoch: &mut watch::Receiver<u64>, opened_epoch: u64) {
    let mut epoch_open = true;
    loop {
        if *stop.borrow_and_update() || *epoch.borrow_and_update() != opened_epoch {
            return;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = epoch.changed(), if epoch_open => {
                if changed.is_err() {
                    epoch_open = false;
                }
            }
        }
    }
}

/// Resolves once the epoch moves past `opened_epoch`. Never resolves if the
/// client is gone, since nobody can sign out any more.
async fn signed_out(epoch: &mut watch::Receiver<u64>, opened_epoch: u64) {
    loop {
        if *epoch.borrow_and_update() != opened_epoch {
            return;
        }
        if epoch.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_connector(policy: ReconnectPolicy) -> Connector {
        // Bind and release a port so nothing is listening on it
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        Connector {
            ws_url: format!("ws://127.0.0.1:{port}/gateway"),
            token: None,
            policy,
        }
    }

    fn fast_policy(threshold: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            failure_threshold: threshold,
        }
    }

    #[tokio::test]
    async fn reports_connectivity_lost_after_threshold() {
        let (_epoch_tx, epoch_rx) = watch::channel(0u64);
        let mut sub = FeedSubscription::spawn(unreachable_connector(fast_policy(3)), epoch_rx);

        let update = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("no update before timeout");
        assert_eq!(update, Some(FeedUpdate::ConnectivityLost { attempts: 3 }));
        sub.close();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_epoch_tx, epoch_rx) = watch::channel(0u64);
        let mut sub = FeedSubscription::spawn(unreachable_connector(fast_policy(1)), epoch_rx);

        sub.close();
        sub.close();
        assert!(sub.is_closed());
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn epoch_change_closes_subscription() {
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        let mut sub = FeedSubscription::spawn(unreachable_connector(fast_policy(1000)), epoch_rx);

        epoch_tx.send_modify(|e| *e += 1);
        assert!(sub.is_closed());
        let update = tokio::time::timeout(Duration::from_secs(2), sub.next()).await.unwrap();
        assert_eq!(update, None);
    }

    #[test]
    fn default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.failure_threshold, 5);
        assert!(policy.base_delay < policy.max_delay);
    }
}
