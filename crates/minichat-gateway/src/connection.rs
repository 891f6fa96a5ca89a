use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use minichat_types::events::{GatewayCommand, GatewayEvent};
use minichat_types::models::Session;

use crate::dispatcher::ConnectionSignal;
use crate::feed::FeedStore;
use crate::subscription::FeedSubscription;
use crate::token;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a client gets to send Identify/Subscribe after upgrading.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct Handshake {
    session: Option<Session>,
    after: Option<i64>,
}

/// Serve one gateway connection: optional Identify, then Subscribe, then a
/// stream of MessageCreate events until either side goes away.
pub async fn handle_connection(socket: WebSocket, store: FeedStore, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some(handshake) = wait_for_handshake(&mut sender, &mut receiver, &jwt_secret).await else {
        warn!("Gateway client failed handshake, closing");
        return;
    };

    let who = handshake
        .session
        .as_ref()
        .map_or_else(|| "anonymous".to_string(), |s| format!("{} ({})", s.display_name, s.user_id));

    let subscription = match FeedSubscription::open(&store, handshake.after).await {
        Ok(sub) => sub,
        Err(e) => {
            warn!("{} could not open subscription: {}", who, e);
            return;
        }
    };

    info!("{} subscribed to feed after {:?}", who, handshake.after);

    // Only identified connections can be reached by a sign-out
    let dispatcher = store.dispatcher().clone();
    let registration = match &handshake.session {
        Some(session) => {
            let (conn_id, rx) = dispatcher.register_connection(&session.user_id).await;
            debug!(
                "{} now has {} gateway connections",
                who,
                dispatcher.connection_count(&session.user_id).await
            );
            Some((session.user_id.clone(), conn_id, rx))
        }
        None => None,
    };
    let (conn_key, mut signal_rx) = match registration {
        Some((user_id, conn_id, rx)) => (Some((user_id, conn_id)), Some(rx)),
        None => (None, None),
    };

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward feed inserts and signals -> client, with heartbeat
    let send_who = who.clone();
    let mut send_task = tokio::spawn(async move {
        // Dropping the stream closes the subscription
        let mut feed = std::pin::pin!(subscription.into_stream());
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = feed.next() => {
                    let event = match result {
                        Some(Ok(event)) => event,
                        None => break,
                        Some(Err(e)) => {
                            warn!("{} subscription failed: {}", send_who, e);
                            break;
                        }
                    };
                    let frame = GatewayEvent::MessageCreate {
                        message: event.message,
                        position: event.position,
                        count: event.count,
                    };
                    if !send_event(&mut sender, &frame).await {
                        break;
                    }
                }
                signal = next_signal(&mut signal_rx) => {
                    if let Some(ConnectionSignal::SignedOut) = signal {
                        info!("{} signed out, closing gateway connection", send_who);
                        send_event(&mut sender, &GatewayEvent::SignedOut).await;
                        let _ = sender.send(WsMessage::Close(None)).await;
                    }
                    break;
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read from client. After the handshake only pongs and close matter.
    let recv_who = who.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Text(text) => {
                    debug!("{} sent command after handshake, ignoring: {}", recv_who, truncate(&text));
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some((user_id, conn_id)) = conn_key {
        dispatcher.unregister_connection(&user_id, conn_id).await;
    }
    info!("{} disconnected from gateway", who);
}

async fn wait_for_handshake(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Handshake> {
    let handshake = async {
        let mut session: Option<Session> = None;

        while let Some(Ok(msg)) = receiver.next().await {
            let WsMessage::Text(text) = msg else {
                continue;
            };
            match serde_json::from_str::<GatewayCommand>(&text) {
                Ok(GatewayCommand::Identify { token }) => {
                    let Ok(identified) = token::verify(jwt_secret, &token) else {
                        // Policy close tells the client not to retry with this token
                        let refusal = CloseFrame {
                            code: close_code::POLICY,
                            reason: Utf8Bytes::from_static("unauthenticated"),
                        };
                        let _ = sender.send(WsMessage::Close(Some(refusal))).await;
                        return None;
                    };
                    let ready = GatewayEvent::Ready {
                        user_id: identified.user_id.clone(),
                        display_name: identified.display_name.clone(),
                    };
                    if !send_event(sender, &ready).await {
                        return None;
                    }
                    session = Some(identified);
                }
                Ok(GatewayCommand::Subscribe { after }) => {
                    return Some(Handshake { session, after });
                }
                Err(e) => {
                    warn!("Bad gateway command: {} -- raw: {}", e, truncate(&text));
                }
            }
        }
        None
    };

    tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await.ok().flatten()
}

async fn next_signal(
    rx: &mut Option<tokio::sync::mpsc::UnboundedReceiver<ConnectionSignal>>,
) -> Option<ConnectionSignal> {
    match rx {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, WsMessage>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return false;
        }
    };
    sender.send(WsMessage::Text(text.into())).await.is_ok()
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
