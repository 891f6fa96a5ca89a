use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use minichat_types::models::Message;

const BROADCAST_CAPACITY: usize = 1024;

/// One accepted append, as fanned out to live subscriptions.
#[derive(Debug, Clone)]
pub struct FeedInsert {
    pub message: Message,
    /// Feed length right after this insert.
    pub count: usize,
}

/// Out-of-band instructions for a single gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    SignedOut,
}

/// Fans feed inserts out to every subscription and tracks identified
/// connections so a sign-out can reach them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every live subscription holds a receiver on this channel
    broadcast_tx: broadcast::Sender<FeedInsert>,

    /// user_id -> (conn_id -> signal sender)
    connections: RwLock<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<ConnectionSignal>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(BROADCAST_CAPACITY)
    }

    /// A dispatcher whose subscribers lag after `capacity` unread inserts.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedInsert> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Send an insert to all live subscriptions. Having none is not an error.
    pub fn broadcast(&self, insert: FeedInsert) {
        let receivers = self.inner.broadcast_tx.send(insert).unwrap_or(0);
        debug!("Insert fanned out to {} subscriptions", receivers);
    }

    /// Register an identified connection. Returns (conn_id, signal receiver).
    pub async fn register_connection(
        &self,
        user_id: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<ConnectionSignal>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    pub async fn unregister_connection(&self, user_id: &str, conn_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some(conns) = connections.get_mut(user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                connections.remove(user_id);
            }
        }
    }

    /// Tell every connection of `user_id` to shut down. Returns how many were
    /// signalled.
    pub async fn sign_out(&self, user_id: &str) -> usize {
        let conns = self.inner.connections.write().await.remove(user_id);
        conns
            .map(|conns| {
                conns
                    .values()
                    .filter(|tx| tx.send(ConnectionSignal::SignedOut).is_ok())
                    .count()
            })
            .unwrap_or(0)
    }

    pub async fn connection_count(&self, user_id: &str) -> usize {
        self.inner
            .connections
            .read()
            .await
            .get(user_id)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_out_reaches_every_connection_of_user() {
        let dispatcher = Dispatcher::new();
        let (_a, mut rx_a) = dispatcher.register_connection("u-1").await;
        let (_b, mut rx_b) = dispatcher.register_connection("u-1").await;
        let (_c, mut rx_other) = dispatcher.register_connection("u-2").await;

        assert_eq!(dispatcher.sign_out("u-1").await, 2);
        assert_eq!(rx_a.recv().await, Some(ConnectionSignal::SignedOut));
        assert_eq!(rx_b.recv().await, Some(ConnectionSignal::SignedOut));
        assert!(rx_other.try_recv().is_err());

        assert_eq!(dispatcher.connection_count("u-1").await, 0);
        assert_eq!(dispatcher.connection_count("u-2").await, 1);
    }

    #[tokio::test]
    async fn unregister_drops_only_that_connection() {
        let dispatcher = Dispatcher::new();
        let (a, _rx_a) = dispatcher.register_connection("u-1").await;
        let (_b, _rx_b) = dispatcher.register_connection("u-1").await;

        dispatcher.unregister_connection("u-1", a).await;
        assert_eq!(dispatcher.connection_count("u-1").await, 1);
        assert_eq!(dispatcher.sign_out("nobody").await, 0);
    }
}
