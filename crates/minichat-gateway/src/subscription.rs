use std::collections::VecDeque;

use futures_util::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use minichat_types::error::FeedError;
use minichat_types::events::InsertEvent;

use crate::dispatcher::FeedInsert;
use crate::feed::FeedStore;

/// A live, ordered view over the feed for exactly one listener.
///
/// Replays everything after the requested `seq`, then follows new appends.
/// A subscriber that falls behind the broadcast buffer is caught up from the
/// store instead of silently missing messages.
pub struct FeedSubscription {
    store: FeedStore,
    live: Option<broadcast::Receiver<FeedInsert>>,
    pending: VecDeque<InsertEvent>,
    last_seq: i64,
    needs_resync: bool,
}

impl FeedSubscription {
    /// Open a subscription. `after` is the last `seq` the listener already
    /// has; `None` replays the whole feed.
    pub async fn open(store: &FeedStore, after: Option<i64>) -> Result<Self, FeedError> {
        // Listen before reading, so nothing appended in between is lost.
        // Overlap between the two is dropped by seq in `next`.
        let live = store.dispatcher().subscribe();

        let mut sub = Self {
            store: store.clone(),
            live: Some(live),
            pending: VecDeque::new(),
            last_seq: after.unwrap_or(0),
            needs_resync: false,
        };
        sub.fill_from_store().await?;

        debug!("Subscription opened after seq {} with {} to replay", sub.last_seq, sub.pending.len());
        Ok(sub)
    }

    /// Next insert in feed order. `Ok(None)` once closed.
    ///
    /// Cancel-safe: dropping the future mid-resync retries the resync on the
    /// next call.
    pub async fn next(&mut self) -> Result<Option<InsertEvent>, FeedError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                self.last_seq = event.message.seq;
                return Ok(Some(event));
            }

            if self.live.is_none() {
                return Ok(None);
            }

            if self.needs_resync {
                self.fill_from_store().await?;
                self.needs_resync = false;
                continue;
            }

            let Some(live) = self.live.as_mut() else {
                return Ok(None);
            };
            match live.recv().await {
                Ok(insert) => {
                    if insert.message.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = insert.message.seq;
                    let position = insert.count.saturating_sub(1);
                    return Ok(Some(InsertEvent {
                        message: insert.message,
                        position,
                        count: insert.count,
                    }));
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("Subscription lagged by {} inserts, resyncing from store", n);
                    self.needs_resync = true;
                }
                Err(RecvError::Closed) => {
                    self.live = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Highest `seq` handed out so far (or the `after` it was opened with).
    pub fn last_seq(&self) -> i64 {
        self.last_seq
    }

    pub fn is_closed(&self) -> bool {
        self.live.is_none()
    }

    /// Stop delivery and release the broadcast receiver. Safe to call twice.
    pub fn close(&mut self) {
        if self.live.take().is_some() {
            debug!("Subscription closed at seq {}", self.last_seq);
        }
        self.pending.clear();
    }

    pub fn into_stream(mut self) -> impl Stream<Item = Result<InsertEvent, FeedError>> {
        async_stream::stream! {
            loop {
                match self.next().await {
                    Ok(Some(event)) => yield Ok(event),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }

    /// Queue every stored message after `last_seq`.
    async fn fill_from_store(&mut self) -> Result<(), FeedError> {
        let base = self.store.count_through(self.last_seq).await?;
        let missed = self.store.since(self.last_seq, None).await?;

        self.pending = missed
            .into_iter()
            .enumerate()
            .map(|(i, message)| InsertEvent {
                message,
                position: base + i,
                count: base + i + 1,
            })
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::StreamExt;
    use minichat_db::Database;
    use minichat_types::models::Session;

    use super::*;
    use crate::dispatcher::Dispatcher;

    fn store_with(dispatcher: Dispatcher) -> FeedStore {
        FeedStore::new(Arc::new(Database::open_in_memory().unwrap()), dispatcher)
    }

    fn session(id: &str) -> Session {
        Session {
            user_id: id.into(),
            display_name: id.to_uppercase(),
            photo_url: None,
        }
    }

    async fn next_text(sub: &mut FeedSubscription) -> String {
        tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("timed out waiting for insert")
            .unwrap()
            .unwrap()
            .message
            .text
    }

    #[tokio::test]
    async fn replays_then_follows_live() {
        let store = store_with(Dispatcher::new());
        let ada = session("ada");
        store.append(Some(&ada), "old").await.unwrap();

        let mut sub = FeedSubscription::open(&store, None).await.unwrap();
        store.append(Some(&ada), "new").await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!((first.message.text.as_str(), first.position, first.count), ("old", 0, 1));

        let second = sub.next().await.unwrap().unwrap();
        assert_eq!((second.message.text.as_str(), second.position, second.count), ("new", 1, 2));
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_same_order() {
        let store = store_with(Dispatcher::new());
        let mut early = FeedSubscription::open(&store, None).await.unwrap();
        let mut other = FeedSubscription::open(&store, None).await.unwrap();

        store.append(Some(&session("ada")), "a").await.unwrap();
        store.append(Some(&session("bob")), "b").await.unwrap();

        for sub in [&mut early, &mut other] {
            assert_eq!(next_text(sub).await, "a");
            assert_eq!(next_text(sub).await, "b");
        }

        let mut late = FeedSubscription::open(&store, None).await.unwrap();
        assert_eq!(next_text(&mut late).await, "a");
        assert_eq!(next_text(&mut late).await, "b");
    }

    #[tokio::test]
    async fn reopening_after_last_seq_yields_only_missed() {
        let store = store_with(Dispatcher::new());
        let ada = session("ada");

        let mut sub = FeedSubscription::open(&store, None).await.unwrap();
        store.append(Some(&ada), "seen").await.unwrap();
        assert_eq!(next_text(&mut sub).await, "seen");
        let last = sub.last_seq();
        sub.close();

        store.append(Some(&ada), "missed-1").await.unwrap();
        store.append(Some(&ada), "missed-2").await.unwrap();

        let mut resumed = FeedSubscription::open(&store, Some(last)).await.unwrap();
        let a = resumed.next().await.unwrap().unwrap();
        let b = resumed.next().await.unwrap().unwrap();
        assert_eq!((a.message.text.as_str(), a.position), ("missed-1", 1));
        assert_eq!((b.message.text.as_str(), b.position), ("missed-2", 2));

        store.append(Some(&ada), "live").await.unwrap();
        assert_eq!(next_text(&mut resumed).await, "live");
    }

    #[tokio::test]
    async fn lagging_subscriber_is_resynced_without_gaps() {
        let store = store_with(Dispatcher::with_capacity(2));
        let ada = session("ada");
        let mut sub = FeedSubscription::open(&store, None).await.unwrap();

        for i in 0..6 {
            store.append(Some(&ada), &format!("m{i}")).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(next_text(&mut sub).await);
        }
        assert_eq!(seen, ["m0", "m1", "m2", "m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_local() {
        let store = store_with(Dispatcher::new());
        let mut closed = FeedSubscription::open(&store, None).await.unwrap();
        let mut open = FeedSubscription::open(&store, None).await.unwrap();

        closed.close();
        closed.close();
        assert!(closed.is_closed());

        store.append(Some(&session("ada")), "after close").await.unwrap();
        assert_eq!(closed.next().await.unwrap(), None);
        assert_eq!(next_text(&mut open).await, "after close");
    }

    #[tokio::test]
    async fn stream_adapter_yields_in_order() {
        let store = store_with(Dispatcher::new());
        let ada = session("ada");
        store.append(Some(&ada), "x").await.unwrap();
        store.append(Some(&ada), "y").await.unwrap();

        let stream = FeedSubscription::open(&store, None).await.unwrap().into_stream();
        let texts: Vec<_> = stream
            .take(2)
            .map(|r| r.unwrap().message.text)
            .collect()
            .await;
        assert_eq!(texts, ["x", "y"]);
    }
}
