use minichat_types::events::InsertEvent;
use minichat_types::models::Message;

/// Client-side view of how far the feed has been delivered.
///
/// The wire may repeat messages after a reconnect; the tracker lets each
/// `seq` through once and numbers positions in the listener's own list.
#[derive(Debug, Default, Clone)]
pub struct FeedTracker {
    last_seq: Option<i64>,
    count: usize,
}

impl FeedTracker {
    /// `seq` to resume from, `None` before anything was received.
    pub fn last_seq(&self) -> Option<i64> {
        self.last_seq
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Accept a message from the wire. Returns `None` for repeats.
    pub fn accept(&mut self, message: Message) -> Option<InsertEvent> {
        if self.last_seq.is_some_and(|last| message.seq <= last) {
            return None;
        }

        let position = self.count;
        self.count += 1;
        self.last_seq = Some(message.seq);

        Some(InsertEvent {
            message,
            position,
            count: self.count,
        })
    }
}
