use serde::{Deserialize, Serialize};

use crate::models::Message;
use crate::scroll::{self, ScrollAction};

/// One message delivered to a feed listener, with its place in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertEvent {
    pub message: Message,
    /// 0-based index in the feed.
    pub position: usize,
    /// Feed length including this message.
    pub count: usize,
}

impl InsertEvent {
    /// Scroll decision for a list whose last fully visible row is `last_visible`.
    pub fn scroll_action(&self, last_visible: Option<usize>) -> ScrollAction {
        scroll::after_insert(last_visible, self.position, self.count)
    }
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server accepted the Identify token
    Ready { user_id: String, display_name: String },

    /// A message was appended to the feed (or replayed on subscribe).
    /// `position` is its index in the feed as seen by this subscription,
    /// `count` the feed length including it.
    MessageCreate {
        message: Message,
        position: usize,
        count: usize,
    },

    /// The identified user signed out; the server closes the socket next
    SignedOut,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Attach a session to the connection. Optional; anonymous connections
    /// may still read the feed.
    Identify { token: String },

    /// Start receiving the feed. Everything with `seq > after` is replayed
    /// first, then live inserts follow.
    Subscribe {
        #[serde(default)]
        after: Option<i64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_wire_format() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"Subscribe","data":{"after":12}}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::Subscribe { after: Some(12) }));

        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"Subscribe","data":{}}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::Subscribe { after: None }));
    }

    #[test]
    fn signed_out_has_no_payload() {
        let json = serde_json::to_string(&GatewayEvent::SignedOut).unwrap();
        assert_eq!(json, r#"{"type":"SignedOut"}"#);
    }
}
