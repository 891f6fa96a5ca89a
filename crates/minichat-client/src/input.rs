use minichat_types::validation::{can_send, clamp_input};

use crate::client::{ChatClient, PendingSend};
use crate::error::ClientError;

/// Text field state for composing a message.
///
/// Input is cut to the maximum length as it is typed, and the field clears
/// as soon as a send is handed off, without waiting for the server.
#[derive(Debug, Default, Clone)]
pub struct MessageInput {
    text: String,
}

impl MessageInput {
    pub fn set(&mut self, text: &str) {
        self.text = clamp_input(text).to_string();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Send-button enablement.
    pub fn can_send(&self) -> bool {
        can_send(&self.text)
    }

    /// Hand the text to `client`. On a synchronous error the text is kept
    /// so the user can fix it.
    pub fn submit(&mut self, client: &ChatClient) -> Result<PendingSend, ClientError> {
        let pending = client.send(&self.text)?;
        self.text.clear();
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use minichat_types::error::FeedError;

    #[test]
    fn clamps_to_max_length() {
        let mut input = MessageInput::default();
        input.set(&"é".repeat(200));
        assert_eq!(input.text().chars().count(), 140);
    }

    #[test]
    fn send_enabled_only_for_non_blank() {
        let mut input = MessageInput::default();
        assert!(!input.can_send());
        input.set("  \t");
        assert!(!input.can_send());
        input.set(" hi ");
        assert!(input.can_send());
    }

    #[test]
    fn failed_submit_keeps_text() {
        let client = ChatClient::new(ClientConfig::new("http://127.0.0.1:1"));
        let mut input = MessageInput::default();
        input.set("hello");

        let err = input.submit(&client).err().unwrap();
        assert_eq!(err, ClientError::Feed(FeedError::Unauthenticated));
        assert_eq!(input.text(), "hello");
    }
}
