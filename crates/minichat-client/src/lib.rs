//! Client side of the feed: session holder, fire-and-forget sends and a
//! reconnecting subscription that never skips a message.

pub mod backoff;
pub mod client;
pub mod error;
pub mod feed;
pub mod input;
pub mod tracker;

pub use client::{ChatClient, ClientConfig, PendingSend};
pub use input::MessageInput;
pub use error::ClientError;
pub use feed::{FeedSubscription, FeedUpdate, ReconnectPolicy};
