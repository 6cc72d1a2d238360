/// Delivery channels
///
/// Each channel wraps one delivery transport (push, email, durable queue)
/// behind the same `Channel` capability. Channels fail independently;
/// the fan-out engine aggregates their outcomes.

pub mod email;
pub mod push;
pub mod queue;

pub use email::EmailChannel;
pub use push::PushChannel;
pub use queue::{BulkQueueChannel, HttpQueueClient, QueueChannel, QueueClient};

use crate::{db::models::Notification, error::CoreResult};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// One delivery transport invoked by the fan-out engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Push,
    Email,
    Queue,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::Push => "push",
            ChannelKind::Email => "email",
            ChannelKind::Queue => "queue",
        };
        f.write_str(s)
    }
}

/// A successful delivery receipt from a channel's provider
#[derive(Debug, Clone)]
pub struct Delivery {
    pub provider_message_id: String,
}

/// Uniform send capability over one transport.
///
/// `recipient` is channel-specific: an email address for the email
/// channel, a device endpoint address for the push channel (empty means
/// the configured broadcast topic), and ignored by the queue channel.
#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, recipient: &str, notification: &Notification) -> CoreResult<Delivery>;
}
