/// Mobile push delivery channel
use crate::{
    channels::{Channel, ChannelKind, Delivery},
    db::models::Notification,
    error::{CoreError, CoreResult},
    push::PushGateway,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Push channel publishing platform-specific envelopes through the
/// provider gateway
pub struct PushChannel {
    gateway: Arc<dyn PushGateway>,
    broadcast_topic: String,
}

impl PushChannel {
    pub fn new(gateway: Arc<dyn PushGateway>, broadcast_topic: String) -> Self {
        Self {
            gateway,
            broadcast_topic,
        }
    }

    /// Build the multi-platform envelope: distinct payload shapes per
    /// platform family, each wrapping title/body plus the custom data
    /// clients use for in-app routing.
    fn envelope(notification: &Notification) -> CoreResult<String> {
        let data = serde_json::json!({
            "kind": notification.kind,
            "redirect_path": notification.redirect_path,
            "sender_id": notification.sender_id,
        });

        let apns = serde_json::json!({
            "aps": {
                "alert": {
                    "title": notification.title,
                    "body": notification.body,
                },
                "sound": "default",
                "data": data,
            }
        });

        let gcm = serde_json::json!({
            "notification": {
                "title": notification.title,
                "body": notification.body,
            },
            "data": data,
        });

        let envelope = serde_json::json!({
            "default": notification.body,
            "APNS": serde_json::to_string(&apns)
                .map_err(|e| CoreError::Internal(format!("APNS payload: {}", e)))?,
            "GCM": serde_json::to_string(&gcm)
                .map_err(|e| CoreError::Internal(format!("GCM payload: {}", e)))?,
        });

        serde_json::to_string(&envelope)
            .map_err(|e| CoreError::Internal(format!("Push envelope: {}", e)))
    }
}

#[async_trait]
impl Channel for PushChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    /// An empty `recipient` publishes to the broadcast topic; otherwise
    /// `recipient` is a device endpoint address.
    async fn send(&self, recipient: &str, notification: &Notification) -> CoreResult<Delivery> {
        let target = if recipient.is_empty() {
            self.broadcast_topic.as_str()
        } else {
            recipient
        };

        let envelope = Self::envelope(notification)?;
        let message_id = self.gateway.publish(target, &envelope).await?;

        tracing::info!(target, title = %notification.title, "push notification published");

        Ok(Delivery {
            provider_message_id: message_id,
        })
    }
}
