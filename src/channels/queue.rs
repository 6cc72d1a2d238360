/// Durable queue delivery channel
///
/// The queue is the durability backstop: every dispatched notification
/// is enqueued for asynchronous downstream consumers regardless of how
/// the interactive channels fared.
use crate::{
    channels::{Channel, ChannelKind, Delivery},
    db::models::Notification,
    error::{CoreError, CoreResult},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Provider-imposed ceiling on entries per physical batch call
pub const MAX_QUEUE_BATCH: usize = 10;

/// One entry in a batched queue submission
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: String,
    pub body: String,
    pub attributes: Vec<(String, String)>,
}

/// Per-item result of a batched submission
#[derive(Debug, Clone)]
pub struct BatchItemOutcome {
    pub id: String,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl BatchItemOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// External durable queue seam
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Submit one message; returns the provider message id
    async fn send_message(
        &self,
        body: &str,
        attributes: &[(String, String)],
    ) -> CoreResult<String>;

    /// Submit up to `MAX_QUEUE_BATCH` entries in one physical call,
    /// reporting per-item success or failure
    async fn send_message_batch(&self, entries: &[QueueEntry]) -> CoreResult<Vec<BatchItemOutcome>>;
}

/// HTTP-backed queue client
pub struct HttpQueueClient {
    http: reqwest::Client,
    queue_url: String,
}

#[derive(Deserialize)]
struct SendResponse {
    message_id: String,
}

#[derive(Deserialize)]
struct BatchResponse {
    successful: Vec<BatchSuccess>,
    failed: Vec<BatchFailure>,
}

#[derive(Deserialize)]
struct BatchSuccess {
    id: String,
    message_id: String,
}

#[derive(Deserialize)]
struct BatchFailure {
    id: String,
    error: String,
}

impl HttpQueueClient {
    pub fn new(queue_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            queue_url: queue_url.trim_end_matches('/').to_string(),
        }
    }

    fn attributes_json(attributes: &[(String, String)]) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = attributes
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn send_message(
        &self,
        body: &str,
        attributes: &[(String, String)],
    ) -> CoreResult<String> {
        let url = format!("{}/messages", self.queue_url);
        // Client-generated id so a retried submission is traceable
        // end to end
        let payload = serde_json::json!({
            "request_id": Uuid::new_v4().to_string(),
            "body": body,
            "attributes": Self::attributes_json(attributes),
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CoreError::ChannelUnavailable(format!("Queue error: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::ChannelUnavailable(format!(
                "Queue returned {}",
                response.status()
            )));
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| CoreError::ChannelUnavailable(format!("Queue response: {}", e)))?;

        Ok(parsed.message_id)
    }

    async fn send_message_batch(
        &self,
        entries: &[QueueEntry],
    ) -> CoreResult<Vec<BatchItemOutcome>> {
        if entries.len() > MAX_QUEUE_BATCH {
            return Err(CoreError::Validation(format!(
                "Batch exceeds {} entries",
                MAX_QUEUE_BATCH
            )));
        }

        let url = format!("{}/messages/batch", self.queue_url);
        let payload = serde_json::json!({
            "request_id": Uuid::new_v4().to_string(),
            "entries": entries
                .iter()
                .map(|e| serde_json::json!({
                    "id": e.id,
                    "body": e.body,
                    "attributes": Self::attributes_json(&e.attributes),
                }))
                .collect::<Vec<_>>(),
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CoreError::ChannelUnavailable(format!("Queue error: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::ChannelUnavailable(format!(
                "Queue returned {}",
                response.status()
            )));
        }

        let parsed: BatchResponse = response
            .json()
            .await
            .map_err(|e| CoreError::ChannelUnavailable(format!("Queue response: {}", e)))?;

        let mut outcomes = Vec::with_capacity(entries.len());
        for success in parsed.successful {
            outcomes.push(BatchItemOutcome {
                id: success.id,
                provider_message_id: Some(success.message_id),
                error: None,
            });
        }
        for failure in parsed.failed {
            outcomes.push(BatchItemOutcome {
                id: failure.id,
                provider_message_id: None,
                error: Some(failure.error),
            });
        }

        Ok(outcomes)
    }
}

/// Serialize the durable notification fields for downstream consumers
fn durable_body(notification: &Notification) -> CoreResult<String> {
    let body = serde_json::json!({
        "id": notification.id,
        "recipient_id": notification.recipient_id,
        "kind": notification.kind,
        "title": notification.title,
        "body": notification.body,
        "sender_id": notification.sender_id,
        "redirect_path": notification.redirect_path,
    });
    serde_json::to_string(&body)
        .map_err(|e| CoreError::Internal(format!("Queue body serialization: {}", e)))
}

/// Single-notification queue channel
pub struct QueueChannel {
    client: Arc<dyn QueueClient>,
}

impl QueueChannel {
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Channel for QueueChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Queue
    }

    async fn send(&self, _recipient: &str, notification: &Notification) -> CoreResult<Delivery> {
        let body = durable_body(notification)?;
        let attributes = vec![(
            "notification_kind".to_string(),
            notification.kind.as_str().to_string(),
        )];

        let message_id = self.client.send_message(&body, &attributes).await?;

        Ok(Delivery {
            provider_message_id: message_id,
        })
    }
}

/// Batched queue channel for system/bulk notifications.
///
/// Chunks submissions into the provider batch-size limit and reports
/// per-item outcomes; one item's (or one chunk's) rejection never aborts
/// the rest.
pub struct BulkQueueChannel {
    client: Arc<dyn QueueClient>,
}

impl BulkQueueChannel {
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        Self { client }
    }

    pub async fn send_all(&self, notifications: &[Notification]) -> Vec<BatchItemOutcome> {
        let mut outcomes = Vec::with_capacity(notifications.len());

        for chunk in notifications.chunks(MAX_QUEUE_BATCH) {
            let mut entries = Vec::with_capacity(chunk.len());
            for notification in chunk {
                match durable_body(notification) {
                    Ok(body) => entries.push(QueueEntry {
                        id: notification.id.to_string(),
                        body,
                        attributes: vec![(
                            "notification_kind".to_string(),
                            notification.kind.as_str().to_string(),
                        )],
                    }),
                    Err(e) => outcomes.push(BatchItemOutcome {
                        id: notification.id.to_string(),
                        provider_message_id: None,
                        error: Some(e.to_string()),
                    }),
                }
            }

            if entries.is_empty() {
                continue;
            }

            match self.client.send_message_batch(&entries).await {
                Ok(chunk_outcomes) => outcomes.extend(chunk_outcomes),
                Err(e) => {
                    // A failed physical call fails this chunk's items only
                    tracing::warn!(error = %e, "queue batch call failed");
                    let message = e.to_string();
                    outcomes.extend(entries.iter().map(|entry| BatchItemOutcome {
                        id: entry.id.clone(),
                        provider_message_id: None,
                        error: Some(message.clone()),
                    }));
                }
            }
        }

        outcomes
    }
}
