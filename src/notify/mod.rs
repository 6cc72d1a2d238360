/// Notification persistence and multi-channel fan-out
///
/// A social action constructs a notification record, persists it through
/// `NotificationStore`, and hands it to `FanoutEngine::dispatch`. The
/// engine always enqueues a durable copy; push and email are optional,
/// independently failable extras. The notification record and its
/// delivery are decoupled: a channel failure never rolls back the record
/// or the social mutation that spawned it.
use crate::{
    channels::{
        queue::{BatchItemOutcome, BulkQueueChannel},
        Channel, ChannelKind, Delivery,
    },
    db::models::{Notification, NotificationKind, TargetKind},
    db::{Page, Paged},
    directory::UserDirectory,
    error::{CoreError, CoreResult},
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// A notification record before insertion
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub sender_id: Option<i64>,
    pub redirect_path: String,
}

impl NewNotification {
    /// Someone started following the recipient
    pub fn follow(recipient_id: i64, sender_id: i64, sender_name: &str) -> Self {
        Self {
            recipient_id,
            kind: NotificationKind::Follow,
            title: "New Follower".to_string(),
            body: format!("{} started following you", sender_name),
            sender_id: Some(sender_id),
            redirect_path: format!("/profile/{}", sender_id),
        }
    }

    /// Someone liked the recipient's content
    pub fn like(
        recipient_id: i64,
        sender_id: i64,
        sender_name: &str,
        target_kind: TargetKind,
        target_id: i64,
    ) -> Self {
        Self {
            recipient_id,
            kind: NotificationKind::Like,
            title: "New Like".to_string(),
            body: format!("{} liked your {}", sender_name, target_kind),
            sender_id: Some(sender_id),
            redirect_path: format!("/{}/{}", target_kind, target_id),
        }
    }

    /// Someone commented on the recipient's content
    pub fn comment(
        recipient_id: i64,
        sender_id: i64,
        sender_name: &str,
        target_kind: TargetKind,
        target_id: i64,
    ) -> Self {
        Self {
            recipient_id,
            kind: NotificationKind::Comment,
            title: "New Comment".to_string(),
            body: format!("{} commented on your {}", sender_name, target_kind),
            sender_id: Some(sender_id),
            redirect_path: format!("/{}/{}", target_kind, target_id),
        }
    }

    /// Someone replied to the recipient's comment
    pub fn reply(
        recipient_id: i64,
        sender_id: i64,
        sender_name: &str,
        target_kind: TargetKind,
        target_id: i64,
    ) -> Self {
        Self {
            recipient_id,
            kind: NotificationKind::Reply,
            title: "New Reply".to_string(),
            body: format!("{} replied to your comment", sender_name),
            sender_id: Some(sender_id),
            redirect_path: format!("/{}/{}", target_kind, target_id),
        }
    }

    /// Someone sent the recipient a direct message
    pub fn message(recipient_id: i64, sender_id: i64, sender_name: &str) -> Self {
        Self {
            recipient_id,
            kind: NotificationKind::Message,
            title: "New Message".to_string(),
            body: format!("{} sent you a message", sender_name),
            sender_id: Some(sender_id),
            redirect_path: format!("/messages/{}", sender_id),
        }
    }

    /// A system notification with no sender
    pub fn system(recipient_id: i64, title: &str, body: &str, redirect_path: &str) -> Self {
        Self {
            recipient_id,
            kind: NotificationKind::System,
            title: title.to_string(),
            body: body.to_string(),
            sender_id: None,
            redirect_path: redirect_path.to_string(),
        }
    }
}

/// Notification table operations
pub struct NotificationStore {
    db: SqlitePool,
}

impl NotificationStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist a notification record
    pub async fn create(&self, new: NewNotification) -> CoreResult<Notification> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO notification (recipient_id, kind, title, body, sender_id, redirect_path, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        )
        .bind(new.recipient_id)
        .bind(new.kind)
        .bind(&new.title)
        .bind(&new.body)
        .bind(new.sender_id)
        .bind(&new.redirect_path)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(CoreError::Database)?;

        Ok(Notification {
            id: result.last_insert_rowid(),
            recipient_id: new.recipient_id,
            kind: new.kind,
            title: new.title,
            body: new.body,
            sender_id: new.sender_id,
            redirect_path: new.redirect_path,
            is_read: false,
            created_at: now,
            read_at: None,
        })
    }

    /// List a user's notifications, newest first, optionally unread only
    pub async fn list(
        &self,
        user_id: i64,
        page: Page,
        unread_only: bool,
    ) -> CoreResult<Paged<Notification>> {
        let unread_filter = if unread_only { " AND is_read = 0" } else { "" };

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM notification WHERE recipient_id = ?1{}",
            unread_filter
        ))
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let items = sqlx::query_as::<_, Notification>(&format!(
            "SELECT id, recipient_id, kind, title, body, sender_id, redirect_path, is_read, created_at, read_at
             FROM notification
             WHERE recipient_id = ?1{}
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            unread_filter
        ))
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await
        .map_err(CoreError::Database)?;

        Ok(Paged::new(items, total, page))
    }

    /// Count a user's unread notifications
    pub async fn unread_count(&self, user_id: i64) -> CoreResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification WHERE recipient_id = ?1 AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .map_err(CoreError::Database)
    }

    /// Mark one notification as read; only the recipient may mark, and
    /// re-marking is a no-op success
    pub async fn mark_read(&self, notification_id: i64, user_id: i64) -> CoreResult<()> {
        let row = sqlx::query("SELECT recipient_id, is_read FROM notification WHERE id = ?1")
            .bind(notification_id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::Database)?
            .ok_or_else(|| CoreError::NotFound("Notification not found".to_string()))?;

        let recipient_id: i64 = row.get("recipient_id");
        if recipient_id != user_id {
            return Err(CoreError::Forbidden(
                "Not the notification owner".to_string(),
            ));
        }

        let is_read: bool = row.get("is_read");
        if !is_read {
            sqlx::query(
                "UPDATE notification SET is_read = 1, read_at = ?1 WHERE id = ?2 AND is_read = 0",
            )
            .bind(Utc::now())
            .bind(notification_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::Database)?;
        }

        Ok(())
    }

    /// Mark all of a user's notifications as read; returns count affected
    pub async fn mark_all_read(&self, user_id: i64) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE notification SET is_read = 1, read_at = ?1 WHERE recipient_id = ?2 AND is_read = 0",
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.db)
        .await
        .map_err(CoreError::Database)?;

        Ok(result.rows_affected())
    }

    /// Delete one notification; only the recipient may delete
    pub async fn delete(&self, notification_id: i64, user_id: i64) -> CoreResult<()> {
        let row = sqlx::query("SELECT recipient_id FROM notification WHERE id = ?1")
            .bind(notification_id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::Database)?
            .ok_or_else(|| CoreError::NotFound("Notification not found".to_string()))?;

        let recipient_id: i64 = row.get("recipient_id");
        if recipient_id != user_id {
            return Err(CoreError::Forbidden(
                "Not the notification owner".to_string(),
            ));
        }

        sqlx::query("DELETE FROM notification WHERE id = ?1")
            .bind(notification_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::Database)?;

        Ok(())
    }

    /// Delete all of a user's notifications; returns count removed
    pub async fn clear_all(&self, user_id: i64) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM notification WHERE recipient_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::Database)?;

        Ok(result.rows_affected())
    }
}

/// A channel failure attached to a dispatch outcome as a diagnostic
#[derive(Debug, Clone)]
pub struct ChannelFailure {
    pub channel: ChannelKind,
    pub error: String,
}

/// Aggregate outcome of one dispatch.
///
/// The queue write is the durability guarantee, so it alone decides
/// overall success; push and email failures ride along as diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub queued: bool,
    pub deliveries: Vec<(ChannelKind, String)>,
    pub failures: Vec<ChannelFailure>,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.queued
    }

    fn record(&mut self, channel: ChannelKind, result: CoreResult<Delivery>) {
        match result {
            Ok(delivery) => {
                if channel == ChannelKind::Queue {
                    self.queued = true;
                }
                self.deliveries.push((channel, delivery.provider_message_id));
            }
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "channel delivery failed");
                self.failures.push(ChannelFailure {
                    channel,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Fans one logical notification out across the delivery channels
pub struct FanoutEngine {
    queue: Arc<dyn Channel>,
    email: Arc<dyn Channel>,
    push: Arc<dyn Channel>,
    bulk_queue: Arc<BulkQueueChannel>,
    directory: Arc<dyn UserDirectory>,
}

impl FanoutEngine {
    pub fn new(
        queue: Arc<dyn Channel>,
        email: Arc<dyn Channel>,
        push: Arc<dyn Channel>,
        bulk_queue: Arc<BulkQueueChannel>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            queue,
            email,
            push,
            bulk_queue,
            directory,
        }
    }

    /// Dispatch a notification across the requested channels.
    ///
    /// The durable queue write is always attempted. The three channel
    /// calls are independent, run concurrently, and join before
    /// returning; none can short-circuit a sibling.
    pub async fn dispatch(
        &self,
        notification: &Notification,
        send_email: bool,
        send_push: bool,
    ) -> DispatchOutcome {
        let queue_fut = self.queue.send("", notification);

        let email_fut = async {
            if !send_email {
                return None;
            }
            let result = match self.directory.email_address(notification.recipient_id).await {
                Ok(Some(address)) => self.email.send(&address, notification).await,
                Ok(None) => Err(CoreError::ChannelUnavailable(
                    "No email address on file for recipient".to_string(),
                )),
                Err(e) => Err(e),
            };
            Some(result)
        };

        let push_fut = async {
            if !send_push {
                return None;
            }
            // Broadcast topic by default; per-device targeting goes
            // through send_direct_push
            Some(self.push.send("", notification).await)
        };

        let (queue_result, email_result, push_result) =
            tokio::join!(queue_fut, email_fut, push_fut);

        let mut outcome = DispatchOutcome::default();
        outcome.record(ChannelKind::Queue, queue_result);
        if let Some(result) = email_result {
            outcome.record(ChannelKind::Email, result);
        }
        if let Some(result) = push_result {
            outcome.record(ChannelKind::Push, result);
        }

        tracing::info!(
            notification_id = notification.id,
            queued = outcome.queued,
            failures = outcome.failures.len(),
            "notification dispatched"
        );

        outcome
    }

    /// Dispatch a batch of notifications through the durable queue only.
    /// Reserved for system/batch notifications where the interactive
    /// channels are unnecessary. Returns per-item outcomes.
    pub async fn dispatch_bulk(&self, notifications: &[Notification]) -> Vec<BatchItemOutcome> {
        self.bulk_queue.send_all(notifications).await
    }

    /// Push straight to one known device endpoint, e.g. right after
    /// registration
    pub async fn send_direct_push(
        &self,
        endpoint: &str,
        notification: &Notification,
    ) -> CoreResult<Delivery> {
        self.push.send(endpoint, notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    struct StubChannel {
        kind: ChannelKind,
        fail: bool,
    }

    #[async_trait]
    impl Channel for StubChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(
            &self,
            _recipient: &str,
            _notification: &Notification,
        ) -> CoreResult<Delivery> {
            if self.fail {
                Err(CoreError::ChannelUnavailable(format!(
                    "{} down",
                    self.kind
                )))
            } else {
                Ok(Delivery {
                    provider_message_id: format!("{}-ok", self.kind),
                })
            }
        }
    }

    struct StubDirectory {
        email: Option<String>,
    }

    #[async_trait]
    impl UserDirectory for StubDirectory {
        async fn email_address(&self, _user_id: i64) -> CoreResult<Option<String>> {
            Ok(self.email.clone())
        }

        async fn display_name(&self, _user_id: i64) -> CoreResult<Option<String>> {
            Ok(Some("Ada".to_string()))
        }
    }

    struct NoopQueueClient;

    #[async_trait]
    impl crate::channels::QueueClient for NoopQueueClient {
        async fn send_message(
            &self,
            _body: &str,
            _attributes: &[(String, String)],
        ) -> CoreResult<String> {
            Ok("qm".to_string())
        }

        async fn send_message_batch(
            &self,
            entries: &[crate::channels::queue::QueueEntry],
        ) -> CoreResult<Vec<BatchItemOutcome>> {
            Ok(entries
                .iter()
                .map(|e| BatchItemOutcome {
                    id: e.id.clone(),
                    provider_message_id: Some("qm".to_string()),
                    error: None,
                })
                .collect())
        }
    }

    fn engine(queue_fails: bool, email_fails: bool, push_fails: bool) -> FanoutEngine {
        FanoutEngine::new(
            Arc::new(StubChannel {
                kind: ChannelKind::Queue,
                fail: queue_fails,
            }),
            Arc::new(StubChannel {
                kind: ChannelKind::Email,
                fail: email_fails,
            }),
            Arc::new(StubChannel {
                kind: ChannelKind::Push,
                fail: push_fails,
            }),
            Arc::new(BulkQueueChannel::new(Arc::new(NoopQueueClient))),
            Arc::new(StubDirectory {
                email: Some("ada@example.com".to_string()),
            }),
        )
    }

    fn sample_notification() -> Notification {
        Notification {
            id: 11,
            recipient_id: 2,
            kind: NotificationKind::Follow,
            title: "New Follower".to_string(),
            body: "Ada started following you".to_string(),
            sender_id: Some(3),
            redirect_path: "/profile/3".to_string(),
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        }
    }

    #[tokio::test]
    async fn test_queue_failure_fails_dispatch_despite_other_successes() {
        let engine = engine(true, false, false);
        let outcome = engine.dispatch(&sample_notification(), true, true).await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].channel, ChannelKind::Queue);

        // Push and email still show as delivered in the diagnostics
        let delivered: Vec<ChannelKind> =
            outcome.deliveries.iter().map(|(k, _)| *k).collect();
        assert!(delivered.contains(&ChannelKind::Email));
        assert!(delivered.contains(&ChannelKind::Push));
    }

    #[tokio::test]
    async fn test_push_failure_is_diagnostic_only() {
        let engine = engine(false, false, true);
        let outcome = engine.dispatch(&sample_notification(), false, true).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].channel, ChannelKind::Push);
    }

    #[tokio::test]
    async fn test_unrequested_channels_are_skipped() {
        let engine = engine(false, true, true);
        let outcome = engine.dispatch(&sample_notification(), false, false).await;

        assert!(outcome.is_success());
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.deliveries.len(), 1);
        assert_eq!(outcome.deliveries[0].0, ChannelKind::Queue);
    }

    #[tokio::test]
    async fn test_missing_email_address_is_channel_failure() {
        let mut engine = engine(false, false, false);
        engine.directory = Arc::new(StubDirectory { email: None });

        let outcome = engine.dispatch(&sample_notification(), true, false).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].channel, ChannelKind::Email);
    }

    #[test]
    fn test_builders_follow_redirect_conventions() {
        let n = NewNotification::like(2, 3, "Ada", TargetKind::Video, 5);
        assert_eq!(n.redirect_path, "/video/5");
        assert_eq!(n.body, "Ada liked your video");

        let n = NewNotification::message(2, 3, "Ada");
        assert_eq!(n.redirect_path, "/messages/3");

        let n = NewNotification::system(2, "Maintenance", "Downtime at noon", "/status");
        assert!(n.sender_id.is_none());
        assert_eq!(n.kind, NotificationKind::System);
    }
}
