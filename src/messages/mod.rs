/// Direct messages and conversation aggregation
///
/// Conversations are never persisted: they are recomputed from the flat
/// message table on every read, keyed by the unordered user pair.
/// Read-state transitions are one-way (unread -> read) and only the
/// recipient may trigger them.
use crate::{
    db::models::Message,
    db::{Page, Paged},
    error::{CoreError, CoreResult},
};
use chrono::Utc;
use sqlx::{QueryBuilder, Row, SqlitePool};

/// Maximum accepted length for message content, in characters
pub const MAX_MESSAGE_LEN: usize = 4000;

/// One conversation in the inbox listing
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub counterpart_id: i64,
    pub last_message: Message,
    pub unread_count: i64,
}

/// One page of a single conversation
#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub messages: Vec<Message>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Flat message store operations
pub struct MessageStore {
    db: SqlitePool,
}

impl MessageStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Send a direct message
    pub async fn send_message(
        &self,
        sender_id: i64,
        recipient_id: i64,
        content: &str,
    ) -> CoreResult<Message> {
        if sender_id == recipient_id {
            return Err(CoreError::Validation(
                "Cannot send a message to yourself".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(CoreError::Validation(
                "Message content is required".to_string(),
            ));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(CoreError::Validation(format!(
                "Message content exceeds {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let recipient = sqlx::query("SELECT 1 FROM user_account WHERE id = ?1")
            .bind(recipient_id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::Database)?;
        if recipient.is_none() {
            return Err(CoreError::NotFound("Recipient not found".to_string()));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO message (sender_id, recipient_id, content, is_read, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
        )
        .bind(sender_id)
        .bind(recipient_id)
        .bind(content)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(CoreError::Database)?;

        tracing::info!(sender_id, recipient_id, "message sent");

        Ok(Message {
            id: result.last_insert_rowid(),
            sender_id,
            recipient_id,
            content: content.to_string(),
            is_read: false,
            read_at: None,
            created_at: now,
        })
    }

    /// Total unread messages for a user, across all conversations
    pub async fn unread_total(&self, user_id: i64) -> CoreResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM message WHERE recipient_id = ?1 AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .map_err(CoreError::Database)
    }
}

/// Derives conversation views from the message table and manages
/// read-state transitions
pub struct ConversationAggregator {
    db: SqlitePool,
}

impl ConversationAggregator {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// List the current user's conversations: one entry per counterpart,
    /// carrying the latest message of the pair and the unread count,
    /// ordered by the latest message descending. Equal timestamps break
    /// toward the higher message id.
    pub async fn list_conversations(
        &self,
        current_user_id: i64,
        page: Page,
    ) -> CoreResult<Paged<ConversationSummary>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT CASE WHEN sender_id = ?1 THEN recipient_id ELSE sender_id END)
             FROM message WHERE sender_id = ?1 OR recipient_id = ?1",
        )
        .bind(current_user_id)
        .fetch_one(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let rows = sqlx::query(
            "SELECT id, sender_id, recipient_id, content, is_read, read_at, created_at, counterpart_id
             FROM (
                 SELECT m.*,
                        CASE WHEN m.sender_id = ?1 THEN m.recipient_id ELSE m.sender_id END AS counterpart_id,
                        ROW_NUMBER() OVER (
                            PARTITION BY CASE WHEN m.sender_id = ?1 THEN m.recipient_id ELSE m.sender_id END
                            ORDER BY m.created_at DESC, m.id DESC
                        ) AS rn
                 FROM message m
                 WHERE m.sender_id = ?1 OR m.recipient_id = ?1
             )
             WHERE rn = 1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(current_user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let counterpart_id: i64 = row.get("counterpart_id");

            let unread_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM message
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND is_read = 0",
            )
            .bind(current_user_id)
            .bind(counterpart_id)
            .fetch_one(&self.db)
            .await
            .map_err(CoreError::Database)?;

            items.push(ConversationSummary {
                counterpart_id,
                last_message: Message {
                    id: row.get("id"),
                    sender_id: row.get("sender_id"),
                    recipient_id: row.get("recipient_id"),
                    content: row.get("content"),
                    is_read: row.get("is_read"),
                    read_at: row.get("read_at"),
                    created_at: row.get("created_at"),
                },
                unread_count,
            });
        }

        Ok(Paged::new(items, total, page))
    }

    /// Fetch one page of the conversation between the current user and a
    /// counterpart, messages descending by creation time.
    ///
    /// Read-on-view: every returned message addressed to the current user
    /// and still unread is transitioned to read in a single batch update
    /// before the page is returned. Unread messages outside the fetched
    /// page are untouched.
    pub async fn get_conversation(
        &self,
        current_user_id: i64,
        counterpart_id: i64,
        page: Page,
    ) -> CoreResult<ConversationPage> {
        let counterpart = sqlx::query("SELECT 1 FROM user_account WHERE id = ?1")
            .bind(counterpart_id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::Database)?;
        if counterpart.is_none() {
            return Err(CoreError::NotFound("User not found".to_string()));
        }

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM message
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)",
        )
        .bind(current_user_id)
        .bind(counterpart_id)
        .fetch_one(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let mut messages = sqlx::query_as::<_, Message>(
            "SELECT id, sender_id, recipient_id, content, is_read, read_at, created_at
             FROM message
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3 OFFSET ?4",
        )
        .bind(current_user_id)
        .bind(counterpart_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let unread_ids: Vec<i64> = messages
            .iter()
            .filter(|m| m.recipient_id == current_user_id && !m.is_read)
            .map(|m| m.id)
            .collect();

        if !unread_ids.is_empty() {
            let now = Utc::now();

            // One transaction for the whole page; a crash cannot leave it
            // partially marked
            let mut tx = self.db.begin().await.map_err(CoreError::Database)?;

            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("UPDATE message SET is_read = 1, read_at = ");
            builder.push_bind(now);
            builder.push(" WHERE is_read = 0 AND id IN (");
            let mut separated = builder.separated(", ");
            for id in &unread_ids {
                separated.push_bind(id);
            }
            builder.push(")");

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(CoreError::Database)?;

            tx.commit().await.map_err(CoreError::Database)?;

            for message in messages.iter_mut() {
                if unread_ids.contains(&message.id) {
                    message.is_read = true;
                    message.read_at = Some(now);
                }
            }
        }

        Ok(ConversationPage {
            messages,
            total,
            page: page.number,
            page_size: page.size,
        })
    }

    /// Mark a single message as read. Only the recipient may mark;
    /// marking an already-read message is a no-op success and leaves the
    /// original `read_at` untouched.
    pub async fn mark_as_read(&self, message_id: i64, current_user_id: i64) -> CoreResult<()> {
        let row = sqlx::query("SELECT recipient_id, is_read FROM message WHERE id = ?1")
            .bind(message_id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::Database)?
            .ok_or_else(|| CoreError::NotFound("Message not found".to_string()))?;

        let recipient_id: i64 = row.get("recipient_id");
        if recipient_id != current_user_id {
            return Err(CoreError::Forbidden(
                "Only the recipient may mark a message as read".to_string(),
            ));
        }

        let is_read: bool = row.get("is_read");
        if !is_read {
            sqlx::query(
                "UPDATE message SET is_read = 1, read_at = ?1 WHERE id = ?2 AND is_read = 0",
            )
            .bind(Utc::now())
            .bind(message_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::Database)?;
        }

        Ok(())
    }

    /// Mark every unread message from `counterpart_id` to the current
    /// user as read. Returns the number of messages affected; zero is a
    /// success.
    pub async fn mark_all_as_read(
        &self,
        current_user_id: i64,
        counterpart_id: i64,
    ) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE message SET is_read = 1, read_at = ?1
             WHERE sender_id = ?2 AND recipient_id = ?3 AND is_read = 0",
        )
        .bind(Utc::now())
        .bind(counterpart_id)
        .bind(current_user_id)
        .execute(&self.db)
        .await
        .map_err(CoreError::Database)?;

        Ok(result.rows_affected())
    }
}
