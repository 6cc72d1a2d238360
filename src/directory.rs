/// User directory lookups
///
/// The fan-out engine and notification builders only ever need plain
/// id/name/email lookups from the identity side, so that boundary is a
/// small trait.
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

/// Identity collaborator seam
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Email address on file for a user, if any
    async fn email_address(&self, user_id: i64) -> CoreResult<Option<String>>;

    /// Display name for a user, if the user exists
    async fn display_name(&self, user_id: i64) -> CoreResult<Option<String>>;
}

/// Directory backed by the user_account table
pub struct SqlUserDirectory {
    db: SqlitePool,
}

impl SqlUserDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn email_address(&self, user_id: i64) -> CoreResult<Option<String>> {
        let row = sqlx::query("SELECT email FROM user_account WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::Database)?;

        Ok(row.and_then(|r| r.get("email")))
    }

    async fn display_name(&self, user_id: i64) -> CoreResult<Option<String>> {
        let row = sqlx::query("SELECT display_name FROM user_account WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::Database)?;

        Ok(row.map(|r| r.get("display_name")))
    }
}
