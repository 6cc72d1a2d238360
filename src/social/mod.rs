/// Social graph store: follow edges, reactions (likes), and comments
///
/// All duplicate checks ride on the table uniqueness constraints: the
/// store attempts the insert and translates a constraint violation into
/// `AlreadyExists`, so concurrent duplicate calls race safely.
use crate::{
    db::models::{Comment, FollowEdge, Reaction, Target, UserAccount},
    db::{Page, Paged},
    error::{map_insert_error, CoreError, CoreResult},
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Maximum accepted length for comment content, in characters
pub const MAX_COMMENT_LEN: usize = 2000;

/// A created comment plus the owner ids the caller needs to decide
/// notification fan-out targets
#[derive(Debug, Clone)]
pub struct CreatedComment {
    pub comment: Comment,
    pub content_owner_id: i64,
    /// Author of the parent comment when this is a reply
    pub parent_author_id: Option<i64>,
}

/// One entry in a followers/following listing
#[derive(Debug, Clone)]
pub struct FollowListEntry {
    pub user: UserAccount,
    pub followed_at: DateTime<Utc>,
}

/// A comment plus its direct reply count
#[derive(Debug, Clone)]
pub struct CommentWithReplies {
    pub comment: Comment,
    pub reply_count: i64,
}

/// Social graph store service
pub struct SocialGraphStore {
    db: SqlitePool,
}

impl SocialGraphStore {
    /// Create a new social graph store
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a follow edge from `follower_id` to `target_id`
    pub async fn follow(&self, follower_id: i64, target_id: i64) -> CoreResult<FollowEdge> {
        if follower_id == target_id {
            return Err(CoreError::Validation(
                "Cannot follow yourself".to_string(),
            ));
        }

        self.require_user(target_id).await?;

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO follow_edge (follower_id, following_id, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(follower_id)
        .bind(target_id)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| map_insert_error(e, "Already following this user"))?;

        tracing::info!(follower_id, target_id, "follow edge created");

        Ok(FollowEdge {
            id: result.last_insert_rowid(),
            follower_id,
            following_id: target_id,
            created_at: now,
        })
    }

    /// Remove the follow edge from `follower_id` to `target_id`
    pub async fn unfollow(&self, follower_id: i64, target_id: i64) -> CoreResult<()> {
        let result =
            sqlx::query("DELETE FROM follow_edge WHERE follower_id = ?1 AND following_id = ?2")
                .bind(follower_id)
                .bind(target_id)
                .execute(&self.db)
                .await
                .map_err(CoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(
                "Not following this user".to_string(),
            ));
        }

        Ok(())
    }

    /// Check whether `follower_id` follows `target_id`
    pub async fn is_following(&self, follower_id: i64, target_id: i64) -> CoreResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM follow_edge WHERE follower_id = ?1 AND following_id = ?2",
        )
        .bind(follower_id)
        .bind(target_id)
        .fetch_optional(&self.db)
        .await
        .map_err(CoreError::Database)?;

        Ok(row.is_some())
    }

    /// List users following `user_id`, most recent first
    pub async fn followers(&self, user_id: i64, page: Page) -> CoreResult<Paged<FollowListEntry>> {
        self.follow_listing(user_id, page, true).await
    }

    /// List users `user_id` follows, most recent first
    pub async fn following(&self, user_id: i64, page: Page) -> CoreResult<Paged<FollowListEntry>> {
        self.follow_listing(user_id, page, false).await
    }

    async fn follow_listing(
        &self,
        user_id: i64,
        page: Page,
        followers: bool,
    ) -> CoreResult<Paged<FollowListEntry>> {
        // Join side flips between the two listings
        let (filter_col, join_col) = if followers {
            ("following_id", "follower_id")
        } else {
            ("follower_id", "following_id")
        };

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM follow_edge WHERE {} = ?1",
            filter_col
        ))
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let rows = sqlx::query(&format!(
            "SELECT u.id, u.display_name, u.email, u.created_at AS user_created_at, f.created_at AS followed_at
             FROM follow_edge f
             JOIN user_account u ON u.id = f.{}
             WHERE f.{} = ?1
             ORDER BY f.created_at DESC, f.id DESC
             LIMIT ?2 OFFSET ?3",
            join_col, filter_col
        ))
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let items = rows
            .into_iter()
            .map(|row| FollowListEntry {
                user: UserAccount {
                    id: row.get("id"),
                    display_name: row.get("display_name"),
                    email: row.get("email"),
                    created_at: row.get("user_created_at"),
                },
                followed_at: row.get("followed_at"),
            })
            .collect();

        Ok(Paged::new(items, total, page))
    }

    /// Add a reaction (like) from `user_id` to a content item
    pub async fn add_reaction(&self, user_id: i64, target: Target) -> CoreResult<Reaction> {
        self.require_content(target).await?;

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO reaction (user_id, target_kind, target_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(target.kind)
        .bind(target.id)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| map_insert_error(e, "Content already liked"))?;

        Ok(Reaction {
            id: result.last_insert_rowid(),
            user_id,
            target_kind: target.kind,
            target_id: target.id,
            created_at: now,
        })
    }

    /// Remove the reaction from `user_id` on a content item
    pub async fn remove_reaction(&self, user_id: i64, target: Target) -> CoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM reaction WHERE user_id = ?1 AND target_kind = ?2 AND target_id = ?3",
        )
        .bind(user_id)
        .bind(target.kind)
        .bind(target.id)
        .execute(&self.db)
        .await
        .map_err(CoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("Like not found".to_string()));
        }

        Ok(())
    }

    /// Check whether `user_id` has reacted to a content item
    pub async fn has_reacted(&self, user_id: i64, target: Target) -> CoreResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM reaction WHERE user_id = ?1 AND target_kind = ?2 AND target_id = ?3",
        )
        .bind(user_id)
        .bind(target.kind)
        .bind(target.id)
        .fetch_optional(&self.db)
        .await
        .map_err(CoreError::Database)?;

        Ok(row.is_some())
    }

    /// List reactions on a content item, most recent first
    pub async fn reactions_for(&self, target: Target, page: Page) -> CoreResult<Paged<Reaction>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reaction WHERE target_kind = ?1 AND target_id = ?2",
        )
        .bind(target.kind)
        .bind(target.id)
        .fetch_one(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let items = sqlx::query_as::<_, Reaction>(
            "SELECT id, user_id, target_kind, target_id, created_at
             FROM reaction
             WHERE target_kind = ?1 AND target_id = ?2
             ORDER BY created_at DESC, id DESC
             LIMIT ?3 OFFSET ?4",
        )
        .bind(target.kind)
        .bind(target.id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await
        .map_err(CoreError::Database)?;

        Ok(Paged::new(items, total, page))
    }

    /// Add a comment (or reply, when `parent_id` is set) to a content item.
    ///
    /// Returns the created comment plus the resolved content-owner id and
    /// parent-comment author id the caller needs for notification fan-out.
    /// A reply's parent must target the same content item.
    pub async fn add_comment(
        &self,
        author_id: i64,
        target: Target,
        parent_id: Option<i64>,
        content: &str,
    ) -> CoreResult<CreatedComment> {
        if content.trim().is_empty() {
            return Err(CoreError::Validation(
                "Comment content is required".to_string(),
            ));
        }
        if content.chars().count() > MAX_COMMENT_LEN {
            return Err(CoreError::Validation(format!(
                "Comment content exceeds {} characters",
                MAX_COMMENT_LEN
            )));
        }

        let content_owner_id = self.require_content(target).await?;

        let parent_author_id = match parent_id {
            Some(parent) => {
                let row = sqlx::query(
                    "SELECT author_id, target_kind, target_id FROM comment WHERE id = ?1",
                )
                .bind(parent)
                .fetch_optional(&self.db)
                .await
                .map_err(CoreError::Database)?
                .ok_or_else(|| CoreError::NotFound("Parent comment not found".to_string()))?;

                let parent_target = Target {
                    kind: row.get("target_kind"),
                    id: row.get("target_id"),
                };
                if parent_target != target {
                    return Err(CoreError::Validation(
                        "Parent comment belongs to a different content item".to_string(),
                    ));
                }

                Some(row.get::<i64, _>("author_id"))
            }
            None => None,
        };

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO comment (author_id, target_kind, target_id, parent_comment_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(author_id)
        .bind(target.kind)
        .bind(target.id)
        .bind(parent_id)
        .bind(content)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(CoreError::Database)?;

        Ok(CreatedComment {
            comment: Comment {
                id: result.last_insert_rowid(),
                author_id,
                target_kind: target.kind,
                target_id: target.id,
                parent_comment_id: parent_id,
                content: content.to_string(),
                created_at: now,
                updated_at: None,
            },
            content_owner_id,
            parent_author_id,
        })
    }

    /// Edit a comment's content; only the author may edit
    pub async fn update_comment(
        &self,
        comment_id: i64,
        requestor_id: i64,
        content: &str,
    ) -> CoreResult<Comment> {
        if content.trim().is_empty() {
            return Err(CoreError::Validation(
                "Comment content is required".to_string(),
            ));
        }

        let mut comment = self.get_comment(comment_id).await?;
        if comment.author_id != requestor_id {
            return Err(CoreError::Forbidden(
                "Only the author may edit a comment".to_string(),
            ));
        }

        let now = Utc::now();
        sqlx::query("UPDATE comment SET content = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(content)
            .bind(now)
            .bind(comment_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::Database)?;

        comment.content = content.to_string();
        comment.updated_at = Some(now);
        Ok(comment)
    }

    /// Delete a comment; only the author may delete. Replies to the
    /// deleted comment survive as top-level comments.
    pub async fn delete_comment(&self, comment_id: i64, requestor_id: i64) -> CoreResult<()> {
        let comment = self.get_comment(comment_id).await?;
        if comment.author_id != requestor_id {
            return Err(CoreError::Forbidden(
                "Only the author may delete a comment".to_string(),
            ));
        }

        sqlx::query("DELETE FROM comment WHERE id = ?1")
            .bind(comment_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::Database)?;

        Ok(())
    }

    /// List comments on a content item at one nesting level, most recent
    /// first, with direct reply counts. `parent_id = None` lists top-level
    /// comments.
    pub async fn comments_for(
        &self,
        target: Target,
        parent_id: Option<i64>,
        page: Page,
    ) -> CoreResult<Paged<CommentWithReplies>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM comment
             WHERE target_kind = ?1 AND target_id = ?2 AND parent_comment_id IS ?3",
        )
        .bind(target.kind)
        .bind(target.id)
        .bind(parent_id)
        .fetch_one(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let rows = sqlx::query(
            "SELECT c.id, c.author_id, c.target_kind, c.target_id, c.parent_comment_id,
                    c.content, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM comment r WHERE r.parent_comment_id = c.id) AS reply_count
             FROM comment c
             WHERE c.target_kind = ?1 AND c.target_id = ?2 AND c.parent_comment_id IS ?3
             ORDER BY c.created_at DESC, c.id DESC
             LIMIT ?4 OFFSET ?5",
        )
        .bind(target.kind)
        .bind(target.id)
        .bind(parent_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await
        .map_err(CoreError::Database)?;

        let items = rows
            .into_iter()
            .map(|row| CommentWithReplies {
                comment: Comment {
                    id: row.get("id"),
                    author_id: row.get("author_id"),
                    target_kind: row.get("target_kind"),
                    target_id: row.get("target_id"),
                    parent_comment_id: row.get("parent_comment_id"),
                    content: row.get("content"),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                },
                reply_count: row.get("reply_count"),
            })
            .collect();

        Ok(Paged::new(items, total, page))
    }

    /// Fetch a comment by id
    pub async fn get_comment(&self, comment_id: i64) -> CoreResult<Comment> {
        sqlx::query_as::<_, Comment>(
            "SELECT id, author_id, target_kind, target_id, parent_comment_id, content, created_at, updated_at
             FROM comment WHERE id = ?1",
        )
        .bind(comment_id)
        .fetch_optional(&self.db)
        .await
        .map_err(CoreError::Database)?
        .ok_or_else(|| CoreError::NotFound("Comment not found".to_string()))
    }

    /// Resolve the owner of a content item, failing if it does not exist
    async fn require_content(&self, target: Target) -> CoreResult<i64> {
        let row = sqlx::query("SELECT owner_id FROM content_item WHERE id = ?1 AND kind = ?2")
            .bind(target.id)
            .bind(target.kind)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::Database)?
            .ok_or_else(|| {
                CoreError::NotFound(format!("{} {} not found", target.kind, target.id))
            })?;

        Ok(row.get("owner_id"))
    }

    async fn require_user(&self, user_id: i64) -> CoreResult<()> {
        let row = sqlx::query("SELECT 1 FROM user_account WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::Database)?;

        if row.is_none() {
            return Err(CoreError::NotFound("User not found".to_string()));
        }

        Ok(())
    }
}
