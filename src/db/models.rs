/// Row models for the social graph, messaging, and notification tables
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// A registered user, referenced by id from every other table.
/// Relationships are resolved via explicit queries, never navigation
/// collections.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub display_name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The kind of content item a reaction or comment attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TargetKind {
    Video,
    Photo,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Video => "video",
            TargetKind::Photo => "photo",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged reference to one content item. Replaces the dual-nullable
/// video-id/photo-id pair: exactly one target is expressible by
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub kind: TargetKind,
    pub id: i64,
}

impl Target {
    pub fn video(id: i64) -> Self {
        Self {
            kind: TargetKind::Video,
            id,
        }
    }

    pub fn photo(id: i64) -> Self {
        Self {
            kind: TargetKind::Photo,
            id,
        }
    }
}

/// A video or photo row; reactions and comments reference it by (kind, id)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub kind: TargetKind,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A follow edge; unique per (follower, following) pair
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FollowEdge {
    pub id: i64,
    pub follower_id: i64,
    pub following_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A like; unique per (user, target kind, target id)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Reaction {
    pub id: i64,
    pub user_id: i64,
    pub target_kind: TargetKind,
    pub target_id: i64,
    pub created_at: DateTime<Utc>,
}

impl Reaction {
    pub fn target(&self) -> Target {
        Target {
            kind: self.target_kind,
            id: self.target_id,
        }
    }
}

/// A comment on a content item; `parent_comment_id` forms a reply tree
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub author_id: i64,
    pub target_kind: TargetKind,
    pub target_id: i64,
    pub parent_comment_id: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Null until the first edit
    pub updated_at: Option<DateTime<Utc>>,
}

/// A direct message. Immutable except for the read-state pair, which only
/// the recipient may mutate, and only false -> true.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Notification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum NotificationKind {
    Follow,
    Like,
    Comment,
    Reply,
    Message,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Follow => "follow",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Reply => "reply",
            NotificationKind::Message => "message",
            NotificationKind::System => "system",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored notification. Lifecycle is independent of the social action
/// that spawned it; deleting the original like or comment does not
/// retract the notification.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Absent for system notifications
    pub sender_id: Option<i64>,
    pub redirect_path: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Mobile platform family for device registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(CoreError::Validation(format!(
                "Platform must be 'ios' or 'android', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
