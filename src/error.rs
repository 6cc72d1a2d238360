/// Unified error types for the Castline core
use thiserror::Error;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed input (empty content, bad target, unknown platform)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (duplicate follow, duplicate reaction)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Ownership or authorization check failed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// An external delivery channel (push, email, queue) failed
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// No caller identity was resolved; checked by callers, not the core
    #[error("Not authenticated")]
    Unauthenticated,

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Translate an insert failure, surfacing the store's uniqueness
/// constraint as `AlreadyExists`. The insert itself is the duplicate
/// check; concurrent callers race and the constraint arbitrates.
pub(crate) fn map_insert_error(err: sqlx::Error, what: &str) -> CoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return CoreError::AlreadyExists(what.to_string());
        }
    }
    CoreError::Database(err)
}
