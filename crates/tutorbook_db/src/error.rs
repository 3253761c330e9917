// --- File: crates/tutorbook_db/src/error.rs ---
//! Error types for the booking store

use thiserror::Error;
use tutorbook_common::{HttpStatusCode, TutorbookError};

/// Errors that can occur when reading or mutating the booking store
#[derive(Debug, Error)]
pub enum DbError {
    /// Error from SQLx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Error with the database configuration
    #[error("Database configuration error: {0}")]
    ConfigError(String),

    /// Error with database URL parsing
    #[error("Database URL error: {0}")]
    UrlError(String),

    /// Error with database pool creation
    #[error("Database pool error: {0}")]
    PoolError(String),

    /// Error with database query
    #[error("Database query error: {0}")]
    QueryError(String),

    /// Error with database transaction
    #[error("Database transaction error: {0}")]
    TransactionError(String),

    /// At least one slot of a reservation was taken, missing or owned by
    /// another tutor. Nothing was changed.
    #[error("Slots unavailable: {}", slot_ids.join(", "))]
    SlotUnavailable { slot_ids: Vec<String> },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Current state forbids the write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into its entity
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl HttpStatusCode for DbError {
    fn status_code(&self) -> u16 {
        match self {
            DbError::SlotUnavailable { .. } | DbError::Conflict(_) => 409,
            DbError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

impl From<DbError> for TutorbookError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::SlotUnavailable { slot_ids } => TutorbookError::SlotUnavailable { slot_ids },
            DbError::NotFound(what) => TutorbookError::NotFoundError(what),
            DbError::Conflict(msg) => TutorbookError::ConflictError(msg),
            DbError::ConfigError(msg) => TutorbookError::ConfigError(msg),
            other => TutorbookError::DatabaseError(other.to_string()),
        }
    }
}
