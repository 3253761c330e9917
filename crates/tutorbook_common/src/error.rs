// --- File: crates/tutorbook_common/src/error.rs ---
use thiserror::Error;

/// The base error type shared by every Tutorbook crate.
///
/// Crate-specific errors convert into this with `From`, which is what the
/// HTTP layer renders. The variants follow the booking workflow's error
/// taxonomy: validation, conflict (with the slot-unavailable special case),
/// payment provider, notification delivery and not-found are distinct.
#[derive(Error, Debug)]
pub enum TutorbookError {
    /// Input rejected before any mutation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// One or more requested slots are no longer free
    #[error("Slot unavailable: {}", slot_ids.join(", "))]
    SlotUnavailable { slot_ids: Vec<String> },

    /// State does not allow the requested transition
    #[error("Conflict: {0}")]
    ConflictError(String),

    /// The payment gateway rejected or failed a call
    #[error("Payment provider error: {0}")]
    PaymentProviderError(String),

    /// An outbound email could not be delivered
    #[error("Notification delivery error: {0}")]
    NotificationDeliveryError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Failed to parse data: {0}")]
    ParseError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// A trait for converting errors to HTTP status codes.
pub trait HttpStatusCode {
    /// Returns the HTTP status code for this error.
    fn status_code(&self) -> u16;
}

impl HttpStatusCode for TutorbookError {
    fn status_code(&self) -> u16 {
        match self {
            TutorbookError::ValidationError(_) => 400,
            TutorbookError::SlotUnavailable { .. } => 409,
            TutorbookError::ConflictError(_) => 409,
            TutorbookError::PaymentProviderError(_) => 502,
            TutorbookError::NotificationDeliveryError(_) => 502,
            TutorbookError::NotFoundError(_) => 404,
            TutorbookError::AuthError(_) => 401,
            TutorbookError::ConfigError(_) => 500,
            TutorbookError::DatabaseError(_) => 500,
            TutorbookError::ParseError(_) => 400,
            TutorbookError::TimeoutError(_) => 504,
            TutorbookError::InternalError(_) => 500,
        }
    }
}

impl TutorbookError {
    /// Stable machine-readable category, rendered as `kind` in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            TutorbookError::ValidationError(_) => "validation",
            TutorbookError::SlotUnavailable { .. } => "slot_unavailable",
            TutorbookError::ConflictError(_) => "conflict",
            TutorbookError::PaymentProviderError(_) => "payment_provider",
            TutorbookError::NotificationDeliveryError(_) => "notification_delivery",
            TutorbookError::NotFoundError(_) => "not_found",
            TutorbookError::AuthError(_) => "unauthorized",
            TutorbookError::ConfigError(_) => "config",
            TutorbookError::DatabaseError(_) => "database",
            TutorbookError::ParseError(_) => "validation",
            TutorbookError::TimeoutError(_) => "timeout",
            TutorbookError::InternalError(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for TutorbookError {
    fn from(err: serde_json::Error) -> Self {
        TutorbookError::ParseError(err.to_string())
    }
}

impl From<std::io::Error> for TutorbookError {
    fn from(err: std::io::Error) -> Self {
        TutorbookError::InternalError(err.to_string())
    }
}
