// --- File: crates/tutorbook_booking/src/error.rs ---
use thiserror::Error;
use tutorbook_common::models::BookingStage;
use tutorbook_common::{GatewayError, HttpStatusCode, TutorbookError};
use tutorbook_db::DbError;

/// Errors raised by the booking workflow.
#[derive(Error, Debug)]
pub enum BookingError {
    /// Rejected before any mutation
    #[error("{0}")]
    Validation(String),

    /// Some of the requested slots are taken, unknown or belong to another tutor
    #[error("slots no longer available: {}", slot_ids.join(", "))]
    SlotUnavailable { slot_ids: Vec<String> },

    /// The booking's current stage does not allow the action
    #[error("booking {booking_id} is {stage:?} and cannot be {action}")]
    InvalidTransition {
        booking_id: String,
        stage: BookingStage,
        action: &'static str,
    },

    /// Other state conflicts, e.g. a notification that was already answered
    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The gateway failed; the booking was left as it was
    #[error("payment provider: {0}")]
    PaymentProvider(#[from] GatewayError),

    /// A requested email could not be sent
    #[error("{0}")]
    Delivery(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Config(String),

    #[error("storage: {0}")]
    Store(DbError),
}

impl From<DbError> for BookingError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::SlotUnavailable { slot_ids } => BookingError::SlotUnavailable { slot_ids },
            DbError::NotFound(what) => BookingError::NotFound(what),
            DbError::Conflict(msg) => BookingError::Conflict(msg),
            other => BookingError::Store(other),
        }
    }
}

impl HttpStatusCode for BookingError {
    fn status_code(&self) -> u16 {
        match self {
            BookingError::Validation(_) => 400,
            BookingError::SlotUnavailable { .. } => 409,
            BookingError::InvalidTransition { .. } => 409,
            BookingError::Conflict(_) => 409,
            BookingError::NotFound(_) => 404,
            BookingError::PaymentProvider(_) => 502,
            BookingError::Delivery(_) => 502,
            BookingError::Unauthorized(_) => 401,
            BookingError::Config(_) => 500,
            BookingError::Store(e) => e.status_code(),
        }
    }
}

impl From<BookingError> for TutorbookError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(msg) => TutorbookError::ValidationError(msg),
            BookingError::SlotUnavailable { slot_ids } => TutorbookError::SlotUnavailable { slot_ids },
            e @ BookingError::InvalidTransition { .. } => TutorbookError::ConflictError(e.to_string()),
            BookingError::Conflict(msg) => TutorbookError::ConflictError(msg),
            BookingError::NotFound(what) => TutorbookError::NotFoundError(format!("{} not found", what)),
            BookingError::PaymentProvider(e) => e.into(),
            BookingError::Delivery(msg) => TutorbookError::NotificationDeliveryError(msg),
            BookingError::Unauthorized(msg) => TutorbookError::AuthError(msg),
            BookingError::Config(msg) => TutorbookError::ConfigError(msg),
            BookingError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_keep_their_category() {
        let err: BookingError = DbError::SlotUnavailable {
            slot_ids: vec!["s1".into()],
        }
        .into();
        assert!(matches!(err, BookingError::SlotUnavailable { .. }));
        assert_eq!(TutorbookError::from(err).kind(), "slot_unavailable");
    }

    #[test]
    fn illegal_transition_is_a_409_conflict() {
        let err = BookingError::InvalidTransition {
            booking_id: "b1".into(),
            stage: BookingStage::Refunded,
            action: "confirmed",
        };
        assert_eq!(err.status_code(), 409);
        assert_eq!(TutorbookError::from(err).kind(), "conflict");
    }

    #[test]
    fn gateway_failures_are_payment_provider_errors() {
        let err = BookingError::from(GatewayError::Transport("reset".into()));
        assert_eq!(err.status_code(), 502);
        assert_eq!(TutorbookError::from(err).kind(), "payment_provider");
    }
}
