// --- File: crates/tutorbook_common/src/services.rs ---
//! Service abstractions for external collaborators.
//!
//! The booking workflow only talks to the payment provider and the mail
//! transport through these traits, so the orchestrator can be exercised
//! against the simulated gateway and a recording transport.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::error::{HttpStatusCode, TutorbookError};

/// Type alias for a boxed future that returns a Result
pub type BoxFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Metadata key linking gateway objects back to a booking.
pub const BOOKING_ID_METADATA_KEY: &str = "booking_id";

pub const INTENT_STATUS_SUCCEEDED: &str = "succeeded";
pub const INTENT_STATUS_CANCELED: &str = "canceled";

// --- Payment gateway ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub amount_received: Option<i64>,
    pub currency: String,
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == INTENT_STATUS_SUCCEEDED
    }

    pub fn is_canceled(&self) -> bool {
        self.status == INTENT_STATUS_CANCELED
    }

    pub fn booking_id(&self) -> Option<&str> {
        self.metadata.get(BOOKING_ID_METADATA_KEY).map(String::as_str)
    }

    /// Amount actually captured, falling back to the requested amount.
    pub fn captured_amount(&self) -> i64 {
        self.amount_received.unwrap_or(self.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIntentRequest {
    pub booking_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub receipt_email: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundReason {
    Duplicate,
    Fraudulent,
    RequestedByCustomer,
}

impl RefundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundReason::Duplicate => "duplicate",
            RefundReason::Fraudulent => "fraudulent",
            RefundReason::RequestedByCustomer => "requested_by_customer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub intent_id: String,
    /// `None` refunds the full captured amount.
    pub amount: Option<i64>,
    pub reason: RefundReason,
    pub metadata: HashMap<String, String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub payment_intent_id: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payment provider returned {status_code}: {message}")]
    Api { status_code: u16, message: String },

    #[error("payment provider unreachable: {0}")]
    Transport(String),

    #[error("payment provider not configured: {0}")]
    NotConfigured(String),

    #[error("unexpected payment provider response: {0}")]
    InvalidResponse(String),
}

impl HttpStatusCode for GatewayError {
    fn status_code(&self) -> u16 {
        502
    }
}

impl From<GatewayError> for TutorbookError {
    fn from(err: GatewayError) -> Self {
        TutorbookError::PaymentProviderError(err.to_string())
    }
}

/// Payment provider operations used by the booking workflow.
///
/// Every intent and refund created through this trait carries the booking id
/// in its metadata so it can be found again by search.
pub trait PaymentGateway: Send + Sync {
    fn create_intent(&self, request: CreateIntentRequest) -> BoxFuture<'_, PaymentIntent, GatewayError>;

    fn retrieve_intent(&self, intent_id: &str) -> BoxFuture<'_, PaymentIntent, GatewayError>;

    /// Fallback lookup when no intent id was persisted or it is inconsistent.
    fn search_succeeded_intent_by_booking_id(
        &self,
        booking_id: &str,
    ) -> BoxFuture<'_, Option<PaymentIntent>, GatewayError>;

    fn refund(&self, request: RefundRequest) -> BoxFuture<'_, Refund, GatewayError>;

    fn cancel_intent(&self, intent_id: &str) -> BoxFuture<'_, PaymentIntent, GatewayError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

// --- Mail transport ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailReceipt {
    pub message_id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("invalid email address '{0}'")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("mail transport not configured: {0}")]
    NotConfigured(String),
}

impl MailError {
    /// Only transport failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, MailError::Transport(_))
    }
}

impl From<MailError> for TutorbookError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::InvalidAddress(_) => TutorbookError::ValidationError(err.to_string()),
            _ => TutorbookError::NotificationDeliveryError(err.to_string()),
        }
    }
}

pub trait MailTransport: Send + Sync {
    fn send(&self, email: OutboundEmail) -> BoxFuture<'_, MailReceipt, MailError>;

    fn name(&self) -> &'static str;
}
