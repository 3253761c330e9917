// --- File: crates/tutorbook_common/src/models.rs ---
//! Typed entities of the booking workflow.
//!
//! Money is always an `i64` amount of minor units (cents) next to a
//! lowercase ISO currency code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tutor {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// One bookable time unit owned by a tutor.
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    pub tutor_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub booked: bool,
    /// Booking currently holding the slot, `None` while free.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
}

impl Slot {
    pub fn new(
        id: impl Into<String>,
        tutor_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            tutor_id: tutor_id.into(),
            start_time,
            end_time,
            booked: false,
            booking_id: None,
        }
    }
}

/// Filter for free-slot listings. An empty tutor set means every tutor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotQuery {
    pub tutor_ids: Vec<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(format!("unknown payment status '{other}'")),
        }
    }
}

/// Lifecycle stage derived from payment status and the tutor flag.
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStage {
    Pending,
    Paid,
    TutorConfirmed,
    Refunded,
    Cancelled,
}

impl BookingStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStage::TutorConfirmed | BookingStage::Refunded | BookingStage::Cancelled
        )
    }
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayerContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub tutor_id: String,
    pub slot_ids: Vec<String>,
    pub payer: PayerContact,
    pub topic: Option<String>,
    pub lesson_category: String,
    /// Per-lesson price captured when the booking was created.
    pub lesson_price: i64,
    pub total_price: i64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub confirmed_by_tutor: Option<bool>,
    pub payment_intent_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub tutor_responded_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub price_override_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn stage(&self) -> BookingStage {
        match self.payment_status {
            PaymentStatus::Pending => BookingStage::Pending,
            PaymentStatus::Paid if self.confirmed_by_tutor == Some(true) => {
                BookingStage::TutorConfirmed
            }
            PaymentStatus::Paid => BookingStage::Paid,
            PaymentStatus::Refunded => BookingStage::Refunded,
            PaymentStatus::Cancelled => BookingStage::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage().is_terminal()
    }
}

/// In-app notification addressed to a tutor.
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub read: bool,
    pub booking_id: Option<String>,
    /// Older single-slot requests point at a slot instead of a booking.
    pub slot_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRecordStatus {
    Succeeded,
    Refunded,
    DuplicateRefunded,
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Succeeded => "succeeded",
            PaymentRecordStatus::Refunded => "refunded",
            PaymentRecordStatus::DuplicateRefunded => "duplicate_refunded",
        }
    }
}

impl FromStr for PaymentRecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(PaymentRecordStatus::Succeeded),
            "refunded" => Ok(PaymentRecordStatus::Refunded),
            "duplicate_refunded" => Ok(PaymentRecordStatus::DuplicateRefunded),
            other => Err(format!("unknown payment record status '{other}'")),
        }
    }
}

/// Audit trail of money movements. The gateway stays authoritative.
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: String,
    pub booking_id: String,
    pub gateway_payment_id: String,
    pub refund_id: Option<String>,
    pub amount: i64,
    pub refunded_amount: Option<i64>,
    pub currency: String,
    pub status: PaymentRecordStatus,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outbound emails guarded so each is sent at most once per booking.
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    PaymentConfirmedPayer,
    PaymentConfirmedTutor,
    TutorAccepted,
    CancellationPayer,
    CancellationTutor,
}

impl EmailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailKind::PaymentConfirmedPayer => "payment_confirmed_payer",
            EmailKind::PaymentConfirmedTutor => "payment_confirmed_tutor",
            EmailKind::TutorAccepted => "tutor_accepted",
            EmailKind::CancellationPayer => "cancellation_payer",
            EmailKind::CancellationTutor => "cancellation_tutor",
        }
    }
}

impl FromStr for EmailKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment_confirmed_payer" => Ok(EmailKind::PaymentConfirmedPayer),
            "payment_confirmed_tutor" => Ok(EmailKind::PaymentConfirmedTutor),
            "tutor_accepted" => Ok(EmailKind::TutorAccepted),
            "cancellation_payer" => Ok(EmailKind::CancellationPayer),
            "cancellation_tutor" => Ok(EmailKind::CancellationTutor),
            other => Err(format!("unknown email kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailStatus {
    Sending,
    Sent,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Sending => "sending",
            EmailStatus::Sent => "sent",
        }
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sending" => Ok(EmailStatus::Sending),
            "sent" => Ok(EmailStatus::Sent),
            other => Err(format!("unknown email status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecord {
    pub booking_id: String,
    pub kind: EmailKind,
    pub status: EmailStatus,
    pub message_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}
