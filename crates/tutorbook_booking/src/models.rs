// --- File: crates/tutorbook_booking/src/models.rs ---
//! Request and response bodies of the booking API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tutorbook_common::models::{Booking, PaymentStatus};
use tutorbook_notify::DeliveryOutcome;

#[cfg(feature = "openapi")]
use utoipa::{IntoParams, ToSchema};

use crate::context::Actor;

// --- Booking creation ---

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub slot_ids: Vec<String>,
    #[serde(default)]
    pub tutor_id: Option<String>,
    pub payer_name: String,
    pub payer_email: String,
    #[serde(default)]
    pub payer_phone: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub lesson_category: Option<String>,
}

/// Result of one email attempted as a side effect of an operation.
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EmailDelivery {
    pub email: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub outcome: DeliveryOutcome,
}

impl EmailDelivery {
    pub fn new(email: impl Into<String>, outcome: DeliveryOutcome) -> Self {
        Self {
            email: email.into(),
            outcome,
        }
    }
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingResponse {
    pub booking: Booking,
    pub notifications: Vec<EmailDelivery>,
}

// --- Payment ---

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentRequest {
    pub booking_id: String,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub booking_id: String,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
}

/// What reconciling a succeeded intent did to the booking.
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// `pending -> paid`
    Paid,
    /// Same intent seen again
    AlreadyPaid,
    /// A second succeeded intent was refunded
    DuplicateRefunded,
    /// Payment landed after the booking was cancelled and was refunded
    LateRefunded,
    AlreadySettled,
    /// The intent has not succeeded; nothing changed
    NotSucceeded,
    /// The intent belongs to another booking; nothing changed
    Mismatched,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub booking_id: String,
    /// Gateway status of the intent, `not_found` when none was located.
    pub status: String,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ReconcileOutcome>,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Reconciled(ReconcileOutcome),
    Logged,
    Ignored,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

// --- Tutor response and cancellation ---

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBookingRequest {
    pub booking_id: String,
    #[serde(default = "Actor::tutor")]
    pub confirmed_by: Actor,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBookingResponse {
    pub success: bool,
    pub booking: Booking,
    pub notification: Option<EmailDelivery>,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingRequest {
    pub booking_id: String,
    pub cancelled_by: Actor,
    #[serde(default)]
    pub reason: Option<String>,
}

pub const REFUND_STATUS_NONE: &str = "none";

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingResponse {
    pub success: bool,
    pub booking_id: String,
    pub payment_status: PaymentStatus,
    pub refund_amount: Option<i64>,
    /// Gateway refund status or `none`.
    pub refund_status: String,
    pub payment_intent_id: Option<String>,
    /// True when the booking had already been settled before this call.
    pub already_settled: bool,
    pub notifications: Vec<EmailDelivery>,
}

// --- Emails on demand ---

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendInvoiceRequest {
    pub booking_id: String,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationRecipient {
    #[serde(alias = "payer")]
    Student,
    Tutor,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBookingNotificationRequest {
    pub booking_id: String,
    #[serde(rename = "type")]
    pub recipient: NotificationRecipient,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailResponse {
    pub success: bool,
    pub message_id: Option<String>,
}

// --- In-app notifications ---

#[cfg_attr(feature = "openapi", derive(ToSchema, IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsQuery {
    pub user_id: String,
    #[serde(default)]
    pub unread_only: bool,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub accept: bool,
    #[serde(default = "Actor::tutor")]
    pub responded_by: Actor,
}

/// Answer to a notification that points at a single slot instead of a booking.
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlotResponseResult {
    pub success: bool,
    pub notification_id: String,
    pub slot_id: Option<String>,
    pub accepted: bool,
    pub slot_released: bool,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RespondResponse {
    Confirmed(ConfirmBookingResponse),
    Cancelled(CancelBookingResponse),
    Slot(SlotResponseResult),
}

// --- Dev and admin ---

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatePaymentRequest {
    pub payment_intent_id: String,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SimulatePaymentResponse {
    pub payment_intent_id: String,
    pub status: String,
    pub reconciliation: Option<ReconcileOutcome>,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPriceRequest {
    pub amount: i64,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LessonPriceResponse {
    pub amount: i64,
    pub currency: String,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceOverrideRequest {
    pub total_price: i64,
    pub reason: String,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExpireResponse {
    pub expired: usize,
    pub reconciled: usize,
    pub failed: usize,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlotWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishSlotsRequest {
    pub slots: Vec<SlotWindow>,
}

#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}
