// --- File: crates/tutorbook_db/src/repositories/booking_store.rs ---
//! Storage contract for slots, bookings and their side records.
//!
//! Every method that changes lifecycle state is a check-and-set: it applies
//! only when the row is still in the expected predecessor state and reports
//! whether it did. Implementations must run each of these as one
//! transaction or critical section.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tutorbook_common::models::{
    Booking, EmailKind, EmailRecord, Notification, PaymentRecord, PaymentStatus, Slot, SlotQuery,
    Tutor,
};

use crate::error::DbError;

/// Terminal write applied when a booking is cancelled or refunded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationSettlement {
    pub booking_id: String,
    /// Status read before the gateway was consulted; the write is skipped
    /// when the row moved on in the meantime.
    pub expected_status: PaymentStatus,
    pub new_status: PaymentStatus,
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: String,
    pub reason: Option<String>,
    /// Records `confirmed_by_tutor = false`.
    pub tutor_declined: bool,
    /// Frees the slots still held by this booking.
    pub release_slots: bool,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Creates tables when missing. Safe to call on every start.
    async fn init_schema(&self) -> Result<(), DbError>;

    async fn is_healthy(&self) -> bool;

    /// Short backend name for logs and the health check.
    fn backend(&self) -> &'static str;

    // --- Tutors ---

    async fn upsert_tutor(&self, tutor: &Tutor) -> Result<Tutor, DbError>;

    async fn find_tutor(&self, tutor_id: &str) -> Result<Option<Tutor>, DbError>;

    // --- Slots ---

    /// Inserts a free slot. Fails with `Conflict` when the id exists.
    async fn publish_slot(&self, slot: &Slot) -> Result<Slot, DbError>;

    /// Deletes a free slot. A booked slot is a `Conflict`, an unknown one `NotFound`.
    async fn retract_slot(&self, slot_id: &str) -> Result<(), DbError>;

    /// Returns the known slots among `slot_ids`, in no particular order.
    async fn find_slots(&self, slot_ids: &[String]) -> Result<Vec<Slot>, DbError>;

    /// Free slots matching the query, ordered by start time.
    async fn list_free_slots(&self, query: &SlotQuery) -> Result<Vec<Slot>, DbError>;

    /// All-or-nothing: marks every slot booked by `holder_booking_id` iff each
    /// exists, belongs to `tutor_id` and is free. Otherwise nothing changes and
    /// `SlotUnavailable` names the offending ids.
    async fn reserve_slots(
        &self,
        slot_ids: &[String],
        tutor_id: &str,
        holder_booking_id: &str,
    ) -> Result<(), DbError>;

    /// Frees the slots. Releasing a free slot is a no-op. Returns how many
    /// slots changed.
    async fn release_slots(&self, slot_ids: &[String]) -> Result<u64, DbError>;

    /// Frees a booked slot unless a pending or paid booking holds it.
    /// Returns whether the slot changed.
    async fn release_unheld_slot(&self, slot_id: &str) -> Result<bool, DbError>;

    // --- Bookings ---

    /// Reserves the booking's slots, inserts the pending booking and the
    /// tutor's notification, all or nothing.
    async fn create_booking(
        &self,
        booking: &Booking,
        notification: &Notification,
    ) -> Result<(), DbError>;

    async fn find_booking(&self, booking_id: &str) -> Result<Option<Booking>, DbError>;

    /// Pending bookings created strictly before `cutoff`, oldest first.
    async fn list_pending_bookings_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, DbError>;

    /// Stores the intent id on a pending booking whose current intent id is
    /// `expected` (`None` when no intent was attached yet).
    async fn attach_payment_intent(
        &self,
        booking_id: &str,
        expected: Option<&str>,
        intent_id: &str,
    ) -> Result<bool, DbError>;

    /// `pending -> paid`, recording the succeeded intent.
    async fn mark_paid(
        &self,
        booking_id: &str,
        intent_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Sets `confirmed_by_tutor = true` on a paid booking with no response yet
    /// and marks its notifications read.
    async fn mark_tutor_confirmed(
        &self,
        booking_id: &str,
        responded_at: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Applies the settlement when the booking is still in `expected_status`.
    /// Also marks the booking's notifications read.
    async fn settle_cancellation(
        &self,
        settlement: &CancellationSettlement,
    ) -> Result<bool, DbError>;

    /// Replaces the total of a pending booking that has no intent yet.
    async fn override_total_price(
        &self,
        booking_id: &str,
        total_price: i64,
        reason: &str,
    ) -> Result<bool, DbError>;

    // --- Pricing ---

    async fn current_lesson_price(&self) -> Result<Option<i64>, DbError>;

    async fn set_lesson_price(&self, amount: i64) -> Result<(), DbError>;

    // --- Notifications ---

    async fn insert_notification(&self, notification: &Notification) -> Result<(), DbError>;

    async fn find_notification(
        &self,
        notification_id: &str,
    ) -> Result<Option<Notification>, DbError>;

    /// Newest first.
    async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>, DbError>;

    /// `unread -> read`. Returns false when it was already read.
    async fn mark_notification_read(&self, notification_id: &str) -> Result<bool, DbError>;

    // --- Payment audit ---

    /// Inserts or updates the record keyed by its gateway payment id.
    async fn record_payment(&self, record: &PaymentRecord) -> Result<(), DbError>;

    async fn find_payment(&self, gateway_payment_id: &str)
        -> Result<Option<PaymentRecord>, DbError>;

    /// Oldest first.
    async fn list_payments(&self, booking_id: &str) -> Result<Vec<PaymentRecord>, DbError>;

    // --- Exactly-once email guard ---

    /// Inserts a `sending` row for `(booking_id, kind)`. Returns false when
    /// one already exists, whatever its status.
    async fn claim_email(
        &self,
        booking_id: &str,
        kind: EmailKind,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    async fn complete_email(
        &self,
        booking_id: &str,
        kind: EmailKind,
        message_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Drops a `sending` claim so the email can be attempted again.
    async fn release_email(&self, booking_id: &str, kind: EmailKind) -> Result<(), DbError>;

    async fn find_email(
        &self,
        booking_id: &str,
        kind: EmailKind,
    ) -> Result<Option<EmailRecord>, DbError>;
}
