// --- File: crates/tutorbook_db/src/repositories/memory.rs ---
//! In-memory booking store used when `use_database` is off and in tests.
//!
//! One `tokio::sync::Mutex` guards the whole state, so every method is a
//! single critical section.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};
use tutorbook_common::models::{
    Booking, EmailKind, EmailRecord, EmailStatus, Notification, PaymentRecord, PaymentStatus,
    Slot, SlotQuery, Tutor,
};

use crate::error::DbError;
use crate::repositories::booking_store::{BookingStore, CancellationSettlement};

#[derive(Debug, Default)]
struct StoreState {
    tutors: HashMap<String, Tutor>,
    slots: HashMap<String, Slot>,
    bookings: HashMap<String, Booking>,
    notifications: HashMap<String, Notification>,
    /// Keyed by gateway payment id.
    payments: HashMap<String, PaymentRecord>,
    emails: HashMap<(String, EmailKind), EmailRecord>,
    lesson_price: Option<i64>,
}

impl StoreState {
    fn reserve(
        &mut self,
        slot_ids: &[String],
        tutor_id: &str,
        holder_booking_id: &str,
    ) -> Result<(), DbError> {
        let wanted = unique_ids(slot_ids);
        let offending: Vec<String> = wanted
            .iter()
            .filter(|id| match self.slots.get(id.as_str()) {
                Some(slot) => slot.booked || slot.tutor_id != tutor_id,
                None => true,
            })
            .cloned()
            .collect();
        if !offending.is_empty() {
            return Err(DbError::SlotUnavailable { slot_ids: offending });
        }

        for id in &wanted {
            if let Some(slot) = self.slots.get_mut(id) {
                slot.booked = true;
                slot.booking_id = Some(holder_booking_id.to_string());
            }
        }
        Ok(())
    }

    fn mark_booking_notifications_read(&mut self, booking_id: &str) {
        for notification in self.notifications.values_mut() {
            if notification.booking_id.as_deref() == Some(booking_id) {
                notification.read = true;
            }
        }
    }
}

fn unique_ids(slot_ids: &[String]) -> Vec<String> {
    let mut ids = slot_ids.to_vec();
    ids.sort();
    ids.dedup();
    ids
}

#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    state: Mutex<StoreState>,
    fail_payment_writes: AtomicBool,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `record_payment` fail until switched back, to rehearse a lost
    /// audit write.
    pub fn set_payment_writes_failing(&self, failing: bool) {
        self.fail_payment_writes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn init_schema(&self) -> Result<(), DbError> {
        info!("[Store] Using in-memory booking store");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert_tutor(&self, tutor: &Tutor) -> Result<Tutor, DbError> {
        let mut state = self.state.lock().await;
        state.tutors.insert(tutor.id.clone(), tutor.clone());
        Ok(tutor.clone())
    }

    async fn find_tutor(&self, tutor_id: &str) -> Result<Option<Tutor>, DbError> {
        Ok(self.state.lock().await.tutors.get(tutor_id).cloned())
    }

    async fn publish_slot(&self, slot: &Slot) -> Result<Slot, DbError> {
        let mut state = self.state.lock().await;
        match state.slots.entry(slot.id.clone()) {
            Entry::Occupied(_) => Err(DbError::Conflict(format!("slot {} already exists", slot.id))),
            Entry::Vacant(vacant) => {
                let free = Slot {
                    booked: false,
                    booking_id: None,
                    ..slot.clone()
                };
                vacant.insert(free.clone());
                Ok(free)
            }
        }
    }

    async fn retract_slot(&self, slot_id: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        match state.slots.get(slot_id) {
            None => Err(DbError::NotFound(format!("slot {}", slot_id))),
            Some(slot) if slot.booked => Err(DbError::Conflict(format!(
                "slot {} is booked and cannot be retracted",
                slot_id
            ))),
            Some(_) => {
                state.slots.remove(slot_id);
                Ok(())
            }
        }
    }

    async fn find_slots(&self, slot_ids: &[String]) -> Result<Vec<Slot>, DbError> {
        let state = self.state.lock().await;
        Ok(unique_ids(slot_ids)
            .iter()
            .filter_map(|id| state.slots.get(id).cloned())
            .collect())
    }

    async fn list_free_slots(&self, query: &SlotQuery) -> Result<Vec<Slot>, DbError> {
        let state = self.state.lock().await;
        let mut slots: Vec<Slot> = state
            .slots
            .values()
            .filter(|slot| !slot.booked)
            .filter(|slot| query.tutor_ids.is_empty() || query.tutor_ids.contains(&slot.tutor_id))
            .filter(|slot| query.from.map_or(true, |from| slot.start_time >= from))
            .filter(|slot| query.to.map_or(true, |to| slot.start_time < to))
            .cloned()
            .collect();
        slots.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(slots)
    }

    async fn reserve_slots(
        &self,
        slot_ids: &[String],
        tutor_id: &str,
        holder_booking_id: &str,
    ) -> Result<(), DbError> {
        self.state
            .lock()
            .await
            .reserve(slot_ids, tutor_id, holder_booking_id)
    }

    async fn release_slots(&self, slot_ids: &[String]) -> Result<u64, DbError> {
        let mut state = self.state.lock().await;
        let mut released = 0;
        for id in unique_ids(slot_ids) {
            if let Some(slot) = state.slots.get_mut(&id) {
                if slot.booked {
                    slot.booked = false;
                    slot.booking_id = None;
                    released += 1;
                }
            }
        }
        debug!("[Store] Released {} slot(s)", released);
        Ok(released)
    }

    async fn release_unheld_slot(&self, slot_id: &str) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        let StoreState { slots, bookings, .. } = &mut *state;
        let Some(slot) = slots.get_mut(slot_id) else {
            return Ok(false);
        };
        let held = slot
            .booking_id
            .as_deref()
            .and_then(|holder| bookings.get(holder))
            .is_some_and(|b| matches!(b.payment_status, PaymentStatus::Pending | PaymentStatus::Paid));
        if !slot.booked || held {
            return Ok(false);
        }
        slot.booked = false;
        slot.booking_id = None;
        Ok(true)
    }

    async fn create_booking(
        &self,
        booking: &Booking,
        notification: &Notification,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        if state.bookings.contains_key(&booking.id) {
            return Err(DbError::Conflict(format!("booking {} already exists", booking.id)));
        }
        state.reserve(&booking.slot_ids, &booking.tutor_id, &booking.id)?;
        state.bookings.insert(booking.id.clone(), booking.clone());
        state
            .notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn find_booking(&self, booking_id: &str) -> Result<Option<Booking>, DbError> {
        Ok(self.state.lock().await.bookings.get(booking_id).cloned())
    }

    async fn list_pending_bookings_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, DbError> {
        let state = self.state.lock().await;
        let mut pending: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.payment_status == PaymentStatus::Pending && b.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|b| b.created_at);
        Ok(pending)
    }

    async fn attach_payment_intent(
        &self,
        booking_id: &str,
        expected: Option<&str>,
        intent_id: &str,
    ) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.bookings.get_mut(booking_id) {
            Some(b)
                if b.payment_status == PaymentStatus::Pending
                    && b.payment_intent_id.as_deref() == expected =>
            {
                b.payment_intent_id = Some(intent_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_paid(
        &self,
        booking_id: &str,
        intent_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.bookings.get_mut(booking_id) {
            Some(b) if b.payment_status == PaymentStatus::Pending => {
                b.payment_status = PaymentStatus::Paid;
                b.payment_intent_id = Some(intent_id.to_string());
                b.paid_at = Some(paid_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_tutor_confirmed(
        &self,
        booking_id: &str,
        responded_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        let applied = match state.bookings.get_mut(booking_id) {
            Some(b) if b.payment_status == PaymentStatus::Paid && b.confirmed_by_tutor.is_none() => {
                b.confirmed_by_tutor = Some(true);
                b.tutor_responded_at = Some(responded_at);
                true
            }
            _ => false,
        };
        if applied {
            state.mark_booking_notifications_read(booking_id);
        }
        Ok(applied)
    }

    async fn settle_cancellation(
        &self,
        settlement: &CancellationSettlement,
    ) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        let applied = match state.bookings.get_mut(&settlement.booking_id) {
            Some(b)
                if b.payment_status == settlement.expected_status
                    && b.confirmed_by_tutor != Some(true) =>
            {
                b.payment_status = settlement.new_status;
                b.cancelled_at = Some(settlement.cancelled_at);
                b.cancelled_by = Some(settlement.cancelled_by.clone());
                b.cancellation_reason = settlement.reason.clone();
                if settlement.tutor_declined {
                    b.confirmed_by_tutor = Some(false);
                    b.tutor_responded_at = Some(settlement.cancelled_at);
                }
                true
            }
            _ => false,
        };
        if !applied {
            return Ok(false);
        }

        if settlement.release_slots {
            for slot in state.slots.values_mut() {
                if slot.booking_id.as_deref() == Some(settlement.booking_id.as_str()) {
                    slot.booked = false;
                    slot.booking_id = None;
                }
            }
        }
        state.mark_booking_notifications_read(&settlement.booking_id);
        Ok(true)
    }

    async fn override_total_price(
        &self,
        booking_id: &str,
        total_price: i64,
        reason: &str,
    ) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.bookings.get_mut(booking_id) {
            Some(b) if b.payment_status == PaymentStatus::Pending && b.payment_intent_id.is_none() => {
                b.total_price = total_price;
                b.price_override_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current_lesson_price(&self) -> Result<Option<i64>, DbError> {
        Ok(self.state.lock().await.lesson_price)
    }

    async fn set_lesson_price(&self, amount: i64) -> Result<(), DbError> {
        self.state.lock().await.lesson_price = Some(amount);
        Ok(())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), DbError> {
        self.state
            .lock()
            .await
            .notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn find_notification(
        &self,
        notification_id: &str,
    ) -> Result<Option<Notification>, DbError> {
        Ok(self.state.lock().await.notifications.get(notification_id).cloned())
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>, DbError> {
        let state = self.state.lock().await;
        let mut notifications: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.read))
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.notifications.get_mut(notification_id) {
            Some(n) if !n.read => {
                n.read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_payment(&self, record: &PaymentRecord) -> Result<(), DbError> {
        if self.fail_payment_writes.load(Ordering::SeqCst) {
            return Err(DbError::QueryError(format!(
                "payment write for {} rejected",
                record.gateway_payment_id
            )));
        }
        let mut state = self.state.lock().await;
        match state.payments.entry(record.gateway_payment_id.clone()) {
            Entry::Occupied(mut existing) => {
                let existing = existing.get_mut();
                existing.refund_id = record.refund_id.clone().or(existing.refund_id.take());
                existing.refunded_amount = record.refunded_amount.or(existing.refunded_amount);
                existing.refunded_at = record.refunded_at.or(existing.refunded_at);
                existing.status = record.status;
                existing.updated_at = record.updated_at;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
            }
        }
        Ok(())
    }

    async fn find_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DbError> {
        Ok(self.state.lock().await.payments.get(gateway_payment_id).cloned())
    }

    async fn list_payments(&self, booking_id: &str) -> Result<Vec<PaymentRecord>, DbError> {
        let state = self.state.lock().await;
        let mut payments: Vec<PaymentRecord> = state
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn claim_email(
        &self,
        booking_id: &str,
        kind: EmailKind,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.emails.entry((booking_id.to_string(), kind)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(EmailRecord {
                    booking_id: booking_id.to_string(),
                    kind,
                    status: EmailStatus::Sending,
                    message_id: None,
                    updated_at: at,
                });
                Ok(true)
            }
        }
    }

    async fn complete_email(
        &self,
        booking_id: &str,
        kind: EmailKind,
        message_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        state.emails.insert(
            (booking_id.to_string(), kind),
            EmailRecord {
                booking_id: booking_id.to_string(),
                kind,
                status: EmailStatus::Sent,
                message_id: Some(message_id.to_string()),
                updated_at: at,
            },
        );
        Ok(())
    }

    async fn release_email(&self, booking_id: &str, kind: EmailKind) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        let key = (booking_id.to_string(), kind);
        if matches!(state.emails.get(&key), Some(record) if record.status == EmailStatus::Sending) {
            state.emails.remove(&key);
        }
        Ok(())
    }

    async fn find_email(
        &self,
        booking_id: &str,
        kind: EmailKind,
    ) -> Result<Option<EmailRecord>, DbError> {
        Ok(self
            .state
            .lock()
            .await
            .emails
            .get(&(booking_id.to_string(), kind))
            .cloned())
    }
}
