// --- File: crates/tutorbook_booking/src/orchestrator.rs ---
//! The booking state machine.
//!
//! `BookingOrchestrator` owns the transitions of a booking from creation to
//! one of its terminal stages. This file holds construction, booking
//! creation, payment intents and the catalogue/admin operations; payment
//! confirmation, settlement, emails and expiry live in sibling modules as
//! further `impl` blocks.

use chrono::{Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tutorbook_common::models::{
    Booking, Notification, PaymentRecord, PaymentStatus, Slot, SlotQuery, Tutor,
};
use tutorbook_common::{CreateIntentRequest, PaymentGateway, PaymentIntent};
use tutorbook_config::BookingConfig;
use tutorbook_db::BookingStore;
use tutorbook_notify::{is_valid_email, NotificationDispatcher};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::BookingError;
use crate::locks::KeyedLocks;
use crate::logic::{
    booking_request_message, intent_idempotency_key, resolve_single_tutor, slots_from_windows,
    total_price, validate_amount, validate_create_request,
};
use crate::models::{
    CreateBookingRequest, CreateBookingResponse, EmailDelivery, LessonPriceResponse,
    PaymentIntentResponse, SlotWindow,
};

/// Workflow settings resolved from `[booking]`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub lesson_price: i64,
    pub currency: String,
    pub time_zone: Tz,
    pub use_webhook_confirmation: bool,
    pub pending_expiry: ChronoDuration,
    pub payment_poll_attempts: u32,
    pub payment_poll_interval: Duration,
    pub default_lesson_category: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &BookingConfig) -> Result<Self, BookingError> {
        let time_zone: Tz = config
            .time_zone
            .parse()
            .map_err(|_| BookingError::Config(format!("unknown time zone '{}'", config.time_zone)))?;
        validate_amount(config.lesson_price, "booking.lesson_price")
            .map_err(|e| BookingError::Config(e.to_string()))?;
        if config.pending_expiry_minutes <= 0 {
            return Err(BookingError::Config(
                "booking.pending_expiry_minutes must be positive".to_string(),
            ));
        }
        Ok(Self {
            lesson_price: config.lesson_price,
            currency: config.currency.to_ascii_lowercase(),
            time_zone,
            use_webhook_confirmation: config.use_webhook_confirmation,
            pending_expiry: ChronoDuration::minutes(config.pending_expiry_minutes),
            payment_poll_attempts: config.payment_poll_attempts,
            payment_poll_interval: Duration::from_millis(config.payment_poll_interval_ms),
            default_lesson_category: config.default_lesson_category.clone(),
        })
    }
}

pub struct BookingOrchestrator {
    pub(crate) store: Arc<dyn BookingStore>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) dispatcher: NotificationDispatcher,
    pub(crate) settings: OrchestratorSettings,
    pub(crate) locks: KeyedLocks,
}

impl BookingOrchestrator {
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: NotificationDispatcher,
        settings: OrchestratorSettings,
    ) -> Self {
        info!(
            "[Booking] Orchestrator ready (store: {}, gateway: {}, mail: {}, webhook confirmation: {})",
            store.backend(),
            gateway.name(),
            dispatcher.transport_name(),
            settings.use_webhook_confirmation
        );
        Self {
            store,
            gateway,
            dispatcher,
            settings,
            locks: KeyedLocks::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    pub(crate) async fn load_booking(&self, booking_id: &str) -> Result<Booking, BookingError> {
        self.store
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {}", booking_id)))
    }

    /// Tutor and slots of a booking, for email rendering. Lookup failures
    /// only cost detail in the email.
    pub(crate) async fn email_context(&self, booking: &Booking) -> (Option<Tutor>, Vec<Slot>) {
        let tutor = match self.store.find_tutor(&booking.tutor_id).await {
            Ok(tutor) => tutor,
            Err(e) => {
                warn!(booking_id = %booking.id, "[Booking] Could not load tutor for email: {}", e);
                None
            }
        };
        let slots = match self.store.find_slots(&booking.slot_ids).await {
            Ok(slots) => slots,
            Err(e) => {
                warn!(booking_id = %booking.id, "[Booking] Could not load slots for email: {}", e);
                Vec::new()
            }
        };
        (tutor, slots)
    }

    // --- Pricing ---

    /// Admin price when one was stored, the configured price otherwise.
    pub async fn current_lesson_price(&self) -> Result<i64, BookingError> {
        Ok(self
            .store
            .current_lesson_price()
            .await?
            .unwrap_or(self.settings.lesson_price))
    }

    pub async fn lesson_price(&self) -> Result<LessonPriceResponse, BookingError> {
        Ok(LessonPriceResponse {
            amount: self.current_lesson_price().await?,
            currency: self.settings.currency.clone(),
        })
    }

    /// Applies to bookings created from now on; existing totals keep their snapshot.
    pub async fn set_lesson_price(
        &self,
        ctx: &RequestContext,
        amount: i64,
    ) -> Result<LessonPriceResponse, BookingError> {
        validate_amount(amount, "lesson price")?;
        self.store.set_lesson_price(amount).await?;
        info!(request_id = %ctx.request_id, actor = %ctx.actor, "[Booking] Lesson price set to {}", amount);
        Ok(LessonPriceResponse {
            amount,
            currency: self.settings.currency.clone(),
        })
    }

    /// The only path that changes a booking total.
    pub async fn override_total_price(
        &self,
        ctx: &RequestContext,
        booking_id: &str,
        total_price: i64,
        reason: &str,
    ) -> Result<Booking, BookingError> {
        validate_amount(total_price, "total price")?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BookingError::Validation(
                "a reason is required to override a booking total".to_string(),
            ));
        }

        let _guard = self.locks.acquire(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        if booking.payment_status != PaymentStatus::Pending {
            return Err(BookingError::InvalidTransition {
                stage: booking.stage(),
                booking_id: booking.id,
                action: "repriced",
            });
        }
        if booking.payment_intent_id.is_some() {
            return Err(BookingError::Conflict(format!(
                "booking {} already has a payment intent, its total can no longer change",
                booking.id
            )));
        }
        if !self
            .store
            .override_total_price(booking_id, total_price, reason)
            .await?
        {
            return Err(BookingError::Conflict(format!(
                "booking {} changed while its total was being overridden",
                booking_id
            )));
        }
        info!(
            booking_id = %booking_id,
            request_id = %ctx.request_id,
            "[Booking] Total overridden {} -> {} ({})",
            booking.total_price,
            total_price,
            reason
        );
        self.load_booking(booking_id).await
    }

    // --- Transition 1: create ---

    /// Validates, snapshots the price and reserves the slots together with
    /// the pending booking. Emails are best effort.
    pub async fn create_booking(
        &self,
        ctx: &RequestContext,
        request: CreateBookingRequest,
    ) -> Result<CreateBookingResponse, BookingError> {
        let valid = validate_create_request(&request, &self.settings.default_lesson_category)?;

        let found = self.store.find_slots(&valid.slot_ids).await?;
        let (tutor_id, mut slots) = resolve_single_tutor(&valid.slot_ids, found)?;
        if let Some(requested) = valid.tutor_id.as_deref() {
            if requested != tutor_id {
                return Err(BookingError::Validation(format!(
                    "the selected slots belong to tutor {}, not {}",
                    tutor_id, requested
                )));
            }
        }

        let unit_price = self.current_lesson_price().await?;
        let total = total_price(unit_price, valid.slot_ids.len())?;
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            tutor_id: tutor_id.clone(),
            slot_ids: valid.slot_ids,
            payer: valid.payer,
            topic: valid.topic,
            lesson_category: valid.lesson_category,
            lesson_price: unit_price,
            total_price: total,
            currency: self.settings.currency.clone(),
            payment_status: PaymentStatus::Pending,
            confirmed_by_tutor: None,
            payment_intent_id: None,
            paid_at: None,
            tutor_responded_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            price_override_reason: None,
            created_at: now,
        };
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: tutor_id.clone(),
            message: booking_request_message(&booking, &slots, self.settings.time_zone),
            read: false,
            booking_id: Some(booking.id.clone()),
            slot_id: None,
            created_at: now,
        };

        self.store.create_booking(&booking, &notification).await?;
        for slot in &mut slots {
            slot.booked = true;
            slot.booking_id = Some(booking.id.clone());
        }
        info!(
            booking_id = %booking.id,
            tutor_id = %tutor_id,
            request_id = %ctx.request_id,
            "[Booking] Created pending booking for {} slot(s), total {} {}",
            slots.len(),
            booking.total_price,
            booking.currency
        );

        let tutor = self.store.find_tutor(&tutor_id).await.unwrap_or_else(|e| {
            warn!(tutor_id = %tutor_id, "[Booking] Tutor lookup failed: {}", e);
            None
        });
        let tutor_email = self
            .dispatcher
            .notify_tutor_of_new_booking(&booking, tutor.as_ref(), &slots)
            .await;
        let payer_email = self
            .dispatcher
            .notify_payer_payment_pending(&booking, tutor.as_ref(), &slots)
            .await;

        Ok(CreateBookingResponse {
            booking,
            notifications: vec![
                EmailDelivery::new("tutor_new_booking", tutor_email),
                EmailDelivery::new("payer_payment_pending", payer_email),
            ],
        })
    }

    // --- Payment intent ---

    /// Returns the booking's open intent, creating (or replacing a canceled)
    /// one when needed.
    pub async fn create_payment_intent(
        &self,
        ctx: &RequestContext,
        booking_id: &str,
    ) -> Result<PaymentIntentResponse, BookingError> {
        let _guard = self.locks.acquire(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        if booking.payment_status != PaymentStatus::Pending {
            return Err(BookingError::InvalidTransition {
                stage: booking.stage(),
                booking_id: booking.id,
                action: "charged",
            });
        }

        let replaces = match booking.payment_intent_id.as_deref() {
            Some(existing) => {
                let intent = self.gateway.retrieve_intent(existing).await?;
                if !intent.is_canceled() {
                    return Ok(intent_response(intent));
                }
                info!(booking_id = %booking.id, intent_id = %existing, "[Booking] Stored intent was canceled, creating a new one");
                Some(existing.to_string())
            }
            None => None,
        };

        let request = CreateIntentRequest {
            booking_id: booking.id.clone(),
            amount: booking.total_price,
            currency: booking.currency.clone(),
            description: Some(format!(
                "Tutoring booking {} ({} lesson(s))",
                booking.id,
                booking.slot_ids.len()
            )),
            receipt_email: Some(booking.payer.email.clone()).filter(|e| is_valid_email(e)),
            idempotency_key: Some(intent_idempotency_key(&booking.id, replaces.as_deref())),
        };
        let intent = self.gateway.create_intent(request).await?;

        let attached = self
            .store
            .attach_payment_intent(&booking.id, replaces.as_deref(), &intent.id)
            .await?;
        if !attached {
            if let Err(e) = self.gateway.cancel_intent(&intent.id).await {
                warn!(intent_id = %intent.id, "[Booking] Could not cancel unattached intent: {}", e);
            }
            return Err(BookingError::Conflict(format!(
                "booking {} changed while its payment intent was being created",
                booking.id
            )));
        }
        info!(
            booking_id = %booking.id,
            intent_id = %intent.id,
            request_id = %ctx.request_id,
            "[Booking] Payment intent attached ({} {})",
            intent.amount,
            intent.currency
        );
        Ok(intent_response(intent))
    }

    // --- Queries ---

    pub async fn get_booking(&self, booking_id: &str) -> Result<Booking, BookingError> {
        self.load_booking(booking_id).await
    }

    pub async fn list_free_slots(&self, query: &SlotQuery) -> Result<Vec<Slot>, BookingError> {
        Ok(self.store.list_free_slots(query).await?)
    }

    pub async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>, BookingError> {
        if user_id.trim().is_empty() {
            return Err(BookingError::Validation("userId is required".to_string()));
        }
        Ok(self.store.list_notifications(user_id.trim(), unread_only).await?)
    }

    pub async fn list_payments(&self, booking_id: &str) -> Result<Vec<PaymentRecord>, BookingError> {
        self.load_booking(booking_id).await?;
        Ok(self.store.list_payments(booking_id).await?)
    }

    // --- Tutor registry and slot catalogue ---

    pub async fn register_tutor(
        &self,
        ctx: &RequestContext,
        tutor: Tutor,
    ) -> Result<Tutor, BookingError> {
        let tutor = Tutor {
            id: tutor.id.trim().to_string(),
            name: tutor.name.trim().to_string(),
            email: tutor.email.trim().to_string(),
        };
        if tutor.id.is_empty() || tutor.name.is_empty() {
            return Err(BookingError::Validation("tutor id and name are required".to_string()));
        }
        if !is_valid_email(&tutor.email) {
            return Err(BookingError::Validation(format!(
                "tutor email '{}' is not a valid address",
                tutor.email
            )));
        }
        let saved = self.store.upsert_tutor(&tutor).await?;
        info!(tutor_id = %saved.id, request_id = %ctx.request_id, "[Booking] Tutor registered");
        Ok(saved)
    }

    pub async fn publish_slots(
        &self,
        ctx: &RequestContext,
        tutor_id: &str,
        windows: &[SlotWindow],
    ) -> Result<Vec<Slot>, BookingError> {
        if self.store.find_tutor(tutor_id).await?.is_none() {
            return Err(BookingError::NotFound(format!("tutor {}", tutor_id)));
        }
        let slots = slots_from_windows(tutor_id, windows)?;
        let mut published = Vec::with_capacity(slots.len());
        for slot in &slots {
            published.push(self.store.publish_slot(slot).await?);
        }
        info!(tutor_id = %tutor_id, request_id = %ctx.request_id, "[Booking] Published {} slot(s)", published.len());
        Ok(published)
    }

    /// Only free slots can be retracted.
    pub async fn retract_slot(&self, ctx: &RequestContext, slot_id: &str) -> Result<(), BookingError> {
        self.store.retract_slot(slot_id).await?;
        info!(slot_id = %slot_id, request_id = %ctx.request_id, "[Booking] Slot retracted");
        Ok(())
    }

    pub async fn health(&self) -> (bool, &'static str) {
        (self.store.is_healthy().await, self.store.backend())
    }
}

fn intent_response(intent: PaymentIntent) -> PaymentIntentResponse {
    PaymentIntentResponse {
        payment_intent_id: intent.id,
        client_secret: intent.client_secret,
        amount: intent.amount,
        currency: intent.currency,
        status: intent.status,
    }
}
