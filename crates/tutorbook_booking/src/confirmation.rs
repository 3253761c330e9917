// --- File: crates/tutorbook_booking/src/confirmation.rs ---
//! Payment confirmation. The webhook, the verify endpoint, the expiry sweep
//! and the simulated payment route all end in `reconcile_locked`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use tutorbook_common::models::{Booking, PaymentRecord, PaymentRecordStatus, PaymentStatus};
use tutorbook_common::services::BOOKING_ID_METADATA_KEY;
use tutorbook_common::{PaymentIntent, Refund, RefundReason, RefundRequest};
use tutorbook_db::CancellationSettlement;
use tutorbook_stripe::{
    StripeEvent, EVENT_PAYMENT_INTENT_CANCELED, EVENT_PAYMENT_INTENT_FAILED,
    EVENT_PAYMENT_INTENT_SUCCEEDED,
};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::BookingError;
use crate::logic::{duplicate_refund_idempotency_key, intent_belongs_to, refund_idempotency_key};
use crate::models::{ReconcileOutcome, VerifyPaymentRequest, VerifyPaymentResponse, WebhookOutcome};
use crate::orchestrator::BookingOrchestrator;

const STATUS_NOT_FOUND: &str = "not_found";

/// How the bounded wait for the payment webhook ended.
enum WebhookWait {
    Paid(Booking),
    Settled(PaymentStatus),
    TimedOut,
}

impl BookingOrchestrator {
    /// Locks the booking and applies a succeeded intent to it.
    pub async fn reconcile_succeeded_intent(
        &self,
        ctx: &RequestContext,
        booking_id: &str,
        intent: &PaymentIntent,
    ) -> Result<ReconcileOutcome, BookingError> {
        let _guard = self.locks.acquire(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        debug!(booking_id = %booking_id, intent_id = %intent.id, request_id = %ctx.request_id, "[Booking] Reconciling intent");
        self.reconcile_locked(booking, intent).await
    }

    /// Caller holds the booking lock.
    pub(crate) async fn reconcile_locked(
        &self,
        booking: Booking,
        intent: &PaymentIntent,
    ) -> Result<ReconcileOutcome, BookingError> {
        if !intent.is_succeeded() {
            debug!(booking_id = %booking.id, intent_id = %intent.id, "[Booking] Intent is {}, nothing to reconcile", intent.status);
            return Ok(ReconcileOutcome::NotSucceeded);
        }
        if !intent_belongs_to(&booking, intent) {
            warn!(
                booking_id = %booking.id,
                intent_id = %intent.id,
                "[Booking] Intent belongs to booking {:?}, leaving booking untouched",
                intent.booking_id()
            );
            return Ok(ReconcileOutcome::Mismatched);
        }

        let booking = if booking.payment_status == PaymentStatus::Pending {
            let now = Utc::now();
            if self.store.mark_paid(&booking.id, &intent.id, now).await? {
                info!(booking_id = %booking.id, intent_id = %intent.id, "[Booking] Booking paid");
                self.record_succeeded_payment(&booking, intent, now).await?;
                let paid = self.load_booking(&booking.id).await?;
                self.send_payment_confirmed_pair(&paid).await;
                return Ok(ReconcileOutcome::Paid);
            }
            self.load_booking(&booking.id).await?
        } else {
            booking
        };

        match booking.payment_status {
            PaymentStatus::Pending => Err(BookingError::Conflict(format!(
                "booking {} could not be marked paid",
                booking.id
            ))),
            PaymentStatus::Paid if booking.payment_intent_id.as_deref() == Some(intent.id.as_str()) => {
                debug!(booking_id = %booking.id, "[Booking] Already paid with this intent");
                self.send_payment_confirmed_pair(&booking).await;
                Ok(ReconcileOutcome::AlreadyPaid)
            }
            PaymentStatus::Paid => self.refund_duplicate(&booking, intent).await,
            PaymentStatus::Cancelled => self.refund_late_payment(&booking, intent).await,
            PaymentStatus::Refunded => {
                if booking.payment_intent_id.as_deref() == Some(intent.id.as_str())
                    || self.already_refunded(&intent.id).await?
                {
                    Ok(ReconcileOutcome::AlreadySettled)
                } else {
                    self.refund_duplicate(&booking, intent).await
                }
            }
        }
    }

    async fn already_refunded(&self, intent_id: &str) -> Result<bool, BookingError> {
        Ok(self
            .store
            .find_payment(intent_id)
            .await?
            .map(|record| record.refund_id.is_some())
            .unwrap_or(false))
    }

    /// A second succeeded intent for a booking that is already settled.
    async fn refund_duplicate(
        &self,
        booking: &Booking,
        intent: &PaymentIntent,
    ) -> Result<ReconcileOutcome, BookingError> {
        warn!(
            booking_id = %booking.id,
            intent_id = %intent.id,
            kept_intent = ?booking.payment_intent_id,
            "[Booking] Duplicate payment, refunding"
        );
        let refund = self
            .gateway
            .refund(RefundRequest {
                intent_id: intent.id.clone(),
                amount: None,
                reason: RefundReason::Duplicate,
                metadata: HashMap::from([(
                    BOOKING_ID_METADATA_KEY.to_string(),
                    booking.id.clone(),
                )]),
                idempotency_key: Some(duplicate_refund_idempotency_key(&intent.id)),
            })
            .await?;
        self.record_refund(booking, intent, &refund, PaymentRecordStatus::DuplicateRefunded)
            .await?;
        info!(booking_id = %booking.id, refund_id = %refund.id, "[Booking] Duplicate payment refunded ({})", refund.amount);
        Ok(ReconcileOutcome::DuplicateRefunded)
    }

    /// The booking expired or was cancelled before the payment landed.
    async fn refund_late_payment(
        &self,
        booking: &Booking,
        intent: &PaymentIntent,
    ) -> Result<ReconcileOutcome, BookingError> {
        warn!(booking_id = %booking.id, intent_id = %intent.id, "[Booking] Payment arrived for a cancelled booking, refunding");
        let refund = self
            .gateway
            .refund(RefundRequest {
                intent_id: intent.id.clone(),
                amount: None,
                reason: RefundReason::RequestedByCustomer,
                metadata: HashMap::from([
                    (BOOKING_ID_METADATA_KEY.to_string(), booking.id.clone()),
                    ("cancelled_by".to_string(), "system".to_string()),
                ]),
                idempotency_key: Some(refund_idempotency_key(&booking.id)),
            })
            .await?;
        self.record_refund(booking, intent, &refund, PaymentRecordStatus::Refunded)
            .await?;

        let settled = self
            .store
            .settle_cancellation(&CancellationSettlement {
                booking_id: booking.id.clone(),
                expected_status: PaymentStatus::Cancelled,
                new_status: PaymentStatus::Refunded,
                cancelled_at: booking.cancelled_at.unwrap_or_else(Utc::now),
                cancelled_by: booking
                    .cancelled_by
                    .clone()
                    .unwrap_or_else(|| "system".to_string()),
                reason: booking.cancellation_reason.clone(),
                tutor_declined: false,
                release_slots: false,
            })
            .await?;
        if settled {
            let refunded = self.load_booking(&booking.id).await?;
            let (tutor, slots) = self.email_context(&refunded).await;
            let outcome = self
                .dispatcher
                .notify_payer_cancelled(&refunded, tutor.as_ref(), &slots, Some(refund.amount))
                .await;
            debug!(booking_id = %booking.id, "[Booking] Late refund email: {:?}", outcome);
        }
        Ok(ReconcileOutcome::LateRefunded)
    }

    pub(crate) async fn record_succeeded_payment(
        &self,
        booking: &Booking,
        intent: &PaymentIntent,
        at: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if self.store.find_payment(&intent.id).await?.is_some() {
            return Ok(());
        }
        self.store
            .record_payment(&PaymentRecord {
                id: Uuid::new_v4().to_string(),
                booking_id: booking.id.clone(),
                gateway_payment_id: intent.id.clone(),
                refund_id: None,
                amount: intent.captured_amount(),
                refunded_amount: None,
                currency: intent.currency.clone(),
                status: PaymentRecordStatus::Succeeded,
                refunded_at: None,
                created_at: at,
                updated_at: at,
            })
            .await?;
        Ok(())
    }

    /// Updates (or creates) the audit row of the refunded intent.
    pub(crate) async fn record_refund(
        &self,
        booking: &Booking,
        intent: &PaymentIntent,
        refund: &Refund,
        status: PaymentRecordStatus,
    ) -> Result<(), BookingError> {
        let now = Utc::now();
        let record = match self.store.find_payment(&intent.id).await? {
            Some(existing) => PaymentRecord {
                refund_id: Some(refund.id.clone()),
                refunded_amount: Some(refund.amount),
                status,
                refunded_at: Some(now),
                updated_at: now,
                ..existing
            },
            None => PaymentRecord {
                id: Uuid::new_v4().to_string(),
                booking_id: booking.id.clone(),
                gateway_payment_id: intent.id.clone(),
                refund_id: Some(refund.id.clone()),
                amount: intent.captured_amount(),
                refunded_amount: Some(refund.amount),
                currency: intent.currency.clone(),
                status,
                refunded_at: Some(now),
                created_at: now,
                updated_at: now,
            },
        };
        self.store.record_payment(&record).await?;
        Ok(())
    }

    /// Succeeded intent for the booking: the stored one first, then a
    /// metadata search at the gateway.
    pub(crate) async fn locate_succeeded_intent(
        &self,
        booking: &Booking,
    ) -> Result<Option<PaymentIntent>, BookingError> {
        if let Some(stored) = booking.payment_intent_id.as_deref() {
            let intent = self.gateway.retrieve_intent(stored).await?;
            if intent.is_succeeded() && intent_belongs_to(booking, &intent) {
                return Ok(Some(intent));
            }
        }
        Ok(self
            .gateway
            .search_succeeded_intent_by_booking_id(&booking.id)
            .await?)
    }

    /// In webhook mode waits a bounded time for the webhook to mark the
    /// booking paid, then verifies once against the gateway. In poll mode
    /// verifies directly.
    pub async fn verify_payment(
        &self,
        ctx: &RequestContext,
        request: VerifyPaymentRequest,
    ) -> Result<VerifyPaymentResponse, BookingError> {
        let booking = self.load_booking(&request.booking_id).await?;

        if self.settings.use_webhook_confirmation && booking.payment_status == PaymentStatus::Pending {
            let attempts = self.settings.payment_poll_attempts;
            match self.await_webhook(&request.booking_id, attempts).await? {
                WebhookWait::Paid(current) => {
                    return Ok(VerifyPaymentResponse {
                        booking_id: current.id,
                        status: tutorbook_common::services::INTENT_STATUS_SUCCEEDED.to_string(),
                        payment_status: current.payment_status,
                        reconciliation: Some(ReconcileOutcome::AlreadyPaid),
                    });
                }
                WebhookWait::Settled(status) => info!(
                    booking_id = %request.booking_id,
                    request_id = %ctx.request_id,
                    "[Booking] Booking became {:?} while waiting for the payment webhook, verifying directly",
                    status
                ),
                WebhookWait::TimedOut => warn!(
                    booking_id = %request.booking_id,
                    request_id = %ctx.request_id,
                    "[Booking] Timed out waiting for the payment webhook after {} attempt(s), verifying directly",
                    attempts
                ),
            }
        }

        self.verify_directly(ctx, &request.booking_id, request.payment_intent_id.as_deref())
            .await
    }

    async fn await_webhook(&self, booking_id: &str, attempts: u32) -> Result<WebhookWait, BookingError> {
        for attempt in 1..=attempts {
            tokio::time::sleep(self.settings.payment_poll_interval).await;
            let current = self.load_booking(booking_id).await?;
            match current.payment_status {
                PaymentStatus::Pending => {}
                PaymentStatus::Paid => {
                    debug!(booking_id = %current.id, attempt, "[Booking] Webhook confirmed the payment");
                    return Ok(WebhookWait::Paid(current));
                }
                status => return Ok(WebhookWait::Settled(status)),
            }
        }
        Ok(WebhookWait::TimedOut)
    }

    async fn verify_directly(
        &self,
        ctx: &RequestContext,
        booking_id: &str,
        given_intent: Option<&str>,
    ) -> Result<VerifyPaymentResponse, BookingError> {
        let _guard = self.locks.acquire(booking_id).await;
        let booking = self.load_booking(booking_id).await?;

        let intent = match given_intent {
            Some(intent_id) => Some(self.gateway.retrieve_intent(intent_id).await?),
            None => self.locate_succeeded_intent(&booking).await?,
        };
        let Some(intent) = intent else {
            debug!(booking_id = %booking_id, request_id = %ctx.request_id, "[Booking] No payment found at the gateway");
            return Ok(VerifyPaymentResponse {
                booking_id: booking.id,
                status: STATUS_NOT_FOUND.to_string(),
                payment_status: booking.payment_status,
                reconciliation: None,
            });
        };

        let outcome = self.reconcile_locked(booking, &intent).await?;
        let current = self.load_booking(booking_id).await?;
        info!(
            booking_id = %booking_id,
            intent_id = %intent.id,
            request_id = %ctx.request_id,
            "[Booking] Payment verified: {} -> {:?}",
            intent.status,
            outcome
        );
        Ok(VerifyPaymentResponse {
            booking_id: current.id,
            status: intent.status,
            payment_status: current.payment_status,
            reconciliation: Some(outcome),
        })
    }

    /// Applies a verified Stripe event. Events that cannot be tied to a
    /// booking are acknowledged so the provider stops redelivering them.
    pub async fn handle_payment_event(
        &self,
        ctx: &RequestContext,
        event: &StripeEvent,
    ) -> Result<WebhookOutcome, BookingError> {
        if !event.is_payment_intent_event() {
            debug!(event_id = %event.id, "[Booking] Ignoring {} event", event.event_type);
            return Ok(WebhookOutcome::Ignored);
        }
        let intent = event
            .payment_intent()
            .map_err(|e| BookingError::Validation(e.to_string()))?;
        let Some(booking_id) = intent.booking_id().map(str::to_string) else {
            warn!(event_id = %event.id, intent_id = %intent.id, "[Booking] Event has no booking_id metadata, acknowledging");
            return Ok(WebhookOutcome::Ignored);
        };

        match event.event_type.as_str() {
            EVENT_PAYMENT_INTENT_SUCCEEDED => {
                let _guard = self.locks.acquire(&booking_id).await;
                let Some(booking) = self.store.find_booking(&booking_id).await? else {
                    warn!(booking_id = %booking_id, event_id = %event.id, "[Booking] Payment for an unknown booking, acknowledging");
                    return Ok(WebhookOutcome::Ignored);
                };
                let outcome = self.reconcile_locked(booking, &intent).await?;
                info!(booking_id = %booking_id, event_id = %event.id, request_id = %ctx.request_id, "[Booking] Webhook reconciled: {:?}", outcome);
                Ok(WebhookOutcome::Reconciled(outcome))
            }
            EVENT_PAYMENT_INTENT_FAILED | EVENT_PAYMENT_INTENT_CANCELED => {
                warn!(booking_id = %booking_id, intent_id = %intent.id, "[Booking] {} received", event.event_type);
                Ok(WebhookOutcome::Logged)
            }
            other => {
                debug!(booking_id = %booking_id, "[Booking] Ignoring {} event", other);
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}
