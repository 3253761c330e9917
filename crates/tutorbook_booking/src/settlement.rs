// --- File: crates/tutorbook_booking/src/settlement.rs ---
//! Tutor confirmation, cancellation with refund, and answers to in-app
//! notifications.

use chrono::Utc;
use std::collections::HashMap;
use tracing::{error, info, warn};
use tutorbook_common::models::{
    Booking, BookingStage, Notification, PaymentRecordStatus, PaymentStatus,
};
use tutorbook_common::services::BOOKING_ID_METADATA_KEY;
use tutorbook_common::{GatewayError, RefundReason, RefundRequest};
use tutorbook_db::CancellationSettlement;
use uuid::Uuid;

use crate::context::{Actor, RequestContext};
use crate::error::BookingError;
use crate::logic::{cancellation_notice, refund_idempotency_key};
use crate::models::{
    CancelBookingResponse, ConfirmBookingResponse, RespondResponse, SlotResponseResult,
    REFUND_STATUS_NONE,
};
use crate::orchestrator::BookingOrchestrator;

const TUTOR_DECLINED_REASON: &str = "declined by tutor";

impl BookingOrchestrator {
    /// `paid -> tutor_confirmed`. Confirming twice is a no-op.
    pub async fn confirm_booking(
        &self,
        ctx: &RequestContext,
        booking_id: &str,
    ) -> Result<ConfirmBookingResponse, BookingError> {
        if !matches!(ctx.actor, Actor::Tutor | Actor::Admin) {
            return Err(BookingError::Validation(format!(
                "a booking can only be confirmed by its tutor or an admin, not {}",
                ctx.actor
            )));
        }

        let _guard = self.locks.acquire(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        match booking.stage() {
            BookingStage::TutorConfirmed => {
                return Ok(ConfirmBookingResponse {
                    success: true,
                    booking,
                    notification: None,
                })
            }
            BookingStage::Paid if booking.confirmed_by_tutor.is_none() => {}
            stage => {
                return Err(BookingError::InvalidTransition {
                    booking_id: booking.id,
                    stage,
                    action: "confirmed",
                })
            }
        }

        if !self.store.mark_tutor_confirmed(booking_id, Utc::now()).await? {
            let current = self.load_booking(booking_id).await?;
            if current.stage() == BookingStage::TutorConfirmed {
                return Ok(ConfirmBookingResponse {
                    success: true,
                    booking: current,
                    notification: None,
                });
            }
            return Err(BookingError::InvalidTransition {
                booking_id: current.id.clone(),
                stage: current.stage(),
                action: "confirmed",
            });
        }

        let confirmed = self.load_booking(booking_id).await?;
        info!(booking_id = %booking_id, request_id = %ctx.request_id, actor = %ctx.actor, "[Booking] Tutor confirmed booking");
        let notification = self.send_tutor_accepted(&confirmed).await;
        Ok(ConfirmBookingResponse {
            success: true,
            booking: confirmed,
            notification: Some(notification),
        })
    }

    /// Decline or cancellation: refund what was paid, then settle and free
    /// the slots in one store write. A gateway failure leaves the booking as
    /// it was.
    pub async fn cancel_booking(
        &self,
        ctx: &RequestContext,
        booking_id: &str,
        reason: Option<String>,
    ) -> Result<CancelBookingResponse, BookingError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let _guard = self.locks.acquire(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        match booking.stage() {
            BookingStage::Cancelled | BookingStage::Refunded => {
                return self.recorded_cancellation(booking).await;
            }
            BookingStage::TutorConfirmed => {
                return Err(BookingError::InvalidTransition {
                    booking_id: booking.id,
                    stage: BookingStage::TutorConfirmed,
                    action: "cancelled",
                });
            }
            BookingStage::Pending | BookingStage::Paid => {}
        }

        let expected_status = booking.payment_status;
        let tutor_declined = ctx.actor == Actor::Tutor;
        let succeeded = self.locate_succeeded_intent(&booking).await?;

        let (refund, new_status) = match &succeeded {
            Some(intent) => {
                let refund = self
                    .gateway
                    .refund(RefundRequest {
                        intent_id: intent.id.clone(),
                        amount: None,
                        reason: RefundReason::RequestedByCustomer,
                        metadata: HashMap::from([
                            (BOOKING_ID_METADATA_KEY.to_string(), booking.id.clone()),
                            ("cancelled_by".to_string(), ctx.actor.as_str().to_string()),
                        ]),
                        idempotency_key: Some(refund_idempotency_key(&booking.id)),
                    })
                    .await?;
                info!(
                    booking_id = %booking.id,
                    intent_id = %intent.id,
                    refund_id = %refund.id,
                    "[Booking] Refunded {} {}",
                    refund.amount,
                    refund.currency
                );
                (Some(refund), PaymentStatus::Refunded)
            }
            None if expected_status == PaymentStatus::Paid => {
                return Err(BookingError::PaymentProvider(GatewayError::InvalidResponse(
                    format!(
                        "booking {} is paid but no succeeded payment was found at {}, reconcile manually",
                        booking.id,
                        self.gateway.name()
                    ),
                )));
            }
            None => {
                self.cancel_open_intent(&booking).await;
                (None, PaymentStatus::Cancelled)
            }
        };

        let applied = self
            .store
            .settle_cancellation(&CancellationSettlement {
                booking_id: booking.id.clone(),
                expected_status,
                new_status,
                cancelled_at: Utc::now(),
                cancelled_by: ctx.actor.as_str().to_string(),
                reason: reason.or_else(|| tutor_declined.then(|| TUTOR_DECLINED_REASON.to_string())),
                tutor_declined,
                release_slots: true,
            })
            .await?;

        // Settled and refunded already; a failed audit write is only logged.
        if let (Some(intent), Some(refund)) = (&succeeded, &refund) {
            if let Err(e) = self
                .record_refund(&booking, intent, refund, PaymentRecordStatus::Refunded)
                .await
            {
                error!(
                    booking_id = %booking.id,
                    refund_id = %refund.id,
                    "[Booking] Refund issued but not recorded: {}",
                    e
                );
            }
        }

        if !applied {
            let current = self.load_booking(booking_id).await?;
            if current.is_terminal() && current.stage() != BookingStage::TutorConfirmed {
                warn!(booking_id = %booking_id, "[Booking] Booking was settled concurrently");
                return self.recorded_cancellation(current).await;
            }
            return Err(BookingError::Conflict(format!(
                "booking {} changed while it was being cancelled, retry",
                booking_id
            )));
        }

        let settled = self.load_booking(booking_id).await?;
        info!(
            booking_id = %booking_id,
            request_id = %ctx.request_id,
            actor = %ctx.actor,
            "[Booking] Booking settled as {}",
            settled.payment_status
        );

        let refund_amount = refund.as_ref().map(|r| r.amount);
        let notifications = self
            .send_cancellation_emails(&settled, refund_amount, tutor_declined)
            .await;
        if !tutor_declined {
            self.notify_tutor_in_app(&settled, ctx.actor).await;
        }

        Ok(CancelBookingResponse {
            success: true,
            booking_id: settled.id.clone(),
            payment_status: settled.payment_status,
            refund_amount,
            refund_status: refund
                .as_ref()
                .map(|r| r.status.clone())
                .unwrap_or_else(|| REFUND_STATUS_NONE.to_string()),
            payment_intent_id: succeeded
                .map(|intent| intent.id)
                .or(settled.payment_intent_id),
            already_settled: false,
            notifications,
        })
    }

    /// Outcome of an earlier settlement, rebuilt from the audit trail.
    async fn recorded_cancellation(
        &self,
        booking: Booking,
    ) -> Result<CancelBookingResponse, BookingError> {
        let payments = self.store.list_payments(&booking.id).await?;
        let refunded = payments
            .iter()
            .rev()
            .find(|p| p.status == PaymentRecordStatus::Refunded);
        Ok(CancelBookingResponse {
            success: true,
            booking_id: booking.id.clone(),
            payment_status: booking.payment_status,
            refund_amount: refunded.and_then(|p| p.refunded_amount),
            refund_status: match refunded {
                Some(_) => "succeeded".to_string(),
                None => REFUND_STATUS_NONE.to_string(),
            },
            payment_intent_id: refunded
                .map(|p| p.gateway_payment_id.clone())
                .or(booking.payment_intent_id),
            already_settled: true,
            notifications: Vec::new(),
        })
    }

    /// Best effort: an unpaid intent left open could still be charged.
    pub(crate) async fn cancel_open_intent(&self, booking: &Booking) {
        let Some(intent_id) = booking.payment_intent_id.as_deref() else {
            return;
        };
        match self.gateway.cancel_intent(intent_id).await {
            Ok(intent) => {
                info!(booking_id = %booking.id, intent_id = %intent_id, "[Booking] Open intent is now {}", intent.status)
            }
            Err(e) => {
                warn!(booking_id = %booking.id, intent_id = %intent_id, "[Booking] Could not cancel open intent: {}", e)
            }
        }
    }

    async fn notify_tutor_in_app(&self, booking: &Booking, actor: Actor) {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: booking.tutor_id.clone(),
            message: cancellation_notice(booking, actor),
            read: false,
            // Informational only; answering it must not touch the booking.
            booking_id: None,
            slot_id: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_notification(&notification).await {
            warn!(booking_id = %booking.id, "[Booking] Could not notify tutor of cancellation: {}", e);
        }
    }

    /// Accept or decline through a tutor notification. The notification is
    /// marked read only once the transition went through, so a failed refund
    /// leaves it actionable. A notice linked to neither a booking nor a slot
    /// is only dismissed.
    pub async fn respond_to_notification(
        &self,
        ctx: &RequestContext,
        notification_id: &str,
        accept: bool,
    ) -> Result<RespondResponse, BookingError> {
        let notification = self
            .store
            .find_notification(notification_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("notification {}", notification_id)))?;
        if notification.read {
            return Err(BookingError::Conflict(format!(
                "notification {} was already answered",
                notification_id
            )));
        }

        if let Some(booking_id) = notification.booking_id.as_deref() {
            let response = if accept {
                RespondResponse::Confirmed(self.confirm_booking(ctx, booking_id).await?)
            } else {
                RespondResponse::Cancelled(
                    self.cancel_booking(ctx, booking_id, Some(TUTOR_DECLINED_REASON.to_string()))
                        .await?,
                )
            };
            self.store.mark_notification_read(notification_id).await?;
            return Ok(response);
        }

        let mut slot_released = false;
        if let (Some(slot_id), false) = (notification.slot_id.as_deref(), accept) {
            slot_released = self.store.release_unheld_slot(slot_id).await?;
            if !slot_released {
                warn!(slot_id = %slot_id, "[Booking] Slot is free or held by a live booking, left as is");
            }
        }
        if !self.store.mark_notification_read(notification_id).await? {
            return Err(BookingError::Conflict(format!(
                "notification {} was already answered",
                notification_id
            )));
        }
        info!(
            notification_id = %notification_id,
            request_id = %ctx.request_id,
            accepted = accept,
            "[Booking] {} answered",
            if notification.slot_id.is_some() { "Slot request" } else { "Notice" }
        );
        Ok(RespondResponse::Slot(SlotResponseResult {
            success: true,
            notification_id: notification.id,
            slot_id: notification.slot_id,
            accepted: accept,
            slot_released,
        }))
    }
}
