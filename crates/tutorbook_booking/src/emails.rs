// --- File: crates/tutorbook_booking/src/emails.rs ---
//! Lifecycle emails sent through the exactly-once guard, plus the
//! on-demand invoice and booking notification sends.

use chrono::Utc;
use std::future::Future;
use tracing::{debug, error, info, warn};
use tutorbook_common::models::{Booking, BookingStage, EmailKind, EmailStatus};
use tutorbook_notify::DeliveryOutcome;

use crate::error::BookingError;
use crate::models::{EmailDelivery, NotificationRecipient, SendEmailResponse};
use crate::orchestrator::BookingOrchestrator;

pub(crate) const ALREADY_SENT: &str = "already sent";

/// Result of a guarded send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Guarded {
    /// Another call owns (or completed) this email.
    AlreadyClaimed,
    Attempted(DeliveryOutcome),
}

impl Guarded {
    pub(crate) fn into_delivery(self, kind: EmailKind) -> EmailDelivery {
        let outcome = match self {
            Guarded::AlreadyClaimed => DeliveryOutcome::Skipped {
                reason: ALREADY_SENT.to_string(),
            },
            Guarded::Attempted(outcome) => outcome,
        };
        EmailDelivery::new(kind.as_str(), outcome)
    }
}

fn bookkeeping_failure(err: impl std::fmt::Display) -> DeliveryOutcome {
    DeliveryOutcome::Failed {
        error: format!("email guard unavailable: {}", err),
        attempts: 0,
    }
}

/// Maps an explicitly requested send onto the HTTP contract: skipped is a
/// validation error, failed is a delivery error.
fn requested_send_result(outcome: DeliveryOutcome) -> Result<SendEmailResponse, BookingError> {
    match outcome {
        DeliveryOutcome::Sent { message_id } => Ok(SendEmailResponse {
            success: true,
            message_id: Some(message_id),
        }),
        DeliveryOutcome::Skipped { reason } => Err(BookingError::Validation(reason)),
        DeliveryOutcome::Failed { error, attempts } => Err(BookingError::Delivery(format!(
            "{} (after {} attempt(s))",
            error, attempts
        ))),
    }
}

impl BookingOrchestrator {
    /// Claims `(booking, kind)`, sends, then completes or releases the claim.
    ///
    /// Guard bookkeeping errors are reported as a failed delivery; they never
    /// fail the lifecycle operation that triggered the email.
    pub(crate) async fn send_guarded<F, Fut>(&self, booking_id: &str, kind: EmailKind, send: F) -> Guarded
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DeliveryOutcome>,
    {
        match self.store.claim_email(booking_id, kind, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(booking_id = %booking_id, "[Booking] Email {} already claimed", kind.as_str());
                return Guarded::AlreadyClaimed;
            }
            Err(e) => {
                error!(booking_id = %booking_id, "[Booking] Could not claim email {}: {}", kind.as_str(), e);
                return Guarded::Attempted(bookkeeping_failure(e));
            }
        }

        let outcome = send().await;
        let bookkeeping = match &outcome {
            DeliveryOutcome::Sent { message_id } => {
                self.store
                    .complete_email(booking_id, kind, message_id, Utc::now())
                    .await
            }
            _ => self.store.release_email(booking_id, kind).await,
        };
        if let Err(e) = bookkeeping {
            error!(booking_id = %booking_id, "[Booking] Could not record email {}: {}", kind.as_str(), e);
        }
        Guarded::Attempted(outcome)
    }

    /// Payer invoice and tutor order email, each at most once per booking.
    pub(crate) async fn send_payment_confirmed_pair(&self, booking: &Booking) -> Vec<EmailDelivery> {
        let (payer, tutor_copy) = self.guarded_payment_confirmed_pair(booking).await;
        vec![
            payer.into_delivery(EmailKind::PaymentConfirmedPayer),
            tutor_copy.into_delivery(EmailKind::PaymentConfirmedTutor),
        ]
    }

    async fn guarded_payment_confirmed_pair(&self, booking: &Booking) -> (Guarded, Guarded) {
        let (tutor, slots) = self.email_context(booking).await;
        let payer = self
            .send_guarded(&booking.id, EmailKind::PaymentConfirmedPayer, || {
                self.dispatcher
                    .notify_payer_payment_confirmed(booking, tutor.as_ref(), &slots)
            })
            .await;
        let tutor_copy = self
            .send_guarded(&booking.id, EmailKind::PaymentConfirmedTutor, || {
                self.dispatcher
                    .notify_tutor_new_order(booking, tutor.as_ref(), &slots)
            })
            .await;
        (payer, tutor_copy)
    }

    pub(crate) async fn send_tutor_accepted(&self, booking: &Booking) -> EmailDelivery {
        let (tutor, slots) = self.email_context(booking).await;
        self.send_guarded(&booking.id, EmailKind::TutorAccepted, || {
            self.dispatcher
                .notify_payer_tutor_accepted(booking, tutor.as_ref(), &slots)
        })
        .await
        .into_delivery(EmailKind::TutorAccepted)
    }

    /// Payer notice with the refunded amount, plus the tutor's copy when the
    /// tutor declined.
    pub(crate) async fn send_cancellation_emails(
        &self,
        booking: &Booking,
        refund_amount: Option<i64>,
        tutor_declined: bool,
    ) -> Vec<EmailDelivery> {
        let (tutor, slots) = self.email_context(booking).await;
        let mut deliveries = vec![self
            .send_guarded(&booking.id, EmailKind::CancellationPayer, || {
                self.dispatcher
                    .notify_payer_cancelled(booking, tutor.as_ref(), &slots, refund_amount)
            })
            .await
            .into_delivery(EmailKind::CancellationPayer)];
        if tutor_declined {
            deliveries.push(
                self.send_guarded(&booking.id, EmailKind::CancellationTutor, || {
                    self.dispatcher.notify_tutor_cancelled_by_them(
                        booking,
                        tutor.as_ref(),
                        &slots,
                        refund_amount,
                    )
                })
                .await
                .into_delivery(EmailKind::CancellationTutor),
            );
        }
        deliveries
    }

    /// Sends the payment confirmation pair (payer invoice and tutor order
    /// email), skipping whichever was already sent. Failed earlier attempts
    /// are retried. The response carries the payer's message id.
    pub async fn send_invoice(&self, booking_id: &str) -> Result<SendEmailResponse, BookingError> {
        let booking = self.load_booking(booking_id).await?;
        let stage = booking.stage();
        if !matches!(stage, BookingStage::Paid | BookingStage::TutorConfirmed) {
            return Err(BookingError::InvalidTransition {
                booking_id: booking.id,
                stage,
                action: "invoiced",
            });
        }

        let (payer, tutor_copy) = self.guarded_payment_confirmed_pair(&booking).await;
        let invoice = match payer {
            Guarded::Attempted(outcome) => requested_send_result(outcome),
            Guarded::AlreadyClaimed => self.recorded_invoice(&booking.id).await,
        };
        let order = match tutor_copy {
            Guarded::Attempted(DeliveryOutcome::Failed { error, attempts }) => Err(BookingError::Delivery(
                format!("tutor order email: {} (after {} attempt(s))", error, attempts),
            )),
            Guarded::Attempted(DeliveryOutcome::Skipped { reason }) => {
                warn!(booking_id = %booking.id, "[Booking] Tutor order email skipped: {}", reason);
                Ok(())
            }
            _ => Ok(()),
        };

        let response = invoice?;
        order?;
        info!(booking_id = %booking.id, "[Booking] Invoice pair delivered");
        Ok(response)
    }

    async fn recorded_invoice(&self, booking_id: &str) -> Result<SendEmailResponse, BookingError> {
        let record = self
            .store
            .find_email(booking_id, EmailKind::PaymentConfirmedPayer)
            .await?;
        match record {
            Some(record) if record.status == EmailStatus::Sending => Err(BookingError::Conflict(format!(
                "the invoice for booking {} is being sent",
                booking_id
            ))),
            Some(record) => Ok(SendEmailResponse {
                success: true,
                message_id: record.message_id,
            }),
            None => Ok(SendEmailResponse {
                success: true,
                message_id: None,
            }),
        }
    }

    /// Re-sends the booking summary to the payer or the tutor. Not guarded:
    /// every call sends.
    pub async fn send_booking_notification(
        &self,
        booking_id: &str,
        recipient: NotificationRecipient,
    ) -> Result<SendEmailResponse, BookingError> {
        let booking = self.load_booking(booking_id).await?;
        let stage = booking.stage();
        if matches!(stage, BookingStage::Cancelled | BookingStage::Refunded) {
            return Err(BookingError::InvalidTransition {
                booking_id: booking.id,
                stage,
                action: "notified",
            });
        }
        let (tutor, slots) = self.email_context(&booking).await;
        let outcome = match recipient {
            NotificationRecipient::Student => {
                self.dispatcher
                    .notify_payer_payment_pending(&booking, tutor.as_ref(), &slots)
                    .await
            }
            NotificationRecipient::Tutor => {
                self.dispatcher
                    .notify_tutor_of_new_booking(&booking, tutor.as_ref(), &slots)
                    .await
            }
        };
        requested_send_result(outcome)
    }
}
