// --- File: crates/tutorbook_notify/src/dispatcher.rs ---
use chrono_tz::Tz;
use lettre::Address;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tutorbook_common::models::{Booking, Slot, Tutor};
use tutorbook_common::{
    retry_with_predicate, MailError, MailTransport, OutboundEmail, RetryPolicy, TutorbookError,
};
use tutorbook_config::BookingConfig;

use crate::templates::{self, BookingEmailContext, RenderedEmail};

/// What happened to one email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DeliveryOutcome {
    Sent { message_id: String },
    Skipped { reason: String },
    Failed { error: String, attempts: u32 },
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent { .. })
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Sent { message_id } => Some(message_id),
            _ => None,
        }
    }
}

/// Syntactic check only; nothing is looked up.
pub fn is_valid_email(address: &str) -> bool {
    let trimmed = address.trim();
    !trimmed.is_empty() && trimmed.parse::<Address>().is_ok()
}

/// Composes booking emails and delivers them with a bounded retry.
///
/// Delivery never fails the caller: every send ends in a [`DeliveryOutcome`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    retry: RetryPolicy,
    time_zone: Tz,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn MailTransport>, retry: RetryPolicy, time_zone: Tz) -> Self {
        Self {
            transport,
            retry,
            time_zone,
        }
    }

    /// Fixed-backoff retry and display zone taken from the booking settings.
    pub fn from_config(
        transport: Arc<dyn MailTransport>,
        config: &BookingConfig,
    ) -> Result<Self, TutorbookError> {
        let time_zone: Tz = config.time_zone.parse().map_err(|_| {
            TutorbookError::ConfigError(format!("unknown time zone '{}'", config.time_zone))
        })?;
        let retry = RetryPolicy::fixed(
            config.email_retry_attempts,
            Duration::from_millis(config.email_retry_backoff_ms),
        );
        Ok(Self::new(transport, retry, time_zone))
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Validates the address, then sends with retries on transient errors.
    pub async fn deliver(&self, to: &str, rendered: RenderedEmail) -> DeliveryOutcome {
        if !is_valid_email(to) {
            warn!(to = %to, subject = %rendered.subject, "[Notify] Skipping email to invalid address");
            return DeliveryOutcome::Skipped {
                reason: format!("invalid email address '{}'", to),
            };
        }

        let email = OutboundEmail {
            to: to.trim().to_string(),
            subject: rendered.subject,
            text_body: rendered.text,
            html_body: Some(rendered.html),
        };

        let transport = self.transport.clone();
        let result = retry_with_predicate(
            &self.retry,
            || {
                let transport = transport.clone();
                let email = email.clone();
                async move { transport.send(email).await }
            },
            MailError::is_transient,
        )
        .await;

        match result {
            Ok(receipt) => {
                info!(
                    to = %email.to,
                    message_id = %receipt.message_id,
                    "[Notify] Sent '{}'",
                    email.subject
                );
                DeliveryOutcome::Sent {
                    message_id: receipt.message_id,
                }
            }
            Err(exhausted) => match exhausted.error {
                MailError::InvalidAddress(address) => {
                    warn!(to = %address, "[Notify] Transport rejected address, skipping");
                    DeliveryOutcome::Skipped {
                        reason: format!("invalid email address '{}'", address),
                    }
                }
                other => {
                    error!(
                        to = %email.to,
                        attempts = exhausted.attempts,
                        error = %other,
                        "[Notify] Giving up on '{}'",
                        email.subject
                    );
                    DeliveryOutcome::Failed {
                        error: other.to_string(),
                        attempts: exhausted.attempts,
                    }
                }
            },
        }
    }

    fn context<'a>(
        &self,
        booking: &'a Booking,
        tutor: Option<&'a Tutor>,
        slots: &'a [Slot],
    ) -> BookingEmailContext<'a> {
        BookingEmailContext {
            booking,
            tutor,
            slots,
            time_zone: self.time_zone,
        }
    }

    async fn deliver_to_tutor(&self, tutor: Option<&Tutor>, rendered: RenderedEmail) -> DeliveryOutcome {
        match tutor {
            Some(tutor) => self.deliver(&tutor.email, rendered).await,
            None => {
                warn!("[Notify] Tutor is not registered, skipping '{}'", rendered.subject);
                DeliveryOutcome::Skipped {
                    reason: "tutor has no registered email".to_string(),
                }
            }
        }
    }

    pub async fn notify_tutor_of_new_booking(
        &self,
        booking: &Booking,
        tutor: Option<&Tutor>,
        slots: &[Slot],
    ) -> DeliveryOutcome {
        let rendered = templates::tutor_new_booking(&self.context(booking, tutor, slots));
        self.deliver_to_tutor(tutor, rendered).await
    }

    pub async fn notify_payer_payment_pending(
        &self,
        booking: &Booking,
        tutor: Option<&Tutor>,
        slots: &[Slot],
    ) -> DeliveryOutcome {
        let rendered = templates::payer_payment_pending(&self.context(booking, tutor, slots));
        self.deliver(&booking.payer.email, rendered).await
    }

    pub async fn notify_payer_payment_confirmed(
        &self,
        booking: &Booking,
        tutor: Option<&Tutor>,
        slots: &[Slot],
    ) -> DeliveryOutcome {
        let rendered = templates::payer_payment_confirmed(&self.context(booking, tutor, slots));
        self.deliver(&booking.payer.email, rendered).await
    }

    /// Tutor half of the payment-confirmed pair.
    pub async fn notify_tutor_new_order(
        &self,
        booking: &Booking,
        tutor: Option<&Tutor>,
        slots: &[Slot],
    ) -> DeliveryOutcome {
        let rendered = templates::tutor_new_order(&self.context(booking, tutor, slots));
        self.deliver_to_tutor(tutor, rendered).await
    }

    pub async fn notify_payer_tutor_accepted(
        &self,
        booking: &Booking,
        tutor: Option<&Tutor>,
        slots: &[Slot],
    ) -> DeliveryOutcome {
        let rendered = templates::payer_tutor_accepted(&self.context(booking, tutor, slots));
        self.deliver(&booking.payer.email, rendered).await
    }

    /// `refund_amount` is what the gateway reported; `None` means no charge.
    pub async fn notify_payer_cancelled(
        &self,
        booking: &Booking,
        tutor: Option<&Tutor>,
        slots: &[Slot],
        refund_amount: Option<i64>,
    ) -> DeliveryOutcome {
        let rendered =
            templates::payer_cancelled(&self.context(booking, tutor, slots), refund_amount);
        self.deliver(&booking.payer.email, rendered).await
    }

    pub async fn notify_tutor_cancelled_by_them(
        &self,
        booking: &Booking,
        tutor: Option<&Tutor>,
        slots: &[Slot],
        refund_amount: Option<i64>,
    ) -> DeliveryOutcome {
        let rendered =
            templates::tutor_cancelled_by_them(&self.context(booking, tutor, slots), refund_amount);
        self.deliver_to_tutor(tutor, rendered).await
    }
}
