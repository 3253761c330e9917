// --- File: crates/tutorbook_booking/src/expiry.rs ---
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tutorbook_common::models::PaymentStatus;
use tutorbook_db::CancellationSettlement;

use crate::context::{Actor, RequestContext};
use crate::error::BookingError;
use crate::logic::expiry_cutoff;
use crate::models::ExpireResponse;
use crate::orchestrator::BookingOrchestrator;

pub const PAYMENT_TIMEOUT_REASON: &str = "payment_timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Expired,
    Reconciled,
    Untouched,
}

impl BookingOrchestrator {
    /// Cancels pending bookings older than the expiry window, unless the
    /// gateway shows their payment did go through.
    pub async fn expire_stale_bookings(&self, now: DateTime<Utc>) -> Result<ExpireResponse, BookingError> {
        let cutoff = expiry_cutoff(now, self.settings.pending_expiry);
        let stale = self.store.list_pending_bookings_before(cutoff).await?;
        let mut report = ExpireResponse::default();
        for booking in stale {
            match self.expire_one(&booking.id).await {
                Ok(Expiry::Expired) => report.expired += 1,
                Ok(Expiry::Reconciled) => report.reconciled += 1,
                Ok(Expiry::Untouched) => {}
                Err(e) => {
                    warn!(booking_id = %booking.id, "[Booking] Could not expire booking: {}", e);
                    report.failed += 1;
                }
            }
        }
        if report != ExpireResponse::default() {
            info!(
                "[Booking] Expiry sweep: {} expired, {} reconciled, {} failed",
                report.expired, report.reconciled, report.failed
            );
        }
        Ok(report)
    }

    async fn expire_one(&self, booking_id: &str) -> Result<Expiry, BookingError> {
        let _guard = self.locks.acquire(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        if booking.payment_status != PaymentStatus::Pending {
            return Ok(Expiry::Untouched);
        }

        if let Some(intent) = self.locate_succeeded_intent(&booking).await? {
            debug!(booking_id = %booking_id, intent_id = %intent.id, "[Booking] Stale booking was paid, reconciling");
            self.reconcile_locked(booking, &intent).await?;
            return Ok(Expiry::Reconciled);
        }

        self.cancel_open_intent(&booking).await;
        let settled = self
            .store
            .settle_cancellation(&CancellationSettlement {
                booking_id: booking.id.clone(),
                expected_status: PaymentStatus::Pending,
                new_status: PaymentStatus::Cancelled,
                cancelled_at: Utc::now(),
                cancelled_by: Actor::System.as_str().to_string(),
                reason: Some(PAYMENT_TIMEOUT_REASON.to_string()),
                tutor_declined: false,
                release_slots: true,
            })
            .await?;
        if settled {
            info!(booking_id = %booking_id, "[Booking] Unpaid booking expired, slots released");
            Ok(Expiry::Expired)
        } else {
            Ok(Expiry::Untouched)
        }
    }
}

/// Runs the expiry sweep every `every` until the task is aborted.
pub fn spawn_expiry_sweep(orchestrator: Arc<BookingOrchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctx = RequestContext::system();
        info!(request_id = %ctx.request_id, "[Booking] Expiry sweep every {:?}", every);
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = orchestrator.expire_stale_bookings(Utc::now()).await {
                error!("[Booking] Expiry sweep failed: {}", e);
            }
        }
    })
}
