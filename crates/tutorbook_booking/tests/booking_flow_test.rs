//! End-to-end booking workflow tests against the simulated gateway, on the
//! in-memory store unless a test says otherwise.


use chrono::{Duration, Utc};
use fixtures::*;
use std::collections::HashMap;
use std::sync::Arc;
use tutorbook_booking::models::{
    NotificationRecipient, ReconcileOutcome, RespondResponse, VerifyPaymentRequest, WebhookOutcome,
};
use tutorbook_booking::{spawn_expiry_sweep, BookingError, RequestContext, PAYMENT_TIMEOUT_REASON};
use tutorbook_common::models::{Notification, PaymentRecordStatus, PaymentStatus};
use tutorbook_common::PaymentIntent;
use tutorbook_notify::format_money;
use tutorbook_stripe::{parse_event, SimulatedFailures};

fn foreign_succeeded_intent(id: &str, booking_id: &str, amount: i64) -> PaymentIntent {
    PaymentIntent {
        id: id.to_string(),
        status: "succeeded".to_string(),
        amount,
        amount_received: Some(amount),
        currency: "eur".to_string(),
        client_secret: None,
        metadata: HashMap::from([("booking_id".to_string(), booking_id.to_string())]),
    }
}

// --- Happy path ---

#[tokio::test]
async fn test_two_slot_booking_is_priced_and_reserved() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 3).await;

    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots[..2]))
        .await
        .unwrap();
    assert_eq!(created.booking.total_price, 5000);
    assert_eq!(created.booking.lesson_price, 2500);
    assert_eq!(created.booking.payment_status, PaymentStatus::Pending);
    assert!(created.notifications.iter().all(|n| n.outcome.is_sent()));

    assert_eq!(free_slot_ids(&app, "t-1").await, vec![slots[2].clone()]);
    let notifications = app.orchestrator.list_notifications("t-1", true).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].message.contains("Ona booked 2 lesson(s)"));
}

#[tokio::test]
async fn test_payment_reconciliation_sends_one_email_pair() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 2).await;
    let (booking, intent_id) = paid_booking(&app, &slots).await;

    assert_eq!(booking.payment_status, PaymentStatus::Paid);
    assert_eq!(booking.payment_intent_id.as_deref(), Some(intent_id.as_str()));
    assert!(booking.paid_at.is_some());
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Payment received").await, 1);
    assert_eq!(emails_with_subject(&app, &tutor_email("t-1"), "Paid lesson booking").await, 1);

    let payments = app.orchestrator.list_payments(&booking.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentRecordStatus::Succeeded);
    assert_eq!(payments[0].amount, 5000);
}

#[tokio::test]
async fn test_intent_is_reused_until_cancelled() {
    let app = test_app(false).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();

    let first = app
        .orchestrator
        .create_payment_intent(&payer(), &created.booking.id)
        .await
        .unwrap();
    let second = app
        .orchestrator
        .create_payment_intent(&payer(), &created.booking.id)
        .await
        .unwrap();
    assert_eq!(first.payment_intent_id, second.payment_intent_id);
    assert_eq!(first.amount, 2500);
    assert_eq!(app.gateway.intent_count().await, 1);
}

#[tokio::test]
async fn test_tutor_confirmation_is_idempotent() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, _) = paid_booking(&app, &slots).await;

    let first = app.orchestrator.confirm_booking(&tutor(), &booking.id).await.unwrap();
    assert_eq!(first.booking.confirmed_by_tutor, Some(true));
    assert!(first.notification.is_some());
    let again = app.orchestrator.confirm_booking(&tutor(), &booking.id).await.unwrap();
    assert!(again.success);
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Tutor t-1 confirmed").await, 1);

    let err = app
        .orchestrator
        .cancel_booking(&payer(), &booking.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_payer_cannot_confirm() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, _) = paid_booking(&app, &slots).await;
    let err = app.orchestrator.confirm_booking(&payer(), &booking.id).await.unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
}

#[tokio::test]
async fn test_pending_booking_cannot_be_confirmed() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();
    let err = app
        .orchestrator
        .confirm_booking(&tutor(), &created.booking.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { action: "confirmed", .. }));
}

// --- Decline and refund ---

#[tokio::test]
async fn test_tutor_decline_refunds_and_frees_slots() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 2).await;
    let (booking, intent_id) = paid_booking(&app, &slots).await;

    let cancelled = app
        .orchestrator
        .cancel_booking(&tutor(), &booking.id, None)
        .await
        .unwrap();
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    assert_eq!(cancelled.refund_amount, Some(5000));
    assert_eq!(cancelled.refund_status, "succeeded");
    assert_eq!(cancelled.payment_intent_id.as_deref(), Some(intent_id.as_str()));
    assert!(!cancelled.already_settled);

    let stored = app.orchestrator.get_booking(&booking.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
    assert_eq!(stored.confirmed_by_tutor, Some(false));
    assert_eq!(stored.cancellation_reason.as_deref(), Some("declined by tutor"));
    assert_eq!(free_slot_ids(&app, "t-1").await.len(), 2);

    let refunds = app.gateway.refunds().await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, 5000);
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Booking").await, 1);
    assert_eq!(emails_with_subject(&app, &tutor_email("t-1"), "You declined").await, 1);

    let notice = app
        .mail
        .sent_to(PAYER_EMAIL)
        .await
        .into_iter()
        .find(|email| email.subject.starts_with("Booking"))
        .unwrap();
    assert!(notice.text_body.contains(&format_money(refunds[0].amount, "eur")));
    assert!(notice.text_body.contains("€50.00"));
}

#[tokio::test]
async fn test_refund_amount_matches_records() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 3).await;
    let (booking, _) = paid_booking(&app, &slots).await;

    let cancelled = app
        .orchestrator
        .cancel_booking(&admin(), &booking.id, Some("payer moved abroad".into()))
        .await
        .unwrap();
    let payments = app.orchestrator.list_payments(&booking.id).await.unwrap();
    let refunded: Vec<_> = payments
        .iter()
        .filter(|p| p.status == PaymentRecordStatus::Refunded)
        .collect();
    assert_eq!(refunded.len(), 1);
    assert_eq!(refunded[0].refunded_amount, cancelled.refund_amount);
    assert_eq!(cancelled.refund_amount, Some(booking.total_price));

    // A second cancel reports the recorded settlement without refunding again.
    let again = app
        .orchestrator
        .cancel_booking(&admin(), &booking.id, None)
        .await
        .unwrap();
    assert!(again.already_settled);
    assert_eq!(again.refund_amount, cancelled.refund_amount);
    assert_eq!(app.gateway.refunds().await.len(), 1);

    // The tutor hears about a cancellation made by someone else in-app.
    let notices = app.orchestrator.list_notifications("t-1", true).await.unwrap();
    let notice = notices
        .iter()
        .find(|n| n.message.contains("an administrator"))
        .unwrap();

    // Answering the notice only dismisses it.
    let answered = app
        .orchestrator
        .respond_to_notification(&tutor(), &notice.id, true)
        .await
        .unwrap();
    match answered {
        RespondResponse::Slot(result) => {
            assert!(result.success);
            assert_eq!(result.slot_id, None);
            assert!(!result.slot_released);
        }
        other => panic!("expected a dismissed notice, got {:?}", other),
    }
    assert!(app.orchestrator.list_notifications("t-1", true).await.unwrap().is_empty());
    let stored = app.orchestrator.get_booking(&booking.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn test_lost_refund_audit_still_notifies_the_payer() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, _) = paid_booking(&app, &slots).await;
    let memory = app.memory.clone().unwrap();
    memory.set_payment_writes_failing(true);

    let cancelled = app
        .orchestrator
        .cancel_booking(&tutor(), &booking.id, None)
        .await
        .unwrap();
    memory.set_payment_writes_failing(false);

    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    assert_eq!(cancelled.refund_amount, Some(2500));
    assert_eq!(app.gateway.refunds().await.len(), 1);
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Booking").await, 1);
    assert_eq!(free_slot_ids(&app, "t-1").await, slots);

    let payments = app.orchestrator.list_payments(&booking.id).await.unwrap();
    assert!(payments.iter().all(|p| p.refund_id.is_none()));
}

#[tokio::test]
async fn test_refund_failure_leaves_booking_untouched() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, _) = paid_booking(&app, &slots).await;
    app.gateway
        .set_failures(SimulatedFailures {
            refund: true,
            ..SimulatedFailures::default()
        })
        .await;

    let err = app
        .orchestrator
        .cancel_booking(&tutor(), &booking.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::PaymentProvider(_)));

    let stored = app.orchestrator.get_booking(&booking.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert!(free_slot_ids(&app, "t-1").await.is_empty());
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Booking").await, 0);
}

#[tokio::test]
async fn test_unpaid_cancel_releases_without_refund() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();
    let intent = app
        .orchestrator
        .create_payment_intent(&payer(), &created.booking.id)
        .await
        .unwrap();

    let cancelled = app
        .orchestrator
        .cancel_booking(&payer(), &created.booking.id, None)
        .await
        .unwrap();
    assert_eq!(cancelled.payment_status, PaymentStatus::Cancelled);
    assert_eq!(cancelled.refund_amount, None);
    assert_eq!(cancelled.refund_status, "none");
    assert_eq!(free_slot_ids(&app, "t-1").await, slots);

    let open = app.gateway.intent(&intent.payment_intent_id).await.unwrap();
    assert!(open.is_canceled());
}

// --- Conflicts and validation ---

#[tokio::test]
async fn test_second_payer_gets_slot_unavailable() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 2).await;
    app.orchestrator
        .create_booking(&payer(), booking_request(&slots[..1]))
        .await
        .unwrap();

    let err = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap_err();
    match err {
        BookingError::SlotUnavailable { slot_ids } => assert_eq!(slot_ids, vec![slots[0].clone()]),
        other => panic!("expected SlotUnavailable, got {:?}", other),
    }
    // The free slot of the failed request was not reserved.
    assert_eq!(free_slot_ids(&app, "t-1").await, vec![slots[1].clone()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_have_one_winner() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let orchestrator = Arc::clone(&app.orchestrator);
        let request = booking_request(&slots);
        tasks.push(tokio::spawn(async move {
            orchestrator.create_booking(&payer(), request).await
        }));
    }
    let mut won = 0;
    let mut lost = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => won += 1,
            Err(BookingError::SlotUnavailable { .. }) => lost += 1,
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!((won, lost), (1, 7));
}

#[tokio::test]
async fn test_cross_tutor_request_reserves_nothing() {
    let app = test_app(true).await;
    let first = seed_tutor(&app, "t-1", 1).await;
    let second = seed_tutor(&app, "t-2", 1).await;
    let mixed = vec![first[0].clone(), second[0].clone()];

    let err = app
        .orchestrator
        .create_booking(&payer(), booking_request(&mixed))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
    assert_eq!(free_slot_ids(&app, "t-1").await, first);
    assert_eq!(free_slot_ids(&app, "t-2").await, second);
}

#[tokio::test]
async fn test_price_is_snapshotted_at_creation() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 2).await;
    let before = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots[..1]))
        .await
        .unwrap();

    app.orchestrator.set_lesson_price(&admin(), 3000).await.unwrap();
    let after = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots[1..]))
        .await
        .unwrap();

    let stored = app.orchestrator.get_booking(&before.booking.id).await.unwrap();
    assert_eq!(stored.total_price, 2500);
    assert_eq!(after.booking.total_price, 3000);
    assert_eq!(app.orchestrator.lesson_price().await.unwrap().amount, 3000);
    assert!(app.orchestrator.set_lesson_price(&admin(), 0).await.is_err());
}

#[tokio::test]
async fn test_price_override_only_before_intent() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 2).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();

    let repriced = app
        .orchestrator
        .override_total_price(&admin(), &created.booking.id, 4000, "sibling discount")
        .await
        .unwrap();
    assert_eq!(repriced.total_price, 4000);
    assert_eq!(repriced.price_override_reason.as_deref(), Some("sibling discount"));

    let intent = app
        .orchestrator
        .create_payment_intent(&payer(), &created.booking.id)
        .await
        .unwrap();
    assert_eq!(intent.amount, 4000);
    let err = app
        .orchestrator
        .override_total_price(&admin(), &created.booking.id, 3000, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Conflict(_)));
}

// --- Payment edge cases ---

#[tokio::test]
async fn test_foreign_intent_changes_nothing() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();

    let foreign = foreign_succeeded_intent("pi_foreign", "some-other-booking", 2500);
    app.gateway.insert_intent(foreign.clone()).await;
    let outcome = app
        .orchestrator
        .reconcile_succeeded_intent(&RequestContext::system(), &created.booking.id, &foreign)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Mismatched);

    let stored = app.orchestrator.get_booking(&created.booking.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Payment received").await, 0);
}

#[tokio::test]
async fn test_repeated_confirmation_paths_send_emails_once() {
    let app = test_app(false).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, intent_id) = booking_with_paid_intent(&app, &slots).await;
    let intent = app.gateway.intent(&intent_id).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let orchestrator = Arc::clone(&app.orchestrator);
        let intent = intent.clone();
        let booking_id = booking.id.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator
                .reconcile_succeeded_intent(&RequestContext::system(), &booking_id, &intent)
                .await
        }));
    }
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }
    let event = parse_event(
        serde_json::json!({
            "id": "evt_repeat",
            "object": "event",
            "created": Utc::now().timestamp(),
            "livemode": false,
            "type": "payment_intent.succeeded",
            "data": { "object": intent }
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap();
    let webhook = app
        .orchestrator
        .handle_payment_event(&RequestContext::system(), &event)
        .await
        .unwrap();
    assert_eq!(webhook, WebhookOutcome::Reconciled(ReconcileOutcome::AlreadyPaid));
    let verified = app
        .orchestrator
        .verify_payment(
            &payer(),
            VerifyPaymentRequest {
                booking_id: booking.id.clone(),
                payment_intent_id: Some(intent_id.clone()),
            },
        )
        .await
        .unwrap();

    assert_eq!(outcomes.iter().filter(|o| **o == ReconcileOutcome::Paid).count(), 1);
    assert_eq!(verified.reconciliation, Some(ReconcileOutcome::AlreadyPaid));
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Payment received").await, 1);
    assert_eq!(emails_with_subject(&app, &tutor_email("t-1"), "Paid lesson booking").await, 1);
}

#[tokio::test]
async fn test_verify_in_poll_mode_asks_the_gateway() {
    let app = test_app(false).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, _) = booking_with_paid_intent(&app, &slots).await;

    let verified = app
        .orchestrator
        .verify_payment(
            &payer(),
            VerifyPaymentRequest {
                booking_id: booking.id.clone(),
                payment_intent_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(verified.status, "succeeded");
    assert_eq!(verified.payment_status, PaymentStatus::Paid);
    assert_eq!(verified.reconciliation, Some(ReconcileOutcome::Paid));
}

#[tokio::test]
async fn test_verify_in_webhook_mode_falls_back_after_waiting() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, _) = booking_with_paid_intent(&app, &slots).await;

    let verified = app
        .orchestrator
        .verify_payment(
            &payer(),
            VerifyPaymentRequest {
                booking_id: booking.id.clone(),
                payment_intent_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(verified.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_verify_stops_waiting_once_the_booking_is_cancelled() {
    let app = test_app_with(true, |settings| {
        settings.payment_poll_attempts = 200;
        settings.payment_poll_interval = std::time::Duration::from_millis(25);
    })
    .await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();
    let booking_id = created.booking.id.clone();

    let orchestrator = app.orchestrator.clone();
    let id = booking_id.clone();
    let waiting = tokio::spawn(async move {
        let started = std::time::Instant::now();
        let verified = orchestrator
            .verify_payment(
                &payer(),
                VerifyPaymentRequest {
                    booking_id: id,
                    payment_intent_id: None,
                },
            )
            .await;
        (verified, started.elapsed())
    });
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    app.orchestrator
        .cancel_booking(&payer(), &booking_id, None)
        .await
        .unwrap();

    let (verified, elapsed) = waiting.await.unwrap();
    let verified = verified.unwrap();
    assert_eq!(verified.payment_status, PaymentStatus::Cancelled);
    assert!(verified.reconciliation.is_none());
    assert!(elapsed < std::time::Duration::from_secs(4));
}

#[tokio::test]
async fn test_verify_without_payment_reports_not_found() {
    let app = test_app(false).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();
    let verified = app
        .orchestrator
        .verify_payment(
            &payer(),
            VerifyPaymentRequest {
                booking_id: created.booking.id.clone(),
                payment_intent_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(verified.status, "not_found");
    assert_eq!(verified.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_second_succeeded_intent_is_refunded() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, intent_id) = paid_booking(&app, &slots).await;

    let duplicate = foreign_succeeded_intent("pi_duplicate", &booking.id, 2500);
    app.gateway.insert_intent(duplicate.clone()).await;
    let outcome = app
        .orchestrator
        .reconcile_succeeded_intent(&RequestContext::system(), &booking.id, &duplicate)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::DuplicateRefunded);

    let refunds = app.gateway.refunds().await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].payment_intent_id.as_deref(), Some("pi_duplicate"));
    let stored = app.orchestrator.get_booking(&booking.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.payment_intent_id.as_deref(), Some(intent_id.as_str()));

    // Seeing the duplicate again does not refund twice.
    app.orchestrator
        .reconcile_succeeded_intent(&RequestContext::system(), &booking.id, &duplicate)
        .await
        .unwrap();
    assert_eq!(app.gateway.refunds().await.len(), 1);
}

// --- Expiry ---

#[tokio::test]
async fn test_late_payment_after_expiry_is_refunded() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();

    let report = app
        .orchestrator
        .expire_stale_bookings(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.expired, 1);
    let expired = app.orchestrator.get_booking(&created.booking.id).await.unwrap();
    assert_eq!(expired.payment_status, PaymentStatus::Cancelled);
    assert_eq!(expired.cancellation_reason.as_deref(), Some(PAYMENT_TIMEOUT_REASON));
    assert_eq!(free_slot_ids(&app, "t-1").await, slots);

    let late = foreign_succeeded_intent("pi_late", &created.booking.id, 2500);
    app.gateway.insert_intent(late.clone()).await;
    let outcome = app
        .orchestrator
        .reconcile_succeeded_intent(&RequestContext::system(), &created.booking.id, &late)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::LateRefunded);

    let stored = app.orchestrator.get_booking(&created.booking.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
    assert_eq!(app.gateway.refunds().await[0].amount, 2500);
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Booking").await, 1);

    let again = app
        .orchestrator
        .reconcile_succeeded_intent(&RequestContext::system(), &created.booking.id, &late)
        .await
        .unwrap();
    assert_eq!(again, ReconcileOutcome::AlreadySettled);
    assert_eq!(app.gateway.refunds().await.len(), 1);
}

#[tokio::test]
async fn test_expiry_reconciles_paid_bookings_instead() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, _) = booking_with_paid_intent(&app, &slots).await;

    let report = app
        .orchestrator
        .expire_stale_bookings(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!((report.expired, report.reconciled), (0, 1));
    let stored = app.orchestrator.get_booking(&booking.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_fresh_bookings_survive_the_sweep() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    app.orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();
    let report = app.orchestrator.expire_stale_bookings(Utc::now()).await.unwrap();
    assert_eq!(report.expired, 0);
    assert!(free_slot_ids(&app, "t-1").await.is_empty());
}

#[tokio::test]
async fn test_background_sweep_expires_bookings() {
    let app = test_app_with(true, |settings| {
        settings.pending_expiry = Duration::milliseconds(1);
    })
    .await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let sweep = spawn_expiry_sweep(
        Arc::clone(&app.orchestrator),
        std::time::Duration::from_millis(10),
    );
    let mut status = PaymentStatus::Pending;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        status = app
            .orchestrator
            .get_booking(&created.booking.id)
            .await
            .unwrap()
            .payment_status;
        if status != PaymentStatus::Pending {
            break;
        }
    }
    sweep.abort();
    assert_eq!(status, PaymentStatus::Cancelled);
}

// --- Notifications and emails on demand ---

#[tokio::test]
async fn test_respond_accepts_once() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, _) = paid_booking(&app, &slots).await;
    let notification = app.orchestrator.list_notifications("t-1", true).await.unwrap()[0].clone();
    assert_eq!(notification.booking_id.as_deref(), Some(booking.id.as_str()));

    let response = app
        .orchestrator
        .respond_to_notification(&tutor(), &notification.id, true)
        .await
        .unwrap();
    match response {
        RespondResponse::Confirmed(confirmed) => {
            assert_eq!(confirmed.booking.confirmed_by_tutor, Some(true))
        }
        other => panic!("expected confirmation, got {:?}", other),
    }
    assert!(app.orchestrator.list_notifications("t-1", true).await.unwrap().is_empty());

    let err = app
        .orchestrator
        .respond_to_notification(&tutor(), &notification.id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Conflict(_)));
}

#[tokio::test]
async fn test_failed_decline_keeps_notification_actionable() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    paid_booking(&app, &slots).await;
    let notification = app.orchestrator.list_notifications("t-1", true).await.unwrap()[0].clone();
    app.gateway
        .set_failures(SimulatedFailures {
            refund: true,
            ..SimulatedFailures::default()
        })
        .await;

    assert!(app
        .orchestrator
        .respond_to_notification(&tutor(), &notification.id, false)
        .await
        .is_err());
    assert_eq!(app.orchestrator.list_notifications("t-1", true).await.unwrap().len(), 1);

    app.gateway.set_failures(SimulatedFailures::default()).await;
    let response = app
        .orchestrator
        .respond_to_notification(&tutor(), &notification.id, false)
        .await
        .unwrap();
    assert!(matches!(response, RespondResponse::Cancelled(c) if c.payment_status == PaymentStatus::Refunded));
}

#[tokio::test]
async fn test_declined_slot_request_spares_a_live_booking() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 2).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots[..1]))
        .await
        .unwrap();
    app.store
        .reserve_slots(&slots[1..], "t-1", "legacy-request")
        .await
        .unwrap();
    for (id, slot_id) in [("n-held", &slots[0]), ("n-orphan", &slots[1])] {
        app.store
            .insert_notification(&Notification {
                id: id.to_string(),
                user_id: "t-1".to_string(),
                message: format!("Lesson request for {}", slot_id),
                read: false,
                booking_id: None,
                slot_id: Some(slot_id.clone()),
                created_at: base_time(),
            })
            .await
            .unwrap();
    }

    let held = app
        .orchestrator
        .respond_to_notification(&tutor(), "n-held", false)
        .await
        .unwrap();
    assert!(matches!(held, RespondResponse::Slot(ref r) if !r.slot_released));
    let stored = app.orchestrator.get_booking(&created.booking.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(free_slot_ids(&app, "t-1").await.is_empty());
    let err = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots[..1]))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SlotUnavailable { .. }));

    let orphan = app
        .orchestrator
        .respond_to_notification(&tutor(), "n-orphan", false)
        .await
        .unwrap();
    assert!(matches!(orphan, RespondResponse::Slot(ref r) if r.slot_released));
    assert_eq!(free_slot_ids(&app, "t-1").await, vec![slots[1].clone()]);
}

#[tokio::test]
async fn test_invoice_is_sent_at_most_once() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let (booking, _) = paid_booking(&app, &slots).await;

    let first = app.orchestrator.send_invoice(&booking.id).await.unwrap();
    let second = app.orchestrator.send_invoice(&booking.id).await.unwrap();
    assert!(first.success && second.success);
    assert!(first.message_id.is_some());
    assert_eq!(first.message_id, second.message_id);
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Payment received").await, 1);
    assert_eq!(emails_with_subject(&app, &tutor_email("t-1"), "Paid lesson booking").await, 1);
}

#[tokio::test]
async fn test_invoice_retries_after_failed_delivery() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    app.mail.fail_always(true).await;
    let (booking, _) = paid_booking(&app, &slots).await;
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Payment received").await, 0);

    let err = app.orchestrator.send_invoice(&booking.id).await.unwrap_err();
    assert!(matches!(err, BookingError::Delivery(_)));

    app.mail.fail_always(false).await;
    let sent = app.orchestrator.send_invoice(&booking.id).await.unwrap();
    assert!(sent.message_id.is_some());
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Payment received").await, 1);
    assert_eq!(emails_with_subject(&app, &tutor_email("t-1"), "Paid lesson booking").await, 1);

}

#[tokio::test]
async fn test_invoice_retries_each_copy_independently() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    app.mail.fail_always(true).await;
    let (booking, _) = paid_booking(&app, &slots).await;
    app.mail.fail_always(false).await;

    // Both payer attempts fail, the tutor copy goes out.
    app.mail.fail_next(2).await;
    let err = app.orchestrator.send_invoice(&booking.id).await.unwrap_err();
    assert!(matches!(err, BookingError::Delivery(_)));
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Payment received").await, 0);
    assert_eq!(emails_with_subject(&app, &tutor_email("t-1"), "Paid lesson booking").await, 1);

    let sent = app.orchestrator.send_invoice(&booking.id).await.unwrap();
    assert!(sent.message_id.is_some());
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Payment received").await, 1);
    assert_eq!(emails_with_subject(&app, &tutor_email("t-1"), "Paid lesson booking").await, 1);
}

#[tokio::test]
async fn test_unpaid_booking_has_no_invoice() {
    let app = test_app(true).await;
    let slots = seed_tutor(&app, "t-1", 1).await;
    let created = app
        .orchestrator
        .create_booking(&payer(), booking_request(&slots))
        .await
        .unwrap();
    let err = app.orchestrator.send_invoice(&created.booking.id).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { action: "invoiced", .. }));

    let resent = app
        .orchestrator
        .send_booking_notification(&created.booking.id, NotificationRecipient::Tutor)
        .await
        .unwrap();
    assert!(resent.success);
}

// --- SQL store ---

#[tokio::test]
async fn test_booking_lifecycle_on_sqlite() {
    let app = test_app_on_sqlite(true).await;
    let slots = seed_tutor(&app, "t-1", 2).await;
    assert_eq!(free_slot_ids(&app, "t-1").await, slots);

    let (booking, intent_id) = paid_booking(&app, &slots[..1]).await;
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
    assert_eq!(booking.payment_intent_id.as_deref(), Some(intent_id.as_str()));
    assert_eq!(booking.confirmed_by_tutor, None);
    assert_eq!(booking.cancelled_at, None);
    assert_eq!(free_slot_ids(&app, "t-1").await, vec![slots[1].clone()]);
    assert_eq!(emails_with_subject(&app, PAYER_EMAIL, "Payment received").await, 1);
    assert_eq!(emails_with_subject(&app, &tutor_email("t-1"), "Paid lesson booking").await, 1);

    let notices = app.orchestrator.list_notifications("t-1", true).await.unwrap();
    assert_eq!(notices.len(), 1);
    let declined = app
        .orchestrator
        .respond_to_notification(&tutor(), &notices[0].id, false)
        .await
        .unwrap();
    match declined {
        RespondResponse::Cancelled(cancelled) => {
            assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
            assert_eq!(cancelled.refund_amount, Some(2500));
        }
        other => panic!("expected a cancellation, got {:?}", other),
    }

    assert_eq!(free_slot_ids(&app, "t-1").await, slots);
    let payments = app.orchestrator.list_payments(&booking.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentRecordStatus::Refunded);
    assert_eq!(payments[0].refunded_amount, Some(2500));
    assert!(app.orchestrator.list_notifications("t-1", true).await.unwrap().is_empty());
}
