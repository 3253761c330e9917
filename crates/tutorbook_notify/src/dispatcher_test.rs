// --- File: crates/tutorbook_notify/src/dispatcher_test.rs ---
#[cfg(test)]
mod tests {
    use crate::dispatcher::{is_valid_email, DeliveryOutcome, NotificationDispatcher};
    use crate::transport::RecordingMailTransport;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use tutorbook_common::models::{Booking, PayerContact, PaymentStatus, Slot, Tutor};
    use tutorbook_common::RetryPolicy;
    use tutorbook_config::BookingConfig;

    fn tutor() -> Tutor {
        Tutor {
            id: "t-1".into(),
            name: "Rasa".into(),
            email: "rasa@example.com".into(),
        }
    }

    fn booking(payer_email: &str) -> Booking {
        Booking {
            id: "b-1".into(),
            tutor_id: "t-1".into(),
            slot_ids: vec!["s-1".into(), "s-2".into()],
            payer: PayerContact {
                name: "Jonas".into(),
                email: payer_email.into(),
                phone: Some("+37060000000".into()),
            },
            topic: None,
            lesson_category: "general".into(),
            lesson_price: 2500,
            total_price: 5000,
            currency: "eur".into(),
            payment_status: PaymentStatus::Paid,
            confirmed_by_tutor: None,
            payment_intent_id: Some("pi_1".into()),
            paid_at: None,
            tutor_responded_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            price_override_reason: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    fn slots() -> Vec<Slot> {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap();
        vec![
            Slot::new("s-1", "t-1", start, start + chrono::Duration::minutes(30)),
            Slot::new("s-2", "t-1", start + chrono::Duration::hours(1), start + chrono::Duration::minutes(90)),
        ]
    }

    fn dispatcher(transport: &RecordingMailTransport, attempts: u32) -> NotificationDispatcher {
        NotificationDispatcher::new(
            Arc::new(transport.clone()),
            RetryPolicy::fixed(attempts, Duration::from_millis(2000)),
            chrono_tz::Europe::Vilnius,
        )
    }

    #[test]
    fn test_email_syntax_check() {
        assert!(is_valid_email("payer@example.com"));
        assert!(is_valid_email("  payer@example.com "));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("payer"));
    }

    #[tokio::test]
    async fn test_invalid_payer_address_is_skipped_without_sending() {
        let transport = RecordingMailTransport::new();
        let outcome = dispatcher(&transport, 6)
            .notify_payer_payment_confirmed(&booking("not-an-email"), Some(&tutor()), &slots())
            .await;
        assert!(matches!(outcome, DeliveryOutcome::Skipped { .. }));
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let transport = RecordingMailTransport::new();
        transport.fail_next(2).await;
        let outcome = dispatcher(&transport, 6)
            .notify_tutor_new_order(&booking("jonas@example.com"), Some(&tutor()), &slots())
            .await;
        assert!(outcome.is_sent());
        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "rasa@example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let transport = RecordingMailTransport::new();
        transport.fail_always(true).await;
        let outcome = dispatcher(&transport, 6)
            .notify_payer_tutor_accepted(&booking("jonas@example.com"), Some(&tutor()), &slots())
            .await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Failed {
                error: "mail transport failed: 451 scripted failure".into(),
                attempts: 6
            }
        );
    }

    #[tokio::test]
    async fn test_unregistered_tutor_is_skipped() {
        let transport = RecordingMailTransport::new();
        let outcome = dispatcher(&transport, 1)
            .notify_tutor_of_new_booking(&booking("jonas@example.com"), None, &slots())
            .await;
        assert!(matches!(outcome, DeliveryOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_email_carries_refund_amount() {
        let transport = RecordingMailTransport::new();
        let outcome = dispatcher(&transport, 1)
            .notify_payer_cancelled(&booking("jonas@example.com"), Some(&tutor()), &slots(), Some(5000))
            .await;
        assert!(outcome.is_sent());
        let sent = transport.sent_to("jonas@example.com").await;
        assert!(sent[0].text_body.contains("€50.00"));
        assert!(sent[0].html_body.as_deref().unwrap_or_default().contains("€50.00"));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(DeliveryOutcome::Sent {
            message_id: "<m@x>".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "sent");
        assert_eq!(json["messageId"], "<m@x>");
    }

    #[test]
    fn test_from_config_rejects_unknown_zone() {
        let config = BookingConfig {
            time_zone: "Mars/Olympus".into(),
            ..BookingConfig::default()
        };
        let transport = RecordingMailTransport::new();
        assert!(NotificationDispatcher::from_config(Arc::new(transport), &config).is_err());
    }
}
