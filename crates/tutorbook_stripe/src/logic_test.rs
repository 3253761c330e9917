// --- File: crates/tutorbook_stripe/src/logic_test.rs ---
#[cfg(test)]
mod tests {
    use crate::error::StripeError;
    use crate::logic::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tutorbook_common::{CreateIntentRequest, RefundReason, RefundRequest};

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_767_225_600;

    fn event_payload(event_type: &str) -> Vec<u8> {
        json!({
            "id": "evt_1",
            "object": "event",
            "api_version": "2024-06-20",
            "created": NOW,
            "livemode": false,
            "type": event_type,
            "data": {
                "object": {
                    "id": "pi_123",
                    "object": "payment_intent",
                    "status": "succeeded",
                    "amount": 5000,
                    "amount_received": 5000,
                    "currency": "eur",
                    "client_secret": "pi_123_secret_abc",
                    "metadata": { "booking_id": "b-42" }
                }
            },
            "request": { "id": null, "idempotency_key": null }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let payload = event_payload(EVENT_PAYMENT_INTENT_SUCCEEDED);
        let header = sign_payload(&payload, SECRET, NOW).unwrap();
        assert!(verify_stripe_signature_at(&payload, Some(&header), SECRET, 300, NOW + 10).is_ok());
    }

    #[test]
    fn test_any_matching_v1_signature_is_accepted() {
        let payload = event_payload(EVENT_PAYMENT_INTENT_SUCCEEDED);
        let good = compute_stripe_signature(&payload, SECRET, NOW).unwrap();
        let header = format!("t={},v0=legacy,v1={},v1={}", NOW, "0".repeat(64), good);
        assert!(verify_stripe_signature_at(&payload, Some(&header), SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let payload = event_payload(EVENT_PAYMENT_INTENT_SUCCEEDED);
        let header = sign_payload(&payload, SECRET, NOW).unwrap();
        let tampered = event_payload(EVENT_PAYMENT_INTENT_FAILED);
        let result = verify_stripe_signature_at(&tampered, Some(&header), SECRET, 300, NOW);
        assert!(matches!(result, Err(StripeError::WebhookSignatureError(msg)) if msg == "Signature mismatch"));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let payload = event_payload(EVENT_PAYMENT_INTENT_SUCCEEDED);
        let header = sign_payload(&payload, "whsec_other", NOW).unwrap();
        assert!(verify_stripe_signature_at(&payload, Some(&header), SECRET, 300, NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let payload = event_payload(EVENT_PAYMENT_INTENT_SUCCEEDED);
        let header = sign_payload(&payload, SECRET, NOW - 301).unwrap();
        let result = verify_stripe_signature_at(&payload, Some(&header), SECRET, 300, NOW);
        assert!(matches!(result, Err(StripeError::WebhookSignatureError(msg)) if msg.contains("tolerance")));
    }

    #[test]
    fn test_missing_or_malformed_header_is_rejected() {
        let payload = event_payload(EVENT_PAYMENT_INTENT_SUCCEEDED);
        for header in [None, Some(""), Some("v1=abc"), Some("t=abc,v1=abc"), Some(&*format!("t={}", NOW))] {
            assert!(
                verify_stripe_signature_at(&payload, header, SECRET, 300, NOW).is_err(),
                "header {:?} should be rejected",
                header
            );
        }
    }

    #[test]
    fn test_event_exposes_its_payment_intent() {
        let event = parse_event(&event_payload(EVENT_PAYMENT_INTENT_SUCCEEDED)).unwrap();
        assert_eq!(event.event_type, EVENT_PAYMENT_INTENT_SUCCEEDED);
        let intent = event.payment_intent().unwrap();
        assert_eq!(intent.id, "pi_123");
        assert!(intent.is_succeeded());
        assert_eq!(intent.booking_id(), Some("b-42"));
        assert_eq!(intent.captured_amount(), 5000);
    }

    #[test]
    fn test_non_intent_event_has_no_payment_intent() {
        let event = parse_event(&event_payload("charge.refunded")).unwrap();
        assert!(matches!(
            event.payment_intent(),
            Err(StripeError::WebhookProcessingError(_))
        ));
    }

    #[test]
    fn test_garbage_payload_is_a_processing_error() {
        assert!(matches!(
            parse_event(b"not json"),
            Err(StripeError::WebhookProcessingError(_))
        ));
    }

    #[test]
    fn test_search_query_escapes_quotes() {
        assert_eq!(
            succeeded_intent_query("b'1"),
            "metadata['booking_id']:'b\\'1' AND status:'succeeded'"
        );
    }

    #[test]
    fn test_intent_form_carries_booking_metadata() {
        let form = intent_form(&CreateIntentRequest {
            booking_id: "b-1".into(),
            amount: 2500,
            currency: "EUR".into(),
            description: Some("Lesson".into()),
            receipt_email: None,
            idempotency_key: Some("booking-b-1".into()),
        });
        let form: HashMap<_, _> = form.into_iter().collect();
        assert_eq!(form["amount"], "2500");
        assert_eq!(form["currency"], "eur");
        assert_eq!(form["metadata[booking_id]"], "b-1");
        assert_eq!(form["description"], "Lesson");
        assert!(!form.contains_key("receipt_email"));
    }

    #[test]
    fn test_partial_refund_form_includes_amount_and_reason() {
        let form = refund_form(&RefundRequest {
            intent_id: "pi_9".into(),
            amount: Some(1200),
            reason: RefundReason::Duplicate,
            metadata: booking_metadata("b-9"),
            idempotency_key: None,
        });
        let form: HashMap<_, _> = form.into_iter().collect();
        assert_eq!(form["payment_intent"], "pi_9");
        assert_eq!(form["amount"], "1200");
        assert_eq!(form["reason"], "duplicate");
        assert_eq!(form["metadata[booking_id]"], "b-9");
    }

    #[test]
    fn test_api_base_defaults_and_trims() {
        assert_eq!(StripeApi::new("sk", None).api_base(), DEFAULT_API_BASE);
        assert_eq!(
            StripeApi::new("sk", Some("http://127.0.0.1:9999/v1/")).api_base(),
            "http://127.0.0.1:9999/v1"
        );
    }
}
