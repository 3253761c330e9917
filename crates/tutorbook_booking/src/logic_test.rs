#[cfg(test)]
mod tests {
    use crate::context::Actor;
    use crate::error::BookingError;
    use crate::logic::*;
    use crate::models::{CreateBookingRequest, SlotWindow};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use tutorbook_common::models::{Booking, PayerContact, PaymentStatus, Slot};
    use tutorbook_common::PaymentIntent;

    fn request(slot_ids: &[&str]) -> CreateBookingRequest {
        CreateBookingRequest {
            slot_ids: slot_ids.iter().map(|s| s.to_string()).collect(),
            tutor_id: None,
            payer_name: "  Ona Petraitė ".to_string(),
            payer_email: " ona@example.com ".to_string(),
            payer_phone: Some("   ".to_string()),
            topic: Some(" Fractions ".to_string()),
            lesson_category: None,
        }
    }

    fn slot(id: &str, tutor: &str) -> Slot {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        Slot::new(id, tutor, start, start + Duration::minutes(45))
    }

    fn booking() -> Booking {
        Booking {
            id: "b-1".into(),
            tutor_id: "t-1".into(),
            slot_ids: vec!["s-1".into(), "s-2".into()],
            payer: PayerContact {
                name: "Ona".into(),
                email: "ona@example.com".into(),
                phone: None,
            },
            topic: None,
            lesson_category: "general".into(),
            lesson_price: 2500,
            total_price: 5000,
            currency: "eur".into(),
            payment_status: PaymentStatus::Pending,
            confirmed_by_tutor: None,
            payment_intent_id: Some("pi_stored".into()),
            paid_at: None,
            tutor_responded_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            price_override_reason: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    fn intent(id: &str, booking_id: Option<&str>) -> PaymentIntent {
        PaymentIntent {
            id: id.into(),
            status: "succeeded".into(),
            amount: 5000,
            amount_received: Some(5000),
            currency: "eur".into(),
            client_secret: None,
            metadata: booking_id
                .map(|b| HashMap::from([("booking_id".to_string(), b.to_string())]))
                .unwrap_or_default(),
        }
    }

    #[test]
    fn test_validation_trims_and_defaults() {
        let valid = validate_create_request(&request(&["s-1", "s-2"]), "general").unwrap();
        assert_eq!(valid.payer.name, "Ona Petraitė");
        assert_eq!(valid.payer.email, "ona@example.com");
        assert_eq!(valid.payer.phone, None);
        assert_eq!(valid.topic.as_deref(), Some("Fractions"));
        assert_eq!(valid.lesson_category, "general");
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        assert!(matches!(
            validate_create_request(&request(&[]), "general"),
            Err(BookingError::Validation(_))
        ));
        assert!(matches!(
            validate_create_request(&request(&["s-1", "s-1"]), "general"),
            Err(BookingError::Validation(msg)) if msg.contains("s-1")
        ));

        let mut nameless = request(&["s-1"]);
        nameless.payer_name = "   ".into();
        assert!(validate_create_request(&nameless, "general").is_err());

        let mut bad_email = request(&["s-1"]);
        bad_email.payer_email = "not-an-address".into();
        assert!(matches!(
            validate_create_request(&bad_email, "general"),
            Err(BookingError::Validation(msg)) if msg.contains("not-an-address")
        ));
    }

    #[test]
    fn test_single_tutor_orders_slots_like_the_request() {
        let requested = vec!["s-2".to_string(), "s-1".to_string()];
        let (tutor, ordered) =
            resolve_single_tutor(&requested, vec![slot("s-1", "t-1"), slot("s-2", "t-1")]).unwrap();
        assert_eq!(tutor, "t-1");
        assert_eq!(ordered[0].id, "s-2");
        assert_eq!(ordered[1].id, "s-1");
    }

    #[test]
    fn test_unknown_and_cross_tutor_slots_are_rejected() {
        let requested = vec!["s-1".to_string(), "s-9".to_string()];
        assert!(matches!(
            resolve_single_tutor(&requested, vec![slot("s-1", "t-1")]),
            Err(BookingError::NotFound(msg)) if msg.contains("s-9")
        ));

        let requested = vec!["s-1".to_string(), "s-2".to_string()];
        assert!(matches!(
            resolve_single_tutor(&requested, vec![slot("s-1", "t-1"), slot("s-2", "t-2")]),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn test_total_price_multiplies_and_guards_overflow() {
        assert_eq!(total_price(2500, 2).unwrap(), 5000);
        assert!(total_price(i64::MAX, 2).is_err());
    }

    #[test]
    fn test_intent_ownership_prefers_metadata() {
        let b = booking();
        assert!(intent_belongs_to(&b, &intent("pi_other", Some("b-1"))));
        assert!(!intent_belongs_to(&b, &intent("pi_stored", Some("b-2"))));
        assert!(intent_belongs_to(&b, &intent("pi_stored", None)));
        assert!(!intent_belongs_to(&b, &intent("pi_other", None)));
    }

    #[test]
    fn test_idempotency_keys_are_stable() {
        assert_eq!(intent_idempotency_key("b-1", None), "booking-intent-b-1");
        assert_eq!(
            intent_idempotency_key("b-1", Some("pi_old")),
            "booking-intent-b-1-after-pi_old"
        );
        assert_eq!(refund_idempotency_key("b-1"), "booking-refund-b-1");
    }

    #[test]
    fn test_date_bounds_use_local_midnight() {
        let tz = chrono_tz::Europe::Vilnius;
        // UTC+2 in winter
        let from = parse_bound("2026-03-02", tz, false).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 3, 1, 22, 0, 0).unwrap());
        let to = parse_bound("2026-03-02", tz, true).unwrap();
        assert_eq!(to, Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 0).unwrap());

        let exact = parse_bound("2026-03-02T10:15:00+02:00", tz, true).unwrap();
        assert_eq!(exact, Utc.with_ymd_and_hms(2026, 3, 2, 8, 15, 0).unwrap());

        assert!(parse_bound("02/03/2026", tz, false).is_err());
    }

    #[test]
    fn test_slot_query_collects_tutors() {
        let pairs = vec![
            ("tutorId".to_string(), "t-1, t-2".to_string()),
            ("tutorId".to_string(), "t-3".to_string()),
            ("tutorId".to_string(), "t-1".to_string()),
            ("from".to_string(), "2026-03-02".to_string()),
            ("unrelated".to_string(), "x".to_string()),
        ];
        let query = parse_slot_query(&pairs, chrono_tz::UTC).unwrap();
        assert_eq!(query.tutor_ids, vec!["t-1", "t-2", "t-3"]);
        assert_eq!(query.from, Some(Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()));
        assert_eq!(query.to, None);

        let backwards = vec![
            ("from".to_string(), "2026-03-05".to_string()),
            ("to".to_string(), "2026-03-01".to_string()),
        ];
        assert!(parse_slot_query(&backwards, chrono_tz::UTC).is_err());
    }

    #[test]
    fn test_slot_windows_must_be_positive_and_disjoint() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let ok = vec![
            SlotWindow {
                start,
                end: start + Duration::minutes(45),
            },
            SlotWindow {
                start: start + Duration::hours(1),
                end: start + Duration::minutes(105),
            },
        ];
        let slots = slots_from_windows("t-1", &ok).unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.tutor_id == "t-1" && !s.booked));

        let overlapping = vec![
            ok[0].clone(),
            SlotWindow {
                start: start + Duration::minutes(30),
                end: start + Duration::hours(2),
            },
        ];
        assert!(slots_from_windows("t-1", &overlapping).is_err());

        let empty = vec![SlotWindow { start, end: start }];
        assert!(slots_from_windows("t-1", &empty).is_err());
    }

    #[test]
    fn test_notification_texts() {
        let b = booking();
        let message = booking_request_message(&b, &[slot("s-1", "t-1")], chrono_tz::Europe::Vilnius);
        assert!(message.contains("Ona booked 2 lesson(s) for €50.00"));
        assert!(message.contains("Mon 2 Mar 2026, 10:00"));

        assert!(cancellation_notice(&b, Actor::Payer).contains("cancelled by Ona"));
        assert!(cancellation_notice(&b, Actor::System).contains("by the system"));
    }
}
