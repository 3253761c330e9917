#[cfg(test)]
mod tests {
    use crate::logic::{parse_bound, parse_slot_query, slots_from_windows, total_price};
    use crate::models::SlotWindow;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use chrono_tz::Tz;
    use proptest::prelude::*;

    fn zones() -> impl Strategy<Value = Tz> {
        prop_oneof![
            Just(chrono_tz::UTC),
            Just(chrono_tz::Europe::Vilnius),
            Just(chrono_tz::America::New_York),
            Just(chrono_tz::Asia::Kolkata),
        ]
    }

    proptest! {
        #[test]
        fn total_is_unit_times_count(unit in 1i64..1_000_000, count in 1usize..50) {
            prop_assert_eq!(total_price(unit, count).unwrap(), unit * count as i64);
        }

        /// A date used as both bounds spans one local day (23 to 25 hours
        /// across DST changes).
        #[test]
        fn date_bounds_cover_one_local_day(day in 0i64..3650, tz in zones()) {
            let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(day);
            let raw = date.format("%Y-%m-%d").to_string();
            let from = parse_bound(&raw, tz, false).unwrap();
            let to = parse_bound(&raw, tz, true).unwrap();
            let span = to - from;
            prop_assert!(span >= Duration::hours(23) && span <= Duration::hours(25));
            prop_assert_eq!(from.with_timezone(&tz).date_naive(), date);
        }

        #[test]
        fn tutor_filter_has_no_duplicates(ids in proptest::collection::vec("[a-c]{1,2}", 0..12)) {
            let pairs: Vec<(String, String)> = ids
                .iter()
                .map(|id| ("tutorId".to_string(), id.clone()))
                .collect();
            let query = parse_slot_query(&pairs, chrono_tz::UTC).unwrap();
            let mut sorted = query.tutor_ids.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), query.tutor_ids.len());
            for id in &ids {
                prop_assert!(query.tutor_ids.contains(id));
            }
        }

        /// Back-to-back windows are accepted and each becomes one free slot.
        #[test]
        fn adjacent_windows_publish(lengths in proptest::collection::vec(15i64..120, 1..10)) {
            let mut start = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap();
            let mut windows = Vec::new();
            for minutes in &lengths {
                let end = start + Duration::minutes(*minutes);
                windows.push(SlotWindow { start, end });
                start = end;
            }
            let slots = slots_from_windows("t-1", &windows).unwrap();
            prop_assert_eq!(slots.len(), lengths.len());
            prop_assert!(slots.iter().all(|s| s.end_time > s.start_time && !s.booked));
        }
    }
}
