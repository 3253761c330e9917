// --- File: crates/tutorbook_booking/src/logic.rs ---
//! Pure rules of the booking workflow: request validation, tutor and price
//! resolution, slot query parsing and the texts of in-app notifications.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use tutorbook_common::models::{Booking, PayerContact, Slot, SlotQuery};
use tutorbook_common::PaymentIntent;
use tutorbook_notify::is_valid_email;
use tutorbook_notify::templates::format_local;
use tutorbook_notify::format_money;
use uuid::Uuid;

use crate::context::Actor;
use crate::error::BookingError;
use crate::models::{CreateBookingRequest, SlotWindow};

/// A create-booking request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBooking {
    pub slot_ids: Vec<String>,
    pub tutor_id: Option<String>,
    pub payer: PayerContact,
    pub topic: Option<String>,
    pub lesson_category: String,
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Checks the request shape; nothing is looked up.
pub fn validate_create_request(
    request: &CreateBookingRequest,
    default_category: &str,
) -> Result<ValidatedBooking, BookingError> {
    let slot_ids: Vec<String> = request
        .slot_ids
        .iter()
        .map(|id| id.trim().to_string())
        .collect();
    if slot_ids.is_empty() {
        return Err(BookingError::Validation(
            "at least one slot must be selected".to_string(),
        ));
    }
    if slot_ids.iter().any(String::is_empty) {
        return Err(BookingError::Validation("slot ids must not be empty".to_string()));
    }
    let mut seen = HashSet::new();
    let duplicates: Vec<&str> = slot_ids
        .iter()
        .filter(|id| !seen.insert(id.as_str()))
        .map(String::as_str)
        .collect();
    if !duplicates.is_empty() {
        return Err(BookingError::Validation(format!(
            "slot ids must be unique, repeated: {}",
            duplicates.join(", ")
        )));
    }

    let name = request.payer_name.trim();
    if name.is_empty() {
        return Err(BookingError::Validation("payer name is required".to_string()));
    }
    let email = request.payer_email.trim();
    if !is_valid_email(email) {
        return Err(BookingError::Validation(format!(
            "payer email '{}' is not a valid address",
            request.payer_email
        )));
    }

    Ok(ValidatedBooking {
        slot_ids,
        tutor_id: trimmed(request.tutor_id.as_deref()),
        payer: PayerContact {
            name: name.to_string(),
            email: email.to_string(),
            phone: trimmed(request.payer_phone.as_deref()),
        },
        topic: trimmed(request.topic.as_deref()),
        lesson_category: trimmed(request.lesson_category.as_deref())
            .unwrap_or_else(|| default_category.to_string()),
    })
}

/// Orders `found` like `requested` and returns the one tutor owning them.
///
/// Unknown ids are `NotFound`; slots of several tutors are rejected before
/// anything is reserved.
pub fn resolve_single_tutor(
    requested: &[String],
    found: Vec<Slot>,
) -> Result<(String, Vec<Slot>), BookingError> {
    let mut by_id: HashMap<String, Slot> = found.into_iter().map(|s| (s.id.clone(), s)).collect();
    let mut missing = Vec::new();
    let mut ordered = Vec::with_capacity(requested.len());
    for id in requested {
        match by_id.remove(id) {
            Some(slot) => ordered.push(slot),
            None => missing.push(id.as_str()),
        }
    }
    if !missing.is_empty() {
        return Err(BookingError::NotFound(format!("slot(s) {}", missing.join(", "))));
    }

    let tutors: HashSet<&str> = ordered.iter().map(|s| s.tutor_id.as_str()).collect();
    if tutors.len() > 1 {
        let mut names: Vec<&str> = tutors.into_iter().collect();
        names.sort_unstable();
        return Err(BookingError::Validation(format!(
            "all slots of a booking must belong to one tutor, got {}",
            names.join(", ")
        )));
    }
    let tutor_id = ordered
        .first()
        .map(|s| s.tutor_id.clone())
        .ok_or_else(|| BookingError::Validation("at least one slot must be selected".to_string()))?;
    Ok((tutor_id, ordered))
}

pub fn total_price(unit_price: i64, slot_count: usize) -> Result<i64, BookingError> {
    i64::try_from(slot_count)
        .ok()
        .and_then(|count| unit_price.checked_mul(count))
        .ok_or_else(|| BookingError::Validation("booking total is out of range".to_string()))
}

pub fn validate_amount(amount: i64, what: &str) -> Result<(), BookingError> {
    if amount <= 0 {
        return Err(BookingError::Validation(format!(
            "{} must be a positive amount of minor units",
            what
        )));
    }
    Ok(())
}

/// True when the intent was created for this booking.
pub fn intent_belongs_to(booking: &Booking, intent: &PaymentIntent) -> bool {
    match intent.booking_id() {
        Some(id) => id == booking.id,
        None => booking.payment_intent_id.as_deref() == Some(intent.id.as_str()),
    }
}

pub fn intent_idempotency_key(booking_id: &str, replaces: Option<&str>) -> String {
    match replaces {
        Some(previous) => format!("booking-intent-{}-after-{}", booking_id, previous),
        None => format!("booking-intent-{}", booking_id),
    }
}

pub fn refund_idempotency_key(booking_id: &str) -> String {
    format!("booking-refund-{}", booking_id)
}

pub fn duplicate_refund_idempotency_key(intent_id: &str) -> String {
    format!("duplicate-refund-{}", intent_id)
}

// --- Slot listing ---

fn local_midnight(date: NaiveDate, time_zone: Tz) -> Result<DateTime<Utc>, BookingError> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| BookingError::Validation(format!("invalid date {}", date)))?;
    time_zone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            BookingError::Validation(format!("{} has no midnight in {}", date, time_zone))
        })
}

/// Accepts an RFC 3339 instant or a `YYYY-MM-DD` date in `time_zone`.
///
/// A date used as the upper bound covers that whole local day.
pub fn parse_bound(raw: &str, time_zone: Tz, upper: bool) -> Result<DateTime<Utc>, BookingError> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        BookingError::Validation(format!(
            "invalid date '{}', expected YYYY-MM-DD or an RFC 3339 timestamp",
            raw
        ))
    })?;
    if upper {
        let next = date
            .succ_opt()
            .ok_or_else(|| BookingError::Validation(format!("date {} is out of range", date)))?;
        local_midnight(next, time_zone)
    } else {
        local_midnight(date, time_zone)
    }
}

/// Builds the slot filter from raw query pairs. `tutorId` may repeat and
/// may hold a comma separated list.
pub fn parse_slot_query(pairs: &[(String, String)], time_zone: Tz) -> Result<SlotQuery, BookingError> {
    let mut query = SlotQuery::default();
    for (key, value) in pairs {
        match key.as_str() {
            "tutorId" | "tutor_id" | "tutorIds" => {
                for id in value.split(',').map(str::trim).filter(|id| !id.is_empty()) {
                    if !query.tutor_ids.iter().any(|known| known == id) {
                        query.tutor_ids.push(id.to_string());
                    }
                }
            }
            "from" => query.from = Some(parse_bound(value, time_zone, false)?),
            "to" => query.to = Some(parse_bound(value, time_zone, true)?),
            _ => {}
        }
    }
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if to <= from {
            return Err(BookingError::Validation("'to' must be after 'from'".to_string()));
        }
    }
    Ok(query)
}

/// Free slots to insert for a tutor. Windows must be positive and must not
/// overlap each other.
pub fn slots_from_windows(tutor_id: &str, windows: &[SlotWindow]) -> Result<Vec<Slot>, BookingError> {
    if windows.is_empty() {
        return Err(BookingError::Validation("no slots to publish".to_string()));
    }
    let mut sorted: Vec<&SlotWindow> = windows.iter().collect();
    sorted.sort_by_key(|w| w.start);
    for window in &sorted {
        if window.end <= window.start {
            return Err(BookingError::Validation(format!(
                "slot ending {} must end after its start {}",
                window.end, window.start
            )));
        }
    }
    for pair in sorted.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(BookingError::Validation(format!(
                "slots starting {} and {} overlap",
                pair[0].start, pair[1].start
            )));
        }
    }
    Ok(windows
        .iter()
        .map(|w| Slot::new(Uuid::new_v4().to_string(), tutor_id, w.start, w.end))
        .collect())
}

// --- In-app notification texts ---

pub fn booking_request_message(booking: &Booking, slots: &[Slot], time_zone: Tz) -> String {
    let first = slots.iter().map(|s| s.start_time).min();
    let when = match first {
        Some(start) => format!(", first lesson {}", format_local(start, time_zone)),
        None => String::new(),
    };
    format!(
        "{} booked {} lesson(s) for {}{}. Payment pending.",
        booking.payer.name,
        booking.slot_ids.len(),
        format_money(booking.total_price, &booking.currency),
        when
    )
}

pub fn cancellation_notice(booking: &Booking, actor: Actor) -> String {
    let by = match actor {
        Actor::Payer => booking.payer.name.as_str(),
        Actor::Admin => "an administrator",
        Actor::System => "the system",
        Actor::Tutor => "you",
    };
    format!(
        "Booking {} ({} lesson(s)) was cancelled by {}. The slots are free again.",
        booking.id,
        booking.slot_ids.len(),
        by
    )
}

/// Pending bookings older than this are expired by the sweep.
pub fn expiry_cutoff(now: DateTime<Utc>, pending_for: Duration) -> DateTime<Utc> {
    now - pending_for
}
