// --- File: crates/tutorbook_notify/src/templates.rs ---
//! Plain-text and HTML bodies for the booking emails.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tutorbook_common::models::{Booking, Slot, Tutor};

/// Subject plus both bodies of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Everything a booking email may mention.
#[derive(Debug, Clone, Copy)]
pub struct BookingEmailContext<'a> {
    pub booking: &'a Booking,
    pub tutor: Option<&'a Tutor>,
    pub slots: &'a [Slot],
    pub time_zone: Tz,
}

impl BookingEmailContext<'_> {
    fn tutor_name(&self) -> &str {
        self.tutor.map(|t| t.name.as_str()).unwrap_or("your tutor")
    }

    fn total(&self) -> String {
        format_money(self.booking.total_price, &self.booking.currency)
    }

    /// One line per slot in start order, in the configured zone.
    fn slot_lines(&self) -> Vec<String> {
        let mut slots: Vec<&Slot> = self.slots.iter().collect();
        slots.sort_by_key(|s| s.start_time);
        slots
            .into_iter()
            .map(|s| {
                format!(
                    "{}-{}",
                    format_local(s.start_time, self.time_zone),
                    s.end_time.with_timezone(&self.time_zone).format("%H:%M")
                )
            })
            .collect()
    }

    fn text_schedule(&self) -> String {
        self.slot_lines()
            .iter()
            .map(|line| format!("  - {}", line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn html_schedule(&self) -> String {
        let items: String = self
            .slot_lines()
            .iter()
            .map(|line| format!("<li>{}</li>", escape_html(line)))
            .collect();
        format!("<ul>{}</ul>", items)
    }

    fn topic_line(&self) -> String {
        match self.booking.topic.as_deref() {
            Some(topic) => format!("Topic: {}\n", topic),
            None => String::new(),
        }
    }
}

/// `€50.00` for euro amounts, `50.00 CHF` for currencies without a symbol.
pub fn format_money(amount_minor: i64, currency: &str) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    let value = format!("{}.{:02}", abs / 100, abs % 100);
    match currency.to_ascii_lowercase().as_str() {
        "eur" => format!("{}€{}", sign, value),
        "usd" => format!("{}${}", sign, value),
        "gbp" => format!("{}£{}", sign, value),
        other => format!("{}{} {}", sign, value, other.to_ascii_uppercase()),
    }
}

pub fn format_local(instant: DateTime<Utc>, time_zone: Tz) -> String {
    instant
        .with_timezone(&time_zone)
        .format("%a %-d %b %Y, %H:%M")
        .to_string()
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn wrap_html(heading: &str, paragraphs: &[String], schedule: &str) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<p>{}</p>", escape_html(p)))
        .collect();
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><title>{heading}</title></head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #2563eb;">{heading}</h2>
    {body}
    {schedule}
  </div>
</body>
</html>"#,
        heading = escape_html(heading),
        body = body,
        schedule = schedule,
    )
}

fn render(ctx: &BookingEmailContext<'_>, subject: String, heading: &str, paragraphs: Vec<String>) -> RenderedEmail {
    let text = format!(
        "{}\n\n{}\n\nLessons:\n{}\n",
        heading,
        paragraphs.join("\n\n"),
        ctx.text_schedule()
    );
    let html = wrap_html(heading, &paragraphs, &ctx.html_schedule());
    RenderedEmail {
        subject,
        text,
        html,
    }
}

pub fn tutor_new_booking(ctx: &BookingEmailContext<'_>) -> RenderedEmail {
    let b = ctx.booking;
    render(
        ctx,
        format!("New booking request from {}", b.payer.name),
        "New booking request",
        vec![
            format!(
                "{} ({}) reserved {} lesson(s) with you, {} in total. Payment is pending.",
                b.payer.name,
                b.payer.email,
                b.slot_ids.len(),
                ctx.total()
            ),
            format!("{}Category: {}", ctx.topic_line(), b.lesson_category),
            "You will be asked to confirm once the payment has been received.".to_string(),
        ],
    )
}

pub fn payer_payment_pending(ctx: &BookingEmailContext<'_>) -> RenderedEmail {
    let b = ctx.booking;
    render(
        ctx,
        format!("Your lessons with {} are reserved", ctx.tutor_name()),
        "Your booking is reserved",
        vec![
            format!("Hi {},", b.payer.name),
            format!(
                "We are holding {} lesson(s) with {} for you. Complete the payment of {} to secure them.",
                b.slot_ids.len(),
                ctx.tutor_name(),
                ctx.total()
            ),
            format!("Booking reference: {}", b.id),
        ],
    )
}

pub fn payer_payment_confirmed(ctx: &BookingEmailContext<'_>) -> RenderedEmail {
    let b = ctx.booking;
    render(
        ctx,
        format!("Payment received for booking {}", b.id),
        "Payment received",
        vec![
            format!("Hi {},", b.payer.name),
            format!(
                "We received your payment of {} for {} lesson(s) with {}.",
                ctx.total(),
                b.slot_ids.len(),
                ctx.tutor_name()
            ),
            format!(
                "Invoice: booking {}, {} x {}, total {}.",
                b.id,
                b.slot_ids.len(),
                format_money(b.lesson_price, &b.currency),
                ctx.total()
            ),
            "Your tutor will confirm the lessons shortly.".to_string(),
        ],
    )
}

pub fn tutor_new_order(ctx: &BookingEmailContext<'_>) -> RenderedEmail {
    let b = ctx.booking;
    render(
        ctx,
        format!("Paid lesson booking from {}", b.payer.name),
        "New paid booking",
        vec![
            format!(
                "{} paid {} for {} lesson(s). Please confirm or decline the booking.",
                b.payer.name,
                ctx.total(),
                b.slot_ids.len()
            ),
            format!("{}Contact: {}", ctx.topic_line(), b.payer.email),
            format!("Booking reference: {}", b.id),
        ],
    )
}

pub fn payer_tutor_accepted(ctx: &BookingEmailContext<'_>) -> RenderedEmail {
    let b = ctx.booking;
    render(
        ctx,
        format!("{} confirmed your lessons", ctx.tutor_name()),
        "Your lessons are confirmed",
        vec![
            format!("Hi {},", b.payer.name),
            format!("{} confirmed your booking {}.", ctx.tutor_name(), b.id),
        ],
    )
}

fn refund_sentence(refund_amount: Option<i64>, currency: &str) -> String {
    match refund_amount {
        Some(amount) if amount > 0 => format!(
            "A refund of {} has been issued to your original payment method.",
            format_money(amount, currency)
        ),
        _ => "No charge was made.".to_string(),
    }
}

pub fn payer_cancelled(ctx: &BookingEmailContext<'_>, refund_amount: Option<i64>) -> RenderedEmail {
    let b = ctx.booking;
    let mut paragraphs = vec![
        format!("Hi {},", b.payer.name),
        format!("Your booking {} with {} has been cancelled.", b.id, ctx.tutor_name()),
    ];
    if let Some(reason) = b.cancellation_reason.as_deref() {
        paragraphs.push(format!("Reason: {}", reason));
    }
    paragraphs.push(refund_sentence(refund_amount, &b.currency));
    render(ctx, format!("Booking {} cancelled", b.id), "Booking cancelled", paragraphs)
}

pub fn tutor_cancelled_by_them(
    ctx: &BookingEmailContext<'_>,
    refund_amount: Option<i64>,
) -> RenderedEmail {
    let b = ctx.booking;
    let refund = match refund_amount {
        Some(amount) if amount > 0 => format!(
            "{} was refunded to {}.",
            format_money(amount, &b.currency),
            b.payer.name
        ),
        _ => format!("{} had not been charged.", b.payer.name),
    };
    render(
        ctx,
        format!("You declined booking {}", b.id),
        "Booking declined",
        vec![
            format!("You declined the booking from {}.", b.payer.name),
            refund,
            "The lesson times are available to other students again.".to_string(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tutorbook_common::models::{PayerContact, PaymentStatus};

    fn booking() -> Booking {
        Booking {
            id: "b-1".into(),
            tutor_id: "t-1".into(),
            slot_ids: vec!["s-1".into(), "s-2".into()],
            payer: PayerContact {
                name: "Ona <Admin>".into(),
                email: "ona@example.com".into(),
                phone: None,
            },
            topic: Some("Algebra".into()),
            lesson_category: "math".into(),
            lesson_price: 2500,
            total_price: 5000,
            currency: "eur".into(),
            payment_status: PaymentStatus::Pending,
            confirmed_by_tutor: None,
            payment_intent_id: None,
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
        let nine_local = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap();
        vec![
            Slot::new("s-2", "t-1", nine_local + chrono::Duration::hours(1), nine_local + chrono::Duration::minutes(90)),
            Slot::new("s-1", "t-1", nine_local, nine_local + chrono::Duration::minutes(30)),
        ]
    }

    #[test]
    fn money_uses_symbol_for_known_currencies() {
        assert_eq!(format_money(5000, "eur"), "€50.00");
        assert_eq!(format_money(2505, "USD"), "$25.05");
        assert_eq!(format_money(99, "chf"), "0.99 CHF");
    }

    #[test]
    fn schedule_is_sorted_and_local() {
        let booking = booking();
        let slots = slots();
        let ctx = BookingEmailContext {
            booking: &booking,
            tutor: None,
            slots: &slots,
            time_zone: chrono_tz::Europe::Vilnius,
        };
        let lines = ctx.slot_lines();
        assert_eq!(lines[0], "Mon 2 Mar 2026, 09:00-09:30");
        assert_eq!(lines[1], "Mon 2 Mar 2026, 10:00-10:30");
    }

    #[test]
    fn cancellation_mentions_refund_or_no_charge() {
        let booking = booking();
        let slots = slots();
        let ctx = BookingEmailContext {
            booking: &booking,
            tutor: None,
            slots: &slots,
            time_zone: chrono_tz::UTC,
        };
        assert!(payer_cancelled(&ctx, Some(5000)).text.contains("A refund of €50.00"));
        assert!(payer_cancelled(&ctx, None).text.contains("No charge was made."));
    }

    #[test]
    fn html_escapes_payer_input() {
        let booking = booking();
        let ctx = BookingEmailContext {
            booking: &booking,
            tutor: None,
            slots: &[],
            time_zone: chrono_tz::UTC,
        };
        let email = tutor_new_booking(&ctx);
        assert!(email.html.contains("Ona &lt;Admin&gt;"));
        assert!(!email.html.contains("<Admin>"));
        assert!(email.text.contains("Ona <Admin>"));
    }
}
