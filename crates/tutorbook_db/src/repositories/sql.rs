// --- File: crates/tutorbook_db/src/repositories/sql.rs ---
//! SQL implementation of the booking store on the `sqlx::Any` driver.
//!
//! `chrono` types don't decode through `Any`, so timestamps are stored as
//! fixed-width RFC 3339 text (UTC, microseconds) which also sorts correctly.
//! Booleans are stored as `INTEGER` 0/1. `Any` refuses to decode `NULL`
//! into `Option<_>`, so nullable columns go through [`nullable_text`] and
//! [`nullable_int`].

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Row};
use std::str::FromStr;
use tracing::{debug, info, warn};
use tutorbook_common::models::{
    Booking, EmailKind, EmailRecord, EmailStatus, Notification, PayerContact, PaymentRecord,
    PaymentRecordStatus, PaymentStatus, Slot, SlotQuery, Tutor,
};

use crate::client::DbClient;
use crate::error::DbError;
use crate::repositories::booking_store::{BookingStore, CancellationSettlement};

const LESSON_PRICE_KEY: &str = "lesson_price";

/// A booking the tutor accepted is final and can't be settled.
const NOT_TUTOR_CONFIRMED: &str = "AND (confirmed_by_tutor IS NULL OR confirmed_by_tutor = 0)";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tutors (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS slots (
        id TEXT PRIMARY KEY,
        tutor_id TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        booked INTEGER NOT NULL DEFAULT 0,
        booking_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_slots_free ON slots (booked, start_time)",
    r#"
    CREATE TABLE IF NOT EXISTS bookings (
        id TEXT PRIMARY KEY,
        tutor_id TEXT NOT NULL,
        payer_name TEXT NOT NULL,
        payer_email TEXT NOT NULL,
        payer_phone TEXT,
        topic TEXT,
        lesson_category TEXT NOT NULL,
        lesson_price BIGINT NOT NULL,
        total_price BIGINT NOT NULL,
        currency TEXT NOT NULL,
        payment_status TEXT NOT NULL,
        confirmed_by_tutor INTEGER,
        payment_intent_id TEXT,
        paid_at TEXT,
        tutor_responded_at TEXT,
        cancelled_at TEXT,
        cancelled_by TEXT,
        cancellation_reason TEXT,
        price_override_reason TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bookings_status ON bookings (payment_status, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS booking_slots (
        booking_id TEXT NOT NULL,
        slot_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (booking_id, slot_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        message TEXT NOT NULL,
        is_read INTEGER NOT NULL DEFAULT 0,
        booking_id TEXT,
        slot_id TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id TEXT PRIMARY KEY,
        booking_id TEXT NOT NULL,
        gateway_payment_id TEXT NOT NULL UNIQUE,
        refund_id TEXT,
        amount BIGINT NOT NULL,
        refunded_amount BIGINT,
        currency TEXT NOT NULL,
        status TEXT NOT NULL,
        refunded_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_log (
        booking_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        message_id TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (booking_id, kind)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        setting_key TEXT PRIMARY KEY,
        setting_value TEXT NOT NULL
    )
    "#,
];

const BOOKING_COLUMNS: &str = "id, tutor_id, payer_name, payer_email, payer_phone, topic, \
    lesson_category, lesson_price, total_price, currency, payment_status, confirmed_by_tutor, \
    payment_intent_id, paid_at, tutor_responded_at, cancelled_at, cancelled_by, \
    cancellation_reason, price_override_reason, created_at";

const PAYMENT_COLUMNS: &str = "id, booking_id, gateway_payment_id, refund_id, amount, \
    refunded_amount, currency, status, refunded_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqlBookingStore {
    db_client: DbClient,
}

impl SqlBookingStore {
    pub fn new(db_client: DbClient) -> Self {
        Self { db_client }
    }

    async fn slot_ids_of(&self, booking_id: &str) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query(
            "SELECT slot_id FROM booking_slots WHERE booking_id = $1 ORDER BY position",
        )
        .bind(booking_id)
        .fetch_all(self.db_client.pool())
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("slot_id").map_err(DbError::from))
            .collect()
    }

    async fn hydrate_booking(&self, row: &AnyRow) -> Result<Booking, DbError> {
        let id: String = row.try_get("id")?;
        let slot_ids = self.slot_ids_of(&id).await?;
        booking_from_row(row, slot_ids)
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
    raw.as_deref().map(parse_ts).transpose()
}

/// A nullable `TEXT` column. `NULL` reads as `None`.
fn nullable_text(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok()
}

/// A nullable `INTEGER`/`BIGINT` column. `NULL` reads as `None`.
fn nullable_int(row: &AnyRow, column: &str) -> Option<i64> {
    row.try_get::<i64, _>(column).ok()
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|n| format!("${}", n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn unique_ids(slot_ids: &[String]) -> Vec<String> {
    let mut ids = slot_ids.to_vec();
    ids.sort();
    ids.dedup();
    ids
}

fn slot_from_row(row: &AnyRow) -> Result<Slot, DbError> {
    Ok(Slot {
        id: row.try_get("id")?,
        tutor_id: row.try_get("tutor_id")?,
        start_time: parse_ts(&row.try_get::<String, _>("start_time")?)?,
        end_time: parse_ts(&row.try_get::<String, _>("end_time")?)?,
        booked: row.try_get::<i64, _>("booked")? != 0,
        booking_id: nullable_text(row, "booking_id"),
    })
}

fn booking_from_row(row: &AnyRow, slot_ids: Vec<String>) -> Result<Booking, DbError> {
    let status: String = row.try_get("payment_status")?;
    Ok(Booking {
        id: row.try_get("id")?,
        tutor_id: row.try_get("tutor_id")?,
        slot_ids,
        payer: PayerContact {
            name: row.try_get("payer_name")?,
            email: row.try_get("payer_email")?,
            phone: nullable_text(row, "payer_phone"),
        },
        topic: nullable_text(row, "topic"),
        lesson_category: row.try_get("lesson_category")?,
        lesson_price: row.try_get("lesson_price")?,
        total_price: row.try_get("total_price")?,
        currency: row.try_get("currency")?,
        payment_status: PaymentStatus::from_str(&status).map_err(DbError::Corrupt)?,
        confirmed_by_tutor: nullable_int(row, "confirmed_by_tutor").map(|flag| flag != 0),
        payment_intent_id: nullable_text(row, "payment_intent_id"),
        paid_at: parse_opt_ts(nullable_text(row, "paid_at"))?,
        tutor_responded_at: parse_opt_ts(nullable_text(row, "tutor_responded_at"))?,
        cancelled_at: parse_opt_ts(nullable_text(row, "cancelled_at"))?,
        cancelled_by: nullable_text(row, "cancelled_by"),
        cancellation_reason: nullable_text(row, "cancellation_reason"),
        price_override_reason: nullable_text(row, "price_override_reason"),
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn notification_from_row(row: &AnyRow) -> Result<Notification, DbError> {
    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        message: row.try_get("message")?,
        read: row.try_get::<i64, _>("is_read")? != 0,
        booking_id: nullable_text(row, "booking_id"),
        slot_id: nullable_text(row, "slot_id"),
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn payment_from_row(row: &AnyRow) -> Result<PaymentRecord, DbError> {
    let status: String = row.try_get("status")?;
    Ok(PaymentRecord {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        gateway_payment_id: row.try_get("gateway_payment_id")?,
        refund_id: nullable_text(row, "refund_id"),
        amount: row.try_get("amount")?,
        refunded_amount: nullable_int(row, "refunded_amount"),
        currency: row.try_get("currency")?,
        status: PaymentRecordStatus::from_str(&status).map_err(DbError::Corrupt)?,
        refunded_at: parse_opt_ts(nullable_text(row, "refunded_at"))?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

/// Reserves inside an open transaction. Each slot is flipped with its own
/// guarded update so a concurrent reservation can never be overwritten; on
/// any miss the caller drops the transaction and nothing is kept.
async fn reserve_in(
    conn: &mut AnyConnection,
    slot_ids: &[String],
    tutor_id: &str,
    holder_booking_id: &str,
) -> Result<(), DbError> {
    let mut offending = Vec::new();
    for slot_id in unique_ids(slot_ids) {
        let result = sqlx::query(
            "UPDATE slots SET booked = 1, booking_id = $1 \
             WHERE id = $2 AND tutor_id = $3 AND booked = 0",
        )
        .bind(holder_booking_id)
        .bind(&slot_id)
        .bind(tutor_id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            offending.push(slot_id);
        }
    }

    if offending.is_empty() {
        Ok(())
    } else {
        debug!("[Store] Reservation rejected for slots {:?}", offending);
        Err(DbError::SlotUnavailable { slot_ids: offending })
    }
}

async fn mark_booking_notifications_read(
    conn: &mut AnyConnection,
    booking_id: &str,
) -> Result<u64, DbError> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE booking_id = $1 AND is_read = 0")
        .bind(booking_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl BookingStore for SqlBookingStore {
    async fn init_schema(&self) -> Result<(), DbError> {
        debug!("[Store] Initializing booking schema");
        for statement in SCHEMA {
            self.db_client.execute(statement).await?;
        }
        info!("[Store] Booking schema initialized successfully");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.db_client.is_healthy().await
    }

    fn backend(&self) -> &'static str {
        "sql"
    }

    async fn upsert_tutor(&self, tutor: &Tutor) -> Result<Tutor, DbError> {
        sqlx::query(
            "INSERT INTO tutors (id, name, email) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, email = excluded.email",
        )
        .bind(&tutor.id)
        .bind(&tutor.name)
        .bind(&tutor.email)
        .execute(self.db_client.pool())
        .await?;
        Ok(tutor.clone())
    }

    async fn find_tutor(&self, tutor_id: &str) -> Result<Option<Tutor>, DbError> {
        let row = sqlx::query("SELECT id, name, email FROM tutors WHERE id = $1")
            .bind(tutor_id)
            .fetch_optional(self.db_client.pool())
            .await?;
        row.map(|row| -> Result<Tutor, DbError> {
            Ok(Tutor {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
            })
        })
        .transpose()
    }

    async fn publish_slot(&self, slot: &Slot) -> Result<Slot, DbError> {
        let result = sqlx::query(
            "INSERT INTO slots (id, tutor_id, start_time, end_time, booked, booking_id) \
             VALUES ($1, $2, $3, $4, 0, NULL) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&slot.id)
        .bind(&slot.tutor_id)
        .bind(ts(slot.start_time))
        .bind(ts(slot.end_time))
        .execute(self.db_client.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::Conflict(format!("slot {} already exists", slot.id)));
        }
        Ok(Slot {
            booked: false,
            booking_id: None,
            ..slot.clone()
        })
    }

    async fn retract_slot(&self, slot_id: &str) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM slots WHERE id = $1 AND booked = 0")
            .bind(slot_id)
            .execute(self.db_client.pool())
            .await?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.find_slots(&[slot_id.to_string()]).await?.is_empty() {
            true => Err(DbError::NotFound(format!("slot {}", slot_id))),
            false => Err(DbError::Conflict(format!(
                "slot {} is booked and cannot be retracted",
                slot_id
            ))),
        }
    }

    async fn find_slots(&self, slot_ids: &[String]) -> Result<Vec<Slot>, DbError> {
        let ids = unique_ids(slot_ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, tutor_id, start_time, end_time, booked, booking_id FROM slots WHERE id IN ({})",
            placeholders(1, ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in &ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(self.db_client.pool()).await?;
        rows.iter().map(slot_from_row).collect()
    }

    async fn list_free_slots(&self, query: &SlotQuery) -> Result<Vec<Slot>, DbError> {
        let mut sql = String::from(
            "SELECT id, tutor_id, start_time, end_time, booked, booking_id FROM slots WHERE booked = 0",
        );
        let mut next = 1;
        if !query.tutor_ids.is_empty() {
            sql.push_str(&format!(
                " AND tutor_id IN ({})",
                placeholders(next, query.tutor_ids.len())
            ));
            next += query.tutor_ids.len();
        }
        if query.from.is_some() {
            sql.push_str(&format!(" AND start_time >= ${}", next));
            next += 1;
        }
        if query.to.is_some() {
            sql.push_str(&format!(" AND start_time < ${}", next));
        }
        sql.push_str(" ORDER BY start_time, id");

        let mut statement = sqlx::query(&sql);
        for tutor_id in &query.tutor_ids {
            statement = statement.bind(tutor_id);
        }
        if let Some(from) = query.from {
            statement = statement.bind(ts(from));
        }
        if let Some(to) = query.to {
            statement = statement.bind(ts(to));
        }
        let rows = statement.fetch_all(self.db_client.pool()).await?;
        rows.iter().map(slot_from_row).collect()
    }

    async fn reserve_slots(
        &self,
        slot_ids: &[String],
        tutor_id: &str,
        holder_booking_id: &str,
    ) -> Result<(), DbError> {
        let mut tx = self.db_client.begin().await?;
        reserve_in(&mut tx, slot_ids, tutor_id, holder_booking_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn release_slots(&self, slot_ids: &[String]) -> Result<u64, DbError> {
        let mut tx = self.db_client.begin().await?;
        let mut released = 0;
        for slot_id in unique_ids(slot_ids) {
            released += sqlx::query(
                "UPDATE slots SET booked = 0, booking_id = NULL WHERE id = $1 AND booked = 1",
            )
            .bind(&slot_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        debug!("[Store] Released {} slot(s)", released);
        Ok(released)
    }

    async fn release_unheld_slot(&self, slot_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE slots SET booked = 0, booking_id = NULL WHERE id = $1 AND booked = 1 \
             AND NOT EXISTS (SELECT 1 FROM bookings WHERE bookings.id = slots.booking_id \
             AND bookings.payment_status IN ($2, $3))",
        )
        .bind(slot_id)
        .bind(PaymentStatus::Pending.as_str())
        .bind(PaymentStatus::Paid.as_str())
        .execute(self.db_client.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_booking(
        &self,
        booking: &Booking,
        notification: &Notification,
    ) -> Result<(), DbError> {
        let mut tx = self.db_client.begin().await?;

        reserve_in(&mut tx, &booking.slot_ids, &booking.tutor_id, &booking.id).await?;

        let sql = format!(
            "INSERT INTO bookings ({}) VALUES ({})",
            BOOKING_COLUMNS,
            placeholders(1, 20)
        );
        sqlx::query(&sql)
            .bind(&booking.id)
            .bind(&booking.tutor_id)
            .bind(&booking.payer.name)
            .bind(&booking.payer.email)
            .bind(booking.payer.phone.clone())
            .bind(booking.topic.clone())
            .bind(&booking.lesson_category)
            .bind(booking.lesson_price)
            .bind(booking.total_price)
            .bind(&booking.currency)
            .bind(booking.payment_status.as_str())
            .bind(booking.confirmed_by_tutor.map(i64::from))
            .bind(booking.payment_intent_id.clone())
            .bind(booking.paid_at.map(ts))
            .bind(booking.tutor_responded_at.map(ts))
            .bind(booking.cancelled_at.map(ts))
            .bind(booking.cancelled_by.clone())
            .bind(booking.cancellation_reason.clone())
            .bind(booking.price_override_reason.clone())
            .bind(ts(booking.created_at))
            .execute(&mut *tx)
            .await?;

        for (position, slot_id) in booking.slot_ids.iter().enumerate() {
            sqlx::query("INSERT INTO booking_slots (booking_id, slot_id, position) VALUES ($1, $2, $3)")
                .bind(&booking.id)
                .bind(slot_id)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }

        insert_notification_in(&mut tx, notification).await?;

        tx.commit().await?;
        debug!("[Store] Booking {} stored with {} slot(s)", booking.id, booking.slot_ids.len());
        Ok(())
    }

    async fn find_booking(&self, booking_id: &str) -> Result<Option<Booking>, DbError> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_optional(self.db_client.pool())
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_booking(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_pending_bookings_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, DbError> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE payment_status = $1 AND created_at < $2 ORDER BY created_at",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(PaymentStatus::Pending.as_str())
            .bind(ts(cutoff))
            .fetch_all(self.db_client.pool())
            .await?;
        let mut bookings = Vec::with_capacity(rows.len());
        for row in &rows {
            bookings.push(self.hydrate_booking(row).await?);
        }
        Ok(bookings)
    }

    async fn attach_payment_intent(
        &self,
        booking_id: &str,
        expected: Option<&str>,
        intent_id: &str,
    ) -> Result<bool, DbError> {
        let result = match expected {
            None => {
                sqlx::query(
                    "UPDATE bookings SET payment_intent_id = $1 \
                     WHERE id = $2 AND payment_status = $3 AND payment_intent_id IS NULL",
                )
                .bind(intent_id)
                .bind(booking_id)
                .bind(PaymentStatus::Pending.as_str())
                .execute(self.db_client.pool())
                .await?
            }
            Some(previous) => {
                sqlx::query(
                    "UPDATE bookings SET payment_intent_id = $1 \
                     WHERE id = $2 AND payment_status = $3 AND payment_intent_id = $4",
                )
                .bind(intent_id)
                .bind(booking_id)
                .bind(PaymentStatus::Pending.as_str())
                .bind(previous)
                .execute(self.db_client.pool())
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn mark_paid(
        &self,
        booking_id: &str,
        intent_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE bookings SET payment_status = $1, payment_intent_id = $2, paid_at = $3 \
             WHERE id = $4 AND payment_status = $5",
        )
        .bind(PaymentStatus::Paid.as_str())
        .bind(intent_id)
        .bind(ts(paid_at))
        .bind(booking_id)
        .bind(PaymentStatus::Pending.as_str())
        .execute(self.db_client.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_tutor_confirmed(
        &self,
        booking_id: &str,
        responded_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut tx = self.db_client.begin().await?;
        let result = sqlx::query(
            "UPDATE bookings SET confirmed_by_tutor = 1, tutor_responded_at = $1 \
             WHERE id = $2 AND payment_status = $3 AND confirmed_by_tutor IS NULL",
        )
        .bind(ts(responded_at))
        .bind(booking_id)
        .bind(PaymentStatus::Paid.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            return Ok(false);
        }
        mark_booking_notifications_read(&mut tx, booking_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn settle_cancellation(
        &self,
        settlement: &CancellationSettlement,
    ) -> Result<bool, DbError> {
        let mut tx = self.db_client.begin().await?;

        let at = ts(settlement.cancelled_at);
        let result = if settlement.tutor_declined {
            sqlx::query(&format!(
                "UPDATE bookings SET payment_status = $1, cancelled_at = $2, cancelled_by = $3, \
                 cancellation_reason = $4, confirmed_by_tutor = 0, tutor_responded_at = $5 \
                 WHERE id = $6 AND payment_status = $7 {}",
                NOT_TUTOR_CONFIRMED
            ))
            .bind(settlement.new_status.as_str())
            .bind(&at)
            .bind(&settlement.cancelled_by)
            .bind(settlement.reason.clone())
            .bind(&at)
            .bind(&settlement.booking_id)
            .bind(settlement.expected_status.as_str())
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query(&format!(
                "UPDATE bookings SET payment_status = $1, cancelled_at = $2, cancelled_by = $3, \
                 cancellation_reason = $4 WHERE id = $5 AND payment_status = $6 {}",
                NOT_TUTOR_CONFIRMED
            ))
            .bind(settlement.new_status.as_str())
            .bind(&at)
            .bind(&settlement.cancelled_by)
            .bind(settlement.reason.clone())
            .bind(&settlement.booking_id)
            .bind(settlement.expected_status.as_str())
            .execute(&mut *tx)
            .await?
        };

        if result.rows_affected() != 1 {
            warn!(
                booking_id = %settlement.booking_id,
                "[Store] Settlement skipped, booking is no longer an unconfirmed {}",
                settlement.expected_status
            );
            return Ok(false);
        }

        if settlement.release_slots {
            let released = sqlx::query(
                "UPDATE slots SET booked = 0, booking_id = NULL WHERE booking_id = $1",
            )
            .bind(&settlement.booking_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            debug!(booking_id = %settlement.booking_id, "[Store] Released {} slot(s)", released);
        }
        mark_booking_notifications_read(&mut tx, &settlement.booking_id).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn override_total_price(
        &self,
        booking_id: &str,
        total_price: i64,
        reason: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE bookings SET total_price = $1, price_override_reason = $2 \
             WHERE id = $3 AND payment_status = $4 AND payment_intent_id IS NULL",
        )
        .bind(total_price)
        .bind(reason)
        .bind(booking_id)
        .bind(PaymentStatus::Pending.as_str())
        .execute(self.db_client.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn current_lesson_price(&self) -> Result<Option<i64>, DbError> {
        let row = sqlx::query("SELECT setting_value FROM settings WHERE setting_key = $1")
            .bind(LESSON_PRICE_KEY)
            .fetch_optional(self.db_client.pool())
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("setting_value")?;
                raw.parse::<i64>()
                    .map(Some)
                    .map_err(|e| DbError::Corrupt(format!("lesson price '{}': {}", raw, e)))
            }
            None => Ok(None),
        }
    }

    async fn set_lesson_price(&self, amount: i64) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO settings (setting_key, setting_value) VALUES ($1, $2) \
             ON CONFLICT (setting_key) DO UPDATE SET setting_value = excluded.setting_value",
        )
        .bind(LESSON_PRICE_KEY)
        .bind(amount.to_string())
        .execute(self.db_client.pool())
        .await?;
        Ok(())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), DbError> {
        let mut conn = self.db_client.pool().acquire().await?;
        insert_notification_in(&mut conn, notification).await
    }

    async fn find_notification(
        &self,
        notification_id: &str,
    ) -> Result<Option<Notification>, DbError> {
        let row = sqlx::query(
            "SELECT id, user_id, message, is_read, booking_id, slot_id, created_at \
             FROM notifications WHERE id = $1",
        )
        .bind(notification_id)
        .fetch_optional(self.db_client.pool())
        .await?;
        row.as_ref().map(notification_from_row).transpose()
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>, DbError> {
        let sql = if unread_only {
            "SELECT id, user_id, message, is_read, booking_id, slot_id, created_at \
             FROM notifications WHERE user_id = $1 AND is_read = 0 ORDER BY created_at DESC"
        } else {
            "SELECT id, user_id, message, is_read, booking_id, slot_id, created_at \
             FROM notifications WHERE user_id = $1 ORDER BY created_at DESC"
        };
        let rows = sqlx::query(sql)
            .bind(user_id)
            .fetch_all(self.db_client.pool())
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = $1 AND is_read = 0")
            .bind(notification_id)
            .execute(self.db_client.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_payment(&self, record: &PaymentRecord) -> Result<(), DbError> {
        let sql = format!(
            "INSERT INTO payments ({}) VALUES ({}) \
             ON CONFLICT (gateway_payment_id) DO UPDATE SET \
             refund_id = COALESCE(excluded.refund_id, payments.refund_id), \
             refunded_amount = COALESCE(excluded.refunded_amount, payments.refunded_amount), \
             refunded_at = COALESCE(excluded.refunded_at, payments.refunded_at), \
             status = excluded.status, \
             updated_at = excluded.updated_at",
            PAYMENT_COLUMNS,
            placeholders(1, 11)
        );
        sqlx::query(&sql)
            .bind(&record.id)
            .bind(&record.booking_id)
            .bind(&record.gateway_payment_id)
            .bind(record.refund_id.clone())
            .bind(record.amount)
            .bind(record.refunded_amount)
            .bind(&record.currency)
            .bind(record.status.as_str())
            .bind(record.refunded_at.map(ts))
            .bind(ts(record.created_at))
            .bind(ts(record.updated_at))
            .execute(self.db_client.pool())
            .await?;
        Ok(())
    }

    async fn find_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DbError> {
        let sql = format!("SELECT {} FROM payments WHERE gateway_payment_id = $1", PAYMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(gateway_payment_id)
            .fetch_optional(self.db_client.pool())
            .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn list_payments(&self, booking_id: &str) -> Result<Vec<PaymentRecord>, DbError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE booking_id = $1 ORDER BY created_at",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_all(self.db_client.pool())
            .await?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn claim_email(
        &self,
        booking_id: &str,
        kind: EmailKind,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT INTO email_log (booking_id, kind, status, message_id, updated_at) \
             VALUES ($1, $2, $3, NULL, $4) ON CONFLICT (booking_id, kind) DO NOTHING",
        )
        .bind(booking_id)
        .bind(kind.as_str())
        .bind(EmailStatus::Sending.as_str())
        .bind(ts(at))
        .execute(self.db_client.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_email(
        &self,
        booking_id: &str,
        kind: EmailKind,
        message_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO email_log (booking_id, kind, status, message_id, updated_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (booking_id, kind) DO UPDATE SET \
             status = excluded.status, message_id = excluded.message_id, updated_at = excluded.updated_at",
        )
        .bind(booking_id)
        .bind(kind.as_str())
        .bind(EmailStatus::Sent.as_str())
        .bind(message_id)
        .bind(ts(at))
        .execute(self.db_client.pool())
        .await?;
        Ok(())
    }

    async fn release_email(&self, booking_id: &str, kind: EmailKind) -> Result<(), DbError> {
        sqlx::query("DELETE FROM email_log WHERE booking_id = $1 AND kind = $2 AND status = $3")
            .bind(booking_id)
            .bind(kind.as_str())
            .bind(EmailStatus::Sending.as_str())
            .execute(self.db_client.pool())
            .await?;
        Ok(())
    }

    async fn find_email(
        &self,
        booking_id: &str,
        kind: EmailKind,
    ) -> Result<Option<EmailRecord>, DbError> {
        let row = sqlx::query(
            "SELECT booking_id, kind, status, message_id, updated_at FROM email_log \
             WHERE booking_id = $1 AND kind = $2",
        )
        .bind(booking_id)
        .bind(kind.as_str())
        .fetch_optional(self.db_client.pool())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let kind_raw: String = row.try_get("kind")?;
        let status_raw: String = row.try_get("status")?;
        Ok(Some(EmailRecord {
            booking_id: row.try_get("booking_id")?,
            kind: EmailKind::from_str(&kind_raw).map_err(DbError::Corrupt)?,
            status: EmailStatus::from_str(&status_raw).map_err(DbError::Corrupt)?,
            message_id: nullable_text(&row, "message_id"),
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
        }))
    }
}

async fn insert_notification_in(
    conn: &mut AnyConnection,
    notification: &Notification,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO notifications (id, user_id, message, is_read, booking_id, slot_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&notification.id)
    .bind(&notification.user_id)
    .bind(&notification.message)
    .bind(i64::from(notification.read))
    .bind(notification.booking_id.clone())
    .bind(notification.slot_id.clone())
    .bind(ts(notification.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}
