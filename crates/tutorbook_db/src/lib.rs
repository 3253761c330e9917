// --- File: crates/tutorbook_db/src/lib.rs ---
//! Persistence for slots, bookings, notifications, the payment audit trail
//! and the email send guard.
//!
//! The SQL store runs on `sqlx::Any`; SQLite is the default driver and the
//! `postgres`/`mysql` features link the others. The in-memory store serves
//! deployments without a database and tests.
//!
//! ```rust,no_run
//! use tutorbook_db::BookingStoreFactory;
//!
//! # async fn setup() -> Result<(), tutorbook_db::error::DbError> {
//! let store = BookingStoreFactory::new().from_url("sqlite://data/tutorbook.db").await?;
//! assert!(store.is_healthy().await);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod factory;
pub mod repositories;

pub use client::DbClient;
pub use error::DbError;
pub use factory::BookingStoreFactory;
pub use repositories::{BookingStore, CancellationSettlement, InMemoryBookingStore, SqlBookingStore};
