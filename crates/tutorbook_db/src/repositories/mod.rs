// --- File: crates/tutorbook_db/src/repositories/mod.rs ---
//! Booking store contract and its implementations.

pub mod booking_store;
pub mod memory;
pub mod sql;

pub use booking_store::{BookingStore, CancellationSettlement};
pub use memory::InMemoryBookingStore;
pub use sql::SqlBookingStore;
