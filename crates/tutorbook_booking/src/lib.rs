// --- File: crates/tutorbook_booking/src/lib.rs ---
//! Booking workflow: slot reservation, payment confirmation (webhook or
//! polling), tutor accept/decline and the compensating refund, slot release
//! and notifications.

// Declare modules within this crate
pub mod auth;
pub mod confirmation;
pub mod context;
pub mod doc;
pub mod emails;
pub mod error;
pub mod expiry;
pub mod handlers;
pub mod locks;
pub mod logic;
#[cfg(test)]
mod logic_proptest;
#[cfg(test)]
mod logic_test;
pub mod models;
pub mod orchestrator;
pub mod routes;
pub mod settlement;

pub use context::{Actor, RequestContext};
pub use error::BookingError;
pub use expiry::{spawn_expiry_sweep, PAYMENT_TIMEOUT_REASON};
pub use handlers::BookingState;
pub use orchestrator::{BookingOrchestrator, OrchestratorSettings};
pub use routes::routes;
