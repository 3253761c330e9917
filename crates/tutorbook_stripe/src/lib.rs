// --- File: crates/tutorbook_stripe/src/lib.rs ---
//! Stripe adapter for the booking workflow: payment intents, refunds,
//! metadata search, webhook signature verification and a simulated gateway.

pub mod error;
pub mod logic;
#[cfg(test)]
mod logic_test;
pub mod service;
pub mod simulated;

pub use error::StripeError;
pub use logic::{
    parse_event, sign_payload, verify_stripe_signature, StripeApi, StripeEvent,
    DEFAULT_WEBHOOK_TOLERANCE_SECS, EVENT_PAYMENT_INTENT_CANCELED, EVENT_PAYMENT_INTENT_FAILED,
    EVENT_PAYMENT_INTENT_SUCCEEDED, STRIPE_SIGNATURE_HEADER,
};
pub use service::StripePaymentGateway;
pub use simulated::{SimulatedFailures, SimulatedPaymentGateway};
