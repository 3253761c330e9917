// --- File: crates/tutorbook_notify/src/lib.rs ---
//! Outbound email for the booking workflow.
//!
//! Templates render each booking email, the dispatcher validates the
//! destination and retries transient transport failures, and the transports
//! deliver over SMTP or into the log.

pub mod dispatcher;
#[cfg(test)]
mod dispatcher_test;
pub mod templates;
pub mod transport;

pub use dispatcher::{is_valid_email, DeliveryOutcome, NotificationDispatcher};
pub use templates::{format_money, RenderedEmail};
pub use transport::{
    transport_from_config, LogMailTransport, RecordingMailTransport, SmtpMailTransport,
};
