// --- File: crates/tutorbook_common/src/lib.rs ---

// Declare modules within this crate
pub mod error; // Error taxonomy
pub mod http; // HTTP utilities
pub mod logging; // Logging setup
pub mod models; // Booking workflow entities
pub mod retry; // Bounded retries
pub mod services; // Gateway and mail transport traits

// Re-export error types and utilities for easier access
pub use error::{HttpStatusCode, TutorbookError};

pub use http::{client::HTTP_CLIENT, IntoHttpResponse};

pub use logging::{init, init_from_config, init_with_level};

pub use retry::{retry_with_predicate, Exhausted, RetryPolicy};

pub use services::{
    BoxFuture, CreateIntentRequest, GatewayError, MailError, MailReceipt, MailTransport,
    OutboundEmail, PaymentGateway, PaymentIntent, Refund, RefundReason, RefundRequest,
};
