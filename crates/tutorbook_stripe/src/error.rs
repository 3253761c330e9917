// --- File: crates/tutorbook_stripe/src/error.rs ---
use thiserror::Error;
use tutorbook_common::{GatewayError, HttpStatusCode, TutorbookError};

/// Stripe-specific error types.
#[derive(Error, Debug)]
pub enum StripeError {
    /// Error occurred during a Stripe API request
    #[error("Stripe API request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    /// Error returned by the Stripe API
    #[error("Stripe API returned an error: {message} (Status: {status_code})")]
    ApiError { status_code: u16, message: String },

    /// Error parsing Stripe API response
    #[error("Failed to parse Stripe API response: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Missing or incomplete Stripe configuration
    #[error("Stripe configuration missing or incomplete: {0}")]
    ConfigError(String),

    /// Webhook signature verification failed
    #[error("Stripe webhook signature verification failed: {0}")]
    WebhookSignatureError(String),

    /// Webhook payload did not carry what the event type promises
    #[error("Stripe webhook event processing error: {0}")]
    WebhookProcessingError(String),
}

impl From<StripeError> for GatewayError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::RequestError(e) => GatewayError::Transport(e.to_string()),
            StripeError::ApiError {
                status_code,
                message,
            } => GatewayError::Api {
                status_code,
                message,
            },
            StripeError::ParseError(e) => GatewayError::InvalidResponse(e.to_string()),
            StripeError::ConfigError(msg) => GatewayError::NotConfigured(msg),
            StripeError::WebhookSignatureError(msg) | StripeError::WebhookProcessingError(msg) => {
                GatewayError::InvalidResponse(msg)
            }
        }
    }
}

/// Convert StripeError to TutorbookError
impl From<StripeError> for TutorbookError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::WebhookSignatureError(msg) => {
                TutorbookError::AuthError(format!("Stripe webhook signature error: {}", msg))
            }
            StripeError::WebhookProcessingError(msg) => {
                TutorbookError::ValidationError(format!("Stripe webhook payload: {}", msg))
            }
            StripeError::ConfigError(msg) => TutorbookError::ConfigError(msg),
            other => GatewayError::from(other).into(),
        }
    }
}

impl HttpStatusCode for StripeError {
    fn status_code(&self) -> u16 {
        match self {
            StripeError::RequestError(_) => 502,
            StripeError::ApiError { .. } => 502,
            StripeError::ParseError(_) => 502,
            StripeError::ConfigError(_) => 500,
            StripeError::WebhookSignatureError(_) => 401,
            StripeError::WebhookProcessingError(_) => 400,
        }
    }
}
