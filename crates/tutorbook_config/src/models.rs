// --- File: crates/tutorbook_config/src/models.rs ---

use serde::{Deserialize, Serialize};

// --- General Server Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

// --- Logging Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset, e.g. "info" or "tutorbook=debug".
    pub level: Option<String>,
    /// When set, a daily rolling log file is written into this directory.
    pub directory: Option<String>,
    pub file_prefix: Option<String>,
}

// --- Database Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String, // e.g. sqlite://data/tutorbook.db, via TUTORBOOK__DATABASE__URL
    pub max_connections: Option<u32>,
}

// --- Stripe Config ---
// Secrets use the "secret_from_env" marker and are filled from
// STRIPE_SECRET_KEY / STRIPE_WEBHOOK_SECRET at load time.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    /// Defaults to https://api.stripe.com/v1
    pub api_base: Option<String>,
    /// Allowed clock skew for webhook signatures, in seconds.
    pub webhook_tolerance_secs: Option<i64>,
}

// --- Outbound Mail Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>, // MAIL_PASSWORD
    pub from_address: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AdminConfig {
    pub shared_secret: Option<String>, // ADMIN_SHARED_SECRET
}

// --- Booking workflow ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BookingConfig {
    /// Price of one slot in minor units, used until an admin stores a price.
    pub lesson_price: i64,
    pub currency: String,
    /// IANA zone used for date-only slot queries and email formatting.
    pub time_zone: String,
    /// true: the Stripe webhook confirms payments and verify-payment waits for it.
    /// false: verify-payment asks the gateway directly.
    pub use_webhook_confirmation: bool,
    /// Permits the in-memory payment gateway (and its simulated refunds) outside production.
    pub allow_simulated_payments: bool,
    pub pending_expiry_minutes: i64,
    pub expiry_sweep_interval_secs: u64,
    pub payment_poll_attempts: u32,
    pub payment_poll_interval_ms: u64,
    pub email_retry_attempts: u32,
    pub email_retry_backoff_ms: u64,
    pub default_lesson_category: String,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            lesson_price: 2500,
            currency: "eur".to_string(),
            time_zone: "Europe/Vilnius".to_string(),
            use_webhook_confirmation: true,
            allow_simulated_payments: false,
            pending_expiry_minutes: 30,
            expiry_sweep_interval_secs: 60,
            payment_poll_attempts: 15,
            payment_poll_interval_ms: 2000,
            email_retry_attempts: 6,
            email_retry_backoff_ms: 2000,
            default_lesson_category: "general".to_string(),
        }
    }
}

// --- Unified App Configuration ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Deployment name taken from RUN_ENV unless set explicitly.
    #[serde(default = "default_environment")]
    pub environment: String,

    // Server config is mandatory
    pub server: ServerConfig,

    // --- Runtime Flags (optional in config file, default to false) ---
    #[serde(default)]
    pub use_stripe: bool,
    #[serde(default)]
    pub use_smtp: bool,
    #[serde(default)]
    pub use_database: bool,

    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    // --- Optional Feature Configurations ---
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub stripe: Option<StripeConfig>,
    #[serde(default)]
    pub mail: Option<MailConfig>,
    #[serde(default)]
    pub admin: Option<AdminConfig>,
}

fn default_environment() -> String {
    "development".to_string()
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_ascii_lowercase().as_str(), "production" | "prod")
    }

    /// The simulated gateway may only stand in for Stripe outside production.
    pub fn simulated_payments_permitted(&self) -> bool {
        self.booking.allow_simulated_payments && !self.is_production()
    }

    pub fn stripe_secret_key(&self) -> Option<&str> {
        self.stripe
            .as_ref()
            .and_then(|s| s.secret_key.as_deref())
            .filter(|key| !key.is_empty() && *key != SECRET_FROM_ENV)
    }

    pub fn stripe_webhook_secret(&self) -> Option<&str> {
        self.stripe
            .as_ref()
            .and_then(|s| s.webhook_secret.as_deref())
            .filter(|secret| !secret.is_empty() && *secret != SECRET_FROM_ENV)
    }

    pub fn admin_secret(&self) -> Option<&str> {
        self.admin
            .as_ref()
            .and_then(|a| a.shared_secret.as_deref())
            .filter(|secret| !secret.is_empty() && *secret != SECRET_FROM_ENV)
    }
}

/// Marker value replaced by an environment variable at load time.
pub const SECRET_FROM_ENV: &str = "secret_from_env";
