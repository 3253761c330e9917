// --- File: crates/services/tutorbook_backend/src/service_factory.rs ---
//! Service factory implementation.
//!
//! Builds the booking store, the payment gateway and the mail transport from
//! the application configuration.
use std::sync::Arc;
use tracing::{info, warn};
use tutorbook_common::{MailTransport, PaymentGateway, TutorbookError};
use tutorbook_config::AppConfig;
use tutorbook_db::{BookingStore, BookingStoreFactory};
use tutorbook_notify::transport_from_config;
use tutorbook_stripe::{SimulatedPaymentGateway, StripePaymentGateway};

/// Every external dependency of the booking workflow, resolved once at startup.
pub struct TutorbookServiceFactory {
    store: Arc<dyn BookingStore>,
    payment_gateway: Arc<dyn PaymentGateway>,
    /// Set when the simulated gateway stands in for Stripe.
    simulator: Option<Arc<SimulatedPaymentGateway>>,
    mail_transport: Arc<dyn MailTransport>,
}

impl TutorbookServiceFactory {
    pub async fn new(config: &AppConfig) -> Result<Self, TutorbookError> {
        let store = BookingStoreFactory::new().from_app_config(config).await?;
        let (payment_gateway, simulator) = payment_gateway_from_config(config)?;
        let mail_transport = transport_from_config(config)?;
        info!(
            "[Services] store={} gateway={} mail={}",
            store.backend(),
            payment_gateway.name(),
            mail_transport.name()
        );
        Ok(Self {
            store,
            payment_gateway,
            simulator,
            mail_transport,
        })
    }

    pub fn store(&self) -> Arc<dyn BookingStore> {
        self.store.clone()
    }

    pub fn payment_gateway(&self) -> Arc<dyn PaymentGateway> {
        self.payment_gateway.clone()
    }

    pub fn simulator(&self) -> Option<Arc<SimulatedPaymentGateway>> {
        self.simulator.clone()
    }

    pub fn mail_transport(&self) -> Arc<dyn MailTransport> {
        self.mail_transport.clone()
    }
}

/// Stripe when enabled and keyed. Otherwise the simulated gateway, which is
/// refused in production or when not explicitly allowed.
pub fn payment_gateway_from_config(
    config: &AppConfig,
) -> Result<(Arc<dyn PaymentGateway>, Option<Arc<SimulatedPaymentGateway>>), TutorbookError> {
    if config.use_stripe {
        if config.stripe_secret_key().is_some() {
            info!("[Services] Initializing Stripe payment gateway...");
            let gateway = StripePaymentGateway::from_config(config)?;
            return Ok((Arc::new(gateway), None));
        }
        warn!("[Services] use_stripe is set but no Stripe secret key is configured");
    }

    if config.simulated_payments_permitted() {
        warn!("[Services] Using the simulated payment gateway, no real money moves");
        let simulator = Arc::new(SimulatedPaymentGateway::new());
        let gateway: Arc<dyn PaymentGateway> = simulator.clone();
        return Ok((gateway, Some(simulator)));
    }

    Err(TutorbookError::ConfigError(if config.is_production() {
        "a Stripe secret key is required in production".to_string()
    } else {
        "no payment gateway: configure Stripe or set booking.allow_simulated_payments".to_string()
    }))
}
