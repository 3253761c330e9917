// --- File: crates/tutorbook_stripe/src/service.rs ---
use tutorbook_common::{
    BoxFuture, CreateIntentRequest, GatewayError, PaymentGateway, PaymentIntent, Refund,
    RefundRequest,
};
use tutorbook_config::AppConfig;

use crate::error::StripeError;
use crate::logic::{
    cancel_payment_intent, create_payment_intent, create_refund, retrieve_payment_intent,
    search_succeeded_payment_intent, StripeApi,
};

/// Payment gateway backed by the Stripe REST API.
#[derive(Debug, Clone)]
pub struct StripePaymentGateway {
    api: StripeApi,
}

impl StripePaymentGateway {
    pub fn new(api: StripeApi) -> Self {
        Self { api }
    }

    /// Fails when no secret key is configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, StripeError> {
        Ok(Self::new(StripeApi::from_config(config)?))
    }
}

impl PaymentGateway for StripePaymentGateway {
    fn create_intent(&self, request: CreateIntentRequest) -> BoxFuture<'_, PaymentIntent, GatewayError> {
        Box::pin(async move { Ok(create_payment_intent(&self.api, &request).await?) })
    }

    fn retrieve_intent(&self, intent_id: &str) -> BoxFuture<'_, PaymentIntent, GatewayError> {
        let intent_id = intent_id.to_string();
        Box::pin(async move { Ok(retrieve_payment_intent(&self.api, &intent_id).await?) })
    }

    fn search_succeeded_intent_by_booking_id(
        &self,
        booking_id: &str,
    ) -> BoxFuture<'_, Option<PaymentIntent>, GatewayError> {
        let booking_id = booking_id.to_string();
        Box::pin(async move { Ok(search_succeeded_payment_intent(&self.api, &booking_id).await?) })
    }

    fn refund(&self, request: RefundRequest) -> BoxFuture<'_, Refund, GatewayError> {
        Box::pin(async move { Ok(create_refund(&self.api, &request).await?) })
    }

    fn cancel_intent(&self, intent_id: &str) -> BoxFuture<'_, PaymentIntent, GatewayError> {
        let intent_id = intent_id.to_string();
        Box::pin(async move { Ok(cancel_payment_intent(&self.api, &intent_id).await?) })
    }

    fn name(&self) -> &'static str {
        "stripe"
    }
}
