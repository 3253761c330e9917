// --- File: crates/tutorbook_stripe/src/simulated.rs ---
//! In-memory stand-in for Stripe.
//!
//! Used where no live credentials exist and simulated payments are
//! permitted. Intents start in `requires_payment_method` and only succeed
//! through [`SimulatedPaymentGateway::mark_succeeded`], which the dev-only
//! simulate-payment route and the tests drive. Failures can be injected per
//! operation to rehearse provider outages.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::info;
use tutorbook_common::services::{BOOKING_ID_METADATA_KEY, INTENT_STATUS_CANCELED, INTENT_STATUS_SUCCEEDED};
use tutorbook_common::{
    BoxFuture, CreateIntentRequest, GatewayError, PaymentGateway, PaymentIntent, Refund,
    RefundRequest,
};
use uuid::Uuid;

const INITIAL_INTENT_STATUS: &str = "requires_payment_method";

/// Which operations fail with a transport error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedFailures {
    pub create: bool,
    pub retrieve: bool,
    pub search: bool,
    pub refund: bool,
}

#[derive(Default)]
struct SimulatedState {
    intents: HashMap<String, PaymentIntent>,
    /// Intent ids in creation order, which is also search order.
    order: Vec<String>,
    intent_keys: HashMap<String, String>,
    refunds: Vec<Refund>,
    refund_keys: HashMap<String, usize>,
    refunded: HashMap<String, i64>,
    failures: SimulatedFailures,
}

impl SimulatedState {
    fn intent(&self, intent_id: &str) -> Result<&PaymentIntent, GatewayError> {
        self.intents.get(intent_id).ok_or_else(|| no_such_intent(intent_id))
    }

    fn insert(&mut self, intent: PaymentIntent) {
        if !self.intents.contains_key(&intent.id) {
            self.order.push(intent.id.clone());
        }
        self.intents.insert(intent.id.clone(), intent);
    }
}

fn no_such_intent(intent_id: &str) -> GatewayError {
    GatewayError::Api {
        status_code: 404,
        message: format!("No such payment_intent: '{}'", intent_id),
    }
}

fn outage(operation: &str) -> GatewayError {
    GatewayError::Transport(format!("simulated outage during {}", operation))
}

#[derive(Default)]
pub struct SimulatedPaymentGateway {
    state: Mutex<SimulatedState>,
}

impl SimulatedPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_failures(&self, failures: SimulatedFailures) {
        self.state.lock().await.failures = failures;
    }

    /// Completes the payment of an open intent, as a card confirmation would.
    pub async fn mark_succeeded(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.state.lock().await;
        let intent = state
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| no_such_intent(intent_id))?;
        if intent.is_canceled() {
            return Err(GatewayError::Api {
                status_code: 400,
                message: format!("PaymentIntent {} was canceled", intent_id),
            });
        }
        intent.status = INTENT_STATUS_SUCCEEDED.to_string();
        intent.amount_received = Some(intent.amount);
        info!("[Stripe] Simulated payment succeeded for intent {}", intent_id);
        Ok(intent.clone())
    }

    /// Stores an intent as-is, e.g. one created outside the booking flow.
    pub async fn insert_intent(&self, intent: PaymentIntent) {
        self.state.lock().await.insert(intent);
    }

    pub async fn intent(&self, intent_id: &str) -> Option<PaymentIntent> {
        self.state.lock().await.intents.get(intent_id).cloned()
    }

    pub async fn refunds(&self) -> Vec<Refund> {
        self.state.lock().await.refunds.clone()
    }

    pub async fn intent_count(&self) -> usize {
        self.state.lock().await.intents.len()
    }
}

impl PaymentGateway for SimulatedPaymentGateway {
    fn create_intent(&self, request: CreateIntentRequest) -> BoxFuture<'_, PaymentIntent, GatewayError> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.failures.create {
                return Err(outage("create intent"));
            }
            if let Some(key) = &request.idempotency_key {
                if let Some(existing) = state.intent_keys.get(key) {
                    return state.intent(existing).cloned();
                }
            }

            let id = format!("pi_sim_{}", Uuid::new_v4().simple());
            let intent = PaymentIntent {
                client_secret: Some(format!("{}_secret_sim", id)),
                id: id.clone(),
                status: INITIAL_INTENT_STATUS.to_string(),
                amount: request.amount,
                amount_received: Some(0),
                currency: request.currency.to_lowercase(),
                metadata: HashMap::from([(
                    BOOKING_ID_METADATA_KEY.to_string(),
                    request.booking_id.clone(),
                )]),
            };
            if let Some(key) = request.idempotency_key {
                state.intent_keys.insert(key, id);
            }
            state.insert(intent.clone());
            Ok(intent)
        })
    }

    fn retrieve_intent(&self, intent_id: &str) -> BoxFuture<'_, PaymentIntent, GatewayError> {
        let intent_id = intent_id.to_string();
        Box::pin(async move {
            let state = self.state.lock().await;
            if state.failures.retrieve {
                return Err(outage("retrieve intent"));
            }
            state.intent(&intent_id).cloned()
        })
    }

    fn search_succeeded_intent_by_booking_id(
        &self,
        booking_id: &str,
    ) -> BoxFuture<'_, Option<PaymentIntent>, GatewayError> {
        let booking_id = booking_id.to_string();
        Box::pin(async move {
            let state = self.state.lock().await;
            if state.failures.search {
                return Err(outage("search intents"));
            }
            Ok(state
                .order
                .iter()
                .filter_map(|id| state.intents.get(id))
                .find(|intent| intent.is_succeeded() && intent.booking_id() == Some(booking_id.as_str()))
                .cloned())
        })
    }

    fn refund(&self, request: RefundRequest) -> BoxFuture<'_, Refund, GatewayError> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.failures.refund {
                return Err(outage("refund"));
            }
            if let Some(key) = &request.idempotency_key {
                if let Some(index) = state.refund_keys.get(key) {
                    return Ok(state.refunds[*index].clone());
                }
            }

            let intent = state.intent(&request.intent_id)?.clone();
            if !intent.is_succeeded() {
                return Err(GatewayError::Api {
                    status_code: 400,
                    message: format!(
                        "PaymentIntent {} does not have a successful charge to refund",
                        intent.id
                    ),
                });
            }
            let already = state.refunded.get(&intent.id).copied().unwrap_or(0);
            let remaining = intent.captured_amount() - already;
            let amount = request.amount.unwrap_or(remaining);
            if amount <= 0 || amount > remaining {
                return Err(GatewayError::Api {
                    status_code: 400,
                    message: format!("Charge for {} has already been refunded.", intent.id),
                });
            }

            let refund = Refund {
                id: format!("re_sim_{}", Uuid::new_v4().simple()),
                status: "succeeded".to_string(),
                amount,
                currency: intent.currency.clone(),
                payment_intent_id: Some(intent.id.clone()),
            };
            *state.refunded.entry(intent.id.clone()).or_insert(0) += amount;
            state.refunds.push(refund.clone());
            if let Some(key) = request.idempotency_key {
                let index = state.refunds.len() - 1;
                state.refund_keys.insert(key, index);
            }
            info!(
                "[Stripe] Simulated refund {} of {} for intent {} ({})",
                refund.id,
                amount,
                intent.id,
                request.reason.as_str()
            );
            Ok(refund)
        })
    }

    fn cancel_intent(&self, intent_id: &str) -> BoxFuture<'_, PaymentIntent, GatewayError> {
        let intent_id = intent_id.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let intent = state
                .intents
                .get_mut(&intent_id)
                .ok_or_else(|| no_such_intent(&intent_id))?;
            if intent.is_succeeded() {
                return Err(GatewayError::Api {
                    status_code: 400,
                    message: format!(
                        "You cannot cancel this PaymentIntent because it has a status of {}.",
                        intent.status
                    ),
                });
            }
            intent.status = INTENT_STATUS_CANCELED.to_string();
            Ok(intent.clone())
        })
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
