// --- File: crates/tutorbook_stripe/src/logic.rs ---
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use tutorbook_common::services::BOOKING_ID_METADATA_KEY;
use tutorbook_common::{CreateIntentRequest, PaymentIntent, Refund, RefundRequest, HTTP_CLIENT};
use tutorbook_config::AppConfig;

use crate::error::StripeError;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";
const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

pub const EVENT_PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
pub const EVENT_PAYMENT_INTENT_CANCELED: &str = "payment_intent.canceled";

// --- API credentials ---

/// Secret key and base URL for calls against the Stripe REST API.
#[derive(Clone)]
pub struct StripeApi {
    secret_key: String,
    api_base: String,
}

impl std::fmt::Debug for StripeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeApi")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl StripeApi {
    pub fn new(secret_key: impl Into<String>, api_base: Option<&str>) -> Self {
        let api_base = api_base
            .filter(|base| !base.is_empty())
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        Self {
            secret_key: secret_key.into(),
            api_base,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, StripeError> {
        let secret_key = config
            .stripe_secret_key()
            .ok_or_else(|| StripeError::ConfigError("STRIPE_SECRET_KEY is not set".to_string()))?;
        let api_base = config.stripe.as_ref().and_then(|s| s.api_base.as_deref());
        Ok(Self::new(secret_key, api_base))
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }
}

// --- Wire structures ---

#[derive(Deserialize, Debug)]
struct StripeSearchResult<T> {
    data: Vec<T>,
}

#[derive(Deserialize, Debug)]
struct StripeRefundObject {
    id: String,
    status: Option<String>,
    amount: i64,
    currency: String,
    payment_intent: Option<String>,
}

impl From<StripeRefundObject> for Refund {
    fn from(obj: StripeRefundObject) -> Self {
        Refund {
            id: obj.id,
            status: obj.status.unwrap_or_else(|| "pending".to_string()),
            amount: obj.amount,
            currency: obj.currency,
            payment_intent_id: obj.payment_intent,
        }
    }
}

// --- Payment intents ---

pub(crate) fn intent_form(request: &CreateIntentRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_string(), request.amount.to_string()),
        ("currency".to_string(), request.currency.to_lowercase()),
        (
            format!("metadata[{}]", BOOKING_ID_METADATA_KEY),
            request.booking_id.clone(),
        ),
        (
            "automatic_payment_methods[enabled]".to_string(),
            "true".to_string(),
        ),
    ];
    if let Some(description) = &request.description {
        form.push(("description".to_string(), description.clone()));
    }
    if let Some(email) = &request.receipt_email {
        form.push(("receipt_email".to_string(), email.clone()));
    }
    form
}

pub(crate) fn refund_form(request: &RefundRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("payment_intent".to_string(), request.intent_id.clone()),
        ("reason".to_string(), request.reason.as_str().to_string()),
    ];
    if let Some(amount) = request.amount {
        form.push(("amount".to_string(), amount.to_string()));
    }
    let mut keys: Vec<&String> = request.metadata.keys().collect();
    keys.sort();
    for key in keys {
        form.push((format!("metadata[{}]", key), request.metadata[key].clone()));
    }
    form
}

/// Stripe search query for the succeeded intent of a booking.
pub(crate) fn succeeded_intent_query(booking_id: &str) -> String {
    let escaped = booking_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "metadata['{}']:'{}' AND status:'succeeded'",
        BOOKING_ID_METADATA_KEY, escaped
    )
}

/// Reads a Stripe response, turning non-2xx bodies into `ApiError` with the
/// message Stripe put under `error.message`.
async fn read_stripe_response<T: DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> Result<T, StripeError> {
    let status = response.status();
    let body_text = response.text().await?;

    if status.is_success() {
        return Ok(serde_json::from_str(&body_text)?);
    }

    let error_message = match serde_json::from_str::<serde_json::Value>(&body_text) {
        Ok(json_body) => json_body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or(&body_text)
            .to_string(),
        Err(_) => body_text,
    };
    warn!(
        "[Stripe] {} failed with HTTP status {}: {}",
        operation, status, error_message
    );
    Err(StripeError::ApiError {
        status_code: status.as_u16(),
        message: error_message,
    })
}

/// Creates a payment intent tagged with the booking id.
pub async fn create_payment_intent(
    api: &StripeApi,
    request: &CreateIntentRequest,
) -> Result<PaymentIntent, StripeError> {
    info!(
        "[Stripe] Creating payment intent for booking {} ({} {})",
        request.booking_id, request.amount, request.currency
    );

    let mut builder = HTTP_CLIENT
        .post(api.url("payment_intents"))
        .basic_auth(&api.secret_key, None::<&str>)
        .form(&intent_form(request));
    if let Some(key) = &request.idempotency_key {
        builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
    }

    let intent: PaymentIntent = read_stripe_response(builder.send().await?, "create intent").await?;
    debug!("[Stripe] Created payment intent {}", intent.id);
    Ok(intent)
}

pub async fn retrieve_payment_intent(
    api: &StripeApi,
    intent_id: &str,
) -> Result<PaymentIntent, StripeError> {
    let response = HTTP_CLIENT
        .get(api.url(&format!("payment_intents/{}", intent_id)))
        .basic_auth(&api.secret_key, None::<&str>)
        .send()
        .await?;
    read_stripe_response(response, "retrieve intent").await
}

/// Finds a succeeded intent whose metadata names the booking.
pub async fn search_succeeded_payment_intent(
    api: &StripeApi,
    booking_id: &str,
) -> Result<Option<PaymentIntent>, StripeError> {
    let query = succeeded_intent_query(booking_id);
    let response = HTTP_CLIENT
        .get(api.url("payment_intents/search"))
        .basic_auth(&api.secret_key, None::<&str>)
        .query(&[("query", query.as_str()), ("limit", "10")])
        .send()
        .await?;

    let result: StripeSearchResult<PaymentIntent> =
        read_stripe_response(response, "search intents").await?;
    Ok(result.data.into_iter().find(|intent| intent.is_succeeded()))
}

pub async fn create_refund(api: &StripeApi, request: &RefundRequest) -> Result<Refund, StripeError> {
    info!(
        "[Stripe] Refunding payment intent {} (reason: {})",
        request.intent_id,
        request.reason.as_str()
    );

    let mut builder = HTTP_CLIENT
        .post(api.url("refunds"))
        .basic_auth(&api.secret_key, None::<&str>)
        .form(&refund_form(request));
    if let Some(key) = &request.idempotency_key {
        builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
    }

    let refund: StripeRefundObject = read_stripe_response(builder.send().await?, "refund").await?;
    Ok(refund.into())
}

pub async fn cancel_payment_intent(
    api: &StripeApi,
    intent_id: &str,
) -> Result<PaymentIntent, StripeError> {
    let response = HTTP_CLIENT
        .post(api.url(&format!("payment_intents/{}/cancel", intent_id)))
        .basic_auth(&api.secret_key, None::<&str>)
        .send()
        .await?;
    read_stripe_response(response, "cancel intent").await
}

// --- Webhooks ---

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StripeEventRequest {
    pub id: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Envelope of a webhook event.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StripeEvent {
    pub id: String,
    pub object: String,
    pub api_version: Option<String>,
    pub created: i64,
    pub livemode: bool,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
    pub request: Option<StripeEventRequest>,
}

impl StripeEvent {
    pub fn is_payment_intent_event(&self) -> bool {
        self.event_type.starts_with("payment_intent.")
    }

    /// The payment intent carried in `data.object`.
    pub fn payment_intent(&self) -> Result<PaymentIntent, StripeError> {
        if !self.is_payment_intent_event() {
            return Err(StripeError::WebhookProcessingError(format!(
                "event {} of type {} does not carry a payment intent",
                self.id, self.event_type
            )));
        }
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            StripeError::WebhookProcessingError(format!(
                "event {} has a malformed payment intent: {}",
                self.id, e
            ))
        })
    }
}

pub fn parse_event(payload: &[u8]) -> Result<StripeEvent, StripeError> {
    serde_json::from_slice(payload)
        .map_err(|e| StripeError::WebhookProcessingError(format!("invalid event payload: {}", e)))
}

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn compute_stripe_signature(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> Result<String, StripeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        StripeError::WebhookSignatureError("Invalid webhook secret format for HMAC".to_string())
    })?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds a `Stripe-Signature` header value the way Stripe sends it.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, StripeError> {
    let signature = compute_stripe_signature(payload, secret, timestamp)?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// Verifies the signature of an incoming Stripe webhook request.
///
/// # Arguments
/// * `payload` - The raw request body bytes.
/// * `sig_header` - The value of the 'Stripe-Signature' header.
/// * `secret` - The webhook signing secret (whsec_...).
/// * `tolerance_secs` - Maximum age of the signed timestamp.
pub fn verify_stripe_signature(
    payload: &[u8],
    sig_header: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
) -> Result<(), StripeError> {
    verify_stripe_signature_at(payload, sig_header, secret, tolerance_secs, Utc::now().timestamp())
}

/// Same as [`verify_stripe_signature`] against an explicit clock.
pub fn verify_stripe_signature_at(
    payload: &[u8],
    sig_header: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), StripeError> {
    let sig_header_value = sig_header.ok_or_else(|| {
        StripeError::WebhookSignatureError("Missing Stripe-Signature header".to_string())
    })?;

    let mut timestamp_str: Option<&str> = None;
    let mut v1_signatures_hex: Vec<&str> = Vec::new();

    for item in sig_header_value.split(',') {
        if let Some((key, value)) = item.trim().split_once('=') {
            match key {
                "t" => timestamp_str = Some(value),
                "v1" => v1_signatures_hex.push(value),
                _ => {} // v0 and unknown schemes are ignored
            }
        }
    }

    let timestamp = timestamp_str
        .ok_or_else(|| {
            StripeError::WebhookSignatureError(
                "Missing timestamp 't' in Stripe-Signature".to_string(),
            )
        })?
        .parse::<i64>()
        .map_err(|_| {
            StripeError::WebhookSignatureError(
                "Invalid timestamp format in Stripe-Signature".to_string(),
            )
        })?;

    if v1_signatures_hex.is_empty() {
        return Err(StripeError::WebhookSignatureError(
            "Missing v1 signature in Stripe-Signature".to_string(),
        ));
    }

    if (now - timestamp).abs() > tolerance_secs {
        warn!(
            "[Stripe] Webhook timestamp outside tolerance. Now: {}, Event: {}",
            now, timestamp
        );
        return Err(StripeError::WebhookSignatureError(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let expected = compute_stripe_signature(payload, secret, timestamp)?;
    let matched = v1_signatures_hex
        .iter()
        .any(|provided| constant_time_eq::constant_time_eq(expected.as_bytes(), provided.as_bytes()));

    if matched {
        Ok(())
    } else {
        warn!("[Stripe] Webhook signature mismatch");
        Err(StripeError::WebhookSignatureError(
            "Signature mismatch".to_string(),
        ))
    }
}

/// Metadata map attached to refunds so they can be traced back.
pub fn booking_metadata(booking_id: &str) -> HashMap<String, String> {
    HashMap::from([(BOOKING_ID_METADATA_KEY.to_string(), booking_id.to_string())])
}
