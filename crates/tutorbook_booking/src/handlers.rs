// --- File: crates/tutorbook_booking/src/handlers.rs ---
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tutorbook_common::models::{Booking, Notification, PaymentRecord, Slot, Tutor};
use tutorbook_common::TutorbookError;
use tutorbook_config::AppConfig;
use tutorbook_stripe::{
    parse_event, verify_stripe_signature, SimulatedPaymentGateway, DEFAULT_WEBHOOK_TOLERANCE_SECS,
    STRIPE_SIGNATURE_HEADER,
};

use crate::context::{Actor, RequestContext};
use crate::logic::parse_slot_query;
use crate::models::{
    CancelBookingRequest, CancelBookingResponse, ConfirmBookingRequest, ConfirmBookingResponse,
    CreateBookingRequest, CreateBookingResponse, CreatePaymentIntentRequest, ExpireResponse,
    HealthResponse, LessonPriceRequest, LessonPriceResponse, NotificationsQuery,
    PaymentIntentResponse, PriceOverrideRequest, PublishSlotsRequest, RespondRequest,
    RespondResponse, SendBookingNotificationRequest, SendEmailResponse, SendInvoiceRequest,
    SimulatePaymentRequest, SimulatePaymentResponse, VerifyPaymentRequest, VerifyPaymentResponse,
    WebhookAck,
};
use crate::orchestrator::BookingOrchestrator;

// Shared state of the booking routes
#[derive(Clone)]
pub struct BookingState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<BookingOrchestrator>,
    /// Present only when the simulated gateway is in use.
    pub simulator: Option<Arc<SimulatedPaymentGateway>>,
}

type ApiResult<T> = Result<Json<T>, TutorbookError>;

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service and store status", body = HealthResponse)),
    tag = "Booking"
))]
pub async fn health_handler(State(state): State<Arc<BookingState>>) -> Json<HealthResponse> {
    let (healthy, backend) = state.orchestrator.health().await;
    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        database: if healthy {
            backend.to_string()
        } else {
            format!("{} unreachable", backend)
        },
    })
}

/// Free slots, optionally for some tutors and a time range.
#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/slots",
    params(
        ("tutorId" = Option<String>, Query, description = "Tutor id, repeatable or comma separated"),
        ("from" = Option<String>, Query, description = "YYYY-MM-DD in the service time zone, or RFC 3339", example = "2026-03-02"),
        ("to" = Option<String>, Query, description = "YYYY-MM-DD (whole day included) or RFC 3339", example = "2026-03-08")
    ),
    responses(
        (status = 200, description = "Free slots ordered by start time", body = [Slot]),
        (status = 400, description = "Invalid date")
    ),
    tag = "Booking"
))]
pub async fn list_slots_handler(
    State(state): State<Arc<BookingState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Vec<Slot>> {
    let query = parse_slot_query(&pairs, state.orchestrator.settings().time_zone)?;
    Ok(Json(state.orchestrator.list_free_slots(&query).await?))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/bookings",
    request_body = CreateBookingRequest,
    responses(
        (status = 201, description = "Pending booking with reserved slots", body = CreateBookingResponse),
        (status = 400, description = "Invalid request or slots of several tutors"),
        (status = 404, description = "Unknown slot"),
        (status = 409, description = "Slot no longer available")
    ),
    tag = "Booking"
))]
pub async fn create_booking_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<CreateBookingResponse>), TutorbookError> {
    let ctx = RequestContext::new(Actor::Payer);
    let response = state.orchestrator.create_booking(&ctx, payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/bookings/{id}",
    params(("id" = String, Path, description = "Booking id")),
    responses(
        (status = 200, description = "The booking", body = Booking),
        (status = 404, description = "Unknown booking")
    ),
    tag = "Booking"
))]
pub async fn get_booking_handler(
    State(state): State<Arc<BookingState>>,
    Path(booking_id): Path<String>,
) -> ApiResult<Booking> {
    Ok(Json(state.orchestrator.get_booking(&booking_id).await?))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/create-payment-intent",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 200, description = "Open payment intent of the booking", body = PaymentIntentResponse),
        (status = 409, description = "Booking is no longer pending"),
        (status = 502, description = "Payment provider error")
    ),
    tag = "Payment"
))]
pub async fn create_payment_intent_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<CreatePaymentIntentRequest>,
) -> ApiResult<PaymentIntentResponse> {
    let ctx = RequestContext::new(Actor::Payer);
    Ok(Json(
        state
            .orchestrator
            .create_payment_intent(&ctx, &payload.booking_id)
            .await?,
    ))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/verify-payment",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Gateway status and booking payment status", body = VerifyPaymentResponse),
        (status = 404, description = "Unknown booking"),
        (status = 502, description = "Payment provider error")
    ),
    tag = "Payment"
))]
pub async fn verify_payment_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> ApiResult<VerifyPaymentResponse> {
    let ctx = RequestContext::new(Actor::Payer);
    Ok(Json(state.orchestrator.verify_payment(&ctx, payload).await?))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/confirm-booking",
    request_body = ConfirmBookingRequest,
    responses(
        (status = 200, description = "Booking confirmed (or already confirmed)", body = ConfirmBookingResponse),
        (status = 409, description = "Booking is not paid or already settled")
    ),
    tag = "Booking"
))]
pub async fn confirm_booking_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<ConfirmBookingRequest>,
) -> ApiResult<ConfirmBookingResponse> {
    let ctx = RequestContext::new(payload.confirmed_by);
    Ok(Json(
        state
            .orchestrator
            .confirm_booking(&ctx, &payload.booking_id)
            .await?,
    ))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/cancel-booking",
    request_body = CancelBookingRequest,
    responses(
        (status = 200, description = "Booking cancelled or refunded", body = CancelBookingResponse),
        (status = 409, description = "Booking was already confirmed by the tutor"),
        (status = 502, description = "Refund failed, booking unchanged")
    ),
    tag = "Booking"
))]
pub async fn cancel_booking_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<CancelBookingRequest>,
) -> ApiResult<CancelBookingResponse> {
    let ctx = RequestContext::new(payload.cancelled_by);
    Ok(Json(
        state
            .orchestrator
            .cancel_booking(&ctx, &payload.booking_id, payload.reason)
            .await?,
    ))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/send-invoice",
    request_body = SendInvoiceRequest,
    responses(
        (status = 200, description = "Invoice sent or previously sent", body = SendEmailResponse),
        (status = 400, description = "Payer address is invalid"),
        (status = 502, description = "Mail transport failed")
    ),
    tag = "Notify"
))]
pub async fn send_invoice_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<SendInvoiceRequest>,
) -> ApiResult<SendEmailResponse> {
    Ok(Json(state.orchestrator.send_invoice(&payload.booking_id).await?))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/send-booking-notification",
    request_body = SendBookingNotificationRequest,
    responses(
        (status = 200, description = "Email sent", body = SendEmailResponse),
        (status = 400, description = "Recipient address is invalid"),
        (status = 502, description = "Mail transport failed")
    ),
    tag = "Notify"
))]
pub async fn send_booking_notification_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<SendBookingNotificationRequest>,
) -> ApiResult<SendEmailResponse> {
    Ok(Json(
        state
            .orchestrator
            .send_booking_notification(&payload.booking_id, payload.recipient)
            .await?,
    ))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/notifications",
    params(NotificationsQuery),
    responses((status = 200, description = "Notifications, newest first", body = [Notification])),
    tag = "Notify"
))]
pub async fn list_notifications_handler(
    State(state): State<Arc<BookingState>>,
    Query(query): Query<NotificationsQuery>,
) -> ApiResult<Vec<Notification>> {
    Ok(Json(
        state
            .orchestrator
            .list_notifications(&query.user_id, query.unread_only)
            .await?,
    ))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/notifications/{id}/respond",
    params(("id" = String, Path, description = "Notification id")),
    request_body = RespondRequest,
    responses(
        (status = 200, description = "Confirmation, cancellation or slot answer", body = RespondResponse),
        (status = 409, description = "Notification was already answered")
    ),
    tag = "Notify"
))]
pub async fn respond_to_notification_handler(
    State(state): State<Arc<BookingState>>,
    Path(notification_id): Path<String>,
    Json(payload): Json<RespondRequest>,
) -> ApiResult<RespondResponse> {
    let ctx = RequestContext::new(payload.responded_by);
    Ok(Json(
        state
            .orchestrator
            .respond_to_notification(&ctx, &notification_id, payload.accept)
            .await?,
    ))
}

/// Stripe webhook: verifies the signature over the raw body, then applies
/// the event.
#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/stripe/webhook",
    request_body(content = String, description = "Raw Stripe event JSON", content_type = "application/json"),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 401, description = "Signature verification failed")
    ),
    tag = "Payment"
))]
pub async fn stripe_webhook_handler(
    State(state): State<Arc<BookingState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    let secret = state.config.stripe_webhook_secret().ok_or_else(|| {
        error!("[Booking] Stripe webhook secret is not configured");
        TutorbookError::ConfigError("Stripe webhook secret is not configured".to_string())
    })?;
    let tolerance = state
        .config
        .stripe
        .as_ref()
        .and_then(|s| s.webhook_tolerance_secs)
        .unwrap_or(DEFAULT_WEBHOOK_TOLERANCE_SECS);
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = verify_stripe_signature(&body, signature, secret, tolerance) {
        warn!("[Booking] Rejected webhook: {}", e);
        return Err(e.into());
    }
    let event = parse_event(&body)?;
    info!(event_id = %event.id, "[Booking] Webhook event {}", event.event_type);

    let ctx = RequestContext::new(Actor::System);
    let outcome = state.orchestrator.handle_payment_event(&ctx, &event).await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

/// Completes a simulated payment and applies it like a webhook would.
#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/dev/simulate-payment",
    request_body = SimulatePaymentRequest,
    responses(
        (status = 200, description = "Simulated payment applied", body = SimulatePaymentResponse),
        (status = 502, description = "Unknown or canceled intent")
    ),
    tag = "Payment"
))]
pub async fn simulate_payment_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<SimulatePaymentRequest>,
) -> ApiResult<SimulatePaymentResponse> {
    let simulator = state.simulator.as_ref().ok_or_else(|| {
        TutorbookError::NotFoundError("simulated payments are disabled".to_string())
    })?;
    let intent = simulator
        .mark_succeeded(&payload.payment_intent_id)
        .await
        .map_err(TutorbookError::from)?;

    let reconciliation = match intent.booking_id() {
        Some(booking_id) => {
            let ctx = RequestContext::new(Actor::System);
            Some(
                state
                    .orchestrator
                    .reconcile_succeeded_intent(&ctx, booking_id, &intent)
                    .await?,
            )
        }
        None => None,
    };
    Ok(Json(SimulatePaymentResponse {
        payment_intent_id: intent.id,
        status: intent.status,
        reconciliation,
    }))
}

// --- Admin ---

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    put,
    path = "/admin/lesson-price",
    request_body = LessonPriceRequest,
    responses(
        (status = 200, description = "Price for new bookings", body = LessonPriceResponse),
        (status = 401, description = "Missing or invalid admin secret")
    ),
    tag = "Admin"
))]
pub async fn set_lesson_price_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<LessonPriceRequest>,
) -> ApiResult<LessonPriceResponse> {
    let ctx = RequestContext::new(Actor::Admin);
    Ok(Json(
        state
            .orchestrator
            .set_lesson_price(&ctx, payload.amount)
            .await?,
    ))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/admin/lesson-price",
    responses((status = 200, description = "Price for new bookings", body = LessonPriceResponse)),
    tag = "Admin"
))]
pub async fn get_lesson_price_handler(
    State(state): State<Arc<BookingState>>,
) -> ApiResult<LessonPriceResponse> {
    Ok(Json(state.orchestrator.lesson_price().await?))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/admin/bookings/{id}/price-override",
    params(("id" = String, Path, description = "Booking id")),
    request_body = PriceOverrideRequest,
    responses(
        (status = 200, description = "Booking with the new total", body = Booking),
        (status = 409, description = "Booking is not pending or already has a payment intent")
    ),
    tag = "Admin"
))]
pub async fn override_price_handler(
    State(state): State<Arc<BookingState>>,
    Path(booking_id): Path<String>,
    Json(payload): Json<PriceOverrideRequest>,
) -> ApiResult<Booking> {
    let ctx = RequestContext::new(Actor::Admin);
    Ok(Json(
        state
            .orchestrator
            .override_total_price(&ctx, &booking_id, payload.total_price, &payload.reason)
            .await?,
    ))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/admin/expire-pending",
    responses((status = 200, description = "Sweep result", body = ExpireResponse)),
    tag = "Admin"
))]
pub async fn expire_pending_handler(State(state): State<Arc<BookingState>>) -> ApiResult<ExpireResponse> {
    Ok(Json(
        state
            .orchestrator
            .expire_stale_bookings(chrono::Utc::now())
            .await?,
    ))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/admin/tutors",
    request_body = Tutor,
    responses((status = 200, description = "Registered tutor", body = Tutor)),
    tag = "Admin"
))]
pub async fn register_tutor_handler(
    State(state): State<Arc<BookingState>>,
    Json(payload): Json<Tutor>,
) -> ApiResult<Tutor> {
    let ctx = RequestContext::new(Actor::Admin);
    Ok(Json(state.orchestrator.register_tutor(&ctx, payload).await?))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/admin/tutors/{id}/slots",
    params(("id" = String, Path, description = "Tutor id")),
    request_body = PublishSlotsRequest,
    responses(
        (status = 200, description = "Published slots", body = [Slot]),
        (status = 404, description = "Unknown tutor")
    ),
    tag = "Admin"
))]
pub async fn publish_slots_handler(
    State(state): State<Arc<BookingState>>,
    Path(tutor_id): Path<String>,
    Json(payload): Json<PublishSlotsRequest>,
) -> ApiResult<Vec<Slot>> {
    let ctx = RequestContext::new(Actor::Admin);
    Ok(Json(
        state
            .orchestrator
            .publish_slots(&ctx, &tutor_id, &payload.slots)
            .await?,
    ))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/admin/slots/{id}",
    params(("id" = String, Path, description = "Slot id")),
    responses(
        (status = 204, description = "Slot removed"),
        (status = 409, description = "Slot is booked")
    ),
    tag = "Admin"
))]
pub async fn retract_slot_handler(
    State(state): State<Arc<BookingState>>,
    Path(slot_id): Path<String>,
) -> Result<StatusCode, TutorbookError> {
    let ctx = RequestContext::new(Actor::Admin);
    state.orchestrator.retract_slot(&ctx, &slot_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/admin/bookings/{id}/payments",
    params(("id" = String, Path, description = "Booking id")),
    responses((status = 200, description = "Payment audit trail, oldest first", body = [PaymentRecord])),
    tag = "Admin"
))]
pub async fn list_payments_handler(
    State(state): State<Arc<BookingState>>,
    Path(booking_id): Path<String>,
) -> ApiResult<Vec<PaymentRecord>> {
    Ok(Json(state.orchestrator.list_payments(&booking_id).await?))
}
