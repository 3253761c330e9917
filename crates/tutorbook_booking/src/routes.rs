// --- File: crates/tutorbook_booking/src/routes.rs ---

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::auth::admin_auth_middleware;
use crate::handlers::{
    cancel_booking_handler, confirm_booking_handler, create_booking_handler,
    create_payment_intent_handler, expire_pending_handler, get_booking_handler,
    get_lesson_price_handler, health_handler, list_notifications_handler, list_payments_handler,
    list_slots_handler, override_price_handler, publish_slots_handler, register_tutor_handler,
    respond_to_notification_handler, retract_slot_handler, send_booking_notification_handler,
    send_invoice_handler, set_lesson_price_handler, simulate_payment_handler,
    stripe_webhook_handler, verify_payment_handler, BookingState,
};

/// Creates the router for the booking API, to be nested under `/api`.
///
/// The Stripe webhook is mounted only in webhook confirmation mode and the
/// simulate-payment route only when the simulated gateway is active.
pub fn routes(state: Arc<BookingState>) -> Router {
    let admin = Router::new()
        .route(
            "/admin/lesson-price",
            get(get_lesson_price_handler).put(set_lesson_price_handler),
        )
        .route(
            "/admin/bookings/{id}/price-override",
            post(override_price_handler),
        )
        .route("/admin/bookings/{id}/payments", get(list_payments_handler))
        .route("/admin/expire-pending", post(expire_pending_handler))
        .route("/admin/tutors", post(register_tutor_handler))
        .route("/admin/tutors/{id}/slots", post(publish_slots_handler))
        .route("/admin/slots/{id}", delete(retract_slot_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/slots", get(list_slots_handler))
        .route("/bookings", post(create_booking_handler))
        .route("/bookings/{id}", get(get_booking_handler))
        .route("/create-payment-intent", post(create_payment_intent_handler))
        .route("/verify-payment", post(verify_payment_handler))
        .route("/confirm-booking", post(confirm_booking_handler))
        .route("/cancel-booking", post(cancel_booking_handler))
        .route("/send-invoice", post(send_invoice_handler))
        .route(
            "/send-booking-notification",
            post(send_booking_notification_handler),
        )
        .route("/notifications", get(list_notifications_handler))
        .route(
            "/notifications/{id}/respond",
            post(respond_to_notification_handler),
        )
        .merge(admin);

    if state.orchestrator.settings().use_webhook_confirmation {
        info!("[Booking] Mounting Stripe webhook");
        router = router.route("/stripe/webhook", post(stripe_webhook_handler));
    }
    if state.simulator.is_some() {
        info!("[Booking] Mounting simulated payment route");
        router = router.route("/dev/simulate-payment", post(simulate_payment_handler));
    }

    router.with_state(state)
}
