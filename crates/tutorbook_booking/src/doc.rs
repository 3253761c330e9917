// --- File: crates/tutorbook_booking/src/doc.rs ---
#![cfg(feature = "openapi")]

use utoipa::OpenApi;

use crate::context::Actor;
use crate::handlers;
use crate::models::{
    CancelBookingRequest, CancelBookingResponse, ConfirmBookingRequest, ConfirmBookingResponse,
    CreateBookingRequest, CreateBookingResponse, CreatePaymentIntentRequest, EmailDelivery,
    ExpireResponse, HealthResponse, LessonPriceRequest, LessonPriceResponse,
    NotificationRecipient, NotificationsQuery, PaymentIntentResponse, PriceOverrideRequest,
    PublishSlotsRequest, ReconcileOutcome, RespondRequest, RespondResponse,
    SendBookingNotificationRequest, SendEmailResponse, SendInvoiceRequest, SimulatePaymentRequest,
    SimulatePaymentResponse, SlotResponseResult, SlotWindow, VerifyPaymentRequest,
    VerifyPaymentResponse, WebhookAck, WebhookOutcome,
};
use tutorbook_common::models::{
    Booking, BookingStage, Notification, PayerContact, PaymentRecord, PaymentRecordStatus,
    PaymentStatus, Slot, Tutor,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_handler,
        handlers::list_slots_handler,
        handlers::create_booking_handler,
        handlers::get_booking_handler,
        handlers::create_payment_intent_handler,
        handlers::verify_payment_handler,
        handlers::confirm_booking_handler,
        handlers::cancel_booking_handler,
        handlers::send_invoice_handler,
        handlers::send_booking_notification_handler,
        handlers::list_notifications_handler,
        handlers::respond_to_notification_handler,
        handlers::stripe_webhook_handler,
        handlers::simulate_payment_handler,
        handlers::set_lesson_price_handler,
        handlers::get_lesson_price_handler,
        handlers::override_price_handler,
        handlers::expire_pending_handler,
        handlers::register_tutor_handler,
        handlers::publish_slots_handler,
        handlers::retract_slot_handler,
        handlers::list_payments_handler
    ),
    components(
        schemas(
            Actor,
            Booking,
            BookingStage,
            Notification,
            PayerContact,
            PaymentRecord,
            PaymentRecordStatus,
            PaymentStatus,
            Slot,
            Tutor,
            CreateBookingRequest,
            CreateBookingResponse,
            EmailDelivery,
            CreatePaymentIntentRequest,
            PaymentIntentResponse,
            VerifyPaymentRequest,
            VerifyPaymentResponse,
            ReconcileOutcome,
            WebhookAck,
            WebhookOutcome,
            ConfirmBookingRequest,
            ConfirmBookingResponse,
            CancelBookingRequest,
            CancelBookingResponse,
            SendInvoiceRequest,
            SendBookingNotificationRequest,
            NotificationRecipient,
            SendEmailResponse,
            NotificationsQuery,
            RespondRequest,
            RespondResponse,
            SlotResponseResult,
            SimulatePaymentRequest,
            SimulatePaymentResponse,
            LessonPriceRequest,
            LessonPriceResponse,
            PriceOverrideRequest,
            ExpireResponse,
            SlotWindow,
            PublishSlotsRequest,
            HealthResponse
        )
    ),
    tags(
        (name = "Booking", description = "Slots, bookings, tutor confirmation and cancellation"),
        (name = "Payment", description = "Payment intents, verification and the Stripe webhook"),
        (name = "Notify", description = "Emails on demand and in-app notifications"),
        (name = "Admin", description = "Pricing, tutor registry, slot catalogue and audit (X-Admin-Secret)")
    ),
    servers(
        (url = "/api", description = "Tutorbook booking API")
    )
)]
pub struct BookingApiDoc;
