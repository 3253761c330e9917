// --- File: crates/services/tutorbook_backend/src/app_state.rs ---
use axum::Router;
use std::sync::Arc;
use tutorbook_booking::{routes as booking_routes, BookingOrchestrator, BookingState, OrchestratorSettings};
use tutorbook_common::TutorbookError;
use tutorbook_config::AppConfig;
use tutorbook_notify::NotificationDispatcher;

use crate::service_factory::TutorbookServiceFactory;

/// Application state shared by the router and the background tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub booking: Arc<BookingState>,
}

impl AppState {
    pub async fn new(config: Arc<AppConfig>) -> Result<Self, TutorbookError> {
        let services = TutorbookServiceFactory::new(&config).await?;
        Self::from_services(config, &services)
    }

    /// Wires the orchestrator from already built services.
    pub fn from_services(
        config: Arc<AppConfig>,
        services: &TutorbookServiceFactory,
    ) -> Result<Self, TutorbookError> {
        let dispatcher = NotificationDispatcher::from_config(services.mail_transport(), &config.booking)?;
        let settings = OrchestratorSettings::from_config(&config.booking)?;
        let orchestrator = Arc::new(BookingOrchestrator::new(
            services.store(),
            services.payment_gateway(),
            dispatcher,
            settings,
        ));
        let booking = Arc::new(BookingState {
            config: config.clone(),
            orchestrator,
            simulator: services.simulator(),
        });
        Ok(Self { config, booking })
    }

    pub fn orchestrator(&self) -> Arc<BookingOrchestrator> {
        self.booking.orchestrator.clone()
    }

    /// Every API route, nested under `/api`.
    pub fn api_router(&self) -> Router {
        Router::new().nest("/api", booking_routes(self.booking.clone()))
    }
}
