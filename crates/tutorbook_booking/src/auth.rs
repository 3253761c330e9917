// --- File: crates/tutorbook_booking/src/auth.rs ---

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use constant_time_eq::constant_time_eq;
use std::sync::Arc;
use tracing::{debug, error, warn};
use tutorbook_common::TutorbookError;

use crate::handlers::BookingState;

pub const ADMIN_AUTH_HEADER: &str = "X-Admin-Secret";

/// Guards `/admin/*`: the `X-Admin-Secret` header must equal
/// `admin.shared_secret`.
pub async fn admin_auth_middleware(
    State(state): State<Arc<BookingState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_secret() else {
        error!("[Auth] Admin shared secret is not configured");
        return TutorbookError::ConfigError("admin authentication is not configured".to_string())
            .into_response();
    };

    let verdict = req
        .headers()
        .get(ADMIN_AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|provided| constant_time_eq(provided.as_bytes(), expected.as_bytes()));

    match verdict {
        Some(true) => {
            debug!("[Auth] Admin request authenticated");
            next.run(req).await
        }
        Some(false) => {
            warn!("[Auth] Admin request with an invalid secret");
            TutorbookError::AuthError("invalid admin credentials".to_string()).into_response()
        }
        None => {
            warn!("[Auth] Admin request without {} header", ADMIN_AUTH_HEADER);
            TutorbookError::AuthError(format!("missing {} header", ADMIN_AUTH_HEADER))
                .into_response()
        }
    }
}
