// --- File: crates/tutorbook_common/src/http.rs ---
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::error::{HttpStatusCode, TutorbookError};

pub mod client;

/// Extension trait for TutorbookError to convert it to an Axum HTTP response.
pub trait IntoHttpResponse {
    fn into_http_response(self) -> Response;
}

impl IntoHttpResponse for TutorbookError {
    fn into_http_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            error!("[HTTP] {} -> {}", self, status_code);
        } else {
            warn!("[HTTP] {} -> {}", self, status_code);
        }

        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if let TutorbookError::SlotUnavailable { slot_ids } = &self {
            body["slotIds"] = json!(slot_ids);
        }

        (status_code, Json(body)).into_response()
    }
}

impl IntoResponse for TutorbookError {
    fn into_response(self) -> Response {
        self.into_http_response()
    }
}
