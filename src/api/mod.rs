//! HTTP and WebSocket surface.
//!
//! Thin axum adapters over the application services. Errors render as
//! `{ "error": "<message>" }` with the status from `AppError::status_code`.

pub mod routes;
pub mod ws;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::application::Services;
use crate::domain::AppError;

/// Create the API router.
pub fn router(services: Services) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/ws", get(ws::upgrade))
        .route("/scan", post(routes::scan))
        .route("/devices", get(routes::devices))
        .route("/sync/to-cloud", post(routes::sync_to_cloud))
        .route("/sync/from-cloud", get(routes::sync_from_cloud))
        .route("/sync/status", get(routes::sync_status))
        .route("/pending-sync", get(routes::pending_sync))
        .route(
            "/messages",
            get(routes::list_messages).post(routes::create_message),
        )
        .route("/messages/{id}", get(routes::get_message))
        .route("/network/lan", get(routes::network_lan))
        .with_state(services)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
