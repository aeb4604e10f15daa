//! Lifecycle contact API
//!
//! TigerStyle: Two routes, one error shape.
//!
//! `POST /init` binds the action, `POST /run` invokes it. Every failure is a
//! 502 with `{"error": "<message>"}`.

pub mod init;
pub mod run;

use crate::models::ErrorResponse;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use coracle_core::Error;
use tower_http::trace::TraceLayer;

/// Create the API router with all routes
pub fn router(state: AppState) -> Router {
    let body_limit = state.config().server.request_body_bytes_max;

    Router::new()
        .route("/init", post(init::initialize))
        .route("/run", post(run::run))
        .layer(DefaultBodyLimit::max(body_limit))
        // Responses are logged by the handlers, before the activation markers
        .layer(
            TraceLayer::new_for_http()
                .on_response(())
                .on_failure(())
                .on_eos(()),
        )
        .with_state(state)
}

/// API error type that converts to HTTP responses
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.body.error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            body: ErrorResponse::from(&err),
        }
    }
}

/// Log a failure at the request boundary
///
/// Rejections get a one-line warning. Everything else gets the full
/// diagnostic. Callers holding an `ActivationMarkers` guard report while it
/// is still alive, so the line lands before the markers.
pub(crate) fn report(err: &Error, route: &'static str) {
    if err.is_rejection() {
        tracing::warn!(route, error = %err, "Request rejected");
    } else {
        tracing::error!(route, error = %err, diagnostic = ?err, "Request failed");
    }
}
