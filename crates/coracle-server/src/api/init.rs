//! `POST /init`

use super::{report, ApiError};
use crate::executor;
use crate::models::InitRequest;
use crate::state::AppState;
use axum::extract::State;
use bytes::Bytes;
use coracle_core::{Error, Result};
use tracing::info;

/// Bind the action's entry point
///
/// The already-initialized check comes before the body is even parsed.
/// Rejections end here without markers. Once the loader is involved the
/// request is an activation, and a failure closes it with markers.
pub async fn initialize(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<&'static str, ApiError> {
    let request = accept(&state, &body).map_err(|err| {
        report(&err, "/init");
        ApiError::from(err)
    })?;

    let markers = state.activation_markers();
    let loader = state.loader();
    let config = state.config().loader.clone();

    match state
        .runtime()
        .initialize(|| executor::bind(loader, request, config))
        .await
    {
        Ok(bound) => {
            markers.disarm();
            info!(entry = %bound.descriptor(), "Action initialized");
            Ok("OK")
        }
        Err(err) => {
            // Lost the race to a concurrent /init, which is a plain rejection
            if matches!(err, Error::AlreadyInitialized) {
                markers.disarm();
            }
            report(&err, "/init");
            Err(ApiError::from(err))
        }
    }
}

fn accept(state: &AppState, body: &[u8]) -> Result<InitRequest> {
    if state.runtime().is_initialized() {
        return Err(Error::AlreadyInitialized);
    }
    InitRequest::parse(body)
}
