//! `POST /run`

use super::{report, ApiError};
use crate::executor;
use crate::models::RunRequest;
use crate::state::AppState;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use coracle_core::{Error, Result};
use tracing::{info_span, Instrument};

/// Invoke the bound action once
///
/// Every call is one activation and ends with the activation markers,
/// whatever the outcome.
pub async fn run(State(state): State<AppState>, body: Bytes) -> Response {
    let activation = state.next_activation();
    let span = info_span!("activation", activation);

    async move {
        let _markers = state.activation_markers();

        match activate(&state, &body).await {
            Ok(output) => {
                tracing::debug!(size_bytes = output.len(), "Activation succeeded");
                ([(header::CONTENT_TYPE, "application/json")], output).into_response()
            }
            Err(err) => {
                report(&err, "/run");
                ApiError::from(err).into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn activate(state: &AppState, body: &[u8]) -> Result<Vec<u8>> {
    let entry = state.runtime().entry_point().ok_or(Error::NotInitialized)?;
    let request = RunRequest::parse(body)?;

    executor::execute(
        entry,
        request,
        state.config().loader.result_size_bytes_max,
    )
    .await
}
