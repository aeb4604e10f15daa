//! Invocation executor
//!
//! TigerStyle: Blocking work off the async workers, every outcome mapped.
//!
//! Compiling an artifact and running guest code are blocking calls, so both
//! run on tokio's blocking pool with the caller's span carried over.

use crate::models::{json_kind, InitRequest, RunRequest};
use coracle_core::{load_action, ArtifactLoader, BoundEntryPoint, Error, LoaderConfig, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::Span;

/// Load and bind the artifact of an `/init` request
///
/// Logging the outcome is left to the caller, which owns the activation.
pub async fn bind(
    loader: Arc<dyn ArtifactLoader>,
    request: InitRequest,
    config: LoaderConfig,
) -> Result<BoundEntryPoint> {
    let span = Span::current();

    tokio::task::spawn_blocking(move || {
        span.in_scope(|| load_action(loader.as_ref(), &request.code, &request.main, &config))
    })
    .await
    .unwrap_or_else(|e| Err(worker_failure(e)))
}

/// Run one activation against the bound entry point
///
/// Returns the serialized output object.
pub async fn execute(
    entry: Arc<BoundEntryPoint>,
    request: RunRequest,
    result_size_bytes_max: usize,
) -> Result<Vec<u8>> {
    let span = Span::current();

    let value = tokio::task::spawn_blocking(move || {
        span.in_scope(|| entry.invoke(request.input, request.context))
    })
    .await
    .unwrap_or_else(|e| Err(worker_failure(e)))?;

    interpret_result(value, result_size_bytes_max)
}

/// Map the raw value an entry point returned to a response body
pub fn interpret_result(value: Value, result_size_bytes_max: usize) -> Result<Vec<u8>> {
    let output = match value {
        Value::Object(output) => output,
        Value::Null => return Err(Error::NullResult),
        other => {
            return Err(Error::InvalidResult {
                kind: json_kind(&other).to_string(),
            })
        }
    };

    let body = serde_json::to_vec(&output)
        .map_err(|e| Error::internal(format!("failed to serialize result: {}", e)))?;
    if body.len() > result_size_bytes_max {
        return Err(Error::ResultTooLarge {
            size: body.len(),
            limit: result_size_bytes_max,
        });
    }

    Ok(body)
}

fn worker_failure(err: JoinError) -> Error {
    if err.is_panic() {
        Error::internal("activation worker panicked")
    } else {
        Error::internal(format!("activation worker failed: {}", err))
    }
}
