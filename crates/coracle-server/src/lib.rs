//! Coracle Server Library
//!
//! The lifecycle contact server: an axum router exposing `POST /init` and
//! `POST /run` over a single hosted action.

pub mod api;
pub mod executor;
pub mod markers;
pub mod models;
pub mod state;

pub use api::router;
pub use markers::{ActivationMarkers, MarkerSink, StdStreams};
pub use state::{AppState, RuntimeState};
