//! Coracle Core
//!
//! Core types, errors, and constants for the Coracle action host.
//!
//! # Overview
//!
//! Coracle hosts exactly one action per process: a single `/init` binds an
//! entry point inside an uploaded artifact, then any number of `/run`
//! requests invoke it.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `ARTIFACT_SIZE_BYTES_MAX`)
//! - No recursion (bounded iteration only)

pub mod action;
pub mod artifact;
pub mod config;
pub mod constants;
pub mod error;
pub mod telemetry;

pub use action::{
    load_action, ActionMap, ArtifactLoader, BoundEntryPoint, EntryDescriptor, EntryPoint,
};
pub use artifact::CodeArtifact;
pub use config::{CoracleConfig, LoaderConfig, SandboxConfig, ServerConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use telemetry::{init_telemetry, TelemetryConfig};
