//! Error types for Coracle
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Coracle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coracle error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lifecycle Rejections
    // =========================================================================
    #[error("Cannot initialize the action more than once.")]
    AlreadyInitialized,

    #[error("Cannot invoke an uninitialized action.")]
    NotInitialized,

    #[error("{reason}")]
    MalformedRequest { reason: String },

    // =========================================================================
    // Loader Errors
    // =========================================================================
    #[error("invalid base64 artifact: {reason}")]
    DecodeError { reason: String },

    #[error("artifact too large: {size} bytes exceeds limit of {limit} bytes")]
    ArtifactTooLarge { size: usize, limit: usize },

    #[error("module load failed: {reason}")]
    ModuleLoadFailed { reason: String },

    #[error("entry point not found: {module}#{symbol}: {reason}")]
    EntryPointNotFound {
        module: String,
        symbol: String,
        reason: String,
    },

    #[error("invalid entry point signature for {symbol}: expected {expected}, found {found}")]
    InvalidEntryPointSignature {
        symbol: String,
        expected: String,
        found: String,
    },

    // =========================================================================
    // Invocation Errors
    // =========================================================================
    #[error("The action returned null.")]
    NullResult,

    #[error("The action returned a non-object result: {kind}")]
    InvalidResult { kind: String },

    #[error("action result too large: {size} bytes exceeds limit of {limit} bytes")]
    ResultTooLarge { size: usize, limit: usize },

    #[error("{message}")]
    UserCodeFailure { message: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a malformed request error
    pub fn malformed_request(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    /// The fixed rejection for an `/init` body without `value.main` or `value.code`
    pub fn missing_init_fields() -> Self {
        Self::malformed_request("Missing main/no code to execute.")
    }

    /// Create a module load failed error
    pub fn module_load_failed(reason: impl Into<String>) -> Self {
        Self::ModuleLoadFailed {
            reason: reason.into(),
        }
    }

    /// Create an entry point not found error
    pub fn entry_point_not_found(
        module: impl Into<String>,
        symbol: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::EntryPointNotFound {
            module: module.into(),
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    /// Create a user code failure from the unwrapped cause message
    pub fn user_code_failure(message: impl Into<String>) -> Self {
        Self::UserCodeFailure {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Simple protocol rejections, answered without a diagnostic log
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInitialized | Self::NotInitialized | Self::MalformedRequest { .. }
        )
    }

    /// Message reported to the platform in the `error` field of a 502 response
    pub fn response_message(&self) -> String {
        match self {
            _ if self.is_rejection() => self.to_string(),
            Self::UserCodeFailure { message } => format!(
                "An error has occurred while invoking the action (see logs for details): {}",
                message
            ),
            _ => format!("An error has occurred (see logs for details): {}", self),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed_request(format!("Malformed request: {}", err))
    }
}
