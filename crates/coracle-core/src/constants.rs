//! TigerStyle constants for Coracle
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Activation Protocol
// =============================================================================

/// Sentinel line written to stdout and stderr after every activation.
///
/// The platform's log collector splits an action's output on this line.
pub const ACTIVATION_LOG_MARKER: &str = "XXX_THE_END_OF_A_WHISK_ACTIVATION_XXX";

/// Separator between the module and symbol parts of an entry descriptor
pub const ENTRY_DESCRIPTOR_SEPARATOR: char = '#';

/// Symbol bound when the entry descriptor names only a module
pub const ENTRY_SYMBOL_DEFAULT: &str = "main";

/// Top-level field of `/init` and `/run` bodies carrying the payload
pub const REQUEST_VALUE_FIELD: &str = "value";

// =============================================================================
// Artifact Limits
// =============================================================================

/// Maximum decoded artifact size in bytes (48 MB)
pub const ARTIFACT_SIZE_BYTES_MAX: usize = 48 * 1024 * 1024;

/// Prefix of the temporary file an artifact is materialized to
pub const ARTIFACT_TEMP_FILE_PREFIX: &str = "useraction";

/// Suffix of the temporary file an artifact is materialized to
pub const ARTIFACT_TEMP_FILE_SUFFIX: &str = ".wasm";

// =============================================================================
// Request / Result Limits
// =============================================================================

/// Maximum HTTP request body size in bytes (64 MB, base64 inflates artifacts)
pub const REQUEST_BODY_SIZE_BYTES_MAX: usize = 64 * 1024 * 1024;

/// Maximum serialized action result size in bytes (16 MB)
pub const ACTION_RESULT_SIZE_BYTES_MAX: usize = 16 * 1024 * 1024;

// =============================================================================
// Sandbox Limits
// =============================================================================

/// Default linear memory cap for one activation in bytes (256 MB)
pub const SANDBOX_MEMORY_BYTES_MAX_DEFAULT: usize = 256 * 1024 * 1024;

/// Hard ceiling for the configurable memory cap in bytes (wasm32 address space)
pub const SANDBOX_MEMORY_BYTES_LIMIT: usize = u32::MAX as usize;

// =============================================================================
// Server
// =============================================================================

/// Default port of the contact server
pub const SERVER_PORT_DEFAULT: u16 = 8080;

/// Default bind address of the contact server
pub const SERVER_BIND_ADDRESS_DEFAULT: &str = "0.0.0.0:8080";

// Compile-time assertions for constant validity
const _: () = {
    assert!(REQUEST_BODY_SIZE_BYTES_MAX > ARTIFACT_SIZE_BYTES_MAX);
    assert!(SANDBOX_MEMORY_BYTES_MAX_DEFAULT <= SANDBOX_MEMORY_BYTES_LIMIT);
    assert!(ACTION_RESULT_SIZE_BYTES_MAX < REQUEST_BODY_SIZE_BYTES_MAX);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_is_single_line() {
        assert!(!ACTIVATION_LOG_MARKER.contains('\n'));
        assert!(!ACTIVATION_LOG_MARKER.is_empty());
    }

    #[test]
    fn test_default_bind_uses_default_port() {
        assert!(SERVER_BIND_ADDRESS_DEFAULT.ends_with(&format!(":{}", SERVER_PORT_DEFAULT)));
    }
}
