//! Action contract
//!
//! TigerStyle: Explicit types, assertions, bounded operations.
//!
//! An action is one uploaded artifact plus the entry point bound inside it.
//! Loaders turn a [`CodeArtifact`] and an [`EntryDescriptor`] into a
//! [`BoundEntryPoint`]; the contact server only ever talks to these types.

use crate::artifact::CodeArtifact;
use crate::config::LoaderConfig;
use crate::constants::{ENTRY_DESCRIPTOR_SEPARATOR, ENTRY_SYMBOL_DEFAULT};
use crate::error::{Error, Result};
use serde_json::Value;
use std::fmt;

/// Mapping of string to any JSON value, the shape of action input, context and output
pub type ActionMap = serde_json::Map<String, Value>;

// =============================================================================
// EntryDescriptor
// =============================================================================

/// Names the entry point inside an artifact: `<module>[#<symbol>]`
///
/// # TigerStyle
/// - Explicit validation on construction
/// - Immutable after creation
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct EntryDescriptor {
    module: String,
    symbol: String,
}

impl EntryDescriptor {
    /// Parse a descriptor, splitting on the first separator
    ///
    /// A missing or empty symbol defaults to `main`.
    ///
    /// # Errors
    /// Returns `EntryPointNotFound` if the module part is empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let (module, symbol) = match raw.split_once(ENTRY_DESCRIPTOR_SEPARATOR) {
            Some((module, symbol)) => (module.trim(), symbol.trim()),
            None => (raw.trim(), ""),
        };

        if module.is_empty() {
            return Err(Error::entry_point_not_found(
                module,
                symbol,
                "entry descriptor names no module",
            ));
        }

        let symbol = if symbol.is_empty() {
            ENTRY_SYMBOL_DEFAULT
        } else {
            symbol
        };

        debug_assert!(!symbol.is_empty());
        Ok(Self {
            module: module.to_string(),
            symbol: symbol.to_string(),
        })
    }

    /// Module (namespace) part
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Symbol part
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl fmt::Display for EntryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.module, ENTRY_DESCRIPTOR_SEPARATOR, self.symbol
        )
    }
}

// =============================================================================
// Loader seams
// =============================================================================

/// A resolved, invocable unit inside a loaded artifact
///
/// Implementations are immutable once bound and shared across workers.
/// `invoke` is a blocking call; it returns the raw JSON produced by the
/// action, which may be `null` or a non-object. Interpreting that result is
/// the caller's job.
pub trait EntryPoint: Send + Sync {
    /// Run one activation with its input and context maps
    fn invoke(&self, input: ActionMap, context: ActionMap) -> Result<Value>;
}

/// Resolves artifacts into bound entry points
///
/// One implementation per dynamic-loading mechanism. `bind` must verify the
/// entry point's shape before returning; a mismatch is a loader error, never
/// something discovered at invocation time.
pub trait ArtifactLoader: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Load the artifact and bind the described entry point
    fn bind(&self, artifact: CodeArtifact, descriptor: &EntryDescriptor)
        -> Result<BoundEntryPoint>;
}

// =============================================================================
// BoundEntryPoint
// =============================================================================

/// An entry point that passed validation, tagged with its descriptor
pub struct BoundEntryPoint {
    descriptor: EntryDescriptor,
    entry: Box<dyn EntryPoint>,
}

impl BoundEntryPoint {
    /// Wrap a validated entry point
    pub fn new(descriptor: EntryDescriptor, entry: Box<dyn EntryPoint>) -> Self {
        Self { descriptor, entry }
    }

    /// Descriptor this entry point was bound from
    pub fn descriptor(&self) -> &EntryDescriptor {
        &self.descriptor
    }

    /// Run one activation
    pub fn invoke(&self, input: ActionMap, context: ActionMap) -> Result<Value> {
        self.entry.invoke(input, context)
    }
}

impl fmt::Debug for BoundEntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundEntryPoint")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Decode, materialize and bind an artifact in one step
///
/// This is the whole code-loading contract: base64 payload and descriptor
/// string in, bound entry point out.
pub fn load_action(
    loader: &dyn ArtifactLoader,
    encoded: &str,
    descriptor: &str,
    config: &LoaderConfig,
) -> Result<BoundEntryPoint> {
    let artifact = CodeArtifact::from_base64(encoded, config)?;
    let descriptor = EntryDescriptor::parse(descriptor)?;

    tracing::info!(
        loader = loader.name(),
        descriptor = %descriptor,
        size_bytes = artifact.size_bytes(),
        "Binding action"
    );

    loader.bind(artifact, &descriptor)
}
