//! Code artifacts
//!
//! An artifact arrives base64-encoded inside the `/init` body. It is decoded,
//! size-checked and written to a private temporary file so a loader can open
//! it as a module. The file is removed when the artifact is dropped.

use crate::config::LoaderConfig;
use crate::constants::{ARTIFACT_TEMP_FILE_PREFIX, ARTIFACT_TEMP_FILE_SUFFIX};
use crate::error::{Error, Result};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use std::io::Write;
use std::path::Path;
use tempfile::TempPath;
use tracing::debug;

/// A decoded artifact materialized on local storage
#[derive(Debug)]
pub struct CodeArtifact {
    path: TempPath,
    size_bytes: usize,
}

impl CodeArtifact {
    /// Decode a base64 payload and materialize it
    ///
    /// ASCII whitespace inside the payload is ignored, so line-wrapped
    /// encodings are accepted.
    pub fn from_base64(encoded: &str, config: &LoaderConfig) -> Result<Self> {
        let bytes = decode_base64(encoded, config.artifact_size_bytes_max)?;
        Self::materialize(&bytes, config.temp_dir.as_deref())
    }

    /// Write raw artifact bytes to a fresh temporary file
    pub fn materialize(bytes: &[u8], dir: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder
            .prefix(ARTIFACT_TEMP_FILE_PREFIX)
            .suffix(ARTIFACT_TEMP_FILE_SUFFIX);

        let created = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file = created.map_err(|e| materialize_failed(&e))?;
        file.write_all(bytes).map_err(|e| materialize_failed(&e))?;
        file.flush().map_err(|e| materialize_failed(&e))?;

        let path = file.into_temp_path();
        debug!(path = %path.display(), size_bytes = bytes.len(), "Artifact materialized");

        Ok(Self {
            path,
            size_bytes: bytes.len(),
        })
    }

    /// Location of the materialized artifact
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decoded size
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Read the artifact back from storage
    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .map_err(|e| Error::internal(format!("failed to read artifact: {}", e)))
    }
}

fn materialize_failed(err: &std::io::Error) -> Error {
    Error::internal(format!("failed to materialize artifact: {}", err))
}

/// Standard alphabet, padding optional
const ARTIFACT_ENCODING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

fn decode_base64(encoded: &str, size_bytes_max: usize) -> Result<Vec<u8>> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    // Reject before allocating the decoded buffer
    let estimated = compact.len() / 4 * 3;
    if estimated > size_bytes_max.saturating_add(2) {
        return Err(Error::ArtifactTooLarge {
            size: estimated,
            limit: size_bytes_max,
        });
    }

    let bytes = ARTIFACT_ENCODING
        .decode(compact.as_bytes())
        .map_err(|e| Error::DecodeError {
            reason: e.to_string(),
        })?;

    if bytes.len() > size_bytes_max {
        return Err(Error::ArtifactTooLarge {
            size: bytes.len(),
            limit: size_bytes_max,
        });
    }
    if bytes.is_empty() {
        return Err(Error::DecodeError {
            reason: "artifact is empty".into(),
        });
    }

    Ok(bytes)
}
