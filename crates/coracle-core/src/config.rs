//! Configuration for Coracle
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for Coracle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoracleConfig {
    /// Contact server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Artifact loader configuration
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Sandbox policy applied to every activation
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl CoracleConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.loader.validate()?;
        self.sandbox.validate()?;
        Ok(())
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `CORACLE_BIND_ADDRESS`: Address to bind (default: "0.0.0.0:8080")
    /// - `CORACLE_PORT`: Port, replacing the port of the bind address
    /// - `CORACLE_TEMP_DIR`: Directory for materialized artifacts
    /// - `CORACLE_MEMORY_BYTES_MAX`: Linear memory cap per activation
    /// - `CORACLE_FUEL_MAX`: Fuel budget per activation (unset: unlimited)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(address) = std::env::var("CORACLE_BIND_ADDRESS") {
            config.server.bind_address = address;
        }

        if let Some(port) = std::env::var("CORACLE_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            config.server.set_port(port);
        }

        config.loader.temp_dir = std::env::var("CORACLE_TEMP_DIR").ok().map(PathBuf::from);

        if let Some(bytes) = std::env::var("CORACLE_MEMORY_BYTES_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.sandbox.memory_bytes_max = bytes;
        }

        config.sandbox.fuel_max = std::env::var("CORACLE_FUEL_MAX")
            .ok()
            .and_then(|v| v.parse().ok());

        config
    }
}

/// Contact server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Maximum request body size
    #[serde(default = "default_request_body_bytes_max")]
    pub request_body_bytes_max: usize,
}

fn default_bind_address() -> String {
    SERVER_BIND_ADDRESS_DEFAULT.to_string()
}

fn default_request_body_bytes_max() -> usize {
    REQUEST_BODY_SIZE_BYTES_MAX
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            request_body_bytes_max: default_request_body_bytes_max(),
        }
    }
}

impl ServerConfig {
    /// Replace the port of the bind address, keeping the host
    pub fn set_port(&mut self, port: u16) {
        let host = match self.bind_address.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.bind_address.clone(),
        };
        self.bind_address = format!("{}:{}", host, port);
    }

    fn validate(&self) -> Result<()> {
        // Validate bind address format (basic check)
        if !self.bind_address.contains(':') {
            return Err(Error::InvalidConfiguration {
                field: "server.bind_address".into(),
                reason: "must be in host:port format".into(),
            });
        }
        if self.request_body_bytes_max == 0 {
            return Err(Error::InvalidConfiguration {
                field: "server.request_body_bytes_max".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Artifact loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Maximum decoded artifact size
    #[serde(default = "default_artifact_size_bytes_max")]
    pub artifact_size_bytes_max: usize,

    /// Directory for materialized artifacts (default: system temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Maximum serialized result size of one activation
    #[serde(default = "default_result_size_bytes_max")]
    pub result_size_bytes_max: usize,
}

fn default_artifact_size_bytes_max() -> usize {
    ARTIFACT_SIZE_BYTES_MAX
}

fn default_result_size_bytes_max() -> usize {
    ACTION_RESULT_SIZE_BYTES_MAX
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            artifact_size_bytes_max: default_artifact_size_bytes_max(),
            temp_dir: None,
            result_size_bytes_max: default_result_size_bytes_max(),
        }
    }
}

impl LoaderConfig {
    fn validate(&self) -> Result<()> {
        if self.artifact_size_bytes_max == 0 {
            return Err(Error::InvalidConfiguration {
                field: "loader.artifact_size_bytes_max".into(),
                reason: "must be positive".into(),
            });
        }
        if self.result_size_bytes_max == 0 {
            return Err(Error::InvalidConfiguration {
                field: "loader.result_size_bytes_max".into(),
                reason: "must be positive".into(),
            });
        }
        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                return Err(Error::InvalidConfiguration {
                    field: "loader.temp_dir".into(),
                    reason: format!("{} is not a directory", dir.display()),
                });
            }
        }
        Ok(())
    }
}

/// Sandbox policy for one activation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Linear memory cap per activation
    #[serde(default = "default_memory_bytes_max")]
    pub memory_bytes_max: usize,

    /// Fuel budget per activation (None: unlimited)
    #[serde(default)]
    pub fuel_max: Option<u64>,

    /// Whether the action's stdout/stderr reach the host's streams
    #[serde(default = "default_inherit_stdio")]
    pub inherit_stdio: bool,
}

fn default_memory_bytes_max() -> usize {
    SANDBOX_MEMORY_BYTES_MAX_DEFAULT
}

fn default_inherit_stdio() -> bool {
    true
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_bytes_max: default_memory_bytes_max(),
            fuel_max: None,
            inherit_stdio: default_inherit_stdio(),
        }
    }
}

impl SandboxConfig {
    /// Set the linear memory cap
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "memory limit must be positive");
        self.memory_bytes_max = bytes;
        self
    }

    /// Set the fuel budget
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        assert!(fuel > 0, "fuel must be positive");
        self.fuel_max = Some(fuel);
        self
    }

    /// Keep the action's stdio away from the host streams
    pub fn without_stdio(mut self) -> Self {
        self.inherit_stdio = false;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.memory_bytes_max == 0 || self.memory_bytes_max > SANDBOX_MEMORY_BYTES_LIMIT {
            return Err(Error::InvalidConfiguration {
                field: "sandbox.memory_bytes_max".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.memory_bytes_max, SANDBOX_MEMORY_BYTES_LIMIT
                ),
            });
        }
        if self.fuel_max == Some(0) {
            return Err(Error::InvalidConfiguration {
                field: "sandbox.fuel_max".into(),
                reason: "must be positive when set".into(),
            });
        }
        Ok(())
    }
}
