use serde::{Deserialize, Serialize};
/**
 * idbridge configuration root module.
 *
 * - Defines the root configuration struct (`BridgeConfig`) and its defaults.
 * - Provides config file loading, CLI/env override logic, and error reporting.
 * - Uses `components.rs` for section types and `defaults.rs` for default helpers.
 */
use std::{path::Path, path::PathBuf};
use thiserror::Error;

use components::{AssertionConfig, DownstreamConfig, ServerConfig, StoreConfig, TokenConfig};

pub mod components;
pub mod defaults;

// Root configuration for the idbridge server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Downstream application configuration.
    #[serde(default)]
    pub downstream: DownstreamConfig,

    /// Inbound assertion verification configuration.
    #[serde(default)]
    pub assertion: AssertionConfig,

    /// Token issuer configuration.
    #[serde(default)]
    pub token: TokenConfig,

    /// Shadow store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Require a valid assertion on `POST /api/v1/shadow-users` instead of
    /// accepting unauthenticated bodies that carry provider/subject.
    #[serde(default = "defaults::default_false")]
    pub require_assertion_for_shadow_writes: bool,
}

impl BridgeConfig {
    /// Compute the default configuration file path.
    pub fn default_path() -> PathBuf {
        // Allow override via environment variable
        if let Some(override_path) = std::env::var_os("IDBRIDGE_CONFIG_PATH") {
            return PathBuf::from(override_path);
        }
        PathBuf::from("/").join("etc").join("idbridge").join("config")
    }

    /// Load config from file and apply CLI overrides.
    ///
    /// Loads configuration from a YAML file if it exists, otherwise uses
    /// defaults. Then applies command-line overrides with highest precedence.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to the configuration file. Uses default if None.
    /// * `bind_address` - Optional bind address override.
    /// * `public_url` - Optional downstream public URL override.
    /// * `internal_url` - Optional downstream internal URL override.
    /// * `dsn` - Optional persistence DSN override.
    ///
    /// # Returns
    /// The loaded and overridden configuration, or a ConfigError.
    pub fn load_with_overrides(
        config_path: Option<PathBuf>,
        bind_address: Option<String>,
        public_url: Option<String>,
        internal_url: Option<String>,
        dsn: Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or_else(Self::default_path);

        // Parse from file with line/column + serde path diagnostics
        let mut cfg = if path.exists() {
            tracing::debug!("Reading from configuration file {:?}", path);
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Parse(path.clone(), format!("I/O error: {}", e)))?;
            Self::parse_yaml_with_path(&path, &text)?
        } else {
            tracing::debug!(
                "No configuration file (checked {:?}) initializing with defaults",
                path
            );
            Self::default()
        };

        // Apply CLI/env overrides (highest precedence)
        if let Some(addr) = bind_address {
            cfg.server.bind_address = Some(addr);
        }
        if let Some(url) = public_url {
            cfg.downstream.public_url = Some(url);
        }
        if let Some(url) = internal_url {
            cfg.downstream.internal_url = Some(url);
        }
        if let Some(dsn) = dsn {
            cfg.store.dsn = Some(dsn);
        }

        Ok(cfg)
    }

    /// Parse YAML configuration with enhanced error reporting.
    ///
    /// Uses serde_yaml_ng to parse the YAML text, and includes line/column
    /// information in error messages for better debugging.
    fn parse_yaml_with_path(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_yaml_ng::from_str::<Self>(text).map_err(|e| {
            let msg = if let Some(loc) = e.location() {
                format!(
                    "yaml error at line {}, column {}: {}",
                    loc.line(),
                    loc.column(),
                    e
                )
            } else {
                format!("yaml error: {}", e)
            };

            ConfigError::Parse(path.to_path_buf(), msg)
        })
    }

    /// Log a one-line summary of what the configuration enables.
    pub fn log_summary(&self) {
        let proxy = self.downstream.public_url.is_some() && self.downstream.internal_url.is_some();
        let bridge = self.downstream.admin_token.is_some()
            || self.downstream.admin_token_file.is_some();
        tracing::info!(
            target = "idbridge.config",
            idp = %self.assertion.idp_name,
            proxy_enabled = proxy,
            bridge_enabled = bridge,
            durable_store = self.store.dsn.is_some(),
            "configuration loaded"
        );
    }
}

/// Resolve a secret supplied either literally or via a `*_file` path.
///
/// The file form wins when both are set. Whitespace is trimmed from file
/// contents so trailing newlines in mounted secrets do not corrupt keys.
///
/// # Returns
/// - `Ok(Some(value))` when a secret was resolved
/// - `Ok(None)` when neither form is configured
/// - `Err(...)` when the referenced file cannot be read
pub fn resolve_secret(
    literal: Option<&str>,
    file: Option<&str>,
) -> Result<Option<String>, ConfigError> {
    if let Some(path) = file {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Secret(PathBuf::from(path), format!("I/O error: {}", e))
        })?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Secret(
                PathBuf::from(path),
                "secret file is empty".to_string(),
            ));
        }
        return Ok(Some(trimmed.to_string()));
    }
    Ok(literal.map(|s| s.to_string()))
}

// Errors during configuration loading/parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse configuration content.
    ///
    /// Tuple fields:
    /// - 0: Path to the configuration file that failed to parse
    /// - 1: Error message from the underlying parser
    #[error("Failed to parse {0}: {1}")]
    Parse(PathBuf, String),

    /// Failed to resolve a file-based secret.
    #[error("Failed to read secret {0}: {1}")]
    Secret(PathBuf, String),
}
