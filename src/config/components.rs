//! Configuration section types.
//!
//! Each struct maps to one section of the YAML configuration file. Secrets
//! may be supplied either as a literal value or as a `*_file` path pointing
//! at a file that contains the value; the file form is preferred when both
//! are present.

use serde::{Deserialize, Serialize};

use crate::config::defaults;

/// HTTP server section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP surface (host:port).
    #[serde(default = "defaults::default_bind_address")]
    pub bind_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::default_bind_address(),
        }
    }
}

/// Downstream application section.
///
/// The public URL is what browsers see; its path component becomes the proxy
/// prefix and its host/scheme drive cookie attributes. The internal URL is
/// where the reverse proxy actually forwards traffic.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DownstreamConfig {
    /// Short name used in the `/bridge/{name}` route (e.g. "chat").
    #[serde(default)]
    pub name: Option<String>,

    /// External URL of the downstream as exposed through the bridge.
    #[serde(default)]
    pub public_url: Option<String>,

    /// Internal URL the reverse proxy forwards to.
    #[serde(default)]
    pub internal_url: Option<String>,

    /// Admin API bearer token (literal form).
    #[serde(default)]
    pub admin_token: Option<String>,

    /// Path to a file containing the admin API bearer token.
    #[serde(default)]
    pub admin_token_file: Option<String>,
}

/// Inbound assertion verification section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionConfig {
    /// Shared HMAC secret the IAP signs assertions with (literal form).
    #[serde(default)]
    pub shared_secret: Option<String>,

    /// Path to a file containing the shared HMAC secret.
    #[serde(default)]
    pub shared_secret_file: Option<String>,

    /// Upstream identity provider name; informational, shown in `/healthz`
    /// and used as the shadow-user provider key.
    #[serde(default = "defaults::default_idp_name")]
    pub idp_name: String,
}

impl Default for AssertionConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            shared_secret_file: None,
            idp_name: defaults::default_idp_name(),
        }
    }
}

/// Token issuer section.
///
/// The signing key is deliberately independent of the IAP shared secret so
/// that rotating the IAP secret never invalidates issued tokens.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenConfig {
    /// Symmetric signing key (literal form).
    #[serde(default)]
    pub signing_key: Option<String>,

    /// Path to a file containing the symmetric signing key.
    #[serde(default)]
    pub signing_key_file: Option<String>,

    /// Allow callers to mint tokens for subjects other than their own.
    #[serde(default = "defaults::default_false")]
    pub allow_foreign_subjects: bool,
}

/// Shadow store section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Persistence DSN (a sqlite path, optionally prefixed `sqlite://`).
    /// Unset selects the in-memory store.
    #[serde(default)]
    pub dsn: Option<String>,
}
