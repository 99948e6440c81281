//! Shared application state.
//!
//! `AppState` is assembled once at startup from the resolved configuration
//! and is immutable afterwards; handlers hold it behind an `Arc`. Mutable
//! runtime state lives inside the components themselves (shadow store,
//! circuit breaker, metrics counters), each with its own synchronization
//! discipline.

use std::sync::Arc;
use url::Url;

use crate::assertion::AssertionVerifier;
use crate::breaker::CircuitBreaker;
use crate::bridge::IdentityBridge;
use crate::config::{self, BridgeConfig};
use crate::downstream::HttpDownstreamClient;
use crate::errors::StartupError;
use crate::server::proxy::normalize_prefix;
use crate::shadow::ShadowStore;
use crate::token::TokenIssuer;

/// Everything the HTTP surface needs, wired together.
pub struct AppState {
    /// Upstream identity provider name, informational.
    pub idp_name: String,

    /// External URL of the downstream, when the proxy is configured.
    pub public_url: Option<Url>,
    /// Internal URL the proxy forwards to, when configured.
    pub internal_url: Option<Url>,
    /// Normalized public path prefix derived from the public URL.
    pub public_prefix: String,
    /// Name used by the `/bridge/{name}` route.
    pub downstream_name: String,

    /// Inbound assertion verifier.
    pub verifier: AssertionVerifier,
    /// Outbound token issuer.
    pub issuer: TokenIssuer,
    /// Whether callers may mint tokens for subjects other than their own.
    pub allow_foreign_subjects: bool,
    /// Whether shadow-user writes require a valid assertion.
    pub require_assertion_for_shadow_writes: bool,

    /// Shadow user persistence.
    pub store: Arc<dyn ShadowStore>,
    /// Bridge to the downstream; present when an admin token is configured.
    pub bridge: Option<Arc<IdentityBridge>>,
    /// Breaker shared between the bridge and the proxy forwarder.
    pub breaker: Arc<CircuitBreaker>,
    /// HTTP client used by the reverse proxy. Redirects are passed through
    /// to the browser, never followed here.
    pub proxy_http: reqwest::Client,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("idp_name", &self.idp_name)
            .field("public_prefix", &self.public_prefix)
            .field("downstream_name", &self.downstream_name)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Builds the state from configuration plus an initialized store.
    ///
    /// # Errors
    /// Fatal misconfiguration: missing IAP secret, unparseable URLs, or an
    /// unusable signing key. These abort startup with a non-zero exit.
    pub fn from_config(
        config: &BridgeConfig,
        store: Arc<dyn ShadowStore>,
    ) -> Result<Self, StartupError> {
        let shared_secret = config::resolve_secret(
            config.assertion.shared_secret.as_deref(),
            config.assertion.shared_secret_file.as_deref(),
        )
        .map_err(|e| StartupError::ConfigError(e.to_string()))?
        .ok_or_else(|| {
            StartupError::ConfigError("IAP shared secret is required".to_string())
        })?;

        let signing_key = config::resolve_secret(
            config.token.signing_key.as_deref(),
            config.token.signing_key_file.as_deref(),
        )
        .map_err(|e| StartupError::ConfigError(e.to_string()))?;
        let signing_key = match signing_key {
            Some(key) if key.is_empty() => {
                return Err(StartupError::SigningMisconfigured(
                    "token signing key is empty".to_string(),
                ));
            }
            Some(key) => key,
            None => {
                tracing::warn!(
                    "no token signing key configured, generating one for this process lifetime"
                );
                TokenIssuer::random_key()
            }
        };

        let public_url = parse_url(config.downstream.public_url.as_deref())?;
        let internal_url = parse_url(config.downstream.internal_url.as_deref())?;
        let public_prefix = public_url
            .as_ref()
            .map(|u| normalize_prefix(u.path()))
            .unwrap_or_else(|| "/".to_string());

        let admin_token = config::resolve_secret(
            config.downstream.admin_token.as_deref(),
            config.downstream.admin_token_file.as_deref(),
        )
        .map_err(|e| StartupError::ConfigError(e.to_string()))?;

        let breaker = Arc::new(CircuitBreaker::default());
        let bridge = match (&internal_url, admin_token) {
            (Some(internal), Some(token)) => {
                let client = HttpDownstreamClient::new(internal.clone(), token)
                    .map_err(|e| StartupError::Other(e.to_string()))?;
                Some(Arc::new(IdentityBridge::new(
                    Arc::new(client),
                    store.clone(),
                    breaker.clone(),
                )))
            }
            _ => None,
        };

        let proxy_http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| StartupError::Other(e.to_string()))?;

        Ok(Self {
            idp_name: config.assertion.idp_name.clone(),
            verifier: AssertionVerifier::new(
                shared_secret.as_bytes(),
                config.assertion.idp_name.clone(),
            ),
            issuer: TokenIssuer::new(signing_key.as_bytes()),
            allow_foreign_subjects: config.token.allow_foreign_subjects,
            require_assertion_for_shadow_writes: config.require_assertion_for_shadow_writes,
            downstream_name: config
                .downstream
                .name
                .clone()
                .unwrap_or_else(|| "downstream".to_string()),
            public_url,
            internal_url,
            public_prefix,
            store,
            bridge,
            breaker,
            proxy_http,
        })
    }

    /// Whether the reverse proxy routes are configured.
    pub fn proxy_enabled(&self) -> bool {
        self.public_url.is_some() && self.internal_url.is_some()
    }
}

fn parse_url(raw: Option<&str>) -> Result<Option<Url>, StartupError> {
    match raw {
        Some(raw) => Url::parse(raw)
            .map(Some)
            .map_err(|e| StartupError::InvalidUrl(format!("{}: {}", raw, e))),
        None => Ok(None),
    }
}
