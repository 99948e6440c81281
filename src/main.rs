//! idbridge server entry point.
//!
//! The process sits behind an identity-aware proxy and converts its signed
//! identity assertions into local shadow users, downstream application
//! sessions, and short-lived internal tokens.
//!
//! # Responsibilities
//!
//! - Parse CLI arguments and environment variables (via Clap)
//! - Load configuration from file, environment, and CLI overrides
//! - Initialize logging and metrics
//! - Select and initialize the shadow store (durable or in-memory)
//! - Assemble the application state and start the HTTP surface
//!
//! # Exit codes
//!
//! `0` after a graceful shutdown; non-zero when initialization fails
//! (missing IAP secret, invalid URL, unusable signing key).

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use idbridge::{config::BridgeConfig, server::service, shadow, state::AppState};

/// CLI arguments definition for the idbridge server.
///
/// This struct defines all command-line arguments and environment variables
/// supported by the server. Field documentation is used by Clap to generate
/// help text, so keep them in rustdoc format.
#[derive(Parser, Debug, Clone)]
#[command(name = "idbridge", version, about = "Identity bridge control plane", long_about = None)]
struct Args {
    /// Config file path (overrides default path and IDBRIDGE_CONFIG_PATH)
    #[arg(long = "config-file", value_name = "FILE", env = "IDBRIDGE_CONFIG_PATH")]
    config_file: Option<std::path::PathBuf>,

    /// HTTP bind address override (optional)
    #[arg(long = "listen", value_name = "ADDR", env = "IDBRIDGE_LISTEN")]
    listen: Option<String>,

    /// Downstream public URL override (optional)
    #[arg(
        long = "downstream-public-url",
        value_name = "URL",
        env = "IDBRIDGE_DOWNSTREAM_PUBLIC_URL"
    )]
    public_url: Option<String>,

    /// Downstream internal URL override (optional)
    #[arg(
        long = "downstream-internal-url",
        value_name = "URL",
        env = "IDBRIDGE_DOWNSTREAM_INTERNAL_URL"
    )]
    internal_url: Option<String>,

    /// Persistence DSN; enables the durable shadow store (optional)
    #[arg(long = "persistence-dsn", value_name = "DSN", env = "IDBRIDGE_PERSISTENCE_DSN")]
    dsn: Option<String>,

    /// Downstream admin bearer token (literal)
    #[arg(long = "admin-token", value_name = "TOKEN", env = "IDBRIDGE_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Path to a file containing the downstream admin bearer token
    #[arg(
        long = "admin-token-file",
        value_name = "FILE",
        env = "IDBRIDGE_ADMIN_TOKEN_FILE"
    )]
    admin_token_file: Option<String>,

    /// IAP shared HMAC secret (literal)
    #[arg(long = "iap-secret", value_name = "SECRET", env = "IDBRIDGE_IAP_SECRET")]
    iap_secret: Option<String>,

    /// Path to a file containing the IAP shared HMAC secret
    #[arg(
        long = "iap-secret-file",
        value_name = "FILE",
        env = "IDBRIDGE_IAP_SECRET_FILE"
    )]
    iap_secret_file: Option<String>,

    /// Token signing key (literal)
    #[arg(
        long = "token-signing-key",
        value_name = "KEY",
        env = "IDBRIDGE_TOKEN_SIGNING_KEY"
    )]
    signing_key: Option<String>,

    /// Path to a file containing the token signing key
    #[arg(
        long = "token-signing-key-file",
        value_name = "FILE",
        env = "IDBRIDGE_TOKEN_SIGNING_KEY_FILE"
    )]
    signing_key_file: Option<String>,

    /// Upstream identity provider name shown in /healthz (optional)
    #[arg(long = "idp-name", value_name = "NAME", env = "IDBRIDGE_IDP_NAME")]
    idp_name: Option<String>,
}

/// Main entry point for the idbridge server.
///
/// # Returns
/// - `Ok(())` after the server drains and shuts down
/// - `Err(anyhow::Error)` if initialization or execution fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let fmt_layer = fmt::layer().with_target(false).compact();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::new(env_filter))
        .init();

    // Load configuration from file, environment, and CLI overrides
    let mut config = BridgeConfig::load_with_overrides(
        args.config_file.clone(),
        args.listen.clone(),
        args.public_url.clone(),
        args.internal_url.clone(),
        args.dsn.clone(),
    )?;

    // Secret and naming overrides (highest precedence)
    if args.admin_token.is_some() {
        config.downstream.admin_token = args.admin_token;
    }
    if args.admin_token_file.is_some() {
        config.downstream.admin_token_file = args.admin_token_file;
    }
    if args.iap_secret.is_some() {
        config.assertion.shared_secret = args.iap_secret;
    }
    if args.iap_secret_file.is_some() {
        config.assertion.shared_secret_file = args.iap_secret_file;
    }
    if args.signing_key.is_some() {
        config.token.signing_key = args.signing_key;
    }
    if args.signing_key_file.is_some() {
        config.token.signing_key_file = args.signing_key_file;
    }
    if let Some(name) = args.idp_name {
        config.assertion.idp_name = name;
    }

    config.log_summary();

    // Initialize metrics collection if enabled
    idbridge::metrics::init();

    // Select the shadow store; durable init failure falls back to in-memory
    let store = shadow::init_store(config.store.dsn.as_deref()).await;

    let bind_address = config
        .server
        .bind_address
        .clone()
        .unwrap_or_else(|| "0.0.0.0:8088".to_string());

    let state = Arc::new(
        AppState::from_config(&config, store).context("assembling application state")?,
    );

    service::start(state, &bind_address).await
}
