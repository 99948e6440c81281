//! HTTP service implementation - composes the router and runs the server.

use anyhow::Context;
use axum::{
    Router,
    body::Body,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{any, get, post},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::server::{
    auth::assertion_gate,
    handlers::{
        bridge::bridge_session,
        health::{healthz, readyz},
        shadow::{list_shadow_users, upsert_shadow_user},
        tokens::{issue_token, validate_token},
    },
    proxy::proxy_handler,
};
use crate::state::AppState;

/// Per-request handling budget for originated responses.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Handler for the Prometheus metrics endpoint.
pub async fn metrics_endpoint() -> Response {
    use http_body_util::BodyExt;

    let hyper_response = crate::metrics::handler::make_metrics_response();

    // Convert hyper response to axum response
    let (parts, body) = hyper_response.into_parts();
    let body_bytes = body.collect().await.unwrap().to_bytes();

    Response::builder()
        .status(parts.status)
        .header(
            "content-type",
            parts
                .headers
                .get("content-type")
                .unwrap_or(&"text/plain".parse().unwrap()),
        )
        .body(Body::from(body_bytes))
        .unwrap()
}

/// Builds the full application router.
///
/// Routes split into two groups: ungated (health, metrics, shadow-user API)
/// and gated (tokens, bridge, reverse proxy), with the assertion gate
/// applied as a route layer on the latter. The proxy routes register only
/// when both downstream URLs are configured.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut protected = Router::new()
        .route("/api/v1/tokens/issue", post(issue_token))
        .route("/api/v1/tokens/validate", post(validate_token))
        .route("/bridge/{downstream}", get(bridge_session));

    if state.proxy_enabled() {
        let prefix = state.public_prefix.clone();
        tracing::debug!(%prefix, "registering reverse proxy routes");
        if prefix == "/" {
            protected = protected
                .route("/", any(proxy_handler))
                .route("/{*rest}", any(proxy_handler));
        } else {
            protected = protected
                .route(&prefix, any(proxy_handler))
                .route(&format!("{}/", prefix), any(proxy_handler))
                .route(&format!("{}/{{*rest}}", prefix), any(proxy_handler));
        }
    }

    let protected = protected.route_layer(middleware::from_fn_with_state(
        state.clone(),
        assertion_gate,
    ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_endpoint))
        .route(
            "/api/v1/shadow-users",
            get(list_shadow_users).post(upsert_shadow_user),
        )
        .merge(protected)
        .layer(middleware::from_fn(log_requests))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the server until a shutdown signal, then drains and closes the
/// shadow store.
///
/// # Arguments
/// * `state` - Shared application state
/// * `bind_address` - Bind address as string (e.g. "0.0.0.0:8088")
///
/// # Errors
/// Returns an error if binding fails or the server encounters a fatal
/// I/O problem.
pub async fn start(state: Arc<AppState>, bind_address: &str) -> anyhow::Result<()> {
    let app = build_router(state.clone());
    let sock_addr = resolve_bind_addr(bind_address)?;

    let listener = tokio::net::TcpListener::bind(sock_addr)
        .await
        .with_context(|| format!("binding {}", sock_addr))?;
    tracing::info!("Starting HTTP server on http://{}", sock_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server drained, closing shadow store");
    if let Err(e) = state.store.close().await {
        tracing::warn!(error = %e, "closing shadow store failed");
    }
    Ok(())
}

/// Completes when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "installing SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Shutdown signal received (Ctrl+C)"),
        _ = terminate => tracing::info!("Shutdown signal received (SIGTERM)"),
    }
}

/// Middleware to log incoming requests and outgoing responses.
async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    tracing::debug!("Received request: {} {}", method, uri);

    let response = next.run(req).await;

    tracing::debug!(
        "Sending response: {} for {} {}",
        response.status(),
        method,
        uri.path()
    );
    response
}

/// Resolve a "host:port" string to a SocketAddr, allowing hostnames like "localhost:8088".
fn resolve_bind_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    addr.to_socket_addrs()
        .with_context(|| format!("resolving bind address {}", addr))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("No address found for {}", addr))
}
