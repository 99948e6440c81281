//! Health check handlers.
//!
//! # Endpoints
//!
//! - `GET /healthz` - Liveness: always 200 while the process serves requests
//! - `GET /readyz` - Readiness: 200 only while the shadow store responds to
//!   its probe within two seconds

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::server::json_error;
use crate::state::AppState;

/// How long the readiness probe waits on the shadow store.
const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Liveness check handler.
///
/// # Endpoint
/// `GET /healthz`
pub async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    tracing::debug!("healthz invoked");
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "idp": state.idp_name,
            "downstream": state.public_url.as_ref().map(|u| u.to_string()),
            "time": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// Readiness check handler.
///
/// Fails with `503` when the shadow store probe errors or exceeds the
/// two-second budget, so load balancers stop routing while persistence is
/// unavailable.
///
/// # Endpoint
/// `GET /readyz`
pub async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    tracing::debug!("readyz invoked");
    match tokio::time::timeout(READY_PROBE_TIMEOUT, state.store.health_check()).await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "readiness probe failed");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = READY_PROBE_TIMEOUT.as_secs(),
                "readiness probe timed out"
            );
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
        }
    }
}
