//! Bridge endpoint handler.
//!
//! # Endpoints
//!
//! - `GET /bridge/{downstream}` - Invoke the identity bridge for the
//!   verified caller and return the downstream session as JSON

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::assertion::Identity;
use crate::bridge::BridgeError;
use crate::downstream::DownstreamError;
use crate::server::json_error;
use crate::state::AppState;

/// Invokes the identity bridge and returns the minted session.
///
/// # Endpoint
/// `GET /bridge/{downstream}`
pub async fn bridge_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(downstream): Path<String>,
) -> Response {
    tracing::debug!(subject = %identity.subject, %downstream, "API: GET /bridge");
    if downstream != state.downstream_name {
        return json_error(StatusCode::NOT_FOUND, "unknown downstream");
    }
    let Some(bridge) = &state.bridge else {
        return json_error(StatusCode::NOT_IMPLEMENTED, "not_implemented");
    };

    match bridge.ensure_session(&identity).await {
        Ok(session) => (
            StatusCode::OK,
            Json(serde_json::json!({ "session": session })),
        )
            .into_response(),
        Err(e) => bridge_error_response(e),
    }
}

/// Maps bridge failures onto the HTTP error surface.
///
/// Shared with the reverse proxy's cookie-injection path so both callers
/// degrade identically.
pub fn bridge_error_response(err: BridgeError) -> Response {
    match err {
        BridgeError::MissingEmail => json_error(StatusCode::BAD_REQUEST, err.to_string()),
        BridgeError::CircuitOpen { retry_after } => {
            let secs = retry_after.as_secs().max(1);
            let mut response = (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": "circuit_open",
                    "retry_after_seconds": secs,
                })),
            )
                .into_response();
            if let Ok(value) = secs.to_string().parse() {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
            response
        }
        BridgeError::Downstream(DownstreamError::NotFound) => {
            // Only reachable if the downstream loses the user between
            // ensure and session create.
            json_error(StatusCode::BAD_GATEWAY, "downstream_error: user vanished")
        }
        BridgeError::Downstream(e) => json_error(StatusCode::BAD_GATEWAY, e.to_string()),
        BridgeError::Store(e) => {
            tracing::error!(error = %e, "shadow store failure during bridge");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable")
        }
    }
}
