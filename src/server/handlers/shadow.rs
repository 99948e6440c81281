//! Shadow user API handlers.
//!
//! # Endpoints
//!
//! - `GET /api/v1/shadow-users` - List all shadow users
//! - `POST /api/v1/shadow-users` - Upsert a shadow user; provider/subject
//!   come from the body or, when missing, from a valid assertion on the
//!   request

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::assertion::Identity;
use crate::server::json_error;
use crate::state::AppState;

/// Upsert request body. Everything is optional; missing provider/subject
/// may be derived from an assertion.
#[derive(Debug, Default, Deserialize)]
pub struct ShadowUserRequest {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, String>>,
}

/// Lists the current shadow users.
///
/// # Endpoint
/// `GET /api/v1/shadow-users`
pub async fn list_shadow_users(State(state): State<Arc<AppState>>) -> Response {
    tracing::debug!("API: GET /api/v1/shadow-users");
    match state.store.list().await {
        Ok(users) => (
            StatusCode::OK,
            Json(serde_json::json!({ "shadow_users": users })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "listing shadow users failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable")
        }
    }
}

/// Upserts a shadow user.
///
/// When the body lacks `provider`/`subject`, a valid assertion on the
/// request supplies the identity instead; body fields win where both are
/// present. Rejects with `400` when no identity can be established either
/// way. The `require_assertion_for_shadow_writes` policy additionally
/// demands a valid assertion regardless of body contents.
///
/// # Endpoint
/// `POST /api/v1/shadow-users`
pub async fn upsert_shadow_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ShadowUserRequest>, JsonRejection>,
) -> Response {
    tracing::debug!("API: POST /api/v1/shadow-users");
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed shadow user body");
            return json_error(StatusCode::BAD_REQUEST, "bad_request");
        }
    };

    let asserted = state.verifier.verify_request(&headers).ok();
    if state.require_assertion_for_shadow_writes && asserted.is_none() {
        return json_error(StatusCode::UNAUTHORIZED, "missing_assertion");
    }

    let Some((identity, attributes)) = build_identity(&state, body, asserted) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "bad_request: provider and subject are required",
        );
    };

    match state.store.upsert(&identity, &attributes).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "upserting shadow user failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable")
        }
    }
}

/// Combines body fields with an optional asserted identity.
///
/// Body fields are authoritative; the assertion only fills gaps. Returns
/// `None` when no provider/subject pair can be established.
fn build_identity(
    state: &AppState,
    body: ShadowUserRequest,
    asserted: Option<Identity>,
) -> Option<(Identity, BTreeMap<String, String>)> {
    let provider = body
        .provider
        .filter(|s| !s.is_empty())
        .or_else(|| asserted.as_ref().map(|a| a.provider.clone()))
        .or_else(|| {
            // A body-supplied subject alone still keys under the configured
            // provider.
            body.subject
                .as_ref()
                .filter(|s| !s.is_empty())
                .map(|_| state.idp_name.clone())
        })?;
    let subject = body
        .subject
        .filter(|s| !s.is_empty())
        .or_else(|| asserted.as_ref().map(|a| a.subject.clone()))?;

    let identity = Identity {
        provider,
        subject,
        email: body
            .email
            .or_else(|| asserted.as_ref().map(|a| a.email.clone()))
            .unwrap_or_default(),
        name: body
            .name
            .or_else(|| asserted.as_ref().map(|a| a.name.clone()))
            .unwrap_or_default(),
        user: body
            .user
            .or_else(|| asserted.as_ref().map(|a| a.user.clone()))
            .unwrap_or_default(),
        groups: body
            .groups
            .or_else(|| asserted.map(|a| a.groups))
            .unwrap_or_default(),
    };
    Some((identity, body.attributes.unwrap_or_default()))
}
