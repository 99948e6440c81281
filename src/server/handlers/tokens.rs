//! Token issuance and validation handlers.
//!
//! Both endpoints sit behind the assertion gate; the verified identity is
//! taken from the request extensions.
//!
//! # Endpoints
//!
//! - `POST /api/v1/tokens/issue` - Mint a short-lived signed token
//! - `POST /api/v1/tokens/validate` - Verify a token and return its claims

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::assertion::Identity;
use crate::server::json_error;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct IssueRequest {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub audience: Option<Vec<String>>,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    #[serde(default)]
    pub claims: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct IssueResponse {
    pub token: String,
    pub expires_at: String,
    pub subject: String,
    pub issued_to: String,
    pub audience: Vec<String>,
    pub custom_claims: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
}

/// Mints a token for the verified caller.
///
/// The subject defaults to the caller's own; minting for a different
/// subject is rejected unless the policy explicitly allows it.
///
/// # Endpoint
/// `POST /api/v1/tokens/issue`
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    body: Result<Json<IssueRequest>, JsonRejection>,
) -> Response {
    tracing::debug!(subject = %identity.subject, "API: POST /api/v1/tokens/issue");
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed issue body");
            return json_error(StatusCode::BAD_REQUEST, "bad_request");
        }
    };

    let subject = body
        .subject
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| identity.subject.clone());
    if subject != identity.subject && !state.allow_foreign_subjects {
        tracing::debug!(
            caller = %identity.subject,
            requested = %subject,
            "refusing token for foreign subject"
        );
        return json_error(
            StatusCode::FORBIDDEN,
            "subject does not match verified identity",
        );
    }

    let audience = body.audience.unwrap_or_default();
    let custom = body.claims.unwrap_or_default();
    match state
        .issuer
        .issue(&subject, &audience, body.ttl_seconds, custom)
    {
        Ok(minted) => {
            crate::metrics::record_token_issued();
            (
                StatusCode::OK,
                Json(IssueResponse {
                    token: minted.value,
                    expires_at: minted.expires_at.to_rfc3339(),
                    subject: minted.claims.sub,
                    issued_to: identity.subject,
                    audience: minted.claims.aud,
                    custom_claims: minted.claims.custom,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "token signing failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "token signing failed")
        }
    }
}

/// Validates a token and returns its claims.
///
/// # Endpoint
/// `POST /api/v1/tokens/validate`
pub async fn validate_token(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ValidateRequest>, JsonRejection>,
) -> Response {
    tracing::debug!("API: POST /api/v1/tokens/validate");
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed validate body");
            return json_error(StatusCode::BAD_REQUEST, "bad_request");
        }
    };

    match state.issuer.validate(&body.token) {
        Ok(claims) => (
            StatusCode::OK,
            Json(serde_json::json!({ "claims": claims })),
        )
            .into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "token validation failed");
            json_error(StatusCode::UNAUTHORIZED, "invalid_token")
        }
    }
}
