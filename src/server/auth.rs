//! Assertion gate middleware.
//!
//! Wraps protected routes: verifies the IAP assertion on the request and
//! attaches the resulting [`Identity`] to the request extensions so
//! handlers can consume it. Requests that fail verification never reach
//! the handler.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::assertion::AssertionError;
use crate::server::json_error;
use crate::state::AppState;

/// Middleware enforcing a valid assertion on every request it wraps.
///
/// Missing or expired assertions yield `401`; signature, format, and claim
/// failures yield `403`.
pub async fn assertion_gate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    match state.verifier.verify_request(req.headers()) {
        Ok(identity) => {
            tracing::debug!(subject = %identity.subject, "assertion verified");
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(
                error = %e,
                path = %req.uri().path(),
                method = %req.method(),
                "assertion rejected"
            );
            rejection(e)
        }
    }
}

fn rejection(err: AssertionError) -> Response {
    match err {
        AssertionError::Missing => json_error(StatusCode::UNAUTHORIZED, "missing_assertion"),
        AssertionError::Expired => json_error(StatusCode::UNAUTHORIZED, "expired_assertion"),
        AssertionError::Malformed(_)
        | AssertionError::InvalidSignature(_)
        | AssertionError::ClaimMissing(_) => {
            json_error(StatusCode::FORBIDDEN, "invalid_assertion")
        }
    }
}
