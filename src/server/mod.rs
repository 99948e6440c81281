//! HTTP surface: routes, middleware, reverse proxy, handlers.

pub mod auth;
pub mod constants;
pub mod handlers;
pub mod proxy;
pub mod service;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Builds the uniform JSON error envelope every originated response uses.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}
