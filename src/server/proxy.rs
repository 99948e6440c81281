//! Transparent reverse proxy with session-cookie injection.
//!
//! Authenticated browser traffic arriving under the public path prefix is
//! forwarded to the downstream's internal URL so the downstream sees
//! requests as if served at its own root. On the first authenticated
//! request that lacks the downstream's session cookie, the identity bridge
//! mints a session and the cookies are both set on the response and
//! appended to the forwarded request, so no second round-trip is needed.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use std::sync::Arc;

use crate::assertion::Identity;
use crate::downstream::DownstreamSession;
use crate::server::constants::{SESSION_COOKIE, USER_ID_COOKIE};
use crate::server::handlers::bridge::bridge_error_response;
use crate::server::json_error;
use crate::state::AppState;

/// Normalizes a public path prefix.
///
/// Ensures a leading `/`, strips the trailing `/` unless the prefix is
/// exactly `/`, and maps empty to `/`.
pub fn normalize_prefix(p: &str) -> String {
    let trimmed = p.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }
    let mut out = String::new();
    if !trimmed.starts_with('/') {
        out.push('/');
    }
    out.push_str(trimmed.trim_end_matches('/'));
    if out.is_empty() { "/".to_string() } else { out }
}

/// Strips the public prefix from a request path.
///
/// A root (or empty) prefix passes the path through. Otherwise the prefix
/// is removed and the remainder is guaranteed a leading `/` (`/` when the
/// remainder is empty).
pub fn strip_public_prefix(path: &str, prefix: &str) -> String {
    if prefix.is_empty() || prefix == "/" {
        return path.to_string();
    }
    match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        Some(rest) => format!("/{}", rest),
        None => path.to_string(),
    }
}

/// Joins a base path and a tail with exactly one `/` between them.
pub fn join_paths(base: &str, tail: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        tail.trim_start_matches('/')
    )
}

/// Reverse proxy handler for everything under the public prefix.
///
/// The exact-prefix path (no trailing slash) redirects to the slashed form
/// so the downstream's relative URLs resolve; everything else is rewritten
/// and forwarded. Transport failures count against the circuit breaker and
/// surface as `502`.
pub async fn proxy_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let (Some(internal), Some(public)) = (&state.internal_url, &state.public_url) else {
        return json_error(StatusCode::NOT_IMPLEMENTED, "not_implemented");
    };

    let path = req.uri().path().to_string();
    let prefix = state.public_prefix.clone();

    // Trailing-slash redirect keeps the downstream's relative links working.
    if prefix != "/" && path == prefix {
        let location = match req.uri().query() {
            Some(q) => format!("{}/?{}", prefix, q),
            None => format!("{}/", prefix),
        };
        return Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, location)
            .body(Body::empty())
            .expect("building redirect response");
    }

    let tail = strip_public_prefix(&path, &prefix);
    let target_path = join_paths(internal.path(), &tail);

    let mut target = internal.clone();
    target.set_path(&target_path);
    target.set_query(req.uri().query());

    // Mint a downstream session when the browser does not present one yet.
    let mut injected: Option<DownstreamSession> = None;
    if !has_session_cookie(req.headers()) {
        let identity = req.extensions().get::<Identity>().cloned();
        match (identity, &state.bridge) {
            (Some(identity), Some(bridge)) => {
                match bridge.ensure_session(&identity).await {
                    Ok(session) => injected = Some(session),
                    Err(e) => return bridge_error_response(e),
                }
            }
            (Some(_), None) => {
                tracing::debug!("no downstream admin token configured, forwarding without session");
            }
            (None, _) => {
                tracing::debug!("no verified identity in request context, forwarding as-is");
            }
        }
    }

    let method = req.method().clone();
    let mut headers = req.headers().clone();
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::CONNECTION);
    headers.remove(header::TRANSFER_ENCODING);

    if let Some(session) = &injected {
        let pair = format!(
            "{}={}; {}={}",
            SESSION_COOKIE, session.token, USER_ID_COOKIE, session.user_id
        );
        let merged = match headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.is_empty() => format!("{}; {}", existing, pair),
            _ => pair,
        };
        if let Ok(value) = merged.parse() {
            headers.insert(header::COOKIE, value);
        }
    }

    let body = reqwest::Body::wrap_stream(req.into_body().into_data_stream());
    let upstream = state
        .proxy_http
        .request(method, target)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(resp) => {
            state.breaker.record_success();
            resp
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path, "proxy forward failed");
            state.breaker.record_failure();
            return json_error(StatusCode::BAD_GATEWAY, "bad_gateway");
        }
    };

    let mut builder = Response::builder().status(upstream.status());
    if let Some(out_headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            if name == header::CONNECTION || name == header::TRANSFER_ENCODING {
                continue;
            }
            out_headers.append(name.clone(), value.clone());
        }
        if let Some(session) = &injected {
            for cookie in session_cookies(&state, public, session) {
                if let Ok(value) = cookie.to_string().parse() {
                    out_headers.append(header::SET_COOKIE, value);
                }
            }
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .expect("building proxied response")
}

/// Whether the inbound request already carries the downstream session cookie.
fn has_session_cookie(headers: &axum::http::HeaderMap) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .any(|pair| {
            pair.trim()
                .strip_prefix(SESSION_COOKIE)
                .is_some_and(|rest| rest.trim_start().starts_with('='))
        })
}

/// Builds the auth-token and user-id cookies for an injected session.
///
/// Path derives from the public prefix, domain and the secure flag from the
/// public URL; always HttpOnly and SameSite=Lax.
fn session_cookies(
    state: &AppState,
    public: &url::Url,
    session: &DownstreamSession,
) -> Vec<Cookie<'static>> {
    let cookie_path = state.public_prefix.clone();
    let secure = public.scheme() == "https";
    let domain = public.host_str().unwrap_or_default().to_string();

    [
        (SESSION_COOKIE, session.token.clone()),
        (USER_ID_COOKIE, session.user_id.clone()),
    ]
    .into_iter()
    .map(|(name, value)| {
        let mut cookie = Cookie::new(name, value);
        cookie.set_path(cookie_path.clone());
        if !domain.is_empty() {
            cookie.set_domain(domain.clone());
        }
        cookie.set_secure(secure);
        cookie.set_http_only(true);
        cookie.set_same_site(SameSite::Lax);
        cookie
    })
    .collect()
}
