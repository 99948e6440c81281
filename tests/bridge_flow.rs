use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use idbridge::{
    assertion::ASSERTION_HEADER, config::BridgeConfig, server::service::build_router,
    shadow::memory::MemoryShadowStore, state::AppState,
};
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

const SECRET: &str = "test-iap-secret";

fn sign_assertion(claims: serde_json::Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn ada_assertion() -> String {
    sign_assertion(serde_json::json!({
        "sub": "u-1",
        "email": "a@example.com",
        "name": "Ada Lovelace",
        "groups": ["eng"],
        "exp": chrono::Utc::now().timestamp() + 600,
    }))
}

fn router_with_downstream(downstream_uri: &str) -> Router {
    let mut cfg = BridgeConfig::default();
    cfg.assertion.shared_secret = Some(SECRET.into());
    cfg.token.signing_key = Some("test-token-key".into());
    cfg.downstream.name = Some("chat".into());
    cfg.downstream.public_url = Some("https://apps.example.com/chat".into());
    cfg.downstream.internal_url = Some(downstream_uri.to_string());
    cfg.downstream.admin_token = Some("admin-token".into());

    let state =
        Arc::new(AppState::from_config(&cfg, Arc::new(MemoryShadowStore::default())).unwrap());
    build_router(state)
}

fn bridge_request(assertion: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri("/bridge/chat")
        .header(ASSERTION_HEADER, assertion)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn session_template() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": "s-1",
        "token": "tok-1",
        "user_id": "u123",
        "create_at": 1700000000000i64,
        "expires_at": 1700003600000i64,
        "device_id": "",
    }))
}

async fn metrics_counter(router: &Router, name: &str) -> u64 {
    let resp = router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    text.lines()
        .find(|line| line.starts_with(name))
        .and_then(|line| line.split_whitespace().last())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[tokio::test]
async fn first_sight_creates_user_and_session() {
    idbridge::metrics::init();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/a@example.com"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v4/users"))
        .and(body_partial_json(serde_json::json!({
            "username": "a",
            "email": "a@example.com",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email_verified": true,
            "locale": "en",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "u123",
            "username": "a",
            "email": "a@example.com",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v4/users/u123/sessions"))
        .respond_with(session_template())
        .expect(1)
        .mount(&server)
        .await;

    let router = router_with_downstream(&server.uri());
    let sessions_before = metrics_counter(&router, "downstream_sessions_issued_total").await;

    let resp = router
        .clone()
        .oneshot(bridge_request(&ada_assertion()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["session"]["token"], "tok-1");
    assert_eq!(body["session"]["user_id"], "u123");
    assert_eq!(body["session"]["device_id"], "");

    // The shadow record carries the downstream linkage.
    let resp = router
        .clone()
        .oneshot(
            Request::get("/api/v1/shadow-users")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let listed = body_json(resp).await;
    let users = listed["shadow_users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], "gitlab::u-1");
    assert_eq!(users[0]["attributes"]["downstream_user_id"], "u123");
    assert_eq!(users[0]["attributes"]["username"], "a");
    assert_eq!(users[0]["attributes"]["groups"], "eng");

    let sessions_after = metrics_counter(&router, "downstream_sessions_issued_total").await;
    assert!(sessions_after >= sessions_before + 1);
}

#[tokio::test]
async fn returning_user_skips_creation_and_keeps_created_at() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/a@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "u123",
            "username": "a",
            "email": "a@example.com",
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v4/users"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v4/users/u123/sessions"))
        .respond_with(session_template())
        .expect(2)
        .mount(&server)
        .await;

    let router = router_with_downstream(&server.uri());

    let resp = router
        .clone()
        .oneshot(bridge_request(&ada_assertion()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let listed = body_json(
        router
            .clone()
            .oneshot(
                Request::get("/api/v1/shadow-users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap(),
    )
    .await;
    let created_at = listed["shadow_users"][0]["created_at"].clone();
    let updated_at = chrono::DateTime::parse_from_rfc3339(
        listed["shadow_users"][0]["updated_at"].as_str().unwrap(),
    )
    .unwrap();

    let resp = router
        .clone()
        .oneshot(bridge_request(&ada_assertion()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let listed = body_json(
        router
            .clone()
            .oneshot(
                Request::get("/api/v1/shadow-users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap(),
    )
    .await;
    let users = listed["shadow_users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["created_at"], created_at);
    let updated_again =
        chrono::DateTime::parse_from_rfc3339(users[0]["updated_at"].as_str().unwrap()).unwrap();
    assert!(updated_again >= updated_at);
    assert_eq!(users[0]["attributes"]["downstream_user_id"], "u123");
}

#[tokio::test]
async fn create_conflict_is_recovered_by_re_reading() {
    let server = MockServer::start().await;

    // First lookup misses; the one after the conflicted create hits.
    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/a@example.com"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/a@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "u123",
            "username": "a",
            "email": "a@example.com",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v4/users"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "error": "an account with that email already exists",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v4/users/u123/sessions"))
        .respond_with(session_template())
        .expect(1)
        .mount(&server)
        .await;

    let router = router_with_downstream(&server.uri());
    let resp = router
        .oneshot(bridge_request(&ada_assertion()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["session"]["user_id"], "u123");
}

#[tokio::test]
async fn missing_email_is_a_bad_request_with_no_downstream_calls() {
    let server = MockServer::start().await;
    let router = router_with_downstream(&server.uri());

    let assertion = sign_assertion(serde_json::json!({
        "sub": "u-1",
        "email": "",
        "exp": chrono::Utc::now().timestamp() + 600,
    }));
    let resp = router.oneshot(bridge_request(&assertion)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let received = server.received_requests().await.unwrap();
    assert!(received.is_empty(), "no downstream call expected");
}

#[tokio::test]
async fn unknown_downstream_name_is_not_found() {
    let server = MockServer::start().await;
    let router = router_with_downstream(&server.uri());

    let req = Request::builder()
        .method("GET")
        .uri("/bridge/wiki")
        .header(ASSERTION_HEADER, ada_assertion())
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bridge_without_admin_token_is_not_implemented() {
    let mut cfg = BridgeConfig::default();
    cfg.assertion.shared_secret = Some(SECRET.into());
    cfg.token.signing_key = Some("test-token-key".into());
    cfg.downstream.name = Some("chat".into());

    let state =
        Arc::new(AppState::from_config(&cfg, Arc::new(MemoryShadowStore::default())).unwrap());
    let router = build_router(state);

    let resp = router
        .oneshot(bridge_request(&ada_assertion()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn repeated_downstream_failures_trip_the_breaker() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/a@example.com"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let router = router_with_downstream(&server.uri());
    let assertion = ada_assertion();

    // Five consecutive failures surface as bad gateway.
    for attempt in 0..5 {
        let resp = router
            .clone()
            .oneshot(bridge_request(&assertion))
            .await
            .unwrap();
        assert_eq!(
            resp.status(),
            StatusCode::BAD_GATEWAY,
            "attempt {attempt} should pass through"
        );
    }

    // The sixth is short-circuited with a cool-down hint.
    let resp = router
        .clone()
        .oneshot(bridge_request(&assertion))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));
    let body = body_json(resp).await;
    assert_eq!(body["error"], "circuit_open");
    assert!(body["retry_after_seconds"].as_u64().unwrap() >= 1);

    // The short-circuited request never reached the downstream.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 5);
}
