use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use idbridge::{
    assertion::ASSERTION_HEADER, config::BridgeConfig, server::service::build_router,
    shadow::memory::MemoryShadowStore, state::AppState,
};
use tower::ServiceExt;

const SECRET: &str = "test-iap-secret";

fn base_config() -> BridgeConfig {
    let mut cfg = BridgeConfig::default();
    cfg.assertion.shared_secret = Some(SECRET.into());
    cfg.token.signing_key = Some("test-token-key".into());
    cfg
}

fn test_router() -> Router {
    let state = Arc::new(
        AppState::from_config(&base_config(), Arc::new(MemoryShadowStore::default())).unwrap(),
    );
    build_router(state)
}

fn sign_assertion(claims: serde_json::Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn default_claims() -> serde_json::Value {
    serde_json::json!({
        "sub": "u-1",
        "email": "a@example.com",
        "name": "Ada Lovelace",
        "groups": ["eng"],
        "exp": chrono::Utc::now().timestamp() + 600,
    })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn protected_routes_reject_missing_assertion_with_401() {
    let router = test_router();
    let protected = [
        (Method::POST, "/api/v1/tokens/issue"),
        (Method::POST, "/api/v1/tokens/validate"),
        (Method::GET, "/bridge/downstream"),
    ];

    for (method, uri) in protected {
        let req = Request::builder()
            .method(method.clone())
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{} must be gated", uri);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "missing_assertion");
    }
}

#[tokio::test]
async fn tampered_signature_is_rejected_with_403_before_the_handler() {
    let router = test_router();
    let token = sign_assertion(default_claims());
    let mut tampered = token.clone();
    let last = tampered.pop().unwrap();
    tampered.push(if last == 'A' { 'B' } else { 'A' });

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/tokens/issue")
        .header(ASSERTION_HEADER, tampered)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_json(resp).await;
    // The gate answers; a handler response would carry a token.
    assert_eq!(body["error"], "invalid_assertion");
}

#[tokio::test]
async fn expired_assertion_is_rejected_with_401() {
    let router = test_router();
    let token = sign_assertion(serde_json::json!({
        "sub": "u-1",
        "exp": chrono::Utc::now().timestamp() - 600,
    }));

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/tokens/issue")
        .header(ASSERTION_HEADER, token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "expired_assertion");
}

#[tokio::test]
async fn valid_assertion_reaches_the_handler_with_identity_attached() {
    let router = test_router();
    let token = sign_assertion(default_claims());

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/tokens/issue")
        .header(ASSERTION_HEADER, token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    // Subject defaulted from the verified identity proves the gate attached it.
    assert_eq!(body["subject"], "u-1");
    assert_eq!(body["issued_to"], "u-1");
}

#[tokio::test]
async fn public_routes_pass_without_an_assertion() {
    let router = test_router();
    for uri in ["/healthz", "/readyz", "/api/v1/shadow-users"] {
        let req = Request::get(uri).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{} must be public", uri);
    }
}

#[tokio::test]
async fn healthz_reports_idp_and_timestamp() {
    let router = test_router();
    let req = Request::get("/healthz").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["idp"], "gitlab");
    assert!(body["time"].as_str().unwrap().contains('T'));
}
