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
    matchers::{method, path},
};

const SECRET: &str = "test-iap-secret";

fn sign_assertion() -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &serde_json::json!({
            "sub": "u-1",
            "email": "a@example.com",
            "name": "Ada Lovelace",
            "exp": chrono::Utc::now().timestamp() + 600,
        }),
        &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn proxy_router(internal_uri: &str) -> Router {
    let mut cfg = BridgeConfig::default();
    cfg.assertion.shared_secret = Some(SECRET.into());
    cfg.token.signing_key = Some("test-token-key".into());
    cfg.downstream.name = Some("chat".into());
    cfg.downstream.public_url = Some("https://apps.example.com/chat".into());
    cfg.downstream.internal_url = Some(internal_uri.to_string());
    cfg.downstream.admin_token = Some("admin-token".into());

    let state =
        Arc::new(AppState::from_config(&cfg, Arc::new(MemoryShadowStore::default())).unwrap());
    build_router(state)
}

fn authed_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(ASSERTION_HEADER, sign_assertion())
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn exact_prefix_redirects_to_trailing_slash() {
    let router = proxy_router("http://127.0.0.1:9");

    let resp = router
        .clone()
        .oneshot(authed_request("/chat"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/chat/");

    // The raw query survives the redirect.
    let resp = router
        .oneshot(authed_request("/chat?channel=town-square"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers().get(header::LOCATION).unwrap(),
        "/chat/?channel=town-square"
    );
}

#[tokio::test]
async fn proxy_requires_an_assertion() {
    let router = proxy_router("http://127.0.0.1:9");
    let resp = router
        .oneshot(
            Request::get("/chat/api/v4/users/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rewrites_path_and_host_when_cookie_present() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_string("proxied-ok"))
        .expect(1)
        .mount(&server)
        .await;

    let router = proxy_router(&server.uri());
    let mut req = authed_request("/chat/api/v4/users/me");
    req.headers_mut()
        .insert(header::COOKIE, "MMAUTHTOKEN=existing".parse().unwrap());

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // No session was minted, so no cookies were set.
    assert!(resp.headers().get(header::SET_COOKIE).is_none());
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    assert_eq!(&bytes[..], b"proxied-ok");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let host = received[0].headers.get("host").unwrap().to_str().unwrap();
    let internal_host = server.uri().strip_prefix("http://").unwrap().to_string();
    assert_eq!(host, internal_host);
}

#[tokio::test]
async fn joins_onto_downstream_base_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sub/api/v4/users/me"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let router = proxy_router(&format!("{}/sub", server.uri()));
    let mut req = authed_request("/chat/api/v4/users/me");
    req.headers_mut()
        .insert(header::COOKIE, "MMAUTHTOKEN=existing".parse().unwrap());

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn prefix_root_request_forwards_to_downstream_root() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("root"))
        .expect(1)
        .mount(&server)
        .await;

    let router = proxy_router(&server.uri());
    let mut req = authed_request("/chat/");
    req.headers_mut()
        .insert(header::COOKIE, "MMAUTHTOKEN=existing".parse().unwrap());

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn first_hit_injects_session_cookies_both_ways() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/a@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "u123",
            "username": "a",
            "email": "a@example.com",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v4/users/u123/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "s-1",
            "token": "tok-1",
            "user_id": "u123",
            "create_at": 1700000000000i64,
            "expires_at": 1700003600000i64,
            "device_id": "",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_string("proxied-ok"))
        .expect(1)
        .mount(&server)
        .await;

    let router = proxy_router(&server.uri());
    let resp = router
        .oneshot(authed_request("/chat/api/v4/users/me"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Both cookies are set on the response with browser-correct attributes.
    let cookies: Vec<String> = resp
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies.len(), 2);
    let auth_cookie = cookies
        .iter()
        .find(|c| c.starts_with("MMAUTHTOKEN=tok-1"))
        .expect("auth token cookie");
    let user_cookie = cookies
        .iter()
        .find(|c| c.starts_with("MMUSERID=u123"))
        .expect("user id cookie");
    for cookie in [auth_cookie, user_cookie] {
        assert!(cookie.contains("Domain=apps.example.com"), "{cookie}");
        assert!(cookie.contains("Path=/chat"), "{cookie}");
        assert!(cookie.contains("Secure"), "{cookie}");
        assert!(cookie.contains("HttpOnly"), "{cookie}");
        assert!(cookie.contains("SameSite=Lax"), "{cookie}");
    }

    // The very first forwarded request already authenticates.
    let received = server.received_requests().await.unwrap();
    let page = received
        .iter()
        .find(|r| r.url.path() == "/api/v4/users/me")
        .unwrap();
    let cookie = page.headers.get("cookie").unwrap().to_str().unwrap();
    assert!(cookie.contains("MMAUTHTOKEN=tok-1"), "{cookie}");
    assert!(cookie.contains("MMUSERID=u123"), "{cookie}");
}

#[tokio::test]
async fn transport_failure_is_a_bad_gateway() {
    // Nothing listens on this port.
    let router = proxy_router("http://127.0.0.1:9");
    let mut req = authed_request("/chat/api/v4/users/me");
    req.headers_mut()
        .insert(header::COOKIE, "MMAUTHTOKEN=existing".parse().unwrap());

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "bad_gateway");
}
