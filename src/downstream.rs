//! Typed client for the downstream application's admin REST API.
//!
//! The bridge needs exactly three operations from the downstream: look a
//! user up by email, create a user, and create a session for a user. All
//! three authenticate with a long-lived admin bearer token. The wire shape
//! follows the chat application's v4 admin surface.

use async_trait::async_trait;
use rand::RngCore;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::assertion::Identity;

/// Per-call timeout for downstream admin requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum number of downstream error-body bytes carried in error messages.
const MAX_ERROR_BODY: usize = 4096;

/// Maximum derived username length, in code points.
pub const MAX_USERNAME_LEN: usize = 22;

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("not_found")]
    NotFound,

    #[error("downstream_error: status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("downstream_unreachable: {0}")]
    Unreachable(String),
}

/// A user record in the downstream's namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamUser {
    pub id: String,
    pub username: String,
    pub email: String,
}

/// A session minted by the downstream for one of its users.
///
/// `create_at` / `expires_at` are epoch milliseconds, matching the
/// downstream's own serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamSession {
    pub id: String,
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub create_at: i64,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub device_id: String,
}

/// The three downstream operations the bridge relies on.
///
/// A second downstream application would be a second implementation of this
/// trait, not a change to the bridge.
#[async_trait]
pub trait DownstreamClient: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> Result<DownstreamUser, DownstreamError>;
    async fn create_user(&self, identity: &Identity) -> Result<DownstreamUser, DownstreamError>;
    async fn create_session(&self, user_id: &str) -> Result<DownstreamSession, DownstreamError>;
}

/// Payload for downstream user creation.
///
/// The password is random and never relied upon; the IAP plus session
/// injection is the access path.
#[derive(Debug, Serialize)]
struct NewUser {
    username: String,
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    email_verified: bool,
    locale: String,
}

#[derive(Debug, Serialize)]
struct NewSession {
    device_id: String,
}

/// HTTP implementation of [`DownstreamClient`] over the admin REST API.
pub struct HttpDownstreamClient {
    http: reqwest::Client,
    base: Url,
    admin_token: String,
}

impl std::fmt::Debug for HttpDownstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDownstreamClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpDownstreamClient {
    /// Creates a client for the admin API rooted at `base`.
    ///
    /// # Arguments
    /// * `base` - Internal URL of the downstream.
    /// * `admin_token` - Long-lived admin bearer token.
    pub fn new(base: Url, admin_token: String) -> Result<Self, DownstreamError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DownstreamError::Unreachable(e.to_string()))?;
        Ok(Self {
            http,
            base,
            admin_token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DownstreamError> {
        let joined = format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| DownstreamError::Unreachable(e.to_string()))
    }

    /// Maps a downstream response to the typed result, translating 404 to
    /// [`DownstreamError::NotFound`] and other non-success statuses to
    /// [`DownstreamError::Api`] with a truncated body.
    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DownstreamError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DownstreamError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(DownstreamError::Api {
                status: status.as_u16(),
                body: truncated,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| DownstreamError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl DownstreamClient for HttpDownstreamClient {
    async fn get_user_by_email(&self, email: &str) -> Result<DownstreamUser, DownstreamError> {
        let url = self.endpoint(&format!("api/v4/users/email/{}", email))?;
        tracing::debug!(%email, "downstream: get user by email");
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.admin_token)
            .send()
            .await
            .map_err(|e| DownstreamError::Unreachable(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn create_user(&self, identity: &Identity) -> Result<DownstreamUser, DownstreamError> {
        let username = derive_username(&identity.user, &identity.email);
        let (first_name, last_name) = split_display_name(&identity.name);
        let payload = NewUser {
            username,
            email: identity.email.clone(),
            password: random_password(),
            first_name,
            last_name,
            email_verified: true,
            locale: "en".to_string(),
        };

        let url = self.endpoint("api/v4/users")?;
        tracing::info!(email = %identity.email, username = %payload.username, "downstream: create user");
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.admin_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DownstreamError::Unreachable(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn create_session(&self, user_id: &str) -> Result<DownstreamSession, DownstreamError> {
        let url = self.endpoint(&format!("api/v4/users/{}/sessions", user_id))?;
        tracing::debug!(%user_id, "downstream: create session");
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.admin_token)
            .json(&NewSession {
                device_id: String::new(),
            })
            .send()
            .await
            .map_err(|e| DownstreamError::Unreachable(e.to_string()))?;
        Self::read_json(response).await
    }
}

/// Derives a downstream username from the identity.
///
/// Priority: login hint, then the local part of the email, then a
/// synthesized `shadow-<unix-seconds>` fallback. The result is lowercase,
/// restricted to `[a-z0-9._-]`, trimmed of leading/trailing `._-`, and at
/// most [`MAX_USERNAME_LEN`] code points.
pub fn derive_username(user: &str, email: &str) -> String {
    let candidate = if !user.trim().is_empty() {
        user.trim().to_string()
    } else {
        email.split('@').next().unwrap_or_default().trim().to_string()
    };

    let sanitized = sanitize_username(&candidate);
    if sanitized.is_empty() {
        synthesized_username()
    } else {
        sanitized
    }
}

fn sanitize_username(raw: &str) -> String {
    let lowered: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let truncated: String = lowered.chars().take(MAX_USERNAME_LEN).collect();
    truncated.trim_matches(['.', '_', '-']).to_string()
}

fn synthesized_username() -> String {
    format!("shadow-{}", chrono::Utc::now().timestamp())
}

/// Splits a display name into first/last on the first whitespace run.
pub fn split_display_name(name: &str) -> (String, String) {
    let trimmed = name.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim_start().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Generates a throwaway password with 32 bytes of entropy.
fn random_password() -> String {
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let mut buf = [0u8; 32];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
