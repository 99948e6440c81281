//! Short-lived bearer token issuance and validation.
//!
//! Tokens minted here let other internal services validate a caller without
//! re-verifying the IAP assertion. The signing key is symmetric and
//! deliberately independent of the IAP shared secret: rotating the IAP
//! secret must never invalidate tokens this service issued.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default token lifetime when the caller passes no (or a non-positive) TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid_token: {0}")]
    Invalid(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Claims carried by an issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject the token was minted for.
    pub sub: String,
    /// Audience list; empty means unrestricted.
    #[serde(default)]
    pub aud: Vec<String>,
    /// Issue time (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Caller-supplied custom claims.
    #[serde(flatten)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

/// A freshly minted token in compact form.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub claims: TokenClaims,
}

/// Signs and verifies short-lived bearer tokens with a symmetric key.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Creates an issuer from raw symmetric key bytes.
    pub fn new(key: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
        }
    }

    /// Generates a random signing key for deployments that configure none.
    ///
    /// Tokens signed with a boot-generated key do not survive a restart;
    /// configure a key when that matters.
    pub fn random_key() -> String {
        let mut buf = [0u8; 32];
        rand::rng().fill_bytes(&mut buf);
        URL_SAFE_NO_PAD.encode(buf)
    }

    /// Mints a signed token.
    ///
    /// # Arguments
    /// * `subject` - Subject claim.
    /// * `audience` - Audience list, may be empty.
    /// * `ttl` - Requested lifetime; non-positive selects [`DEFAULT_TTL`].
    /// * `custom` - Additional claims merged into the payload.
    pub fn issue(
        &self,
        subject: &str,
        audience: &[String],
        ttl: Option<i64>,
        custom: serde_json::Map<String, serde_json::Value>,
    ) -> Result<IssuedToken, TokenError> {
        let effective = match ttl {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => DEFAULT_TTL,
        };
        let issued_at = Utc::now();
        let expires_at = issued_at + effective;

        let claims = TokenClaims {
            sub: subject.to_string(),
            aud: audience.to_vec(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            custom,
        };

        let value = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            value,
            expires_at,
            claims,
        })
    }

    /// Verifies a compact token and returns its claims.
    ///
    /// Checks the signature and expiry. Audience enforcement is the
    /// caller's concern since issued audiences are free-form.
    pub fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;

        decode::<TokenClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }
}
