//! Inbound identity assertion verification.
//!
//! The identity-aware proxy in front of this service terminates the OAuth
//! dance and forwards a compact signed assertion with every request. This
//! module parses that assertion, verifies its HMAC signature against the
//! shared secret, and projects the claims into an [`Identity`] that the rest
//! of the request pipeline consumes.
//!
//! The IAP is the single source of identity truth; nothing here ever talks
//! to an identity provider directly.

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request header carrying the signed assertion.
pub const ASSERTION_HEADER: &str = "x-bridge-assertion";

/// Prefix for optional per-claim headers that may augment fields the signed
/// payload omits. The signed payload is authoritative on conflict.
pub const CLAIM_HEADER_PREFIX: &str = "x-bridge-claim-";

/// A verified identity extracted from an IAP assertion.
///
/// Constructed per-request by the verifier and attached to the request
/// extensions by the assertion gate; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    /// Identity provider name the assertion originated from.
    pub provider: String,
    /// Stable subject identifier, unique within the provider.
    pub subject: String,
    /// Email address; required for bridge operations.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Login hint (preferred username).
    pub user: String,
    /// Group memberships, in assertion order.
    pub groups: Vec<String>,
}

impl Identity {
    /// Shadow-store key for this identity, `"<provider>::<subject>"`.
    pub fn shadow_id(&self) -> String {
        format!("{}::{}", self.provider, self.subject)
    }
}

/// Assertion verification failures.
#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("missing_assertion")]
    Missing,

    #[error("malformed_assertion: {0}")]
    Malformed(String),

    #[error("invalid_assertion: {0}")]
    InvalidSignature(String),

    #[error("expired_assertion")]
    Expired,

    #[error("claim_missing: {0}")]
    ClaimMissing(&'static str),
}

/// Raw claims carried by the signed payload.
///
/// Field names follow the OIDC-flavored dialect the IAP emits. Everything
/// except the subject is optional at the wire level; projection enforces
/// what the bridge actually needs.
#[derive(Debug, Deserialize, Serialize, Default)]
struct AssertionClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    groups: Option<Vec<String>>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    nbf: Option<u64>,
}

/// Verifies IAP assertions against the configured shared secret.
#[derive(Clone)]
pub struct AssertionVerifier {
    key: DecodingKey,
    provider: String,
}

impl std::fmt::Debug for AssertionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionVerifier")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl AssertionVerifier {
    /// Creates a verifier for the given shared secret bytes.
    ///
    /// # Arguments
    /// * `secret` - HMAC key shared with the IAP.
    /// * `provider` - Provider name stamped onto verified identities.
    pub fn new(secret: &[u8], provider: impl Into<String>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            provider: provider.into(),
        }
    }

    /// Locates and verifies the assertion on a request.
    ///
    /// # Returns
    /// The verified [`Identity`], or the specific [`AssertionError`] the
    /// gate maps to an HTTP status.
    pub fn verify_request(&self, headers: &HeaderMap) -> Result<Identity, AssertionError> {
        let raw = headers
            .get(ASSERTION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AssertionError::Missing)?;

        let claims = self.verify(raw)?;
        self.project(claims, headers)
    }

    /// Verifies a raw compact assertion and returns its claims.
    fn verify(&self, raw: &str) -> Result<AssertionClaims, AssertionError> {
        let header = decode_header(raw)
            .map_err(|e| AssertionError::Malformed(e.to_string()))?;

        // Only the HMAC family is acceptable here; anything else means the
        // token was not minted by the IAP we share a secret with.
        let alg = match header.alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => header.alg,
            other => {
                return Err(AssertionError::InvalidSignature(format!(
                    "unexpected algorithm {:?}",
                    other
                )));
            }
        };

        let mut validation = Validation::new(alg);
        validation.validate_aud = false;
        validation.validate_nbf = true;
        // Expiry and not-before are enforced when present, not required.
        validation.required_spec_claims.clear();

        match decode::<AssertionClaims>(raw, &self.key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => {
                use jsonwebtoken::errors::ErrorKind;
                match e.kind() {
                    ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => {
                        Err(AssertionError::Expired)
                    }
                    ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                        Err(AssertionError::Malformed(e.to_string()))
                    }
                    _ => Err(AssertionError::InvalidSignature(e.to_string())),
                }
            }
        }
    }

    /// Projects verified claims into an [`Identity`], augmenting missing
    /// fields from `X-Bridge-Claim-*` headers.
    fn project(
        &self,
        claims: AssertionClaims,
        headers: &HeaderMap,
    ) -> Result<Identity, AssertionError> {
        let claim_header = |name: &str| -> Option<String> {
            headers
                .get(format!("{}{}", CLAIM_HEADER_PREFIX, name))
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let subject = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or(AssertionError::ClaimMissing("sub"))?;

        let email = claims
            .email
            .filter(|s| !s.is_empty())
            .or_else(|| claim_header("email"))
            .unwrap_or_default();
        let name = claims
            .name
            .filter(|s| !s.is_empty())
            .or_else(|| claim_header("name"))
            .unwrap_or_default();
        let user = claims
            .user
            .or(claims.preferred_username)
            .filter(|s| !s.is_empty())
            .or_else(|| claim_header("user"))
            .unwrap_or_default();
        let groups = claims
            .groups
            .filter(|g| !g.is_empty())
            .or_else(|| {
                claim_header("groups")
                    .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            })
            .unwrap_or_default();

        Ok(Identity {
            provider: self.provider.clone(),
            subject,
            email,
            name,
            user,
            groups,
        })
    }
}
