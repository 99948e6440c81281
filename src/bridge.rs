//! Identity bridge: turns a verified identity into a downstream session.
//!
//! Composes the shadow store and the downstream client behind the circuit
//! breaker. The flow is idempotent from the caller's perspective: user
//! provisioning is ensure-style, and a create that loses a concurrent race
//! is recovered by re-reading before surfacing an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::assertion::Identity;
use crate::breaker::CircuitBreaker;
use crate::downstream::{
    DownstreamClient, DownstreamError, DownstreamSession, DownstreamUser, derive_username,
};
use crate::shadow::{ShadowStore, StoreError};

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The identity carries no email; nothing downstream can be keyed.
    #[error("bad_request: identity has no email")]
    MissingEmail,

    /// The breaker is open; retry after the cool-down.
    #[error("circuit_open")]
    CircuitOpen { retry_after: Duration },

    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Composes verifier output, shadow store, and downstream client into
/// downstream sessions.
pub struct IdentityBridge {
    client: Arc<dyn DownstreamClient>,
    store: Arc<dyn ShadowStore>,
    breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for IdentityBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityBridge").finish_non_exhaustive()
    }
}

impl IdentityBridge {
    pub fn new(
        client: Arc<dyn DownstreamClient>,
        store: Arc<dyn ShadowStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            client,
            store,
            breaker,
        }
    }

    /// Produces a downstream session for a verified identity and syncs the
    /// shadow record.
    ///
    /// Steps: ensure the downstream user exists (create on first sight),
    /// mint a session, then upsert the shadow user with the downstream user
    /// id attached. Partial progress needs no compensation; the next
    /// attempt re-ensures idempotently.
    pub async fn ensure_session(
        &self,
        identity: &Identity,
    ) -> Result<DownstreamSession, BridgeError> {
        if identity.email.trim().is_empty() {
            return Err(BridgeError::MissingEmail);
        }

        if !self.breaker.allow() {
            let retry_after = self.breaker.remaining().unwrap_or_default();
            tracing::debug!(
                subject = %identity.subject,
                retry_after_secs = retry_after.as_secs(),
                "bridge call rejected, circuit open"
            );
            return Err(BridgeError::CircuitOpen { retry_after });
        }

        let user = match self.ensure_user(identity).await {
            Ok(user) => user,
            Err(e) => return Err(self.downstream_failed(e)),
        };

        let session = match self.client.create_session(&user.id).await {
            Ok(session) => session,
            Err(e) => return Err(self.downstream_failed(e)),
        };
        self.breaker.record_success();
        crate::metrics::record_session_issued();

        let mut attributes = BTreeMap::new();
        attributes.insert(
            "username".to_string(),
            derive_username(&identity.user, &identity.email),
        );
        if !identity.groups.is_empty() {
            attributes.insert("groups".to_string(), identity.groups.join(","));
        }
        attributes.insert("downstream_user_id".to_string(), user.id.clone());
        self.store.upsert(identity, &attributes).await?;

        tracing::info!(
            subject = %identity.subject,
            user_id = %user.id,
            "bridged identity to downstream session"
        );
        Ok(session)
    }

    /// Looks the user up by email, creating it when absent.
    ///
    /// Two concurrent callers can both observe not-found; the loser's
    /// create fails with a downstream conflict, which is retried as a read
    /// before anything surfaces.
    async fn ensure_user(&self, identity: &Identity) -> Result<DownstreamUser, DownstreamError> {
        match self.client.get_user_by_email(&identity.email).await {
            Ok(user) => Ok(user),
            Err(DownstreamError::NotFound) => {
                match self.client.create_user(identity).await {
                    Ok(user) => Ok(user),
                    Err(create_err @ DownstreamError::Api { .. }) => {
                        // Possibly a concurrent create won the race.
                        match self.client.get_user_by_email(&identity.email).await {
                            Ok(user) => {
                                tracing::debug!(
                                    email = %identity.email,
                                    "create_user conflict recovered by re-read"
                                );
                                Ok(user)
                            }
                            Err(_) => Err(create_err),
                        }
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Records a breaker failure for a failed downstream interaction.
    ///
    /// `NotFound` is a normal outcome and never reaches this path.
    fn downstream_failed(&self, err: DownstreamError) -> BridgeError {
        tracing::warn!(error = %err, "downstream interaction failed");
        self.breaker.record_failure();
        BridgeError::Downstream(err)
    }
}
