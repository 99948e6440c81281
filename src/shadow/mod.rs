//! Shadow user persistence.
//!
//! The store is a small capability set: upsert, list, health check, close.
//! Two implementations exist, a durable sqlite-backed one and an in-memory
//! one, selected by configuration. Upserts for the same key are serialized
//! so concurrent requests for one identity yield exactly one record.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::assertion::Identity;

pub mod memory;
pub mod models;
pub mod sqlite;

pub use models::ShadowUser;

/// How long durable store initialization may take before the process falls
/// back to the in-memory store.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store_unavailable: {0}")]
    Unavailable(String),
}

/// Persistence capability for shadow users.
#[async_trait]
pub trait ShadowStore: Send + Sync {
    /// Atomically insert-or-update the record keyed by the identity.
    ///
    /// Attributes merge: new keys are added, provided keys overwrite,
    /// unprovided keys are retained. `created_at` is set only on insert;
    /// `updated_at` always advances.
    async fn upsert(
        &self,
        identity: &Identity,
        attributes: &BTreeMap<String, String>,
    ) -> Result<ShadowUser, StoreError>;

    /// Snapshot of all records; order unspecified.
    async fn list(&self) -> Result<Vec<ShadowUser>, StoreError>;

    /// Lightweight probe used by readiness.
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Release resources.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Selects and initializes the shadow store for the given DSN.
///
/// A configured DSN selects the durable sqlite store, bounded by
/// [`INIT_TIMEOUT`]; initialization failure or timeout falls back to the
/// in-memory store with a warning rather than failing startup.
pub async fn init_store(dsn: Option<&str>) -> Arc<dyn ShadowStore> {
    match dsn {
        Some(dsn) => {
            let path = dsn
                .strip_prefix("sqlite://")
                .unwrap_or(dsn)
                .to_string();
            let init = tokio::time::timeout(
                INIT_TIMEOUT,
                tokio::task::spawn_blocking(move || sqlite::SqliteShadowStore::with_path(path)),
            )
            .await;
            match init {
                Ok(Ok(Ok(store))) => {
                    tracing::info!("using durable shadow store");
                    Arc::new(store)
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(error = %e, "durable shadow store init failed, falling back to in-memory");
                    Arc::new(memory::MemoryShadowStore::default())
                }
                Ok(Err(join_err)) => {
                    tracing::warn!(error = %join_err, "durable shadow store init panicked, falling back to in-memory");
                    Arc::new(memory::MemoryShadowStore::default())
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = INIT_TIMEOUT.as_secs(),
                        "durable shadow store init timed out, falling back to in-memory"
                    );
                    Arc::new(memory::MemoryShadowStore::default())
                }
            }
        }
        None => {
            tracing::info!("using in-memory shadow store");
            Arc::new(memory::MemoryShadowStore::default())
        }
    }
}
