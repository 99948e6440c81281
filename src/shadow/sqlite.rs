//! Durable sqlite-backed shadow store.
//!
//! Uses per-operation connections with WAL mode and a busy timeout, with
//! all rusqlite work pushed onto blocking tasks. Schema management is done
//! through embedded refinery migrations under `migrations/sqlite/`.
//!
//! The per-key upsert race resolves inside SQLite: a single
//! `INSERT ... ON CONFLICT DO UPDATE` merges attribute maps with
//! `json_patch`, so two concurrent upserts for one key produce one row
//! containing both writers' attributes.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use refinery::embed_migrations;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::task;

use crate::assertion::Identity;
use crate::shadow::{ShadowStore, ShadowUser, StoreError};

// Embed compile-time migrations located under `migrations/sqlite/`.
embed_migrations!("migrations/sqlite");

/// Sqlite-backed [`ShadowStore`].
#[derive(Clone, Debug)]
pub struct SqliteShadowStore {
    db_path: PathBuf,
}

impl SqliteShadowStore {
    /// Initializes the store at the given database path.
    ///
    /// Creates the parent directory if needed and applies embedded
    /// migrations. Blocking; callers run this on a blocking task.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the directory cannot be
    /// created, the database cannot be opened, or migrations fail.
    pub fn with_path<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        tracing::debug!("Initializing shadow store at path: {}", path.display());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("creating parent dir {}: {}", parent.display(), e))
            })?;
        }

        let mut conn = open_connection(&path)?;
        migrations::runner()
            .run(&mut conn)
            .map_err(|e| StoreError::Unavailable(format!("applying migrations: {}", e)))?;

        tracing::debug!("Shadow store initialized at: {}", path.display());
        Ok(Self { db_path: path })
    }
}

/// Opens a connection with settings suited to a server workload.
fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).map_err(|e| {
        StoreError::Unavailable(format!("opening sqlite db at {}: {}", path.display(), e))
    })?;
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "busy_timeout", 5000i64).ok(); // 5s
    Ok(conn)
}

fn timestamp(dt: DateTime<Utc>) -> String {
    // Fixed-width UTC form so lexicographic order matches time order.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_record(
    id: String,
    identity_json: String,
    attributes_json: String,
    created_at: String,
    updated_at: String,
) -> Result<ShadowUser, StoreError> {
    let identity: Identity = serde_json::from_str(&identity_json)
        .map_err(|e| StoreError::Unavailable(format!("malformed identity for {}: {}", id, e)))?;
    let attributes: BTreeMap<String, String> = serde_json::from_str(&attributes_json)
        .map_err(|e| StoreError::Unavailable(format!("malformed attributes for {}: {}", id, e)))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::Unavailable(format!("malformed created_at for {}: {}", id, e)))?
        .with_timezone(&Utc);
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| StoreError::Unavailable(format!("malformed updated_at for {}: {}", id, e)))?
        .with_timezone(&Utc);
    Ok(ShadowUser {
        id,
        identity,
        attributes,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl ShadowStore for SqliteShadowStore {
    async fn upsert(
        &self,
        identity: &Identity,
        attributes: &BTreeMap<String, String>,
    ) -> Result<ShadowUser, StoreError> {
        let db_path = self.db_path.clone();
        let id = identity.shadow_id();
        let identity_json = serde_json::to_string(identity)
            .map_err(|e| StoreError::Unavailable(format!("serializing identity: {}", e)))?;
        let attributes_json = serde_json::to_string(attributes)
            .map_err(|e| StoreError::Unavailable(format!("serializing attributes: {}", e)))?;
        let now = timestamp(Utc::now());

        task::spawn_blocking(move || -> Result<ShadowUser, StoreError> {
            let conn = open_connection(&db_path)?;

            conn.execute(
                r#"
                INSERT INTO shadow_users(id, identity_json, attributes, created_at, updated_at)
                VALUES(?1, ?2, ?3, ?4, ?4)
                ON CONFLICT(id)
                DO UPDATE SET
                    identity_json = excluded.identity_json,
                    attributes = json_patch(shadow_users.attributes, excluded.attributes),
                    updated_at = MAX(shadow_users.updated_at, excluded.updated_at)
                "#,
                params![id, identity_json, attributes_json, now],
            )
            .map_err(|e| StoreError::Unavailable(format!("upserting {}: {}", id, e)))?;

            let row = conn
                .query_row(
                    r#"SELECT id, identity_json, attributes, created_at, updated_at
                       FROM shadow_users WHERE id = ?1"#,
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .map_err(|e| StoreError::Unavailable(format!("reading back {}: {}", id, e)))?;

            row_to_record(row.0, row.1, row.2, row.3, row.4)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("join error: {}", e)))?
    }

    async fn list(&self) -> Result<Vec<ShadowUser>, StoreError> {
        let db_path = self.db_path.clone();

        task::spawn_blocking(move || -> Result<Vec<ShadowUser>, StoreError> {
            let conn = open_connection(&db_path)?;
            let mut stmt = conn
                .prepare(
                    r#"SELECT id, identity_json, attributes, created_at, updated_at
                       FROM shadow_users"#,
                )
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            let mut out = Vec::new();
            let mut rows = stmt
                .query([])
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            while let Some(row) = rows
                .next()
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
            {
                let id: String = row
                    .get(0)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                let parsed = row_to_record(
                    id.clone(),
                    row.get(1).map_err(|e| StoreError::Unavailable(e.to_string()))?,
                    row.get(2).map_err(|e| StoreError::Unavailable(e.to_string()))?,
                    row.get(3).map_err(|e| StoreError::Unavailable(e.to_string()))?,
                    row.get(4).map_err(|e| StoreError::Unavailable(e.to_string()))?,
                );
                match parsed {
                    Ok(record) => out.push(record),
                    Err(e) => tracing::warn!(error = %e, "skipping malformed shadow row {}", id),
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("join error: {}", e)))?
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = open_connection(&db_path)?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .optional()
                .map_err(|e| StoreError::Unavailable(format!("health probe: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("join error: {}", e)))?
    }

    async fn close(&self) -> Result<(), StoreError> {
        // Connections are per-operation; nothing is held open.
        Ok(())
    }
}
