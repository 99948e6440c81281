//! In-memory shadow store.
//!
//! Upserts take the writer half of a read-write lock, which serializes
//! mutations per key (and across keys, which is acceptable at this store's
//! scale). Lists take a reader and return a snapshot.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::assertion::Identity;
use crate::shadow::{ShadowStore, ShadowUser, StoreError};

#[derive(Debug, Default)]
pub struct MemoryShadowStore {
    records: RwLock<HashMap<String, ShadowUser>>,
}

#[async_trait]
impl ShadowStore for MemoryShadowStore {
    async fn upsert(
        &self,
        identity: &Identity,
        attributes: &BTreeMap<String, String>,
    ) -> Result<ShadowUser, StoreError> {
        let now = chrono::Utc::now();
        let mut records = self.records.write().await;
        let record = records
            .entry(identity.shadow_id())
            .and_modify(|existing| existing.merge(identity.clone(), attributes, now))
            .or_insert_with(|| ShadowUser::new(identity.clone(), attributes.clone(), now));
        Ok(record.clone())
    }

    async fn list(&self) -> Result<Vec<ShadowUser>, StoreError> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn identity(subject: &str) -> Identity {
        Identity {
            provider: "gitlab".into(),
            subject: subject.into(),
            email: format!("{subject}@example.com"),
            name: "Ada Lovelace".into(),
            user: String::new(),
            groups: vec!["eng".into()],
        }
    }

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn upsert_merges_attributes_without_dropping_keys() {
        let store = MemoryShadowStore::default();
        let id = identity("u-1");

        let first = store
            .upsert(&id, &attrs(&[("a", "1"), ("b", "2")]))
            .await
            .unwrap();
        let second = store
            .upsert(&id, &attrs(&[("b", "changed"), ("c", "3")]))
            .await
            .unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.attributes.get("a").unwrap(), "1");
        assert_eq!(second.attributes.get("b").unwrap(), "changed");
        assert_eq!(second.attributes.get("c").unwrap(), "3");
    }

    #[tokio::test]
    async fn concurrent_upserts_yield_one_record() {
        let store = Arc::new(MemoryShadowStore::default());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("k{i}");
                store
                    .upsert(&identity("u-1"), &attrs(&[(key.as_str(), "v")]))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        // Every concurrent writer's attribute landed in the single record.
        assert_eq!(all[0].attributes.len(), 16);
    }
}
