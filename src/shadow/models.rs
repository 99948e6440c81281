//! Shadow store data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::assertion::Identity;

/// The canonical local record of an external identity.
///
/// Keyed by `"<provider>::<subject>"`. Created on first upsert and mutated
/// by later upserts; never deleted by this service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowUser {
    /// Opaque stable key, `"<provider>::<subject>"`.
    pub id: String,
    /// Snapshot of the most recently verified identity.
    pub identity: Identity,
    /// Free-form attributes merged across upserts.
    pub attributes: BTreeMap<String, String>,
    /// Set on first insert, never rewritten.
    pub created_at: DateTime<Utc>,
    /// Advances on every upsert, monotonically non-decreasing.
    pub updated_at: DateTime<Utc>,
}

impl ShadowUser {
    /// Builds a fresh record for an identity at the given instant.
    pub fn new(identity: Identity, attributes: BTreeMap<String, String>, now: DateTime<Utc>) -> Self {
        Self {
            id: identity.shadow_id(),
            identity,
            attributes,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an upsert to an existing record.
    ///
    /// New attribute keys are added, provided keys overwrite, unprovided
    /// keys are retained. `created_at` is untouched; `updated_at` never
    /// moves backwards.
    pub fn merge(&mut self, identity: Identity, attributes: &BTreeMap<String, String>, now: DateTime<Utc>) {
        self.identity = identity;
        for (k, v) in attributes {
            self.attributes.insert(k.clone(), v.clone());
        }
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}
