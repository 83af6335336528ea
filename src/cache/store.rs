//! Manifest cache storage

use super::{FailureRecord, Fingerprint};
use crate::error::RepoServeResult;
use crate::render::ManifestSet;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// What a fingerprint maps to: a result or a failure record, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CacheEntry {
    Manifests(ManifestSet),
    Failure(FailureRecord),
}

/// Pluggable cache backend
#[async_trait]
pub trait ManifestCache: Send + Sync {
    async fn get(&self, key: &Fingerprint) -> RepoServeResult<Option<CacheEntry>>;

    /// Store `entry`, replacing whatever the key held
    async fn set(&self, key: &Fingerprint, entry: CacheEntry) -> RepoServeResult<()>;

    async fn delete(&self, key: &Fingerprint) -> RepoServeResult<()>;
}

/// Process-local cache holding serialized entries
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<Fingerprint, Vec<u8>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialized bytes stored under `key`
    pub fn raw(&self, key: &Fingerprint) -> Option<Vec<u8>> {
        self.entries.get(key).map(|bytes| bytes.value().clone())
    }
}

#[async_trait]
impl ManifestCache for InMemoryCache {
    async fn get(&self, key: &Fingerprint) -> RepoServeResult<Option<CacheEntry>> {
        let Some(bytes) = self.raw(key) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn set(&self, key: &Fingerprint, entry: CacheEntry) -> RepoServeResult<()> {
        let bytes = serde_json::to_vec(&entry)?;
        self.entries.insert(key.clone(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &Fingerprint) -> RepoServeResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}
