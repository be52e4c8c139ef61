//! Pluggable cache storage backends.
//!
//! The rest of the crate only sees the [`CacheStore`] trait: point lookup,
//! point write, prefix-based bulk clear and a size/location query for
//! diagnostics. Writes must be durable before `put` returns so that a
//! subsequent process invocation sees the entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;
use tracing::warn;

use super::key::{CacheKey, content_hash};
use crate::error::Result;

/// One stored response payload plus metadata.
///
/// Immutable once written. A write with a different schema version replaces
/// (never merges with) the prior entry for the same logical request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Vec<u8>,
    pub schema_version: u32,
    pub stored_at: DateTime<Utc>,
    pub content_hash: String,
}

impl CacheEntry {
    pub(crate) fn new(key: CacheKey, payload: Vec<u8>, schema_version: u32) -> Self {
        let content_hash = content_hash(&payload);
        CacheEntry { key, payload, schema_version, stored_at: Utc::now(), content_hash }
    }

    /// Whether the stored payload still matches its recorded content hash.
    pub fn verify(&self) -> bool {
        content_hash(&self.payload) == self.content_hash
    }
}

/// Diagnostics about a store's location and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub location: String,
    pub size_bytes: u64,
    pub entry_count: usize,
}

impl fmt::Display for StoreInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache ({} entries, {} bytes) {}",
            self.entry_count, self.size_bytes, self.location
        )
    }
}

/// Storage backend for cached responses.
///
/// Implementations may use internal locking but must not expose blocking
/// semantics beyond brief mutual exclusion; the fetcher treats lookups and
/// writes as fast operations.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Point lookup. Corrupt or unverifiable entries are reported as a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Durable point write. The returned entry is exactly what a subsequent
    /// `get` will observe.
    async fn put(&self, key: &CacheKey, payload: Vec<u8>, schema_version: u32)
    -> Result<CacheEntry>;

    /// Remove entries whose key starts with `prefix`, or all entries when
    /// `prefix` is `None`. Returns the number of entries removed.
    async fn clear(&self, prefix: Option<&str>) -> Result<usize>;

    /// Location and size diagnostics.
    async fn info(&self) -> Result<StoreInfo>;
}

/// In-memory store for tests and fully offline unit use.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entries = self.entries.lock().await;
        match entries.get(key.as_str()) {
            Some(entry) if entry.verify() => Ok(Some(entry.clone())),
            Some(_) => {
                warn!(key = %key, "cache entry failed content hash verification, treating as miss");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &CacheKey,
        payload: Vec<u8>,
        schema_version: u32,
    ) -> Result<CacheEntry> {
        let entry = CacheEntry::new(key.clone(), payload, schema_version);
        let mut entries = self.entries.lock().await;
        entries.insert(key.as_str().to_string(), entry.clone());
        Ok(entry)
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        match prefix {
            Some(prefix) => entries.retain(|key, _| !key.starts_with(prefix)),
            None => entries.clear(),
        }
        Ok(before - entries.len())
    }

    async fn info(&self) -> Result<StoreInfo> {
        let entries = self.entries.lock().await;
        let size_bytes = entries.values().map(|e| e.payload.len() as u64).sum();
        Ok(StoreInfo {
            location: "<memory>".to_string(),
            size_bytes,
            entry_count: entries.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::RequestDescriptor;

    fn key(endpoint: &str, version: u32) -> CacheKey {
        CacheKey::derive(&RequestDescriptor::new(endpoint), version)
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = MemoryStore::new();
        let k = key("car_data", 3);

        let written = store.put(&k, b"payload".to_vec(), 3).await.unwrap();
        let read = store.get(&k).await.unwrap().expect("entry should exist");

        assert_eq!(read.payload, b"payload");
        assert_eq!(read.schema_version, 3);
        assert_eq!(read.content_hash, written.content_hash);
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let store = MemoryStore::new();
        assert!(store.get(&key("pos_data", 1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn version_bump_makes_old_entry_unreachable() {
        let store = MemoryStore::new();
        let desc = RequestDescriptor::new("timing_data");

        let old = CacheKey::derive(&desc, 1);
        store.put(&old, b"old".to_vec(), 1).await.unwrap();

        let new = CacheKey::derive(&desc, 2);
        assert!(store.get(&new).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_by_prefix() {
        let store = MemoryStore::new();
        store.put(&key("car_data/2020", 1), b"a".to_vec(), 1).await.unwrap();
        store.put(&key("car_data/2021", 1), b"b".to_vec(), 1).await.unwrap();
        store.put(&key("pos_data/2020", 1), b"c".to_vec(), 1).await.unwrap();

        let removed = store.clear(Some("car_data")).await.unwrap();
        assert_eq!(removed, 2);

        let info = store.info().await.unwrap();
        assert_eq!(info.entry_count, 1);
        assert_eq!(info.to_string(), "cache (1 entries, 1 bytes) <memory>");
    }

    #[tokio::test]
    async fn clear_all() {
        let store = MemoryStore::new();
        store.put(&key("a", 1), b"a".to_vec(), 1).await.unwrap();
        store.put(&key("b", 1), b"b".to_vec(), 1).await.unwrap();

        assert_eq!(store.clear(None).await.unwrap(), 2);
        assert_eq!(store.info().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn corrupt_entry_reads_as_miss() {
        let store = MemoryStore::new();
        let k = key("weather_data", 1);
        store.put(&k, b"good".to_vec(), 1).await.unwrap();

        // Corrupt the stored payload behind the store's back.
        {
            let mut entries = store.entries.lock().await;
            entries.get_mut(k.as_str()).unwrap().payload = b"tampered".to_vec();
        }

        assert!(store.get(&k).await.unwrap().is_none());
    }
}
