//! Filesystem-backed cache store.
//!
//! Each entry is a payload file plus a JSON metadata sidecar under the
//! configured cache directory, laid out by endpoint so entries for one
//! endpoint can be cleared together. Writes go to a temporary file first and
//! are renamed into place after an fsync, so an entry is either completely
//! present or absent: readers in other processes never observe a partial
//! write, and a cancelled fetch leaves nothing behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::key::{CacheKey, content_hash};
use super::store::{CacheEntry, CacheStore, StoreInfo};
use crate::error::{DataError, Result};

const META_EXT: &str = "json";
const PAYLOAD_EXT: &str = "bin";

/// JSON sidecar written next to each payload file.
#[derive(Debug, Serialize, Deserialize)]
struct MetaRecord {
    key: CacheKey,
    schema_version: u32,
    stored_at: DateTime<Utc>,
    content_hash: String,
    payload_len: u64,
}

/// Durable cache store rooted at a directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (and create if necessary) a cache store at `root`.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| DataError::store_error(root.clone(), e))?;
        info!(path = %root.display(), "opened cache store");
        Ok(FsStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_paths(&self, key: &CacheKey) -> (PathBuf, PathBuf) {
        let rel = sanitize_key(key.as_str());
        let base = self.root.join(rel);
        (base.with_extension(PAYLOAD_EXT), base.with_extension(META_EXT))
    }

    async fn write_durable(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let err = |e| DataError::store_error(path.to_path_buf(), e);

        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        let mut file = tokio::fs::File::create(&tmp).await.map_err(err)?;
        tokio::io::AsyncWriteExt::write_all(&mut file, bytes).await.map_err(err)?;
        file.sync_all().await.map_err(err)?;
        drop(file);
        tokio::fs::rename(&tmp, path).await.map_err(err)
    }
}

#[async_trait]
impl CacheStore for FsStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let (payload_path, meta_path) = self.entry_paths(key);

        let meta_bytes = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DataError::store_error(meta_path, e)),
        };

        // Tolerant load: anything unreadable is a miss and gets refetched.
        let meta: MetaRecord = match serde_json::from_slice(&meta_bytes) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(key = %key, error = %e, "unreadable cache metadata, treating as miss");
                return Ok(None);
            }
        };
        if &meta.key != key {
            warn!(key = %key, "cache metadata names a different key, treating as miss");
            return Ok(None);
        }

        let payload = match tokio::fs::read(&payload_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(key = %key, "cache payload missing, treating as miss");
                return Ok(None);
            }
            Err(e) => return Err(DataError::store_error(payload_path, e)),
        };
        if content_hash(&payload) != meta.content_hash {
            warn!(key = %key, "cache payload failed content hash verification, treating as miss");
            return Ok(None);
        }

        debug!(key = %key, bytes = payload.len(), "cache hit");
        Ok(Some(CacheEntry {
            key: meta.key,
            payload,
            schema_version: meta.schema_version,
            stored_at: meta.stored_at,
            content_hash: meta.content_hash,
        }))
    }

    async fn put(
        &self,
        key: &CacheKey,
        payload: Vec<u8>,
        schema_version: u32,
    ) -> Result<CacheEntry> {
        let (payload_path, meta_path) = self.entry_paths(key);
        if let Some(parent) = payload_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DataError::store_error(parent.to_path_buf(), e))?;
        }

        let entry = CacheEntry::new(key.clone(), payload, schema_version);
        let meta = MetaRecord {
            key: entry.key.clone(),
            schema_version: entry.schema_version,
            stored_at: entry.stored_at,
            content_hash: entry.content_hash.clone(),
            payload_len: entry.payload.len() as u64,
        };
        let meta_bytes = serde_json::to_vec(&meta)
            .map_err(|e| DataError::parse("cache metadata", e.to_string()))?;

        // Payload first, metadata last: the sidecar's presence marks a
        // complete entry.
        self.write_durable(&payload_path, &entry.payload).await?;
        self.write_durable(&meta_path, &meta_bytes).await?;

        debug!(key = %key, bytes = entry.payload.len(), "cache entry written");
        Ok(entry)
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<usize> {
        let root = match prefix {
            Some(prefix) => self.root.join(sanitize_key(prefix)),
            None => self.root.clone(),
        };
        if !root.exists() {
            return Ok(0);
        }

        let mut removed = 0usize;
        for (payload_path, meta_path) in collect_entries(&root).await? {
            tokio::fs::remove_file(&meta_path)
                .await
                .map_err(|e| DataError::store_error(meta_path, e))?;
            // Payload may already be gone; metadata removal is what counts.
            let _ = tokio::fs::remove_file(&payload_path).await;
            removed += 1;
        }
        info!(removed, prefix = prefix.unwrap_or("<all>"), "cleared cache entries");
        Ok(removed)
    }

    async fn info(&self) -> Result<StoreInfo> {
        let mut size_bytes = 0u64;
        let mut entry_count = 0usize;
        for (payload_path, meta_path) in collect_entries(&self.root).await? {
            entry_count += 1;
            for path in [payload_path, meta_path] {
                if let Ok(metadata) = tokio::fs::metadata(&path).await {
                    size_bytes += metadata.len();
                }
            }
        }
        Ok(StoreInfo {
            location: self.root.display().to_string(),
            size_bytes,
            entry_count,
        })
    }
}

/// Map a cache key to a relative filesystem path.
///
/// Keys are slash-separated; every other character outside a conservative
/// set is replaced, and dot-only segments are neutralized so keys cannot
/// escape the cache root.
fn sanitize_key(key: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for segment in key.split('/').filter(|s| !s.is_empty()) {
        if segment.chars().all(|c| c == '.') {
            path.push("_");
            continue;
        }
        let clean: String = segment
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
            .collect();
        path.push(clean);
    }
    path
}

/// Recursively collect `(payload, metadata)` path pairs below `root`.
async fn collect_entries(root: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut pending = vec![root.to_path_buf()];
    let mut entries = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| DataError::store_error(dir.clone(), e))?;
        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| DataError::store_error(dir.clone(), e))?
        {
            let path = item.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == META_EXT) {
                entries.push((path.with_extension(PAYLOAD_EXT), path));
            }
        }
    }
    Ok(entries)
}
