//! Directory-backed cache
//!
//! Layout:
//! ```text
//! cache_dir/
//! └── <sha256(key)>.json   # {"key": ..., "value": ..., "expiresAt": <unix millis|null>}
//! ```
//!
//! Expired entries are removed on read and swept from the whole directory
//! after every write. An unreadable or corrupted entry reads as absent, so
//! wiping the directory is always safe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, error, warn};

use super::{digest, CacheStore, StoreResult};
use crate::utils::AppError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    key: String,
    value: serde_json::Value,
    expires_at: Option<i64>,
}

impl StoredEntry {
    fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at.is_some_and(|exp| now_millis >= exp)
    }
}

/// Cache persisted as one JSON file per key
#[derive(Debug, Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
}

impl FileCache {
    /// Create a cache rooted at `cache_dir`; the directory is created on first write
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", digest(key)))
    }

    /// Entry stored at `path`; missing or corrupted files read as `None`
    async fn read_entry(&self, path: &Path) -> StoreResult<Option<StoredEntry>> {
        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to read cache entry");
                return Err(AppError::storage(format!("Failed to read cache entry: {}", e)));
            }
        };

        match serde_json::from_str(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Corrupted cache entry, treating as absent");
                Ok(None)
            }
        }
    }

    /// Re-read `path` and delete it only if the entry on disk is still expired,
    /// so an entry rewritten since the caller's read survives
    async fn remove_if_expired(&self, path: &Path) -> StoreResult<bool> {
        match self.read_entry(path).await? {
            Some(entry) if entry.is_expired(Utc::now().timestamp_millis()) => {
                self.remove_entry(path).await
            }
            _ => Ok(false),
        }
    }

    /// Delete every expired entry in the cache directory; returns how many
    pub async fn prune_expired(&self) -> StoreResult<usize> {
        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                error!(error = %e, dir = %self.cache_dir.display(), "Failed to list cache directory");
                return Err(AppError::storage(format!("Failed to list cache directory: {}", e)));
            }
        };

        let mut removed = 0;
        while let Some(item) = dir.next_entry().await.map_err(|e| {
            error!(error = %e, dir = %self.cache_dir.display(), "Failed to list cache directory");
            AppError::storage(format!("Failed to list cache directory: {}", e))
        })? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if self.remove_if_expired(&path).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Pruned expired cache entries");
        }
        Ok(removed)
    }

    async fn remove_entry(&self, path: &Path) -> StoreResult<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to remove cache entry");
                Err(AppError::storage(format!("Failed to remove cache entry: {}", e)))
            }
        }
    }
}

#[async_trait]
impl CacheStore for FileCache {
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let path = self.entry_path(key);

        let Some(entry) = self.read_entry(&path).await? else {
            return Ok(None);
        };

        if entry.is_expired(Utc::now().timestamp_millis()) {
            debug!(key = %key, "Cache entry expired");
            self.remove_if_expired(&path).await?;
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        fs::create_dir_all(&self.cache_dir).await.map_err(|e| {
            error!(error = %e, dir = %self.cache_dir.display(), "Failed to create cache directory");
            AppError::storage(format!("Failed to create cache directory: {}", e))
        })?;

        let expires_at = ttl.map(|d| {
            let millis = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
            Utc::now().timestamp_millis().saturating_add(millis)
        });

        let entry = StoredEntry {
            key: key.to_string(),
            value,
            expires_at,
        };

        let content = serde_json::to_string(&entry).map_err(|e| {
            error!(error = %e, "Failed to serialize cache entry");
            AppError::storage(format!("Failed to serialize cache entry: {}", e))
        })?;

        // Entries are replaced atomically via rename
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await.map_err(|e| {
            error!(error = %e, path = %tmp_path.display(), "Failed to write cache entry");
            AppError::storage(format!("Failed to write cache entry: {}", e))
        })?;
        fs::rename(&tmp_path, &path).await.map_err(|e| {
            error!(error = %e, path = %path.display(), "Failed to move cache entry into place");
            AppError::storage(format!("Failed to move cache entry into place: {}", e))
        })?;

        debug!(key = %key, ttl_secs = ?ttl.map(|d| d.as_secs()), "Cache entry stored");

        if let Err(e) = self.prune_expired().await {
            warn!(error = %e, "Failed to prune expired cache entries");
        }
        Ok(())
    }

    async fn forget(&self, key: &str) -> StoreResult<bool> {
        self.remove_entry(&self.entry_path(key)).await
    }
}
