//! Read-progress tracking for a monitored log file
//!
//! Stores the byte offset already processed together with the file's inode,
//! so truncation and replacement by log rotation can be detected before a
//! stale offset is trusted.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::store::{digest, CacheStore};
use crate::utils::AppError;

/// Result type for position operations
pub type PositionResult<T> = Result<T, AppError>;

const CACHE_KEY_PREFIX: &str = "telegram_log_monitor_position_";

/// Last committed read progress for one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Bytes already processed
    pub position: u64,
    /// Inode at commit time; `None` where the platform has no inodes
    pub inode: Option<u64>,
}

/// Which backend holds position records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionStorage {
    /// Keyed entry in the cache store
    #[default]
    Cache,
    /// Single JSON file on durable storage
    File,
}

impl FromStr for PositionStorage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cache" => Ok(PositionStorage::Cache),
            "file" => Ok(PositionStorage::File),
            other => Err(format!("unknown position storage: {}", other)),
        }
    }
}

/// Storage policy for position records, keyed by the monitored path
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn load(&self, log_path: &Path) -> PositionResult<Option<PositionRecord>>;

    /// Overwrite the record for `log_path`
    async fn save(&self, log_path: &Path, record: PositionRecord) -> PositionResult<()>;

    /// Return the record for `log_path` to the zero default
    async fn clear(&self, log_path: &Path) -> PositionResult<()>;
}

/// Position records kept in a [`CacheStore`] without expiry
pub struct CachePositionStore {
    cache: Arc<dyn CacheStore>,
}

impl CachePositionStore {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    fn cache_key(log_path: &Path) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, digest(&log_path.to_string_lossy()))
    }
}

#[async_trait]
impl PositionStore for CachePositionStore {
    async fn load(&self, log_path: &Path) -> PositionResult<Option<PositionRecord>> {
        let value = self.cache.get(&Self::cache_key(log_path)).await?;

        Ok(value.and_then(|v| match serde_json::from_value(v) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Malformed cached position, using default");
                None
            }
        }))
    }

    async fn save(&self, log_path: &Path, record: PositionRecord) -> PositionResult<()> {
        let value = serde_json::to_value(record).map_err(|e| {
            error!(error = %e, "Failed to serialize position");
            AppError::storage(format!("Failed to serialize position: {}", e))
        })?;
        self.cache.put(&Self::cache_key(log_path), value, None).await
    }

    async fn clear(&self, log_path: &Path) -> PositionResult<()> {
        self.cache.forget(&Self::cache_key(log_path)).await?;
        Ok(())
    }
}

/// Position record kept in one fixed JSON file, shared by every monitored path
#[derive(Debug, Clone)]
pub struct FilePositionStore {
    position_file: PathBuf,
}

impl FilePositionStore {
    pub fn new(position_file: impl Into<PathBuf>) -> Self {
        Self {
            position_file: position_file.into(),
        }
    }

    pub fn position_file(&self) -> &Path {
        &self.position_file
    }

    async fn write(&self, record: PositionRecord) -> PositionResult<()> {
        if let Some(parent) = self.position_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    error!(error = %e, dir = %parent.display(), "Failed to create position directory");
                    AppError::storage(format!("Failed to create position directory: {}", e))
                })?;
            }
        }

        let content = serde_json::to_string(&record).map_err(|e| {
            error!(error = %e, "Failed to serialize position");
            AppError::storage(format!("Failed to serialize position: {}", e))
        })?;

        fs::write(&self.position_file, content).await.map_err(|e| {
            error!(error = %e, file = %self.position_file.display(), "Failed to write position file");
            AppError::storage(format!("Failed to write position file: {}", e))
        })
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn load(&self, _log_path: &Path) -> PositionResult<Option<PositionRecord>> {
        let content = match fs::read_to_string(&self.position_file).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                error!(error = %e, file = %self.position_file.display(), "Failed to read position file");
                return Err(AppError::storage(format!("Failed to read position file: {}", e)));
            }
        };

        // Unparseable state silently falls back to the default
        Ok(serde_json::from_str(&content).ok())
    }

    async fn save(&self, _log_path: &Path, record: PositionRecord) -> PositionResult<()> {
        self.write(record).await
    }

    async fn clear(&self, _log_path: &Path) -> PositionResult<()> {
        self.write(PositionRecord::default()).await
    }
}

/// Inode of a file's metadata, where the platform has one
#[cfg(unix)]
pub fn current_inode(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

/// Inode of a file's metadata, where the platform has one
#[cfg(not(unix))]
pub fn current_inode(_metadata: &Metadata) -> Option<u64> {
    None
}

/// Tracks read progress for a single log path
pub struct PositionTracker {
    log_path: PathBuf,
    store: Arc<dyn PositionStore>,
}

impl PositionTracker {
    pub fn new(log_path: impl Into<PathBuf>, store: Arc<dyn PositionStore>) -> Self {
        Self {
            log_path: log_path.into(),
            store,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Last committed record, or `{0, None}` if nothing was committed
    pub async fn get_position(&self) -> PositionResult<PositionRecord> {
        Ok(self.store.load(&self.log_path).await?.unwrap_or_default())
    }

    pub async fn save_position(&self, position: u64, inode: Option<u64>) -> PositionResult<()> {
        self.store
            .save(&self.log_path, PositionRecord { position, inode })
            .await?;
        debug!(path = %self.log_path.display(), position, ?inode, "Saved position");
        Ok(())
    }

    pub async fn reset(&self) -> PositionResult<()> {
        self.store.clear(&self.log_path).await?;
        info!(path = %self.log_path.display(), "Position reset");
        Ok(())
    }

    /// Whether `path` was rotated since the last commit.
    ///
    /// True when the file is missing, smaller than the saved position, or
    /// carries a different inode (only when both inodes are known).
    pub async fn was_rotated(&self, path: &Path) -> PositionResult<bool> {
        let saved = self.get_position().await?;

        let metadata = match fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to stat log file");
                return Err(AppError::io(format!("Failed to stat log file: {}", e)));
            }
        };

        if metadata.len() < saved.position {
            debug!(
                size = metadata.len(),
                saved_position = saved.position,
                "Log file shrank below saved position"
            );
            return Ok(true);
        }

        match (saved.inode, current_inode(&metadata)) {
            (Some(saved_inode), Some(inode)) if saved_inode != inode => {
                debug!(saved_inode, inode, "Log file inode changed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCache;
    use std::env::temp_dir;
    use uuid::Uuid;

    fn test_dir(name: &str) -> PathBuf {
        let dir = temp_dir().join(format!("{}_{}", name, Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("Failed to create test dir");
        dir
    }

    fn cache_tracker(log_path: &Path) -> PositionTracker {
        let store = CachePositionStore::new(Arc::new(MemoryCache::new()));
        PositionTracker::new(log_path, Arc::new(store))
    }

    #[tokio::test]
    async fn should_return_default_when_nothing_saved() {
        // Arrange
        let tracker = cache_tracker(Path::new("/var/log/app.log"));

        // Act
        let record = tracker.get_position().await.unwrap();

        // Assert
        assert_eq!(record, PositionRecord { position: 0, inode: None });
    }

    #[tokio::test]
    async fn should_reset_to_default_in_cache_mode() {
        // Arrange
        let tracker = cache_tracker(Path::new("/var/log/app.log"));
        tracker.save_position(500, Some(42)).await.unwrap();

        // Act
        tracker.reset().await.unwrap();

        // Assert
        assert_eq!(tracker.get_position().await.unwrap(), PositionRecord::default());
    }

    #[tokio::test]
    async fn should_key_cache_records_by_path() {
        // Arrange
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let store: Arc<dyn PositionStore> = Arc::new(CachePositionStore::new(cache));
        let a = PositionTracker::new("/logs/a.log", store.clone());
        let b = PositionTracker::new("/logs/b.log", store);

        // Act
        a.save_position(10, None).await.unwrap();

        // Assert
        assert_eq!(a.get_position().await.unwrap().position, 10);
        assert_eq!(b.get_position().await.unwrap().position, 0);
    }

    #[tokio::test]
    async fn should_persist_to_json_file_and_reset() {
        // Arrange
        let dir = test_dir("test_position_file");
        let position_file = dir.join("nested").join("position.json");
        let store = Arc::new(FilePositionStore::new(&position_file));
        let tracker = PositionTracker::new(dir.join("app.log"), store);

        // Act
        tracker.save_position(128, Some(9)).await.unwrap();
        let written = std::fs::read_to_string(&position_file).unwrap();
        let reopened = PositionTracker::new(
            dir.join("app.log"),
            Arc::new(FilePositionStore::new(&position_file)),
        );

        // Assert
        let json: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(json, serde_json::json!({"position": 128, "inode": 9}));
        assert_eq!(
            reopened.get_position().await.unwrap(),
            PositionRecord { position: 128, inode: Some(9) }
        );

        reopened.reset().await.unwrap();
        assert_eq!(reopened.get_position().await.unwrap(), PositionRecord::default());
    }

    #[tokio::test]
    async fn should_fall_back_to_default_on_malformed_position_file() {
        // Arrange
        let dir = test_dir("test_position_malformed");
        let position_file = dir.join("position.json");
        std::fs::write(&position_file, "{oops").unwrap();
        let tracker =
            PositionTracker::new(dir.join("app.log"), Arc::new(FilePositionStore::new(&position_file)));

        // Act
        let record = tracker.get_position().await.unwrap();

        // Assert
        assert_eq!(record, PositionRecord::default());
    }

    #[tokio::test]
    async fn should_detect_missing_file_as_rotated() {
        let dir = test_dir("test_rotation_missing");
        let log_path = dir.join("absent.log");
        let tracker = cache_tracker(&log_path);
        assert!(tracker.was_rotated(&log_path).await.unwrap());
    }

    #[tokio::test]
    async fn should_detect_truncation_even_when_inode_matches() {
        // Arrange
        let dir = test_dir("test_rotation_truncated");
        let log_path = dir.join("app.log");
        std::fs::write(&log_path, vec![b'x'; 200]).unwrap();
        let inode = current_inode(&std::fs::metadata(&log_path).unwrap());
        let tracker = cache_tracker(&log_path);
        tracker.save_position(500, inode).await.unwrap();

        // Act
        let rotated = tracker.was_rotated(&log_path).await.unwrap();

        // Assert
        assert!(rotated);
    }

    #[tokio::test]
    async fn should_detect_truncation_without_inode_information() {
        // Arrange
        let dir = test_dir("test_rotation_no_inode");
        let log_path = dir.join("app.log");
        std::fs::write(&log_path, "short").unwrap();
        let tracker = cache_tracker(&log_path);
        tracker.save_position(1000, None).await.unwrap();

        // Act & Assert
        assert!(tracker.was_rotated(&log_path).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn should_detect_inode_change_even_when_size_grew() {
        // Arrange
        let dir = test_dir("test_rotation_inode");
        let log_path = dir.join("app.log");
        std::fs::write(&log_path, "a much longer replacement file body").unwrap();
        let inode = current_inode(&std::fs::metadata(&log_path).unwrap()).unwrap();
        let tracker = cache_tracker(&log_path);
        tracker.save_position(3, Some(inode.wrapping_add(1))).await.unwrap();

        // Act & Assert
        assert!(tracker.was_rotated(&log_path).await.unwrap());
    }

    #[tokio::test]
    async fn should_not_report_rotation_for_appended_file() {
        // Arrange
        let dir = test_dir("test_rotation_appended");
        let log_path = dir.join("app.log");
        std::fs::write(&log_path, "0123456789").unwrap();
        let inode = current_inode(&std::fs::metadata(&log_path).unwrap());
        let tracker = cache_tracker(&log_path);
        tracker.save_position(4, inode).await.unwrap();

        // Act & Assert
        assert!(!tracker.was_rotated(&log_path).await.unwrap());
    }

    #[test]
    fn should_parse_position_storage_mode() {
        assert_eq!("cache".parse(), Ok(PositionStorage::Cache));
        assert_eq!("FILE".parse(), Ok(PositionStorage::File));
        assert!("redis".parse::<PositionStorage>().is_err());
    }
}
