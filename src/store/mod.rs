//! Key-value cache capability backing throttle markers and cached positions
//!
//! - `MemoryCache`: process-local, used in tests and embedded setups
//! - `FileCache`: one JSON file per key under a directory; survives restarts
//!   but may be wiped by an operator at any time

pub mod file_cache;
pub mod memory;

use crate::utils::AppError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

pub use file_cache::FileCache;
pub use memory::MemoryCache;

/// Result type for cache operations
pub type StoreResult<T> = Result<T, AppError>;

/// Cache capability with optional per-key expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a live value; expired entries read as absent
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>>;

    /// Store a value; `ttl = None` keeps it until explicitly forgotten
    async fn put(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>)
        -> StoreResult<()>;

    /// Whether a live value exists for `key`
    async fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove `key`, returning whether anything was removed
    async fn forget(&self, key: &str) -> StoreResult<bool>;
}

/// Hex-encoded SHA-256 of `input`, used to build fixed-width cache keys
pub fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}
