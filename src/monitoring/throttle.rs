//! Time-windowed suppression of repeated messages
//!
//! The key is a digest of the message text alone: identical text at a
//! different level, time or environment collides. The check and the marker
//! write are two separate store calls, so concurrent senders of the same text
//! can both pass the check.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::store::{digest, CacheStore};

const THROTTLE_KEY_PREFIX: &str = "telegram_logger_";

pub struct Throttle {
    store: Arc<dyn CacheStore>,
    window_secs: u64,
}

impl Throttle {
    pub fn new(store: Arc<dyn CacheStore>, window_secs: u64) -> Self {
        Self { store, window_secs }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn is_enabled(&self) -> bool {
        self.window_secs > 0
    }

    pub fn key_for(message: &str) -> String {
        format!("{}{}", THROTTLE_KEY_PREFIX, digest(message))
    }

    /// Returns true when `message` was attempted within the window.
    /// Otherwise records a marker for it and returns false.
    ///
    /// Store failures fail open: the message is treated as not throttled.
    pub async fn check_and_mark(&self, message: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let key = Self::key_for(message);

        match self.store.has(&key).await {
            Ok(true) => {
                debug!(key = %key, "Message throttled");
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Throttle lookup failed, sending anyway");
                return false;
            }
        }

        let ttl = Some(Duration::from_secs(self.window_secs));
        if let Err(e) = self.store.put(&key, serde_json::Value::Bool(true), ttl).await {
            warn!(error = %e, "Failed to record throttle marker");
        }

        false
    }
}
