use std::env;
use std::path::PathBuf;

use chrono_tz::Tz;

use crate::monitoring::log_parser::parse_levels;
use crate::monitoring::position_tracker::PositionStorage;
use crate::monitoring::Severity;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_MONITOR_LEVELS: &str = "ERROR,CRITICAL,ALERT,EMERGENCY";

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Telegram
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,

    // Message labels and gating
    pub project_name: String,
    pub environment: String,
    pub notify_environments: Vec<String>,
    /// Seconds between identical messages; 0 disables throttling
    pub throttle_secs: u64,
    pub timezone: Tz,

    // Embedded handler
    pub min_level: Severity,

    // Monitor
    pub log_path: PathBuf,
    pub monitor_levels: Vec<String>,
    pub position_storage: PositionStorage,
    pub storage_dir: PathBuf,
}

impl AppConfig {
    /// Load settings from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary lookup, e.g. a map in tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bot_token = get("TELEGRAM_LOGGER_BOT_TOKEN").unwrap_or_default();
        let chat_id = get("TELEGRAM_LOGGER_CHAT_ID").unwrap_or_default();
        if bot_token.is_empty() || chat_id.is_empty() {
            tracing::warn!(
                "TELEGRAM_LOGGER_BOT_TOKEN or TELEGRAM_LOGGER_CHAT_ID is not set; notifications will be skipped"
            );
        }

        let api_base = get("TELEGRAM_LOGGER_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let project_name = get("TELEGRAM_LOGGER_PROJECT_NAME")
            .or_else(|| get("APP_NAME"))
            .unwrap_or_else(|| "app".to_string());

        let environment = get("TELEGRAM_LOGGER_ENVIRONMENT")
            .or_else(|| get("APP_ENV"))
            .unwrap_or_else(|| "production".to_string());

        let notify_environments = get("TELEGRAM_LOGGER_NOTIFY_ENVIRONMENTS")
            .unwrap_or_else(|| "production,staging".to_string())
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        let throttle_secs = match get("TELEGRAM_LOGGER_THROTTLE") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidThrottle(v))?,
            None => 60,
        };

        let timezone = match get("TELEGRAM_LOGGER_TIMEZONE") {
            Some(v) => v
                .trim()
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone(v))?,
            None => Tz::UTC,
        };

        let min_level = match get("TELEGRAM_LOGGER_LEVEL") {
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidLevel(v))?,
            None => Severity::Error,
        };

        let log_path = PathBuf::from(
            get("TELEGRAM_LOGGER_LOG_PATH").unwrap_or_else(|| "storage/logs/app.log".to_string()),
        );

        let monitor_levels_raw = get("TELEGRAM_LOGGER_MONITOR_LEVELS")
            .unwrap_or_else(|| DEFAULT_MONITOR_LEVELS.to_string());
        let monitor_levels = parse_levels(&monitor_levels_raw);
        if monitor_levels.is_empty() {
            return Err(ConfigError::InvalidLevel(monitor_levels_raw));
        }

        let position_storage = match get("TELEGRAM_LOGGER_POSITION_STORAGE") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidPositionStorage(v))?,
            None => PositionStorage::Cache,
        };

        let storage_dir = PathBuf::from(
            get("TELEGRAM_LOGGER_STORAGE_DIR").unwrap_or_else(|| "storage".to_string()),
        );

        Ok(Self {
            bot_token,
            chat_id,
            api_base,
            project_name,
            environment,
            notify_environments,
            throttle_secs,
            timezone,
            min_level,
            log_path,
            monitor_levels,
            position_storage,
            storage_dir,
        })
    }

    /// Directory used by the file-backed cache
    pub fn cache_dir(&self) -> PathBuf {
        self.storage_dir.join("cache")
    }

    /// Fixed JSON file used when `position_storage = file`
    pub fn position_file(&self) -> PathBuf {
        self.storage_dir.join("log-notifier-position.json")
    }

    /// Local trace written by the embedded handler when a send fails
    pub fn fallback_log_path(&self) -> PathBuf {
        self.storage_dir.join("logs").join("telegram-logger-errors.log")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid throttle value: {0}")]
    InvalidThrottle(String),
    #[error("Invalid time zone: {0}")]
    InvalidTimezone(String),
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Invalid position storage (expected 'cache' or 'file'): {0}")]
    InvalidPositionStorage(String),
}
