use crate::config::ConfigError;

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The monitored file exists but could not be opened or read
    #[error("I/O error: {0}")]
    Io(String),
    /// Cache or position storage failure
    #[error("Storage error: {0}")]
    Storage(String),
    /// Outbound call to the messaging API failed before a response was parsed
    #[error("Transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AppError {
    /// Short machine-readable code, used in structured log fields
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO",
            AppError::Storage(_) => "STORAGE",
            AppError::Transport(_) => "TRANSPORT",
            AppError::Config(_) => "CONFIG",
        }
    }
}

/// Convenience constructors
impl AppError {
    pub fn io(msg: impl Into<String>) -> Self {
        AppError::Io(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        AppError::Storage(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        AppError::Transport(msg.into())
    }
}
