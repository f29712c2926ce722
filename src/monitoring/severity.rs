//! Log severity vocabulary shared by the parser, notifier and embedded handler

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Glyph used for level names outside the known vocabulary
pub const DEFAULT_GLYPH: &str = "🚨";

/// Severity levels, lowest first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Notice,
    Warning,
    #[default]
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    /// Upper-case name as it appears in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Alert => "ALERT",
            Severity::Emergency => "EMERGENCY",
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Severity::Emergency => "🆘",
            Severity::Alert => "🔔",
            Severity::Critical => "🔴",
            Severity::Error => "🚨",
            Severity::Warning => "⚠️",
            Severity::Notice => "📝",
            Severity::Info => "ℹ️",
            Severity::Debug => "🔍",
        }
    }

    /// Glyph for an arbitrary level string, falling back to [`DEFAULT_GLYPH`]
    pub fn glyph_for(level: &str) -> &'static str {
        level
            .parse::<Severity>()
            .map(|s| s.glyph())
            .unwrap_or(DEFAULT_GLYPH)
    }

    /// Maps a `tracing` level onto the vocabulary.
    /// `tracing` has no notice/critical/alert/emergency, so TRACE folds into DEBUG.
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Severity::Error,
            tracing::Level::WARN => Severity::Warning,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::DEBUG | tracing::Level::TRACE => Severity::Debug,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "NOTICE" => Ok(Severity::Notice),
            "WARNING" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            "ALERT" => Ok(Severity::Alert),
            "EMERGENCY" => Ok(Severity::Emergency),
            other => Err(format!("invalid log level: {}", other)),
        }
    }
}
