//! Structured log parser
//!
//! Recognizes lines of the form
//! `[YYYY-MM-DD HH:MM:SS] environment.LEVEL: message` and folds any
//! following non-matching lines into the open entry's stack trace.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static LOG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\] (\w+)\.(\w+): (.*)$")
        .expect("log pattern is a valid regex")
});

/// One alert-worthy log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp exactly as written in the log line
    pub timestamp: String,
    /// Environment tag (e.g. "production")
    pub environment: String,
    /// Upper-cased level name
    pub level: String,
    /// First line of the entry
    pub message: String,
    /// Trailing continuation lines, trimmed; empty if none
    pub stacktrace: String,
}

impl LogEntry {
    /// Message with the stack trace appended on a new line when present
    pub fn full_message(&self) -> String {
        if self.stacktrace.is_empty() {
            self.message.clone()
        } else {
            format!("{}\n{}", self.message, self.stacktrace)
        }
    }
}

/// Stateless parser; every call is a pure function of its inputs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogParser;

impl LogParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse `content` into entries whose level is in `levels` (case-insensitive).
    ///
    /// A structured line always closes the open entry. It opens a new one only
    /// when its level is wanted; otherwise continuation lines up to the next
    /// structured line are discarded. Blank lines never close an entry and are
    /// never appended to its stack trace.
    pub fn parse<S: AsRef<str>>(&self, content: &str, levels: &[S]) -> Vec<LogEntry> {
        let wanted: HashSet<String> = levels
            .iter()
            .map(|l| l.as_ref().trim().to_uppercase())
            .collect();

        let mut entries = Vec::new();
        let mut current: Option<LogEntry> = None;

        for raw_line in content.split('\n') {
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

            if let Some(parsed) = Self::match_line(line) {
                if let Some(entry) = current.take() {
                    entries.push(Self::finish(entry));
                }

                if wanted.contains(&parsed.level) {
                    current = Some(parsed);
                }
            } else if let Some(entry) = current.as_mut() {
                if !line.trim().is_empty() {
                    entry.stacktrace.push_str(line);
                    entry.stacktrace.push('\n');
                }
            }
        }

        if let Some(entry) = current.take() {
            entries.push(Self::finish(entry));
        }

        entries
    }

    /// Whether `line` starts a new structured entry
    pub fn is_log_entry_start(&self, line: &str) -> bool {
        LOG_PATTERN.is_match(line.strip_suffix('\r').unwrap_or(line))
    }

    /// Parse a single structured line, ignoring any level filter
    pub fn parse_line(&self, line: &str) -> Option<LogEntry> {
        Self::match_line(line.strip_suffix('\r').unwrap_or(line))
    }

    fn match_line(line: &str) -> Option<LogEntry> {
        let caps = LOG_PATTERN.captures(line)?;

        Some(LogEntry {
            timestamp: caps[1].to_string(),
            environment: caps[2].to_string(),
            level: caps[3].to_uppercase(),
            message: caps[4].to_string(),
            stacktrace: String::new(),
        })
    }

    fn finish(mut entry: LogEntry) -> LogEntry {
        entry.stacktrace = entry.stacktrace.trim().to_string();
        entry
    }
}

/// Split a comma-separated level list, e.g. `"error, Critical"` -> `["ERROR", "CRITICAL"]`
pub fn parse_levels(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(|l| l.trim().to_uppercase())
        .filter(|l| !l.is_empty())
        .collect()
}
