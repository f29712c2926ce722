//! Log monitor
//!
//! One `run` reads the bytes appended since the last committed position,
//! dispatches the matching entries and commits the size observed before the
//! read. Only file access failures abort a run; every dispatch outcome is
//! reported per entry.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{debug, error, info, warn};

use crate::monitoring::log_parser::{LogEntry, LogParser};
use crate::monitoring::notifier::{Context, SendOutcome, SkipReason, TelegramNotifier};
use crate::monitoring::position_tracker::{current_inode, PositionStore, PositionTracker};
use crate::utils::AppError;

/// Monitor result type
pub type MonitorResult<T> = Result<T, AppError>;

/// Inputs for a single run
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub log_path: PathBuf,
    /// Level names to keep, matched case-insensitively
    pub levels: Vec<String>,
    /// Parse and report without dispatching; the position is still committed
    pub dry_run: bool,
    /// Clear the saved position and stop
    pub reset: bool,
}

/// What happened to one parsed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Previewed,
    Sent,
    Skipped(SkipReason),
    Failed(String),
}

impl From<SendOutcome> for EntryOutcome {
    fn from(outcome: SendOutcome) -> Self {
        match outcome {
            SendOutcome::Sent => EntryOutcome::Sent,
            SendOutcome::Skipped(reason) => EntryOutcome::Skipped(reason),
            SendOutcome::Failed(description) => EntryOutcome::Failed(description),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub entry: LogEntry,
    pub outcome: EntryOutcome,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    Reset,
    NoLogFile,
    NoNewData,
    Processed {
        /// Position committed at the end of the run
        position: u64,
        dispatches: Vec<Dispatch>,
    },
}

impl RunReport {
    pub fn dispatches(&self) -> &[Dispatch] {
        match self {
            RunReport::Processed { dispatches, .. } => dispatches,
            _ => &[],
        }
    }

    pub fn sent_count(&self) -> usize {
        self.dispatches()
            .iter()
            .filter(|d| d.outcome == EntryOutcome::Sent)
            .count()
    }
}

pub struct LogMonitor {
    parser: LogParser,
    positions: Arc<dyn PositionStore>,
    notifier: TelegramNotifier,
}

impl LogMonitor {
    pub fn new(positions: Arc<dyn PositionStore>, notifier: TelegramNotifier) -> Self {
        Self {
            parser: LogParser::new(),
            positions,
            notifier,
        }
    }

    pub fn notifier(&self) -> &TelegramNotifier {
        &self.notifier
    }

    pub fn tracker(&self, options: &MonitorOptions) -> PositionTracker {
        PositionTracker::new(&options.log_path, self.positions.clone())
    }

    pub async fn run(&self, options: &MonitorOptions) -> MonitorResult<RunReport> {
        let log_path = &options.log_path;
        let tracker = self.tracker(options);

        if options.reset {
            tracker.reset().await?;
            return Ok(RunReport::Reset);
        }

        if !fs::try_exists(log_path).await.unwrap_or(false) {
            warn!(path = %log_path.display(), "Log file not found");
            return Ok(RunReport::NoLogFile);
        }

        if tracker.was_rotated(log_path).await? {
            info!(path = %log_path.display(), "Log rotation detected, resetting position");
            tracker.reset().await?;
        }

        let metadata = fs::metadata(log_path).await.map_err(|e| {
            error!(error = %e, path = %log_path.display(), "Failed to stat log file");
            AppError::io(format!("Failed to stat log file: {}", e))
        })?;
        let size = metadata.len();
        let inode = current_inode(&metadata);

        let position = tracker.get_position().await?.position;
        if position >= size {
            debug!(position, size, "No new log data");
            return Ok(RunReport::NoNewData);
        }

        let bytes = read_range(log_path, position, size - position).await?;
        let content = String::from_utf8_lossy(&bytes);
        let entries = self.parser.parse(&content, &options.levels);
        info!(
            path = %log_path.display(),
            bytes = bytes.len(),
            entries = entries.len(),
            "Read new log data"
        );

        let mut dispatches = Vec::with_capacity(entries.len());
        for entry in entries {
            let outcome = if options.dry_run {
                EntryOutcome::Previewed
            } else {
                self.dispatch(&entry).await
            };
            dispatches.push(Dispatch { entry, outcome });
        }

        tracker.save_position(size, inode).await?;

        Ok(RunReport::Processed {
            position: size,
            dispatches,
        })
    }

    async fn dispatch(&self, entry: &LogEntry) -> EntryOutcome {
        let mut context = Context::new();
        context.insert(
            "environment".to_string(),
            Value::String(entry.environment.clone()),
        );

        self.notifier
            .send_detailed(
                &entry.full_message(),
                &entry.level,
                Some(&entry.timestamp),
                Some(&context),
            )
            .await
            .into()
    }
}

/// Read exactly `len` bytes starting at `offset`
async fn read_range(path: &std::path::Path, offset: u64, len: u64) -> MonitorResult<Vec<u8>> {
    let mut file = File::open(path).await.map_err(|e| {
        error!(error = %e, path = %path.display(), "Failed to open log file");
        AppError::io(format!("Failed to open log file: {}", e))
    })?;

    file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
        error!(error = %e, offset, "Failed to seek log file");
        AppError::io(format!("Failed to seek log file: {}", e))
    })?;

    let len = usize::try_from(len)
        .map_err(|_| AppError::io(format!("Unread range too large: {} bytes", len)))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await.map_err(|e| {
        error!(error = %e, path = %path.display(), "Failed to read log file");
        AppError::io(format!("Failed to read log file: {}", e))
    })?;

    Ok(buf)
}
