//! Log monitoring and Telegram alerting
//!
//! - Log parsing with stack-trace folding
//! - Read-position tracking with rotation detection
//! - Throttled, gated Telegram notifications
//! - The monitor run and the embedded `tracing` handler

pub mod handler;
pub mod log_parser;
pub mod monitor;
pub mod notifier;
pub mod position_tracker;
pub mod severity;
pub mod telegram;
pub mod throttle;

pub use handler::{FallbackTrace, TelegramLayer};
pub use log_parser::{LogEntry, LogParser};
pub use monitor::{Dispatch, EntryOutcome, LogMonitor, MonitorOptions, RunReport};
pub use notifier::{NotifierConfig, SendOutcome, SkipReason, TelegramNotifier, TransportErrorPolicy};
pub use position_tracker::{
    CachePositionStore, FilePositionStore, PositionRecord, PositionStorage, PositionStore,
    PositionTracker,
};
pub use severity::Severity;
pub use telegram::{MessageTransport, ReqwestTransport};
pub use throttle::Throttle;
