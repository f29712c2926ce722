//! Embedded handler: forwards a host application's `tracing` events to Telegram
//!
//! The layer itself only filters and copies event data into an
//! [`AlertRecord`]; delivery happens on a background task so the host's
//! logging path never waits on the network.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Subscriber};
use tracing_subscriber::layer::Context as LayerContext;
use tracing_subscriber::Layer;

use crate::config::AppConfig;
use crate::monitoring::notifier::{
    Context, NotifierConfig, SendOutcome, TelegramNotifier, TransportErrorPolicy,
};
use crate::monitoring::severity::Severity;
use crate::monitoring::telegram::ReqwestTransport;
use crate::store::CacheStore;
use crate::utils::AppError;

/// Events under this target prefix are never forwarded
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");
const SEPARATOR_WIDTH: usize = 80;
/// Records queued beyond this while delivery lags are dropped
pub const ALERT_QUEUE_CAPACITY: usize = 256;

/// One host event queued for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    /// When the host emitted the event
    pub occurred_at: DateTime<Utc>,
    pub level: Severity,
    pub message: String,
    pub context: Context,
}

/// `tracing` layer that queues events at or above a minimum severity
pub struct TelegramLayer {
    min_level: Severity,
    tx: mpsc::Sender<AlertRecord>,
}

impl TelegramLayer {
    pub fn new(min_level: Severity, tx: mpsc::Sender<AlertRecord>) -> Self {
        Self { min_level, tx }
    }

    /// Build the layer and spawn its delivery worker on the current runtime
    pub fn spawn(
        notifier: TelegramNotifier,
        min_level: Severity,
        fallback: Option<FallbackTrace>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(ALERT_QUEUE_CAPACITY);
        let worker = tokio::spawn(run_worker(rx, notifier, fallback));
        (Self::new(min_level, tx), worker)
    }

    /// Layer with the configured minimum level, Bot API transport and
    /// fallback trace under the storage directory
    pub fn from_config(
        config: &AppConfig,
        throttle_store: Arc<dyn CacheStore>,
    ) -> Result<(Self, JoinHandle<()>), AppError> {
        let transport = ReqwestTransport::with_api_base(&config.api_base, &config.bot_token)?;
        let notifier =
            TelegramNotifier::new(NotifierConfig::from(config), Arc::new(transport), throttle_store);
        let fallback = FallbackTrace::new(config.fallback_log_path(), config.timezone);
        Ok(Self::spawn(notifier, config.min_level, Some(fallback)))
    }

    fn is_own_target(target: &str) -> bool {
        target == OWN_TARGET
            || target
                .strip_prefix(OWN_TARGET)
                .is_some_and(|rest| rest.starts_with("::"))
    }
}

impl<S> Layer<S> for TelegramLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let occurred_at = Utc::now();
        let metadata = event.metadata();
        let level = Severity::from_tracing(metadata.level());
        if level < self.min_level || Self::is_own_target(metadata.target()) {
            return;
        }

        let mut visitor = AlertVisitor::default();
        event.record(&mut visitor);
        visitor.context.insert(
            "target".to_string(),
            Value::String(metadata.target().to_string()),
        );

        // A full queue or a closed channel drops the record
        let _ = self.tx.try_send(AlertRecord {
            occurred_at,
            level,
            message: visitor.message,
            context: visitor.context,
        });
    }
}

/// Splits event fields into the message and a JSON context
#[derive(Default)]
struct AlertVisitor {
    message: String,
    context: Context,
}

impl AlertVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.context.insert(field.name().to_string(), value);
    }
}

impl Visit for AlertVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.insert(field, Value::String(format!("{:?}", value)));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.insert(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }
}

/// Local append-only trace of alerts that could not be delivered
#[derive(Debug, Clone)]
pub struct FallbackTrace {
    path: PathBuf,
    timezone: Tz,
}

impl FallbackTrace {
    pub fn new(path: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self {
            path: path.into(),
            timezone,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_entry(&self, reason: &str, record: &AlertRecord) -> String {
        let now = Utc::now()
            .with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M:%S");
        format!(
            "[{}] Telegram logger failed: {}\nOriginal log: [{}] {}\n{}\n",
            now,
            reason,
            record.level,
            record.message,
            "-".repeat(SEPARATOR_WIDTH)
        )
    }

    pub async fn append(&self, reason: &str, record: &AlertRecord) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AppError::io(format!("Failed to create trace directory: {}", e)))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::io(format!("Failed to open fallback trace: {}", e)))?;

        file.write_all(self.format_entry(reason, record).as_bytes())
            .await
            .map_err(|e| AppError::io(format!("Failed to write fallback trace: {}", e)))
    }
}

/// Deliver queued records in order until every sender is dropped
pub async fn run_worker(
    mut rx: mpsc::Receiver<AlertRecord>,
    notifier: TelegramNotifier,
    fallback: Option<FallbackTrace>,
) {
    while let Some(record) = rx.recv().await {
        let timestamp = notifier.format_timestamp(record.occurred_at);
        let outcome = notifier
            .send_detailed(
                &record.message,
                record.level.as_str(),
                Some(&timestamp),
                Some(&record.context),
            )
            .await;

        let SendOutcome::Failed(reason) = outcome else {
            continue;
        };
        if notifier.policy() == TransportErrorPolicy::SilentDrop {
            continue;
        }
        if let Some(trace) = &fallback {
            if let Err(e) = trace.append(&reason, &record).await {
                warn!(error = %e, path = %trace.path().display(), "Failed to write fallback trace");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::telegram::{MockMessageTransport, TelegramResponse};
    use crate::store::MemoryCache;
    use std::env::temp_dir;
    use tracing_subscriber::prelude::*;
    use uuid::Uuid;

    fn test_notifier(transport: MockMessageTransport) -> TelegramNotifier {
        let config = NotifierConfig {
            bot_token: "123:abc".to_string(),
            chat_id: "-100".to_string(),
            project_name: "Billing".to_string(),
            environment: "production".to_string(),
            notify_environments: vec!["production".to_string()],
            throttle_secs: 0,
            timezone: Tz::UTC,
        };
        TelegramNotifier::new(config, Arc::new(transport), Arc::new(MemoryCache::new()))
    }

    fn record(message: &str) -> AlertRecord {
        AlertRecord {
            occurred_at: Utc::now(),
            level: Severity::Error,
            message: message.to_string(),
            context: Context::new(),
        }
    }

    #[test]
    fn should_queue_events_at_or_above_minimum() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(16);
        let subscriber =
            tracing_subscriber::registry().with(TelegramLayer::new(Severity::Warning, tx));

        // Act
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "billing::jobs", "routine");
            tracing::warn!(target: "billing::jobs", "disk almost full");
            tracing::error!(target: "billing::jobs", order_id = 7, paid = false, "Payment failed");
        });

        // Assert
        let first = rx.try_recv().expect("warning should be queued");
        assert_eq!(first.level, Severity::Warning);
        assert_eq!(first.message, "disk almost full");

        let second = rx.try_recv().expect("error should be queued");
        assert_eq!(second.level, Severity::Error);
        assert_eq!(second.message, "Payment failed");
        assert_eq!(second.context.get("order_id"), Some(&Value::from(7)));
        assert_eq!(second.context.get("paid"), Some(&Value::Bool(false)));
        assert_eq!(
            second.context.get("target"),
            Some(&Value::String("billing::jobs".to_string()))
        );

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn should_ignore_events_from_own_crate() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(16);
        let subscriber = tracing_subscriber::registry().with(TelegramLayer::new(Severity::Debug, tx));

        // Act
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "log_notifier::monitoring::notifier", "send failed");
            tracing::error!(target: "log_notifier_extra", "lookalike crate");
        });

        // Assert
        let only = rx.try_recv().expect("lookalike target should be queued");
        assert_eq!(only.message, "lookalike crate");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn should_drop_records_when_queue_is_full() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(1);
        let subscriber = tracing_subscriber::registry().with(TelegramLayer::new(Severity::Error, tx));

        // Act
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "billing", "first");
            tracing::error!(target: "billing", "second");
            tracing::error!(target: "billing", "third");
        });

        // Assert
        assert_eq!(rx.try_recv().expect("first should be queued").message, "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn should_stamp_record_when_event_is_emitted() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(4);
        let subscriber = tracing_subscriber::registry().with(TelegramLayer::new(Severity::Error, tx));
        let before = Utc::now();

        // Act
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "billing", "Payment failed");
        });
        let after = Utc::now();

        // Assert
        let queued = rx.try_recv().expect("record should be queued");
        assert!(queued.occurred_at >= before && queued.occurred_at <= after);
    }

    #[tokio::test]
    async fn should_send_event_time_rather_than_delivery_time() {
        // Arrange
        let mut transport = MockMessageTransport::new();
        transport
            .expect_send_message()
            .withf(|req| req.text.contains("*Time:* `2024-01-15 10:00:00 UTC`"))
            .times(1)
            .returning(|_| Ok(TelegramResponse::success()));
        let occurred_at = DateTime::parse_from_rfc3339("2024-01-15T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (tx, rx) = mpsc::channel(4);

        // Act
        tx.try_send(AlertRecord {
            occurred_at,
            ..record("Payment failed")
        })
        .unwrap();
        drop(tx);
        run_worker(rx, test_notifier(transport), None).await;
    }

    #[test]
    fn should_not_panic_when_worker_is_gone() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let subscriber = tracing_subscriber::registry().with(TelegramLayer::new(Severity::Error, tx));

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "billing", "dropped silently");
        });
    }

    #[tokio::test]
    async fn should_build_layer_from_config() {
        // Arrange
        let config = AppConfig::from_lookup(|key| match key {
            "TELEGRAM_LOGGER_LEVEL" => Some("critical".to_string()),
            _ => None,
        })
        .unwrap();

        // Act
        let (layer, worker) = TelegramLayer::from_config(&config, Arc::new(MemoryCache::new()))
            .expect("layer should build");

        // Assert
        assert_eq!(layer.min_level, Severity::Critical);
        drop(layer);
        worker.await.expect("worker should exit once the layer is dropped");
    }

    #[test]
    fn should_format_fallback_entry() {
        // Arrange
        let trace = FallbackTrace::new("unused.log", Tz::UTC);

        // Act
        let entry = trace.format_entry("Bad Request", &record("Payment failed"));

        // Assert
        let lines: Vec<&str> = entry.lines().collect();
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] Telegram logger failed: Bad Request"));
        assert_eq!(lines[1], "Original log: [ERROR] Payment failed");
        assert_eq!(lines[2], "-".repeat(80));
    }

    #[tokio::test]
    async fn should_write_fallback_trace_when_delivery_fails() {
        // Arrange
        let dir = temp_dir().join(format!("test_fallback_trace_{}", Uuid::new_v4()));
        let trace = FallbackTrace::new(dir.join("logs").join("telegram-logger-errors.log"), Tz::UTC);
        let mut transport = MockMessageTransport::new();
        transport
            .expect_send_message()
            .times(2)
            .returning(|_| Ok(TelegramResponse::failure("Forbidden")));
        let (tx, rx) = mpsc::channel(16);

        // Act
        tx.try_send(record("Payment failed")).unwrap();
        drop(tx);
        run_worker(rx, test_notifier(transport), Some(trace.clone())).await;

        // Assert
        let content = std::fs::read_to_string(trace.path()).expect("trace should exist");
        assert!(content.contains("Telegram logger failed: Forbidden"));
        assert!(content.contains("Original log: [ERROR] Payment failed"));
    }

    #[tokio::test]
    async fn should_discard_failures_with_silent_drop() {
        // Arrange
        let dir = temp_dir().join(format!("test_silent_drop_{}", Uuid::new_v4()));
        let trace = FallbackTrace::new(dir.join("errors.log"), Tz::UTC);
        let mut transport = MockMessageTransport::new();
        transport
            .expect_send_message()
            .times(1)
            .returning(|_| Ok(TelegramResponse::failure("Forbidden")));
        let notifier = test_notifier(transport).with_policy(TransportErrorPolicy::SilentDrop);
        let (tx, rx) = mpsc::channel(16);

        // Act
        tx.try_send(record("Payment failed")).unwrap();
        drop(tx);
        run_worker(rx, notifier, Some(trace.clone())).await;

        // Assert
        assert!(!trace.path().exists());
    }

    #[tokio::test]
    async fn should_deliver_through_spawned_worker() {
        // Arrange
        let mut transport = MockMessageTransport::new();
        transport
            .expect_send_message()
            .withf(|req| req.text.contains("Payment failed") && req.text.contains("\"order_id\": 7"))
            .times(1)
            .returning(|_| Ok(TelegramResponse::success()));
        let (layer, worker) = TelegramLayer::spawn(test_notifier(transport), Severity::Error, None);
        let subscriber = tracing_subscriber::registry().with(layer);

        // Act
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "billing", order_id = 7, "Payment failed");
        });

        // Assert - the subscriber (and its sender) is dropped, so the worker drains and exits
        worker.await.expect("worker should finish");
    }
}
