//! Logging initialization
//!
//! Structured logging to stderr, optionally mirrored as JSON into a daily
//! rolling file. Stdout is left free for the CLI's own report output.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initializes the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info,log_notifier=debug`.
/// `LOG_FORMAT=json` switches the stderr layer to JSON. When `LOG_DIR` is set,
/// a JSON copy of every event is written to `LOG_DIR/log-notifier.log.YYYY-MM-DD`;
/// never point `LOG_DIR` at the directory of the monitored log.
///
/// The returned `WorkerGuard` must be held by main so buffered file output is
/// flushed on exit.
pub fn init_logging() -> Option<WorkerGuard> {
    let json_stderr = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let stderr_layer = if json_stderr {
        fmt::layer()
            .json()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match std::env::var("LOG_DIR") {
        Ok(log_dir) => {
            let file_appender = rolling::daily(&log_dir, "log-notifier.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .json()
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_current_span(true)
                .flatten_event(false)
                .with_ansi(false)
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,log_notifier=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .or_else(|err| {
            // Detect "already initialized" via source downcasting
            use std::error::Error;
            if err
                .source()
                .and_then(|s| s.downcast_ref::<tracing::dispatcher::SetGlobalDefaultError>())
                .is_some()
            {
                return Ok(());
            }
            eprintln!("Failed to initialize tracing: {}", err);
            Err(err)
        })
        .ok();

    guard
}
