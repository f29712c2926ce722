use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log_notifier::config::AppConfig;
use log_notifier::monitoring::log_parser::parse_levels;
use log_notifier::monitoring::notifier::truncate;
use log_notifier::monitoring::{
    CachePositionStore, EntryOutcome, FilePositionStore, LogMonitor, MonitorOptions,
    NotifierConfig, PositionStorage, PositionStore, ReqwestTransport, RunReport, TelegramNotifier,
};
use log_notifier::store::{CacheStore, FileCache};
use log_notifier::utils::{init_logging, AppError};
use tracing::{error, info};

const STACK_PREVIEW_CHARS: usize = 200;

/// Forward new error entries from a log file to Telegram
#[derive(Parser, Debug)]
#[command(name = "log-notifier", version, about, long_about = None)]
struct Cli {
    /// Log file to monitor (overrides TELEGRAM_LOGGER_LOG_PATH)
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Comma-separated levels to forward (overrides TELEGRAM_LOGGER_MONITOR_LEVELS)
    #[arg(long)]
    levels: Option<String>,

    /// Print matching entries without sending; the position is still saved
    #[arg(long)]
    dry_run: bool,

    /// Reset the saved position and exit
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Environment
    dotenvy::dotenv().ok();

    // 2. Logging
    let _guard = init_logging();

    // 3. Arguments
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, code = e.error_code(), "Monitor run failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = AppConfig::from_env()?;

    let cache: Arc<dyn CacheStore> = Arc::new(FileCache::new(config.cache_dir()));
    let positions: Arc<dyn PositionStore> = match config.position_storage {
        PositionStorage::Cache => Arc::new(CachePositionStore::new(cache.clone())),
        PositionStorage::File => Arc::new(FilePositionStore::new(config.position_file())),
    };

    let transport = ReqwestTransport::with_api_base(&config.api_base, &config.bot_token)?;
    let notifier = TelegramNotifier::new(NotifierConfig::from(&config), Arc::new(transport), cache);
    let monitor = LogMonitor::new(positions, notifier);

    let options = MonitorOptions {
        log_path: cli.log_path.unwrap_or_else(|| config.log_path.clone()),
        levels: cli
            .levels
            .as_deref()
            .map(parse_levels)
            .unwrap_or_else(|| config.monitor_levels.clone()),
        dry_run: cli.dry_run,
        reset: cli.reset,
    };

    info!(
        path = %options.log_path.display(),
        levels = ?options.levels,
        dry_run = options.dry_run,
        "Starting monitor run"
    );

    let report = monitor.run(&options).await?;
    print_report(&options, &report);
    Ok(())
}

fn print_report(options: &MonitorOptions, report: &RunReport) {
    match report {
        RunReport::Reset => println!("Position reset for {}", options.log_path.display()),
        RunReport::NoLogFile => println!("Log file not found: {}", options.log_path.display()),
        RunReport::NoNewData => println!("No new log entries."),
        RunReport::Processed { dispatches, .. } if dispatches.is_empty() => {
            println!("No matching log entries.")
        }
        RunReport::Processed { dispatches, .. } => {
            println!("Found {} matching log entries.", dispatches.len());

            for dispatch in dispatches {
                let entry = &dispatch.entry;
                match &dispatch.outcome {
                    EntryOutcome::Previewed => {
                        println!();
                        println!("[{}] {} ({})", entry.level, entry.timestamp, entry.environment);
                        println!("{}", entry.message);
                        if !entry.stacktrace.is_empty() {
                            println!("{}", truncate(&entry.stacktrace, STACK_PREVIEW_CHARS));
                        }
                    }
                    EntryOutcome::Sent => println!("Sent: [{}] {}", entry.level, entry.message),
                    EntryOutcome::Skipped(reason) => println!(
                        "Skipped ({}): [{}] {}",
                        reason.as_str(),
                        entry.level,
                        entry.message
                    ),
                    EntryOutcome::Failed(description) => println!(
                        "Failed ({}): [{}] {}",
                        description, entry.level, entry.message
                    ),
                }
            }
        }
    }
}
