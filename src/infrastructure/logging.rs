//! Logging infrastructure
//!
//! File and console logging built on the `tracing` stack. All timestamps
//! are rendered in UTC so state files, backups and log lines sort together.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, time::FormatTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::config::ConfigManager;

// Re-export LoggingConfig from config module
pub use crate::infrastructure::config::LoggingConfig;

/// File name of the active log file.
pub const LOG_FILE_NAME: &str = "price-sentry.log";

lazy_static! {
    // Worker guards must outlive the process or buffered lines are lost.
    static ref LOG_GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());
}

/// UTC timestamp formatter for log lines.
pub struct UtcTimeFormatter;

impl FormatTime for UtcTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

/// Resolves the directory that holds log files.
///
/// Falls back to `./logs` when no platform data directory is available.
#[must_use]
pub fn get_log_directory() -> PathBuf {
    ConfigManager::get_app_data_dir()
        .map(|dir| dir.join("logs"))
        .unwrap_or_else(|_| PathBuf::from("./logs"))
}

/// Initializes logging with default settings.
pub fn init_logging() -> Result<PathBuf> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initializes the global tracing subscriber from a [`LoggingConfig`].
///
/// Returns the path of the active log file, or the log directory when
/// file output is disabled. Must be called once per process.
pub fn init_logging_with_config(logging: &LoggingConfig) -> Result<PathBuf> {
    let log_dir = get_log_directory();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {log_dir:?}"))?;

    if logging.file_output {
        rotate_existing_log(&log_dir)?;
    }
    if logging.auto_cleanup_logs {
        if let Err(e) = cleanup_old_logs(&log_dir, logging.max_files, logging.keep_only_latest) {
            eprintln!("⚠️  Log cleanup failed: {e}");
        }
    }

    // RUST_LOG wins when set; otherwise the configured level drives both
    // the global default and this crate's directive.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(&logging.level).add_directive(
            format!("price_sentry={}", logging.level)
                .parse()
                .unwrap_or_else(|_| tracing::level_filters::LevelFilter::INFO.into()),
        )
    });

    let log_file = log_dir.join(LOG_FILE_NAME);

    match (logging.file_output, logging.console_output) {
        (true, true) => {
            let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            LOG_GUARDS
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(guard);

            if logging.json_format {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .json()
                            .with_timer(UtcTimeFormatter)
                            .with_ansi(false)
                            .with_writer(non_blocking),
                    )
                    .with(fmt::layer().with_timer(UtcTimeFormatter))
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .with_timer(UtcTimeFormatter)
                            .with_ansi(false)
                            .with_writer(non_blocking),
                    )
                    .with(fmt::layer().with_timer(UtcTimeFormatter))
                    .init();
            }
        }
        (true, false) => {
            let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            LOG_GUARDS
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(guard);

            if logging.json_format {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .json()
                            .with_timer(UtcTimeFormatter)
                            .with_ansi(false)
                            .with_writer(non_blocking),
                    )
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .with_timer(UtcTimeFormatter)
                            .with_ansi(false)
                            .with_writer(non_blocking),
                    )
                    .init();
            }
        }
        (false, true) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_timer(UtcTimeFormatter))
                .init();
        }
        (false, false) => {
            anyhow::bail!("logging must enable at least one of console_output or file_output");
        }
    }

    log_system_info();
    info!("📁 Log directory: {:?}", log_dir);

    if logging.file_output {
        Ok(log_file)
    } else {
        Ok(log_dir)
    }
}

/// Moves an existing log file aside under a timestamped name so each run
/// starts with a fresh file.
fn rotate_existing_log(log_dir: &Path) -> Result<()> {
    let current = log_dir.join(LOG_FILE_NAME);
    if !current.exists() {
        return Ok(());
    }

    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let rotated = log_dir.join(format!("price-sentry.{timestamp}.log"));
    fs::rename(&current, &rotated)
        .with_context(|| format!("Failed to rotate log file to {rotated:?}"))?;
    Ok(())
}

/// Deletes old log files, keeping the `max_files` most recent (or only
/// the newest one when `keep_only_latest` is set). Returns how many
/// files were removed.
pub fn cleanup_old_logs(log_dir: &Path, max_files: u32, keep_only_latest: bool) -> Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    for entry in fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory: {log_dir:?}"))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let keep = if keep_only_latest { 1 } else { max_files as usize };
    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove old log file {:?}: {}", path, e),
        }
    }

    Ok(removed)
}

/// Logs process and platform details once at startup.
pub fn log_system_info() {
    info!("🚀 Price Sentry v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "   Platform: {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    info!("   PID: {}", std::process::id());
}
