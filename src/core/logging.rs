//! Logging setup
//!
//! Human-readable output on stdout plus a JSON log, rolled daily, next to
//! the run's artifacts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "setforge.log";

/// Initialize the logging system.
///
/// This sets up:
/// 1. A stdout logger (compact, human-readable).
/// 2. A JSON file logger in `log_dir` (daily rolling).
/// 3. Redirects standard `log` crate events to `tracing`.
///
/// `RUST_LOG` overrides the default `info` filter. The returned guard must
/// be held until exit so buffered file output is flushed.
pub fn init(log_dir: &Path) -> WorkerGuard {
    if !log_dir.exists() {
        if let Err(e) = fs::create_dir_all(log_dir) {
            eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
        }
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = default_filter();

    // File Layer: JSON format for later inspection
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_filter(env_filter.clone());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .compact()
        .with_target(false)
        .with_filter(env_filter);

    if let Err(e) = tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
    {
        eprintln!("Logging already initialized: {}", e);
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        // Already set when try_init installed its own bridge.
        tracing::debug!("LogTracer not installed: {}", e);
    }

    tracing::info!(
        "Logging initialized. Writing to: {} (daily rolling)",
        log_file_path(log_dir).display()
    );

    guard
}

/// [`init`] for commands that operate on an existing set directory.
///
/// Fails without creating anything when `set_dir` is not a directory.
pub fn init_in_set_dir(set_dir: &Path) -> io::Result<WorkerGuard> {
    if !set_dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", set_dir.display()),
        ));
    }
    Ok(init(set_dir))
}

/// Stdout-only logging for commands that have no output directory yet.
pub fn init_console() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .compact()
                .with_target(false)
                .with_filter(default_filter()),
        )
        .try_init();
}

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_NAME)
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
