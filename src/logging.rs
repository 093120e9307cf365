//! Tracing setup for tools that drive the pipeline.
//!
//! The library only emits `tracing` events; this installs a subscriber that
//! prints them and mirrors them into daily files under a caller-chosen
//! directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use time::{UtcOffset, format_description::BorrowedFormatItem, macros::format_description};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

/// Daily files kept in the log directory.
pub const MAX_LOG_FILES: usize = 10;
/// Prefix of every file this crate writes into the log directory.
pub const LOG_FILE_PREFIX: &str = "sampledex";

const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to open log file in {path}: {source}")]
    Appender { path: PathBuf, source: InitError },
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Log to stdout and to `log_dir/sampledex.<date>.log`.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Only the newest
/// [`MAX_LOG_FILES`] files with our prefix are kept. Calls after the first
/// successful one do nothing.
pub fn init(log_dir: &Path) -> Result<(), LoggingError> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = fmt::time::OffsetTime::new(offset, TIMESTAMP);
    let subscriber = Registry::default()
        .with(env_filter())
        .with(fmt::layer().with_timer(timer.clone()))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = LOG_GUARD.set(guard);

    tracing::info!("Logging to {}", log_dir.display());
    Ok(())
}

fn file_appender(log_dir: &Path) -> Result<RollingFileAppender, LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.to_path_buf(),
        source,
    })?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
        .map_err(|source| LoggingError::Appender {
            path: log_dir.to_path_buf(),
            source,
        })
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
