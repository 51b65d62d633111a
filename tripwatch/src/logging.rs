//! Logging bootstrap.
//!
//! Sets up structured logging for a tracking run:
//! - Writes to `<directory>/tripwatch.log` (cleared on start) through a
//!   non-blocking writer
//! - Optionally mirrors events to stderr for interactive runs
//! - Local RFC 3339 timestamps, UTC when the local offset is unknown
//! - `RUST_LOG` overrides the configured level

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingSettings, DEFAULT_LOG_LEVEL};

/// Errors raised while setting up logging.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid log filter '{0}'")]
    Filter(String),

    #[error("Logging already initialized")]
    AlreadyInitialized,
}

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    log_path: PathBuf,
}

impl LoggingGuard {
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Where and how to log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingOptions {
    pub directory: PathBuf,
    pub file: String,
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Also write to stderr.
    pub stderr: bool,
}

impl LoggingOptions {
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            directory: settings.directory.clone(),
            file: settings.file.clone(),
            level: settings.level.clone(),
            stderr: false,
        }
    }

    pub fn with_stderr(mut self, enabled: bool) -> Self {
        self.stderr = enabled;
        self
    }

    pub fn log_path(&self) -> PathBuf {
        self.directory.join(&self.file)
    }
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self::from_settings(&LoggingSettings::default())
    }
}

/// Installs the global subscriber.
///
/// Creates the log directory if needed and truncates the previous log file.
pub fn init_logging(options: &LoggingOptions) -> Result<LoggingGuard, LoggingError> {
    let log_path = prepare_log_file(&options.directory, &options.file)?;

    let file_appender = tracing_appender::rolling::never(&options.directory, &options.file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_timer(local_timer())
        .with_target(true);

    let stderr_layer = options.stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_timer(local_timer())
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter(&options.level)?)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        log_path,
    })
}

/// `RUST_LOG` if set, otherwise `level`.
fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = if level.trim().is_empty() {
        DEFAULT_LOG_LEVEL
    } else {
        level
    };
    EnvFilter::try_new(level).map_err(|_| LoggingError::Filter(level.to_string()))
}

fn local_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn prepare_log_file(directory: &Path, file: &str) -> Result<PathBuf, LoggingError> {
    let path = directory.join(file);
    let to_error = |source| LoggingError::LogFile {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(directory).map_err(to_error)?;
    fs::write(&path, "").map_err(to_error)?;
    Ok(path)
}
