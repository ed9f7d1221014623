//! # Logging Utilities
//!
//! Logging setup for dwarfscope using `tracing`.
//!
//! The decoders only emit `tracing` events; this module decides where they
//! go. Command output is written to stdout, so log records always go to
//! stderr and, optionally, to a file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dwarfscope_utils::init_logging;
//!
//! // Reads RUST_LOG, DWARFSCOPE_LOG_FORMAT and DWARFSCOPE_LOG_FILE
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("ready");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Filter directives (e.g. `warn`, `dwarfscope_core::cfi=trace`)
//! - `DWARFSCOPE_LOG_FORMAT`: `pretty` (default) or `json`
//! - `DWARFSCOPE_LOG_FILE`: Also write records to this file; the current date
//!   is prepended to its file name
//!
//! The returned [`LoggingGuard`] flushes the file writer when dropped, so keep
//! it alive until the program exits.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "DWARFSCOPE_LOG_FORMAT";
/// Environment variable naming an additional log file.
pub const LOG_FILE_ENV: &str = "DWARFSCOPE_LOG_FILE";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per record
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel
{
    Error,
    /// Default: only problems found in the input are reported
    #[default]
    Warn,
    Info,
    Debug,
    /// Every decoded record
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Resolved logging settings.
///
/// An explicit `level` wins over `RUST_LOG`; without either, [`LogLevel::Warn`]
/// applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig
{
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl LogConfig
{
    /// Settings from `DWARFSCOPE_LOG_FORMAT` and `DWARFSCOPE_LOG_FILE`.
    ///
    /// ## Errors
    ///
    /// Returns an error if `DWARFSCOPE_LOG_FORMAT` holds an unknown format.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        let format = match env::var(LOG_FORMAT_ENV) {
            Ok(value) => value.parse()?,
            Err(_) => LogFormat::default(),
        };
        Ok(Self {
            level: None,
            format,
            file: env::var_os(LOG_FILE_ENV).map(PathBuf::from),
        })
    }

    fn filter(&self) -> EnvFilter
    {
        let fallback = || EnvFilter::new(Level::from(LogLevel::default()).to_string());
        match self.level {
            Some(level) => EnvFilter::new(Level::from(level).to_string()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Keeps the file writer running; records still buffered are flushed on drop.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// `<dir>/<YYYY-MM-DD>-<name>` for a requested log file path.
#[must_use]
pub fn dated_log_path(path: &Path) -> PathBuf
{
    let today = Utc::now().format("%Y-%m-%d");
    let name = path
        .file_name()
        .map_or_else(|| "dwarfscope.log".into(), |name| name.to_string_lossy());
    path.with_file_name(format!("{today}-{name}"))
}

/// Initialize logging from the environment
///
/// ## Errors
///
/// Returns an error if the environment holds invalid values, logging is
/// already initialized, or the log file cannot be created.
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    init_logging_with_config(&LogConfig::from_env()?)
}

/// Initialize logging with an explicit level and format; the log file still
/// comes from `DWARFSCOPE_LOG_FILE`.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the log file cannot
/// be created.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_with_config(&LogConfig {
        level: Some(level),
        format,
        file: env::var_os(LOG_FILE_ENV).map(PathBuf::from),
    })
}

/// Initialize logging from resolved settings.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the log file cannot
/// be created.
pub fn init_logging_with_config(config: &LogConfig) -> Result<LoggingGuard, LoggingError>
{
    let mut guard = LoggingGuard::default();

    let console_layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_writer(io::stderr)
            .with_filter(config.filter())
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_writer(io::stderr)
            .with_filter(config.filter())
            .boxed(),
    };

    let file_layer = match &config.file {
        Some(requested) => {
            let path = dated_log_path(requested);
            let directory = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
            std::fs::create_dir_all(directory)?;
            let file_name = path.file_name().unwrap_or_default();
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard._file = Some(worker);
            let layer = match config.format {
                LogFormat::Pretty => fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_filter(config.filter())
                    .boxed(),
                LogFormat::Json => fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_filter(config.filter())
                    .boxed(),
            };
            Some(layer)
        }
        None => None,
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug' or 'trace'")]
    InvalidLevel(String),

    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
