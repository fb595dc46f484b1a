//! # Logging Utilities
//!
//! Logging infrastructure for Ferros using `tracing`.
//!
//! The frame cache logs under the `ferros_frames` target:
//! - `trace!` for every cache fill (registers, PCs, identities, unwinder binding)
//! - `debug!` when unwinding stops and when the cache is invalidated
//! - `warn!` when a selected frame can't be restored
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferros_utils::init_logging;
//!
//! // Reads RUST_LOG, FERROS_LOG_FORMAT, FERROS_LOG_FILE and FERROS_FRAME_DEBUG
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Debugger started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Log level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=ferros_frames=debug`)
//! - `FERROS_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `FERROS_LOG_FILE`: Optional log file; the current date is prepended to its name
//! - `FERROS_FRAME_DEBUG`: When set to anything but `0`/`off`/`false`, frame
//!   cache tracing is enabled regardless of `RUST_LOG`
//!
//! ## Tests
//!
//! Tests call [`init_test_logging`], which routes output through the test
//! harness's capture and may be called from every test.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable enabling frame cache tracing.
pub const FRAME_DEBUG_ENV: &str = "FERROS_FRAME_DEBUG";

/// Filter directive turned on by [`FRAME_DEBUG_ENV`].
const FRAME_DEBUG_DIRECTIVE: &str = "ferros_frames=trace";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    Pretty,
    /// JSON format, one event per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level: unwinding stops and invalidations
    Debug,
    /// Trace level: every frame cache fill
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
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the file writer alive. Dropping it flushes and stops file logging.
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard
{
    _file: Option<WorkerGuard>,
}

/// Returns `true` if a switch variable's value turns the switch on.
pub fn switch_enabled(value: &str) -> bool
{
    !matches!(value.trim().to_lowercase().as_str(), "" | "0" | "off" | "false" | "no")
}

/// Returns `true` if [`FRAME_DEBUG_ENV`] is set and enabled.
pub fn frame_debug_enabled() -> bool
{
    env::var(FRAME_DEBUG_ENV).is_ok_and(|value| switch_enabled(&value))
}

/// Build the event filter: `RUST_LOG` if set, `default_level` otherwise, plus
/// frame cache tracing when `frame_debug` is on.
///
/// ## Errors
///
/// Returns an error if the frame debug directive can't be parsed.
pub fn build_filter(default_level: Level, frame_debug: bool) -> Result<EnvFilter, LoggingError>
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    if !frame_debug {
        return Ok(filter);
    }

    let directive: Directive = FRAME_DEBUG_DIRECTIVE
        .parse()
        .map_err(|err: ParseError| LoggingError::InvalidLevel(err.to_string()))?;
    Ok(filter.add_directive(directive))
}

/// Initialize logging with default settings
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter (e.g., `debug`, `ferros_frames=debug`)
/// - `FERROS_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `FERROS_LOG_FILE`: Optional path to log file
/// - `FERROS_FRAME_DEBUG`: Enable frame cache tracing
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `FERROS_LOG_FORMAT` has an unknown value
/// - The log file can't be created
pub fn init_logging() -> Result<LogGuard, LoggingError>
{
    let format = match env::var("FERROS_LOG_FORMAT") {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::Pretty,
    };

    // RUST_LOG may hold per-target directives rather than a bare level.
    let default_level = env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<LogLevel>().ok())
        .map_or(Level::INFO, Into::into);

    let log_file = env::var("FERROS_LOG_FILE").ok().map(PathBuf::from);
    init_logging_internal(format, default_level, log_file.as_deref())
}

/// Initialize logging with explicit level and format
///
/// `RUST_LOG`, when set, still takes precedence over `level`.
///
/// ## Example
///
/// ```rust,no_run
/// use ferros_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LogGuard, LoggingError>
{
    init_logging_internal(format, level.into(), None)
}

/// Install a subscriber for tests.
///
/// Output goes through the test harness (captured unless `--nocapture`).
/// Defaults to warnings only; `RUST_LOG` and `FERROS_FRAME_DEBUG` work as
/// usual. Safe to call from every test: only the first call installs.
pub fn init_test_logging()
{
    let filter = build_filter(Level::WARN, frame_debug_enabled()).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .try_init();
}

fn console_layer(format: LogFormat) -> BoxedLayer
{
    // stderr keeps logs out of the debugger's own output.
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
            .boxed(),
    }
}

/// Date-prefixed log file path: `dir/YYYY-MM-DD-name`.
fn dated_log_file(path: &Path) -> PathBuf
{
    let today = Utc::now().format("%Y-%m-%d");
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .map_or_else(|| "ferros.log".to_string(), |name| name.to_string_lossy().into_owned());
    dir.join(format!("{today}-{name}"))
}

fn file_layer(path: &Path, format: LogFormat) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let path = dated_log_file(path);
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;

    // The date is already in the file name.
    let appender = tracing_appender::rolling::never(dir, path.file_name().unwrap_or_default());
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    };
    Ok((layer, guard))
}

fn init_logging_internal(format: LogFormat, default_level: Level, log_file: Option<&Path>) -> Result<LogGuard, LoggingError>
{
    let filter = build_filter(default_level, frame_debug_enabled())?;

    let mut layers = vec![console_layer(format)];
    let mut file_guard = None;
    if let Some(path) = log_file {
        let (layer, guard) = file_layer(path, format)?;
        layers.push(layer);
        file_guard = Some(guard);
    }

    Registry::default()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(LogGuard { _file: file_guard })
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Unknown log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level or filter directive
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
