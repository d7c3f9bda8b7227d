//! Logging infrastructure for CredSweep
//!
//! Structured logging goes through `tracing`. [`init_tracing`] installs a
//! stderr layer and, when a log directory is configured or debug mode is on, a
//! daily-rolling file layer. [`debug_log`] is the category logger used by the
//! credential entity; it only emits while debug mode is enabled.

use crate::errors::AppError;
use crate::infra::config::Settings;
use crate::infra::paths;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "credsweep.log";

/// Global flag indicating whether debug logging is enabled.
static DEBUG_MODE: Mutex<bool> = Mutex::new(false);

/// Keeps the file writer alive; pending lines are flushed when dropped
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Sets the debug mode flag
pub fn set_debug_mode(enabled: bool) {
    if let Ok(mut flag) = DEBUG_MODE.lock() {
        *flag = enabled;
    }
}

pub fn is_debug_mode() -> bool {
    DEBUG_MODE.lock().map(|flag| *flag).unwrap_or(false)
}

/// Installs the process-wide tracing subscriber
///
/// # Returns
/// * `Ok(LoggingGuard)` - Keep it alive for as long as file logging is wanted
/// * `Err(AppError)` - Invalid filter, log directory not creatable, or a
///   subscriber was already installed
///
/// # Side Effects
/// - Sets debug mode from `settings.debug`
/// - Creates the log directory
pub fn init_tracing(settings: &Settings) -> Result<LoggingGuard, AppError> {
    let filter = EnvFilter::try_new(settings.effective_filter()).map_err(|e| AppError::Other {
        message: format!("Invalid log filter '{}'", settings.effective_filter()),
        source: Some(e.into()),
    })?;

    let log_dir: Option<PathBuf> = match &settings.log_dir {
        Some(dir) => {
            paths::ensure_dir(dir)?;
            Some(dir.clone())
        }
        None if settings.debug => Some(paths::get_log_dir()?),
        None => None,
    };

    let (file_layer, file_guard) = match &log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Other {
            message: "Tracing subscriber is already initialized".to_string(),
            source: Some(e.into()),
        })?;

    set_debug_mode(settings.debug);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        os = std::env::consts::OS,
        log_dir = ?log_dir,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Writes a categorized debug log entry
///
/// # Arguments
/// * `level` - Log level: "INFO", "WARN", "ERROR", "DEBUG"
/// * `category` - Log category for grouping related messages
/// * `message` - The main log message
/// * `error_details` - Optional additional details for debugging
pub fn debug_log(level: &str, category: &str, message: &str, error_details: Option<&str>) {
    if !is_debug_mode() {
        return;
    }

    match level {
        "ERROR" => {
            let hint = troubleshooting_hint(category);
            tracing::error!(category, details = error_details, hint, "{}", message);
        }
        "WARN" => tracing::warn!(category, details = error_details, "{}", message),
        "INFO" => tracing::info!(category, details = error_details, "{}", message),
        _ => tracing::debug!(category, details = error_details, "{}", message),
    }
}

fn troubleshooting_hint(category: &str) -> Option<&'static str> {
    match category {
        "CREDENTIALS" => Some(
            "Check Windows Credential Manager (Control Panel > Credential Manager); \
             credentials of another user or logon session are not visible",
        ),
        "ENUMERATION" => Some(
            "Records can disappear between enumeration and read when another process deletes them",
        ),
        _ => None,
    }
}
