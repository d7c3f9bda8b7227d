//! Path utilities for CredSweep
//!
//! Provides centralized path management for the application data directory,
//! the settings file and the log directory.

use crate::errors::AppError;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "CredSweep";
const SETTINGS_FILE_NAME: &str = "settings.json";
const LOG_DIR_NAME: &str = "logs";

/// Resolves the application data directory without touching the filesystem.
///
/// # Returns
/// `%APPDATA%\CredSweep`, falling back to `%LOCALAPPDATA%\CredSweep`, then
/// `.\CredSweep` when neither variable is set.
pub fn resolve_app_dir<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());
    let root = non_empty("APPDATA")
        .or_else(|| non_empty("LOCALAPPDATA"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    root.join(APP_DIR_NAME)
}

/// Gets the CredSweep application data directory, creating it if needed.
///
/// # Returns
/// * `Ok(PathBuf)` - Path to the directory
/// * `Err(AppError::IoError)` - Directory could not be created
///
/// # Side Effects
/// - Creates the CredSweep directory and its parents if they don't exist
pub fn get_app_dir() -> Result<PathBuf, AppError> {
    let dir = resolve_app_dir(|key| std::env::var(key).ok());
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Gets the full path to the settings file.
///
/// Does not create anything: a missing settings file means defaults.
pub fn get_settings_path() -> PathBuf {
    resolve_app_dir(|key| std::env::var(key).ok()).join(SETTINGS_FILE_NAME)
}

/// Gets the default log directory, creating it if needed.
///
/// # Side Effects
/// - Creates `CredSweep\logs` if it doesn't exist
pub fn get_log_dir() -> Result<PathBuf, AppError> {
    let dir = get_app_dir()?.join(LOG_DIR_NAME);
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Creates `dir` and its parents, mapping failures to `AppError::IoError`.
pub fn ensure_dir(dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(dir).map_err(|source| AppError::IoError {
        path: dir.display().to_string(),
        source,
    })
}
