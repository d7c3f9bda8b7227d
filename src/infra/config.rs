//! Runtime settings
//!
//! Loaded once per process from `settings.json` in the application data
//! directory, with environment variables taking precedence.

use crate::errors::AppError;
use crate::infra::paths;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const ENV_DEBUG: &str = "CREDSWEEP_DEBUG";
pub const ENV_LOG_FILTER: &str = "CREDSWEEP_LOG";
pub const ENV_LOG_DIR: &str = "CREDSWEEP_LOG_DIR";
pub const ENV_NATIVE_ACCESS: &str = "CREDSWEEP_NATIVE_ACCESS";

static GLOBAL: Lazy<Settings> = Lazy::new(|| match Settings::load() {
    Ok(settings) => settings,
    Err(e) => {
        tracing::warn!(error = %e, "Falling back to default settings");
        Settings::default()
    }
});

/// Process settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Enables the category debug log and lowers the default filter to `debug`
    pub debug: bool,
    /// `tracing_subscriber::EnvFilter` directive
    pub log_filter: String,
    /// Directory for the rolling log file; no file logging when unset
    pub log_dir: Option<PathBuf>,
    /// Whether the native credential store may be called at all
    pub native_access: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            debug: false,
            log_filter: "info".to_string(),
            log_dir: None,
            native_access: true,
        }
    }
}

impl Settings {
    /// Reads the settings file if present, then applies environment overrides
    pub fn load() -> Result<Self, AppError> {
        let path = paths::get_settings_path();
        let mut settings = if path.is_file() {
            Self::from_file(&path)?
        } else {
            Settings::default()
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Parses a JSON settings file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path).map_err(|source| AppError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|e| AppError::Config {
            path: path.display().to_string(),
            source: e.into(),
        })
    }

    /// Overrides fields from environment-style `lookup`
    ///
    /// Unparseable boolean values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(debug) = lookup(ENV_DEBUG).as_deref().and_then(parse_flag) {
            self.debug = debug;
        }
        if let Some(filter) = lookup(ENV_LOG_FILTER).filter(|f| !f.trim().is_empty()) {
            self.log_filter = filter;
        }
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|d| !d.trim().is_empty()) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(allowed) = lookup(ENV_NATIVE_ACCESS).as_deref().and_then(parse_flag) {
            self.native_access = allowed;
        }
    }

    /// Filter directive actually used by the subscriber
    pub fn effective_filter(&self) -> &str {
        if self.debug && self.log_filter == "info" {
            "debug"
        } else {
            &self.log_filter
        }
    }

    /// Settings shared by the whole process, loaded on first use
    pub fn global() -> &'static Settings {
        &GLOBAL
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "allow" => Some(true),
        "0" | "false" | "no" | "off" | "deny" => Some(false),
        _ => None,
    }
}
