//! Error types for CredSweep
//!
//! This module defines the error type shared by the credential entity, the
//! handle guards and the infrastructure layer, providing structured error
//! handling with context and user-friendly messages.

use crate::core::native::NativeError;
use std::io;
use thiserror::Error;

/// Main error type for CredSweep
///
/// Expected absence of a credential is never an error: `load` and `delete`
/// report it as `false`. Everything here is either caller misuse, an access
/// failure, or an opaque native failure surfaced to the caller.
///
/// # Architecture Notes
/// - Uses thiserror for automatic Display and Error trait implementations
/// - Each variant includes contextual information for debugging
/// - #[source] attribute enables error chain traversal
#[derive(Debug, Error)]
pub enum AppError {
    /// Field access or operation on a credential after `dispose`
    #[error("Cannot access a disposed object: {object}")]
    ObjectDisposed {
        object: &'static str,
    },

    /// Operation called in a state where it cannot run (e.g. empty target)
    #[error("Invalid operation '{operation}': {reason}")]
    InvalidOperation {
        operation: &'static str,
        reason: String,
    },

    /// Argument rejected before any native call was made
    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: String,
    },

    /// Native credential access is not permitted for this process
    #[error("Native credential access denied: {operation}")]
    PermissionDenied {
        operation: String,
    },

    /// The credential store reported a failure
    #[error("Credential store error: {operation}")]
    NativeFailure {
        operation: String,
        #[source]
        source: NativeError,
    },

    /// A native credential record could not be converted into a managed one
    #[error("Malformed credential record field '{field}': {reason}")]
    Marshal {
        field: &'static str,
        reason: String,
    },

    /// Settings file could not be parsed
    #[error("Invalid settings file: {path}")]
    Config {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// File I/O error
    #[error("File I/O error: {path}")]
    IoError {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Generic error with context
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl AppError {
    /// Returns an error code for categorization
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ObjectDisposed { .. } => "OBJECT_DISPOSED",
            AppError::InvalidOperation { .. } => "INVALID_OPERATION",
            AppError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            AppError::PermissionDenied { .. } => "PERMISSION_DENIED",
            AppError::NativeFailure { .. } => "NATIVE_FAILURE",
            AppError::Marshal { .. } => "MARSHAL",
            AppError::Config { .. } => "CONFIG",
            AppError::IoError { .. } => "IO_ERROR",
            AppError::Other { .. } => "GENERAL",
        }
    }

    /// Returns a user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            AppError::ObjectDisposed { object } => {
                format!("The {} has already been disposed and can no longer be used", object)
            }
            AppError::InvalidOperation { operation, reason } => {
                format!("Cannot {}: {}", operation, reason)
            }
            AppError::InvalidArgument { argument, reason } => {
                format!("Invalid value for '{}': {}", argument, reason)
            }
            AppError::PermissionDenied { operation } => {
                format!("Access to the credential store is not permitted ({})", operation)
            }
            AppError::NativeFailure { operation, source } => {
                format!("Failed to {}: {}", operation, source)
            }
            AppError::Marshal { field, reason } => {
                format!("Stored credential has an unreadable {}: {}", field, reason)
            }
            AppError::Config { path, .. } => {
                format!("Failed to read settings from {}", path)
            }
            AppError::IoError { path, .. } => {
                format!("Failed to access file: {}", path)
            }
            AppError::Other { message, .. } => message.clone(),
        }
    }

    /// Returns optional remediation steps for the error
    pub fn remediation(&self) -> Option<String> {
        match self {
            AppError::PermissionDenied { .. } => Some(
                "Native access is disabled by CREDSWEEP_NATIVE_ACCESS or settings.json; re-enable it to use the credential store.".to_string(),
            ),
            AppError::NativeFailure { source, .. } => match source {
                NativeError::AccessDenied => {
                    Some("Run the process as the user that owns the credential.".to_string())
                }
                NativeError::NoLogonSession => Some(
                    "The credential store is unavailable for this logon session (e.g. a network logon or service account).".to_string(),
                ),
                _ => None,
            },
            AppError::Config { .. } => {
                Some("Fix or remove settings.json in the application data directory.".to_string())
            }
            _ => None,
        }
    }

    /// Returns the category for error logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::ObjectDisposed { .. } |
            AppError::InvalidOperation { .. } |
            AppError::InvalidArgument { .. } => "USAGE",

            AppError::PermissionDenied { .. } |
            AppError::NativeFailure { .. } |
            AppError::Marshal { .. } => "CREDENTIALS",

            AppError::Config { .. } |
            AppError::IoError { .. } => "FILE_SYSTEM",

            AppError::Other { .. } => "GENERAL",
        }
    }

    /// Shorthand used by every entity accessor
    pub(crate) fn disposed(object: &'static str) -> Self {
        AppError::ObjectDisposed { object }
    }
}

// Serialized shape for callers that report errors as JSON
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AppError", 4)?;
        state.serialize_field("message", &self.user_message())?;
        state.serialize_field("code", &self.code())?;
        state.serialize_field("category", &self.category())?;
        state.serialize_field("remediation", &self.remediation())?;
        state.end()
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.user_message()
    }
}

// Convenience conversions from common error types
impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Other {
            message: format!("I/O error: {}", err),
            source: Some(err.into()),
        }
    }
}
