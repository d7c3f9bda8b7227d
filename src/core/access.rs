//! Native access permission
//!
//! A capability check demanded before every operation that reaches the
//! credential store. The process-wide value is computed once, under
//! `once_cell`'s initialization lock, from [`Settings`]; afterwards it is only read.

use crate::errors::AppError;
use crate::infra::config::Settings;
use once_cell::sync::Lazy;
use tracing::{debug, warn};

static PROCESS_PERMISSION: Lazy<NativeAccessPermission> = Lazy::new(|| {
    let permission = NativeAccessPermission::from_settings(Settings::global());
    debug!(granted = permission.is_granted(), "Native credential access initialized");
    permission
});

/// Whether this process may call into the native credential store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeAccessPermission {
    granted: bool,
}

impl NativeAccessPermission {
    pub const fn granted() -> Self {
        NativeAccessPermission { granted: true }
    }

    pub const fn denied() -> Self {
        NativeAccessPermission { granted: false }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        NativeAccessPermission {
            granted: settings.native_access,
        }
    }

    /// The permission shared by every store created without an explicit one
    pub fn process() -> Self {
        *PROCESS_PERMISSION
    }

    pub fn is_granted(&self) -> bool {
        self.granted
    }

    /// Fails with `PermissionDenied` unless access is granted
    pub fn demand(&self, operation: &str) -> Result<(), AppError> {
        if self.granted {
            return Ok(());
        }
        warn!(operation, "Native credential access denied");
        Err(AppError::PermissionDenied {
            operation: operation.to_string(),
        })
    }
}
