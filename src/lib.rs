//! # CredSweep Library
//!
//! An object wrapper around the Windows Credential Manager: create, read,
//! enumerate and delete named credentials (target, type, username, secret)
//! without ever handing OS-allocated memory to the caller.
//!
//! ## Architecture
//!
//! The library is organized into modular components:
//!
//! - **core**: Credential entity, native handle guards, native record layout
//! - **adapters**: Credential store backends (Windows Credential Manager, in-memory)
//! - **errors**: Unified error handling with AppError
//! - **infra**: Infrastructure concerns (logging, settings, paths)
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn sweep() -> Result<(), credsweep_lib::AppError> {
//! use credsweep_lib::CredentialStore;
//!
//! let store = CredentialStore::system();
//! for credential in store.load_all()? {
//!     if credential.target()?.is_some_and(|t| t.starts_with("Qlik_")) {
//!         credential.delete()?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Considerations
//!
//! - Secrets are held as UTF-16LE bytes and zeroed when a credential is disposed
//! - Secrets are never logged (debug logs only show secret length)
//! - Every call into the credential store first demands the process-wide
//!   native access permission (see [`Settings::native_access`])
mod adapters;
mod core;
mod errors;
mod infra;

// Re-export commonly used types
pub use crate::core::*;
pub use crate::errors::AppError;
pub use crate::infra::{
    debug_log, init_tracing, is_debug_mode, set_debug_mode, LoggingGuard, Settings,
};

pub use crate::adapters::{CallStats, InMemoryCredentialApi};

// Platform-specific adapters
#[cfg(windows)]
pub use crate::adapters::{system_api, WindowsCredentialApi};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn generic(target: &str, username: &str, secret: &str) -> CredentialRecord {
        let mut record = CredentialRecord::new(target, CredentialType::Generic);
        record.username = Some(username.to_string());
        record.secret = SecretBytes::from_utf16_str(secret);
        record
    }

    fn granted_store(api: &Arc<InMemoryCredentialApi>) -> CredentialStore {
        CredentialStore::new(api.clone()).with_permission(NativeAccessPermission::granted())
    }

    // ========================================================================
    // Sweep scenario: enumerate, filter on target, delete matches
    // ========================================================================

    mod sweep_tests {
        use super::*;

        #[test]
        fn test_sweep_deletes_only_matching_targets() {
            let api = Arc::new(InMemoryCredentialApi::with_records(vec![
                generic("Qlik_A", "svc", "one"),
                generic("Other", "me", "two"),
            ]));
            let store = granted_store(&api);

            let mut deleted = Vec::new();
            for credential in store.load_all().unwrap() {
                let target = credential.target().unwrap().unwrap_or_default().to_string();
                if target.contains("Qlik_") {
                    assert!(credential.delete().unwrap());
                    deleted.push(target);
                }
            }

            assert_eq!(deleted, vec!["Qlik_A".to_string()]);
            assert_eq!(api.keys(), vec![("Other".to_string(), CredentialType::Generic)]);
            assert_eq!(api.live_allocations(), 0);
            assert_eq!(api.invalid_frees(), 0);
        }

        #[test]
        fn test_second_sweep_finds_nothing() {
            let api = Arc::new(InMemoryCredentialApi::with_records(vec![
                generic("Qlik_A", "svc", "one"),
                generic("Qlik_B", "svc", "two"),
            ]));
            let store = granted_store(&api);

            let first = store
                .load_all()
                .unwrap()
                .filter(|c| c.target().unwrap().is_some_and(|t| t.contains("Qlik_")))
                .map(|c| c.delete().unwrap())
                .filter(|deleted| *deleted)
                .count();
            assert_eq!(first, 2);

            assert_eq!(store.load_all().unwrap().count(), 0);
            assert!(api.is_empty());
        }

        #[test]
        fn test_loaded_credentials_outlive_the_iterator() {
            let api = Arc::new(InMemoryCredentialApi::with_records(vec![generic(
                "Qlik_A", "svc", "pw",
            )]));
            let store = granted_store(&api);

            let loaded: Vec<Credential> = store.load_all().unwrap().collect();
            assert_eq!(api.live_allocations(), 0);

            assert_eq!(loaded[0].secret_text().unwrap().as_deref(), Some("pw"));
            assert!(loaded[0].delete().unwrap());
        }
    }

    // ========================================================================
    // Tests for the write path through the public surface
    // ========================================================================

    mod store_tests {
        use super::*;

        #[test]
        fn test_saved_credential_is_enumerated() {
            let api = Arc::new(InMemoryCredentialApi::new());
            let store = granted_store(&api);

            let credential = store
                .credential()
                .with_target("Qlik_Sense")
                .with_username("svc")
                .with_secret("pw");
            assert!(credential.save().unwrap());

            let targets: Vec<String> = store
                .load_all()
                .unwrap()
                .map(|c| c.target().unwrap().unwrap_or_default().to_string())
                .collect();
            assert_eq!(targets, vec!["Qlik_Sense".to_string()]);
        }

        #[test]
        fn test_store_debug_names_backend() {
            let api = Arc::new(InMemoryCredentialApi::new());
            let store = granted_store(&api);
            assert_eq!(store.backend(), "memory");
            assert!(format!("{:?}", store).contains("memory"));
        }

        #[test]
        fn test_credential_debug_hides_secret() {
            let api = Arc::new(InMemoryCredentialApi::new());
            let credential = granted_store(&api).credential().with_secret("hunter2");
            assert!(!format!("{:?}", credential).contains("hunter2"));
        }
    }
}
