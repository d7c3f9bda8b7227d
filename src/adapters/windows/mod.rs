//! Windows-specific adapters
//!
//! All Windows API calls are isolated here.

pub mod credential_manager;

pub use credential_manager::{system_api, WindowsCredentialApi};
