//! Credential store backends
//!
//! - **memory**: in-process store used by tests and dry runs
//! - **windows**: Windows Credential Manager (Windows only)

pub mod memory;

#[cfg(windows)]
pub mod windows;

pub use memory::{CallStats, InMemoryCredentialApi};

#[cfg(windows)]
pub use windows::{system_api, WindowsCredentialApi};
