//! Core module - credential entity, native interop and domain types

pub mod access;
pub mod credential;
pub mod handle;
pub mod native;
pub mod types;

pub use access::NativeAccessPermission;
pub use credential::{Credential, CredentialStore, LoadAll};
pub use handle::{CredentialIdentity, NativeCredentialHandle, NativeCredentialList};
pub use native::{CredentialApi, NativeCredential, NativeError, NativeFileTime, RawCredentialArray};
pub use types::*;
