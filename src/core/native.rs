//! Native interop layer
//!
//! Defines the binary layout of a credential record exactly as the credential
//! store reads and writes it, the error codes the store reports, and the
//! [`CredentialApi`] trait through which records cross the process/OS boundary.
//!
//! Nothing in this module owns native memory. Pointers handed out by
//! [`CredentialApi::read`] and [`CredentialApi::enumerate`] belong to the caller
//! until they are passed to [`CredentialApi::free`]; the guards in
//! [`crate::core::handle`] are the only code that should hold them.

use crate::core::types::{CredentialRecord, CredentialType};
use crate::errors::AppError;
use chrono::{DateTime, Utc};
use std::ffi::c_void;
use thiserror::Error;

/// Difference between 1601-01-01 and 1970-01-01 in 100ns ticks
const FILETIME_UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// 64-bit timestamp split in two halves, as the store lays it out
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeFileTime {
    pub low_date_time: u32,
    pub high_date_time: u32,
}

impl NativeFileTime {
    pub fn ticks(self) -> u64 {
        (u64::from(self.high_date_time) << 32) | u64::from(self.low_date_time)
    }

    pub fn from_ticks(ticks: u64) -> Self {
        NativeFileTime {
            low_date_time: ticks as u32,
            high_date_time: (ticks >> 32) as u32,
        }
    }

    /// Zero means "never written"
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let ticks = i64::try_from(self.ticks()).ok()?;
        if ticks == 0 {
            return None;
        }
        let unix_ticks = ticks - FILETIME_UNIX_EPOCH_TICKS;
        let secs = unix_ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        DateTime::from_timestamp(secs, nanos)
    }

    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        let ticks = value
            .timestamp()
            .saturating_mul(TICKS_PER_SECOND)
            .saturating_add(i64::from(value.timestamp_subsec_nanos() / 100))
            .saturating_add(FILETIME_UNIX_EPOCH_TICKS);
        NativeFileTime::from_ticks(u64::try_from(ticks).unwrap_or(0))
    }
}

/// One application-defined attribute, native layout
#[repr(C)]
#[derive(Debug)]
pub struct NativeCredentialAttribute {
    pub keyword: *mut u16,
    pub flags: u32,
    pub value_size: u32,
    pub value: *mut u8,
}

/// One credential record, native layout
///
/// Field order, sizes and padding must match the store's own definition; the
/// store writes through these offsets directly.
#[repr(C)]
#[derive(Debug)]
pub struct NativeCredential {
    pub flags: u32,
    pub credential_type: u32,
    pub target_name: *mut u16,
    pub comment: *mut u16,
    pub last_written: NativeFileTime,
    pub credential_blob_size: u32,
    pub credential_blob: *mut u8,
    pub persist: u32,
    pub attribute_count: u32,
    pub attributes: *mut NativeCredentialAttribute,
    pub target_alias: *mut u16,
    pub user_name: *mut u16,
}

#[cfg(windows)]
const _: () = {
    use std::mem::{align_of, offset_of, size_of};
    use windows::Win32::Foundation::FILETIME;
    use windows::Win32::Security::Credentials::{CREDENTIALW, CREDENTIAL_ATTRIBUTEW};

    assert!(size_of::<NativeFileTime>() == size_of::<FILETIME>());

    assert!(size_of::<NativeCredential>() == size_of::<CREDENTIALW>());
    assert!(align_of::<NativeCredential>() == align_of::<CREDENTIALW>());
    assert!(offset_of!(NativeCredential, credential_type) == offset_of!(CREDENTIALW, Type));
    assert!(offset_of!(NativeCredential, target_name) == offset_of!(CREDENTIALW, TargetName));
    assert!(offset_of!(NativeCredential, comment) == offset_of!(CREDENTIALW, Comment));
    assert!(offset_of!(NativeCredential, last_written) == offset_of!(CREDENTIALW, LastWritten));
    assert!(offset_of!(NativeCredential, credential_blob_size) == offset_of!(CREDENTIALW, CredentialBlobSize));
    assert!(offset_of!(NativeCredential, credential_blob) == offset_of!(CREDENTIALW, CredentialBlob));
    assert!(offset_of!(NativeCredential, persist) == offset_of!(CREDENTIALW, Persist));
    assert!(offset_of!(NativeCredential, attribute_count) == offset_of!(CREDENTIALW, AttributeCount));
    assert!(offset_of!(NativeCredential, attributes) == offset_of!(CREDENTIALW, Attributes));
    assert!(offset_of!(NativeCredential, target_alias) == offset_of!(CREDENTIALW, TargetAlias));
    assert!(offset_of!(NativeCredential, user_name) == offset_of!(CREDENTIALW, UserName));

    assert!(size_of::<NativeCredentialAttribute>() == size_of::<CREDENTIAL_ATTRIBUTEW>());
    assert!(offset_of!(NativeCredentialAttribute, flags) == offset_of!(CREDENTIAL_ATTRIBUTEW, Flags));
    assert!(offset_of!(NativeCredentialAttribute, value_size) == offset_of!(CREDENTIAL_ATTRIBUTEW, ValueSize));
    assert!(offset_of!(NativeCredentialAttribute, value) == offset_of!(CREDENTIAL_ATTRIBUTEW, Value));
};

/// Buffer of record pointers returned by an enumeration
///
/// `items` is a single allocation; it is freed as a whole through
/// [`CredentialApi::free`], never element by element.
#[derive(Debug)]
pub struct RawCredentialArray {
    pub items: *mut *mut NativeCredential,
    pub count: usize,
}

impl RawCredentialArray {
    /// No buffer was allocated
    pub fn empty() -> Self {
        RawCredentialArray {
            items: std::ptr::null_mut(),
            count: 0,
        }
    }
}

/// Errors reported by the credential store
///
/// Passed through untouched; the layer never retries or reinterprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("no credential matches the given target and type")]
    NotFound,

    #[error("access denied")]
    AccessDenied,

    #[error("invalid argument (Win32 error {0})")]
    InvalidArgument(u32),

    #[error("no credential store is available for this logon session")]
    NoLogonSession,

    #[error("credential store failure (Win32 error {code})")]
    Failure { code: u32 },
}

impl NativeError {
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_INVALID_FLAGS: u32 = 1004;
    pub const ERROR_NOT_FOUND: u32 = 1168;
    pub const ERROR_NO_SUCH_LOGON_SESSION: u32 = 1312;
    pub const ERROR_BAD_USERNAME: u32 = 2202;

    pub fn from_win32(code: u32) -> Self {
        match code {
            Self::ERROR_NOT_FOUND => NativeError::NotFound,
            Self::ERROR_ACCESS_DENIED => NativeError::AccessDenied,
            Self::ERROR_INVALID_PARAMETER | Self::ERROR_INVALID_FLAGS | Self::ERROR_BAD_USERNAME => {
                NativeError::InvalidArgument(code)
            }
            Self::ERROR_NO_SUCH_LOGON_SESSION => NativeError::NoLogonSession,
            code => NativeError::Failure { code },
        }
    }

    /// Win32 error code equivalent
    pub fn code(&self) -> u32 {
        match self {
            NativeError::NotFound => Self::ERROR_NOT_FOUND,
            NativeError::AccessDenied => Self::ERROR_ACCESS_DENIED,
            NativeError::InvalidArgument(code) => *code,
            NativeError::NoLogonSession => Self::ERROR_NO_SUCH_LOGON_SESSION,
            NativeError::Failure { code } => *code,
        }
    }
}

/// Operations of the platform credential store
///
/// This trait abstracts the store to enable:
/// - Testing against a deterministic in-memory store that hands out the same layout
/// - Swapping the Windows Credential Manager for another backend
///
/// Implementations must be callable from any thread; they hold no per-call state.
pub trait CredentialApi: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Looks up one record by exact (target, type)
    ///
    /// # Returns
    /// * `Ok(Some(ptr))` - Record found; the caller now owns `ptr` until `free`
    /// * `Ok(None)` - No record with this key (not an error)
    /// * `Err(NativeError)` - The store failed
    fn read(
        &self,
        target: &str,
        credential_type: CredentialType,
    ) -> Result<Option<*mut NativeCredential>, NativeError>;

    /// Persists a record, replacing any record with the same (target, type)
    fn write(&self, record: &CredentialRecord) -> Result<(), NativeError>;

    /// Removes the record identified by (target, type)
    ///
    /// A missing record is reported as `Err(NativeError::NotFound)`.
    fn delete(&self, target: &str, credential_type: CredentialType) -> Result<(), NativeError>;

    /// Lists every record visible to the current security context
    ///
    /// # Arguments
    /// * `filter` - Target pattern (e.g. `"TERMSRV/*"`), or `None` for all records
    ///
    /// # Returns
    /// A single buffer of record pointers; no records is an empty array, not an error.
    fn enumerate(&self, filter: Option<&str>) -> Result<RawCredentialArray, NativeError>;

    /// Returns a block obtained from `read` or `enumerate` to the allocator
    ///
    /// # Safety
    /// `block` must have been returned by `read` (the record pointer) or
    /// `enumerate` (the `items` buffer) of this same instance, and must not
    /// have been freed already. No pointer into the block may be used afterwards.
    unsafe fn free(&self, block: *mut c_void);
}

/// Encodes text as a NUL-terminated UTF-16 buffer
pub(crate) fn to_wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Copies a NUL-terminated UTF-16 string out of native memory
///
/// # Safety
/// `ptr` must be null or point to a readable NUL-terminated UTF-16 string.
pub(crate) unsafe fn read_wide(
    ptr: *const u16,
    field: &'static str,
) -> Result<Option<String>, AppError> {
    if ptr.is_null() {
        return Ok(None);
    }

    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }

    let units = std::slice::from_raw_parts(ptr, len);
    String::from_utf16(units)
        .map(Some)
        .map_err(|e| AppError::Marshal {
            field,
            reason: e.to_string(),
        })
}

/// Copies `len` bytes out of native memory
///
/// # Safety
/// `ptr` must be null or point to at least `len` readable bytes.
pub(crate) unsafe fn read_bytes(
    ptr: *const u8,
    len: usize,
    field: &'static str,
) -> Result<Vec<u8>, AppError> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(AppError::Marshal {
            field,
            reason: format!("null pointer with length {}", len),
        });
    }
    Ok(std::slice::from_raw_parts(ptr, len).to_vec())
}
