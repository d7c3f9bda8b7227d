//! Windows Credential Manager adapter
//!
//! Thin binding of [`CredentialApi`] to `CredReadW`, `CredWriteW`,
//! `CredDeleteW`, `CredEnumerateW` and `CredFree`. Blocks returned by the OS
//! are handed out as-is: `NativeCredential` has the same layout as
//! `CREDENTIALW`, so the pointers are only cast, never copied.

use crate::core::native::{to_wide, CredentialApi, NativeCredential, NativeError, RawCredentialArray};
use crate::core::types::{CredentialRecord, CredentialType};
use once_cell::sync::Lazy;
use std::ffi::c_void;
use std::sync::Arc;
use tracing::debug;
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::FILETIME;
use windows::Win32::Security::Credentials::{
    CredDeleteW, CredEnumerateW, CredFree, CredReadW, CredWriteW, CREDENTIALW,
    CREDENTIAL_ATTRIBUTEW, CRED_ENUMERATE_FLAGS, CRED_FLAGS, CRED_PERSIST, CRED_TYPE,
};

static SYSTEM_API: Lazy<Arc<WindowsCredentialApi>> = Lazy::new(|| Arc::new(WindowsCredentialApi::new()));

/// Process-wide Windows credential backend
pub fn system_api() -> Arc<dyn CredentialApi> {
    SYSTEM_API.clone()
}

/// Windows implementation of [`CredentialApi`]
///
/// Stateless; the credential set belongs to the logon session of the caller.
#[derive(Debug, Default)]
pub struct WindowsCredentialApi;

impl WindowsCredentialApi {
    pub fn new() -> Self {
        WindowsCredentialApi
    }
}

/// Recovers the Win32 error code wrapped in an `HRESULT_FROM_WIN32` value
fn native_error(error: windows::core::Error) -> NativeError {
    let hr = error.code().0 as u32;
    let code = if hr & 0xFFFF_0000 == 0x8007_0000 { hr & 0xFFFF } else { hr };
    NativeError::from_win32(code)
}

impl CredentialApi for WindowsCredentialApi {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn read(
        &self,
        target: &str,
        credential_type: CredentialType,
    ) -> Result<Option<*mut NativeCredential>, NativeError> {
        let target_name = to_wide(target);
        let mut pcred: *mut CREDENTIALW = std::ptr::null_mut();

        // SAFETY: `target_name` is NUL-terminated and outlives the call
        let result = unsafe {
            CredReadW(
                PCWSTR::from_raw(target_name.as_ptr()),
                CRED_TYPE(credential_type.as_raw()),
                0,
                &mut pcred,
            )
        };

        match result.map_err(native_error) {
            Ok(()) => Ok(Some(pcred.cast::<NativeCredential>())),
            Err(NativeError::NotFound) => Ok(None),
            Err(e) => {
                debug!(target_name = target, error = %e, "CredReadW failed");
                Err(e)
            }
        }
    }

    fn write(&self, record: &CredentialRecord) -> Result<(), NativeError> {
        let mut target_name = to_wide(&record.target_name);
        let mut comment = record.comment.as_deref().map(to_wide);
        let mut alias = record.target_alias.as_deref().map(to_wide);
        let mut username = record.username.as_deref().map(to_wide);

        let mut keywords: Vec<Vec<u16>> = record.attributes.iter().map(|a| to_wide(&a.keyword)).collect();
        let mut values: Vec<Vec<u8>> = record.attributes.iter().map(|a| a.value.clone()).collect();
        let mut attributes: Vec<CREDENTIAL_ATTRIBUTEW> = record
            .attributes
            .iter()
            .zip(keywords.iter_mut().zip(values.iter_mut()))
            .map(|(attribute, (keyword, value))| CREDENTIAL_ATTRIBUTEW {
                Keyword: PWSTR(keyword.as_mut_ptr()),
                Flags: attribute.flags,
                ValueSize: value.len() as u32,
                Value: value.as_mut_ptr(),
            })
            .collect();

        let secret = record.secret.as_bytes();
        let cred = CREDENTIALW {
            Flags: CRED_FLAGS(record.flags.bits()),
            Type: CRED_TYPE(record.credential_type.as_raw()),
            TargetName: PWSTR(target_name.as_mut_ptr()),
            Comment: optional_pwstr(&mut comment),
            LastWritten: FILETIME::default(),
            CredentialBlobSize: secret.len() as u32,
            CredentialBlob: if secret.is_empty() {
                std::ptr::null_mut()
            } else {
                secret.as_ptr() as *mut u8
            },
            Persist: CRED_PERSIST(record.persist.as_raw()),
            AttributeCount: attributes.len() as u32,
            Attributes: if attributes.is_empty() {
                std::ptr::null_mut()
            } else {
                attributes.as_mut_ptr()
            },
            TargetAlias: optional_pwstr(&mut alias),
            UserName: optional_pwstr(&mut username),
        };

        // SAFETY: every buffer `cred` points into lives until the end of this function;
        // CredWriteW only reads them
        unsafe { CredWriteW(&cred, 0) }.map_err(|e| {
            let error = native_error(e);
            debug!(target_name = %record.target_name, error = %error, "CredWriteW failed");
            error
        })
    }

    fn delete(&self, target: &str, credential_type: CredentialType) -> Result<(), NativeError> {
        let target_name = to_wide(target);

        // SAFETY: `target_name` is NUL-terminated and outlives the call
        unsafe {
            CredDeleteW(
                PCWSTR::from_raw(target_name.as_ptr()),
                CRED_TYPE(credential_type.as_raw()),
                0,
            )
        }
        .map_err(native_error)
    }

    fn enumerate(&self, filter: Option<&str>) -> Result<RawCredentialArray, NativeError> {
        let filter_wide = filter.map(to_wide);
        let filter_ptr = filter_wide
            .as_ref()
            .map_or(PCWSTR::null(), |f| PCWSTR::from_raw(f.as_ptr()));

        let mut count = 0u32;
        let mut pcredentials: *mut *mut CREDENTIALW = std::ptr::null_mut();

        // SAFETY: `filter_wide` outlives the call; out-pointers are valid locals
        let result = unsafe { CredEnumerateW(filter_ptr, CRED_ENUMERATE_FLAGS(0), &mut count, &mut pcredentials) };

        match result.map_err(native_error) {
            Ok(()) => Ok(RawCredentialArray {
                items: pcredentials.cast::<*mut NativeCredential>(),
                count: count as usize,
            }),
            Err(NativeError::NotFound) => Ok(RawCredentialArray::empty()),
            Err(e) => Err(e),
        }
    }

    unsafe fn free(&self, block: *mut c_void) {
        if !block.is_null() {
            CredFree(block as *const c_void);
        }
    }
}

fn optional_pwstr(buffer: &mut Option<Vec<u16>>) -> PWSTR {
    buffer.as_mut().map_or(PWSTR::null(), |b| PWSTR(b.as_mut_ptr()))
}
