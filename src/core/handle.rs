//! Scoped owners of native credential memory
//!
//! [`NativeCredentialHandle`] owns one record returned by a read;
//! [`NativeCredentialList`] owns the pointer buffer returned by an enumeration.
//! Both free their block exactly once, in `Drop`, on every exit path. Neither
//! is `Clone`, and the raw pointers never leave them.

use crate::core::native::{read_bytes, read_wide, CredentialApi, NativeCredential, RawCredentialArray};
use crate::core::types::{
    CredentialAttribute, CredentialFlags, CredentialRecord, CredentialType, PersistScope,
    SecretBytes,
};
use crate::errors::AppError;
use std::ffi::c_void;
use std::sync::Arc;
use tracing::trace;

/// Target and username of an enumerated record, read without validating the rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialIdentity {
    pub target_name: String,
    pub username: Option<String>,
}

/// Owner of a single native credential block
pub struct NativeCredentialHandle {
    api: Arc<dyn CredentialApi>,
    ptr: *mut NativeCredential,
}

impl NativeCredentialHandle {
    /// Takes ownership of a block returned by [`CredentialApi::read`]
    ///
    /// # Returns
    /// * `Ok(handle)` - The block is now freed when the handle drops
    /// * `Err(AppError::InvalidArgument)` - `raw` is null; nothing is owned
    pub fn acquire(api: Arc<dyn CredentialApi>, raw: *mut NativeCredential) -> Result<Self, AppError> {
        if raw.is_null() {
            return Err(AppError::InvalidArgument {
                argument: "handle",
                reason: "native credential handle is null".to_string(),
            });
        }
        Ok(NativeCredentialHandle { api, ptr: raw })
    }

    /// Copies every field of the owned block into a managed record
    ///
    /// Can be called any number of times before the handle is released.
    pub fn materialize(&self) -> Result<CredentialRecord, AppError> {
        // SAFETY: `ptr` is non-null and owned by us until drop
        unsafe { materialize(&*self.ptr) }
    }

    /// Ends the handle's scope now instead of at the end of the enclosing block
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for NativeCredentialHandle {
    fn drop(&mut self) {
        trace!(backend = self.api.name(), "Releasing native credential block");
        // SAFETY: `ptr` came from `read` of this api and is freed only here
        unsafe { self.api.free(self.ptr as *mut c_void) };
    }
}

/// Owner of an enumeration buffer
///
/// Elements are borrowed views into the buffer; only the buffer itself is freed.
pub struct NativeCredentialList {
    api: Arc<dyn CredentialApi>,
    items: *mut *mut NativeCredential,
    count: usize,
}

impl NativeCredentialList {
    /// Takes ownership of a buffer returned by [`CredentialApi::enumerate`]
    ///
    /// A null buffer is accepted only with a zero count (nothing was allocated).
    pub fn acquire(api: Arc<dyn CredentialApi>, raw: RawCredentialArray) -> Result<Self, AppError> {
        if raw.items.is_null() && raw.count != 0 {
            return Err(AppError::InvalidArgument {
                argument: "handle",
                reason: format!("enumeration buffer is null but reports {} records", raw.count),
            });
        }
        Ok(NativeCredentialList {
            api,
            items: raw.items,
            count: raw.count,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Reads only target and username of element `index`
    ///
    /// # Returns
    /// * `None` - `index` is past the end
    /// * `Some(Err(_))` - Element is null or its target/username cannot be decoded
    pub fn identity_at(&self, index: usize) -> Option<Result<CredentialIdentity, AppError>> {
        let native = self.element(index)?;
        Some(native.and_then(|native| {
            // SAFETY: element pointers stay valid while the buffer is owned
            unsafe { identity(native) }
        }))
    }

    /// Fully materializes element `index`
    pub fn record_at(&self, index: usize) -> Option<Result<CredentialRecord, AppError>> {
        let native = self.element(index)?;
        Some(native.and_then(|native| {
            // SAFETY: as above
            unsafe { materialize(native) }
        }))
    }

    fn element(&self, index: usize) -> Option<Result<&NativeCredential, AppError>> {
        if index >= self.count {
            return None;
        }
        // SAFETY: `items` holds `count` pointers and is non-null when count > 0
        let ptr = unsafe { *self.items.add(index) };
        if ptr.is_null() {
            return Some(Err(AppError::Marshal {
                field: "credential",
                reason: format!("enumeration entry {} is null", index),
            }));
        }
        // SAFETY: non-null entries point to records inside the owned buffer
        Some(Ok(unsafe { &*ptr }))
    }
}

impl Drop for NativeCredentialList {
    fn drop(&mut self) {
        if self.items.is_null() {
            return;
        }
        trace!(
            backend = self.api.name(),
            count = self.count,
            "Releasing native enumeration buffer"
        );
        // SAFETY: `items` came from `enumerate` of this api and is freed only here
        unsafe { self.api.free(self.items as *mut c_void) };
    }
}

/// # Safety
/// Every pointer in `native` must be null or valid for the lengths it declares.
unsafe fn identity(native: &NativeCredential) -> Result<CredentialIdentity, AppError> {
    let target_name = read_wide(native.target_name, "target_name")?.ok_or_else(|| AppError::Marshal {
        field: "target_name",
        reason: "target name is null".to_string(),
    })?;
    let username = read_wide(native.user_name, "user_name")?;
    Ok(CredentialIdentity {
        target_name,
        username,
    })
}

/// Copies a native record into owned memory
///
/// # Safety
/// Every pointer in `native` must be null or valid for the lengths it declares.
unsafe fn materialize(native: &NativeCredential) -> Result<CredentialRecord, AppError> {
    let CredentialIdentity {
        target_name,
        username,
    } = identity(native)?;

    let credential_type = CredentialType::from_raw(native.credential_type).ok_or_else(|| AppError::Marshal {
        field: "credential_type",
        reason: format!("unknown credential type {}", native.credential_type),
    })?;
    let persist = PersistScope::from_raw(native.persist).ok_or_else(|| AppError::Marshal {
        field: "persist",
        reason: format!("unknown persistence scope {}", native.persist),
    })?;

    let secret = SecretBytes::new(read_bytes(
        native.credential_blob,
        native.credential_blob_size as usize,
        "credential_blob",
    )?);

    let attribute_count = native.attribute_count as usize;
    if attribute_count > 0 && native.attributes.is_null() {
        return Err(AppError::Marshal {
            field: "attributes",
            reason: format!("null attribute table with {} entries", attribute_count),
        });
    }
    let mut attributes = Vec::with_capacity(attribute_count);
    for i in 0..attribute_count {
        let attribute = &*native.attributes.add(i);
        let keyword = read_wide(attribute.keyword, "attribute_keyword")?.unwrap_or_default();
        let value = read_bytes(attribute.value, attribute.value_size as usize, "attribute_value")?;
        attributes.push(CredentialAttribute {
            keyword,
            flags: attribute.flags,
            value,
        });
    }

    Ok(CredentialRecord {
        flags: CredentialFlags::from_bits_retain(native.flags),
        credential_type,
        target_name,
        comment: read_wide(native.comment, "comment")?,
        last_written: native.last_written.to_datetime(),
        secret,
        persist,
        attributes,
        target_alias: read_wide(native.target_alias, "target_alias")?,
        username,
    })
}
