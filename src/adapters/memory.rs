//! In-memory credential store
//!
//! Implements [`CredentialApi`] over an ordered list of records, handing out
//! native blocks with exactly the layout the Windows store uses. Every block it
//! hands out is tracked until freed, so tests can check that each read and
//! each enumeration buffer is released exactly once.

use crate::core::native::{
    to_wide, CredentialApi, NativeCredential, NativeCredentialAttribute, NativeError,
    NativeFileTime, RawCredentialArray,
};
use crate::core::types::{CredentialRecord, CredentialType, SecretBytes};
use chrono::Utc;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Call counters, for assertions in tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallStats {
    pub reads: usize,
    pub writes: usize,
    pub deletes: usize,
    pub enumerations: usize,
    pub frees: usize,
    /// Frees of pointers that were never handed out or were already freed
    pub invalid_frees: usize,
}

/// One record laid out natively, plus the buffers its pointers refer to
///
/// The buffers are heap allocations, so the pointers stay valid when the
/// block itself is moved into its `Box`.
struct NativeBlock {
    native: NativeCredential,
    _target: Vec<u16>,
    _comment: Option<Vec<u16>>,
    _alias: Option<Vec<u16>>,
    _username: Option<Vec<u16>>,
    _secret: SecretBytes,
    _attributes: Vec<NativeCredentialAttribute>,
    _keywords: Vec<Vec<u16>>,
    _values: Vec<Vec<u8>>,
}

enum Allocation {
    Record { _block: Box<NativeBlock> },
    Array {
        _items: Vec<*mut NativeCredential>,
        _blocks: Vec<Box<NativeBlock>>,
    },
}

// SAFETY: the raw pointers inside an allocation only point into heap buffers
// owned by that same allocation, and the store never dereferences them.
unsafe impl Send for Allocation {}

#[derive(Default)]
struct State {
    records: Vec<CredentialRecord>,
    allocations: HashMap<usize, Allocation>,
    read_failures: HashMap<String, NativeError>,
    enumerate_failure: Option<NativeError>,
    stats: CallStats,
}

impl State {
    fn position(&self, target: &str, credential_type: CredentialType) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.target_name == target && r.credential_type == credential_type)
    }

    fn upsert(&mut self, record: CredentialRecord) {
        match self.position(&record.target_name, record.credential_type) {
            Some(index) => self.records[index] = record,
            None => self.records.push(record),
        }
    }
}

/// Deterministic credential store kept in process memory
///
/// Keys are exact `(target, type)` pairs; enumeration returns records in
/// insertion order. Thread-safe through an internal mutex.
#[derive(Default)]
pub struct InMemoryCredentialApi {
    state: Mutex<State>,
}

impl InMemoryCredentialApi {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `records`, in order
    pub fn with_records(records: impl IntoIterator<Item = CredentialRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Seeds or replaces a record without counting a write
    pub fn insert(&self, record: CredentialRecord) {
        self.state().upsert(record);
    }

    /// Removes a record behind the caller's back (simulates another process)
    pub fn remove(&self, target: &str, credential_type: CredentialType) -> bool {
        let mut state = self.state();
        match state.position(target, credential_type) {
            Some(index) => {
                state.records.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, target: &str, credential_type: CredentialType) -> bool {
        self.state().position(target, credential_type).is_some()
    }

    /// All stored keys, in enumeration order
    pub fn keys(&self) -> Vec<(String, CredentialType)> {
        self.state()
            .records
            .iter()
            .map(|r| (r.target_name.clone(), r.credential_type))
            .collect()
    }

    /// Managed copy of a stored record, bypassing native marshaling
    pub fn get(&self, target: &str, credential_type: CredentialType) -> Option<CredentialRecord> {
        let state = self.state();
        state
            .position(target, credential_type)
            .map(|index| state.records[index].clone())
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every read of `target` fail with `error`
    pub fn fail_reads_for(&self, target: &str, error: NativeError) {
        self.state().read_failures.insert(target.to_string(), error);
    }

    /// Makes the next enumerations fail with `error` (`None` clears it)
    pub fn fail_enumeration(&self, error: Option<NativeError>) {
        self.state().enumerate_failure = error;
    }

    pub fn stats(&self) -> CallStats {
        self.state().stats
    }

    pub fn reads(&self) -> usize {
        self.stats().reads
    }

    pub fn deletes(&self) -> usize {
        self.stats().deletes
    }

    pub fn enumerations(&self) -> usize {
        self.stats().enumerations
    }

    pub fn frees(&self) -> usize {
        self.stats().frees
    }

    pub fn invalid_frees(&self) -> usize {
        self.stats().invalid_frees
    }

    /// Blocks handed out and not yet freed
    pub fn live_allocations(&self) -> usize {
        self.state().allocations.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialApi for InMemoryCredentialApi {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(
        &self,
        target: &str,
        credential_type: CredentialType,
    ) -> Result<Option<*mut NativeCredential>, NativeError> {
        let mut state = self.state();
        state.stats.reads += 1;

        if let Some(error) = state.read_failures.get(target) {
            return Err(*error);
        }

        let Some(index) = state.position(target, credential_type) else {
            return Ok(None);
        };

        let mut block = native_block(&state.records[index]);
        let ptr: *mut NativeCredential = &mut block.native;
        state.allocations.insert(ptr as usize, Allocation::Record { _block: block });
        Ok(Some(ptr))
    }

    fn write(&self, record: &CredentialRecord) -> Result<(), NativeError> {
        let mut state = self.state();
        state.stats.writes += 1;

        if let Err(reason) = record.check_limits() {
            debug!(target_name = %record.target_name, %reason, "Rejecting credential write");
            return Err(NativeError::InvalidArgument(NativeError::ERROR_INVALID_PARAMETER));
        }

        let mut stored = record.clone();
        // Stamp with the precision the native timestamp can carry
        stored.last_written = NativeFileTime::from_datetime(Utc::now()).to_datetime();
        state.upsert(stored);
        Ok(())
    }

    fn delete(&self, target: &str, credential_type: CredentialType) -> Result<(), NativeError> {
        let mut state = self.state();
        state.stats.deletes += 1;

        match state.position(target, credential_type) {
            Some(index) => {
                state.records.remove(index);
                Ok(())
            }
            None => Err(NativeError::NotFound),
        }
    }

    fn enumerate(&self, filter: Option<&str>) -> Result<RawCredentialArray, NativeError> {
        let mut state = self.state();
        state.stats.enumerations += 1;

        if let Some(error) = state.enumerate_failure {
            return Err(error);
        }

        let mut blocks: Vec<Box<NativeBlock>> = state
            .records
            .iter()
            .filter(|record| matches_filter(&record.target_name, filter))
            .map(native_block)
            .collect();

        // Always a real allocation, even for zero records, so every call has one buffer to free
        let mut items: Vec<*mut NativeCredential> = Vec::with_capacity(blocks.len().max(1));
        items.extend(blocks.iter_mut().map(|block| &mut block.native as *mut NativeCredential));

        let raw = RawCredentialArray {
            items: items.as_mut_ptr(),
            count: items.len(),
        };
        state.allocations.insert(
            raw.items as usize,
            Allocation::Array {
                _items: items,
                _blocks: blocks,
            },
        );
        Ok(raw)
    }

    unsafe fn free(&self, block: *mut c_void) {
        if block.is_null() {
            return;
        }

        let mut state = self.state();
        match state.allocations.remove(&(block as usize)) {
            Some(_) => state.stats.frees += 1,
            None => {
                state.stats.invalid_frees += 1;
                warn!(address = ?block, "Free of a block this store does not own");
            }
        }
    }
}

/// `prefix*` matches by prefix, anything else matches exactly
fn matches_filter(target: &str, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(pattern) => match pattern.strip_suffix('*') {
            Some(prefix) => target.starts_with(prefix),
            None => target == pattern,
        },
    }
}

fn optional_wide(text: Option<&str>) -> Option<Vec<u16>> {
    text.map(to_wide)
}

fn wide_ptr(buffer: &mut Option<Vec<u16>>) -> *mut u16 {
    buffer.as_mut().map_or(ptr::null_mut(), |b| b.as_mut_ptr())
}

fn native_block(record: &CredentialRecord) -> Box<NativeBlock> {
    let mut target = to_wide(&record.target_name);
    let mut comment = optional_wide(record.comment.as_deref());
    let mut alias = optional_wide(record.target_alias.as_deref());
    let mut username = optional_wide(record.username.as_deref());
    let secret = record.secret.clone();

    let mut keywords: Vec<Vec<u16>> = record.attributes.iter().map(|a| to_wide(&a.keyword)).collect();
    let mut values: Vec<Vec<u8>> = record.attributes.iter().map(|a| a.value.clone()).collect();
    let mut attributes: Vec<NativeCredentialAttribute> = record
        .attributes
        .iter()
        .zip(keywords.iter_mut().zip(values.iter_mut()))
        .map(|(attribute, (keyword, value))| NativeCredentialAttribute {
            keyword: keyword.as_mut_ptr(),
            flags: attribute.flags,
            value_size: value.len() as u32,
            value: if value.is_empty() { ptr::null_mut() } else { value.as_mut_ptr() },
        })
        .collect();

    let native = NativeCredential {
        flags: record.flags.bits(),
        credential_type: record.credential_type.as_raw(),
        target_name: target.as_mut_ptr(),
        comment: wide_ptr(&mut comment),
        last_written: record
            .last_written
            .map(NativeFileTime::from_datetime)
            .unwrap_or_default(),
        credential_blob_size: secret.len() as u32,
        credential_blob: if secret.is_empty() {
            ptr::null_mut()
        } else {
            // Never written through; the native layout just declares it mutable
            secret.as_bytes().as_ptr() as *mut u8
        },
        persist: record.persist.as_raw(),
        attribute_count: attributes.len() as u32,
        attributes: if attributes.is_empty() {
            ptr::null_mut()
        } else {
            attributes.as_mut_ptr()
        },
        target_alias: wide_ptr(&mut alias),
        user_name: wide_ptr(&mut username),
    };

    Box::new(NativeBlock {
        native,
        _target: target,
        _comment: comment,
        _alias: alias,
        _username: username,
        _secret: secret,
        _attributes: attributes,
        _keywords: keywords,
        _values: values,
    })
}
