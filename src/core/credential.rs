//! Credential entity
//!
//! [`Credential`] is the public object for one stored credential, identified
//! by its (target, type) pair. It owns its own fields only; the stored record
//! lives in the credential store and is reached through [`CredentialStore`].
//!
//! Expected absence is reported as `false` (`load`, `delete`, `save`); misuse
//! (empty target, use after `dispose`) and denied access are errors.

use crate::core::access::NativeAccessPermission;
use crate::core::handle::{NativeCredentialHandle, NativeCredentialList};
use crate::core::native::{CredentialApi, NativeError, RawCredentialArray};
use crate::core::types::{
    CredentialAttribute, CredentialFlags, CredentialRecord, CredentialType, PersistScope, SecretBytes,
};
use crate::errors::AppError;
use crate::infra::debug_log;
use chrono::{DateTime, Utc};
use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;
use tracing::{trace, warn};
use zeroize::Zeroize;

const OBJECT_NAME: &str = "Credential";

/// Credential backend plus the permission demanded before each call into it
///
/// Cheap to clone; every [`Credential`] carries one.
#[derive(Clone)]
pub struct CredentialStore {
    api: Arc<dyn CredentialApi>,
    permission: NativeAccessPermission,
}

impl CredentialStore {
    /// Wraps `api`, guarded by the process-wide permission
    pub fn new(api: Arc<dyn CredentialApi>) -> Self {
        CredentialStore {
            api,
            permission: NativeAccessPermission::process(),
        }
    }

    /// The Windows Credential Manager of the current user
    #[cfg(windows)]
    pub fn system() -> Self {
        Self::new(crate::adapters::windows::system_api())
    }

    pub fn with_permission(mut self, permission: NativeAccessPermission) -> Self {
        self.permission = permission;
        self
    }

    pub fn permission(&self) -> NativeAccessPermission {
        self.permission
    }

    pub fn backend(&self) -> &'static str {
        self.api.name()
    }

    /// New, empty credential bound to this store
    pub fn credential(&self) -> Credential {
        Credential::new(self.clone())
    }

    /// See [`Credential::load_all`]
    pub fn load_all(&self) -> Result<LoadAll, AppError> {
        Credential::load_all(self)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("backend", &self.api.name())
            .field("permission", &self.permission)
            .finish()
    }
}

/// One credential in the store
///
/// Fields can be changed freely until the credential is disposed; changing
/// target or type afterwards simply points the credential at another record.
/// After [`dispose`](Credential::dispose) every accessor and operation fails
/// with [`AppError::ObjectDisposed`]. Dropping a credential disposes it.
#[derive(Debug)]
pub struct Credential {
    store: CredentialStore,
    target: Option<String>,
    credential_type: CredentialType,
    username: Option<String>,
    secret: Option<SecretBytes>,
    comment: Option<String>,
    persist: PersistScope,
    last_written: Option<DateTime<Utc>>,
    // Carried through load/save untouched so a save never drops them
    flags: CredentialFlags,
    target_alias: Option<String>,
    attributes: Vec<CredentialAttribute>,
    disposed: bool,
}

impl Credential {
    /// Empty generic credential
    pub fn new(store: CredentialStore) -> Self {
        Credential {
            store,
            target: None,
            credential_type: CredentialType::default(),
            username: None,
            secret: None,
            comment: None,
            persist: PersistScope::default(),
            last_written: None,
            flags: CredentialFlags::NONE,
            target_alias: None,
            attributes: Vec::new(),
            disposed: false,
        }
    }

    /// Empty generic credential in the Windows Credential Manager
    #[cfg(windows)]
    pub fn system() -> Self {
        Self::new(CredentialStore::system())
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_type(mut self, credential_type: CredentialType) -> Self {
        self.credential_type = credential_type;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Secret text, stored as UTF-16LE
    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(SecretBytes::from_utf16_str(secret));
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_persist(mut self, persist: PersistScope) -> Self {
        self.persist = persist;
        self
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn target(&self) -> Result<Option<&str>, AppError> {
        self.ensure_live()?;
        Ok(self.target.as_deref())
    }

    pub fn set_target(&mut self, target: impl Into<String>) -> Result<(), AppError> {
        self.ensure_live()?;
        self.target = Some(target.into());
        Ok(())
    }

    pub fn credential_type(&self) -> Result<CredentialType, AppError> {
        self.ensure_live()?;
        Ok(self.credential_type)
    }

    pub fn set_credential_type(&mut self, credential_type: CredentialType) -> Result<(), AppError> {
        self.ensure_live()?;
        self.credential_type = credential_type;
        Ok(())
    }

    pub fn username(&self) -> Result<Option<&str>, AppError> {
        self.ensure_live()?;
        Ok(self.username.as_deref())
    }

    pub fn set_username(&mut self, username: Option<String>) -> Result<(), AppError> {
        self.ensure_live()?;
        self.username = username;
        Ok(())
    }

    pub fn secret(&self) -> Result<Option<&SecretBytes>, AppError> {
        self.ensure_live()?;
        Ok(self.secret.as_ref())
    }

    /// Secret decoded as UTF-16LE text
    pub fn secret_text(&self) -> Result<Option<String>, AppError> {
        self.ensure_live()?;
        self.secret
            .as_ref()
            .map(|secret| {
                secret.to_utf16_string().map_err(|e| AppError::Marshal {
                    field: "credential_blob",
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn set_secret(&mut self, secret: Option<&str>) -> Result<(), AppError> {
        self.ensure_live()?;
        self.secret = secret.map(SecretBytes::from_utf16_str);
        Ok(())
    }

    pub fn comment(&self) -> Result<Option<&str>, AppError> {
        self.ensure_live()?;
        Ok(self.comment.as_deref())
    }

    pub fn set_comment(&mut self, comment: Option<String>) -> Result<(), AppError> {
        self.ensure_live()?;
        self.comment = comment;
        Ok(())
    }

    pub fn persist(&self) -> Result<PersistScope, AppError> {
        self.ensure_live()?;
        Ok(self.persist)
    }

    pub fn set_persist(&mut self, persist: PersistScope) -> Result<(), AppError> {
        self.ensure_live()?;
        self.persist = persist;
        Ok(())
    }

    /// When the store last wrote the record; set by `load`
    pub fn last_written(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        self.ensure_live()?;
        Ok(self.last_written)
    }

    pub fn flags(&self) -> Result<CredentialFlags, AppError> {
        self.ensure_live()?;
        Ok(self.flags)
    }

    pub fn target_alias(&self) -> Result<Option<&str>, AppError> {
        self.ensure_live()?;
        Ok(self.target_alias.as_deref())
    }

    /// Application-defined attributes of the loaded record
    pub fn attributes(&self) -> Result<&[CredentialAttribute], AppError> {
        self.ensure_live()?;
        Ok(&self.attributes)
    }

    /// Reads the stored record for (target, type) into this credential
    ///
    /// # Returns
    /// * `Ok(true)` - Found; every field now reflects the stored record
    /// * `Ok(false)` - No such record; fields are unchanged
    /// * `Err(AppError)` - Disposed, empty target, access denied, store
    ///   failure, or a malformed stored record
    pub fn load(&mut self) -> Result<bool, AppError> {
        self.ensure_live()?;
        let target = self.require_target("load credential")?.to_string();
        self.store.permission.demand("read credential")?;

        let raw = match self.store.api.read(&target, self.credential_type) {
            Ok(Some(raw)) => raw,
            Ok(None) | Err(NativeError::NotFound) => {
                debug_log(
                    "DEBUG",
                    "CREDENTIALS",
                    &format!("No {} credential stored for '{}'", self.credential_type, target),
                    None,
                );
                return Ok(false);
            }
            Err(source) => {
                debug_log(
                    "ERROR",
                    "CREDENTIALS",
                    &format!("Failed to read credential '{}'", target),
                    Some(&source.to_string()),
                );
                return Err(AppError::NativeFailure {
                    operation: format!("read credential '{}'", target),
                    source,
                });
            }
        };

        let handle = NativeCredentialHandle::acquire(Arc::clone(&self.store.api), raw)?;
        let record = handle.materialize();
        handle.release();
        let record = record?;

        debug_log(
            "DEBUG",
            "CREDENTIALS",
            &format!("Loaded credential '{}'", record.target_name),
            Some(&format!("Secret length: {} bytes", record.secret.len())),
        );
        self.apply(record);
        Ok(true)
    }

    /// Writes this credential to the store, replacing any record with the same key
    ///
    /// # Returns
    /// * `Ok(true)` - Written
    /// * `Ok(false)` - The store rejected the write (logged)
    /// * `Err(AppError)` - Disposed, empty target or access denied
    pub fn save(&self) -> Result<bool, AppError> {
        self.ensure_live()?;
        let target = self.require_target("save credential")?;
        self.store.permission.demand("write credential")?;

        let record = self.to_record(target);
        match self.store.api.write(&record) {
            Ok(()) => {
                debug_log(
                    "INFO",
                    "CREDENTIALS",
                    &format!("Saved {} credential '{}'", record.credential_type, target),
                    None,
                );
                Ok(true)
            }
            Err(e) => {
                warn!(target_name = target, error = %e, "Credential write failed");
                Ok(false)
            }
        }
    }

    /// Removes the stored record for (target, type)
    ///
    /// # Returns
    /// * `Ok(true)` - Removed
    /// * `Ok(false)` - Missing record or any other store failure (logged)
    /// * `Err(AppError)` - Disposed, empty target or access denied; nothing was called
    pub fn delete(&self) -> Result<bool, AppError> {
        self.ensure_live()?;
        let target = self.require_target("delete credential")?;
        self.store.permission.demand("delete credential")?;

        match self.store.api.delete(target, self.credential_type) {
            Ok(()) => {
                debug_log(
                    "INFO",
                    "CREDENTIALS",
                    &format!("Deleted credential '{}'", target),
                    None,
                );
                Ok(true)
            }
            Err(NativeError::NotFound) => {
                debug_log(
                    "DEBUG",
                    "CREDENTIALS",
                    &format!("Nothing to delete for '{}'", target),
                    None,
                );
                Ok(false)
            }
            Err(e) => {
                warn!(target_name = target, error = %e, "Credential delete failed");
                Ok(false)
            }
        }
    }

    /// Every credential in `store` that can be read back, in store order
    ///
    /// Each enumerated record seeds a new credential with its target and
    /// username and the default type, which is then [`load`](Credential::load)ed.
    /// Consuming the iterator performs one read per enumerated record; records
    /// that vanish or fail to load in between are skipped, not reported.
    pub fn load_all(store: &CredentialStore) -> Result<LoadAll, AppError> {
        Self::enumerate(store, None)
    }

    /// Like [`load_all`](Credential::load_all), restricted to targets matching
    /// `pattern` (e.g. `"TERMSRV/*"`)
    pub fn load_matching(store: &CredentialStore, pattern: &str) -> Result<LoadAll, AppError> {
        Self::enumerate(store, Some(pattern))
    }

    fn enumerate(store: &CredentialStore, filter: Option<&str>) -> Result<LoadAll, AppError> {
        store.permission.demand("enumerate credentials")?;

        let raw = match store.api.enumerate(filter) {
            Ok(raw) => raw,
            Err(NativeError::NotFound) => RawCredentialArray::empty(),
            Err(source) => {
                debug_log(
                    "ERROR",
                    "ENUMERATION",
                    "Failed to enumerate credentials",
                    Some(&source.to_string()),
                );
                return Err(AppError::NativeFailure {
                    operation: "enumerate credentials".to_string(),
                    source,
                });
            }
        };
        let list = NativeCredentialList::acquire(Arc::clone(&store.api), raw)?;

        debug_log(
            "INFO",
            "ENUMERATION",
            &format!("Enumerated {} credentials", list.len()),
            filter.map(|f| format!("Filter: {}", f)).as_deref(),
        );

        Ok(LoadAll {
            store: store.clone(),
            list,
            next_index: 0,
        })
    }

    /// Marks the credential unusable and wipes the secret; safe to call repeatedly
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(secret) = self.secret.as_mut() {
            secret.zeroize();
        }
        self.secret = None;
        trace!(target_name = ?self.target, "Credential disposed");
    }

    fn ensure_live(&self) -> Result<(), AppError> {
        if self.disposed {
            return Err(AppError::disposed(OBJECT_NAME));
        }
        Ok(())
    }

    fn require_target(&self, operation: &'static str) -> Result<&str, AppError> {
        match self.target.as_deref() {
            Some(target) if !target.is_empty() => Ok(target),
            _ => Err(AppError::InvalidOperation {
                operation,
                reason: "target is not set".to_string(),
            }),
        }
    }

    fn to_record(&self, target: &str) -> CredentialRecord {
        let mut record = CredentialRecord::new(target, self.credential_type);
        record.username = self.username.clone();
        record.secret = self.secret.clone().unwrap_or_default();
        record.comment = self.comment.clone();
        record.persist = self.persist;
        record.flags = self.flags;
        record.target_alias = self.target_alias.clone();
        record.attributes = self.attributes.clone();
        record
    }

    fn apply(&mut self, record: CredentialRecord) {
        self.target = Some(record.target_name.clone());
        self.credential_type = record.credential_type;
        self.username = record.username.clone();
        self.secret = Some(record.secret.clone());
        self.comment = record.comment.clone();
        self.persist = record.persist;
        self.last_written = record.last_written;
        self.flags = record.flags;
        self.target_alias = record.target_alias.clone();
        self.attributes = record.attributes.clone();
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Lazy, single-pass sequence of loaded credentials
///
/// Owns the enumeration buffer; it is freed once when the iterator is dropped,
/// whether or not it was run to the end.
pub struct LoadAll {
    store: CredentialStore,
    list: NativeCredentialList,
    next_index: usize,
}

impl LoadAll {
    /// Number of records the store enumerated (before any were skipped)
    pub fn enumerated(&self) -> usize {
        self.list.len()
    }
}

impl Iterator for LoadAll {
    type Item = Credential;

    fn next(&mut self) -> Option<Credential> {
        while self.next_index < self.list.len() {
            let index = self.next_index;
            self.next_index += 1;

            let identity = match self.list.identity_at(index)? {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(index, error = %e, "Skipping unreadable enumerated credential");
                    continue;
                }
            };

            let mut credential = Credential::new(self.store.clone()).with_target(identity.target_name);
            credential.username = identity.username;

            match credential.load() {
                Ok(true) => return Some(credential),
                Ok(false) => debug_log(
                    "DEBUG",
                    "ENUMERATION",
                    &format!(
                        "Skipping '{}': no longer readable as a generic credential",
                        credential.target.as_deref().unwrap_or_default()
                    ),
                    None,
                ),
                Err(e) => debug_log(
                    "WARN",
                    "ENUMERATION",
                    &format!(
                        "Skipping '{}': failed to load",
                        credential.target.as_deref().unwrap_or_default()
                    ),
                    Some(&e.to_string()),
                ),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.list.len().saturating_sub(self.next_index)))
    }
}

impl FusedIterator for LoadAll {}

impl fmt::Debug for LoadAll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadAll")
            .field("store", &self.store)
            .field("enumerated", &self.list.len())
            .field("next_index", &self.next_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{CallStats, InMemoryCredentialApi};

    fn fixture(records: Vec<CredentialRecord>) -> (Arc<InMemoryCredentialApi>, CredentialStore) {
        let api = Arc::new(InMemoryCredentialApi::with_records(records));
        let store = CredentialStore::new(api.clone()).with_permission(NativeAccessPermission::granted());
        (api, store)
    }

    fn generic(target: &str, username: &str) -> CredentialRecord {
        let mut record = CredentialRecord::new(target, CredentialType::Generic);
        record.username = Some(username.to_string());
        record.secret = SecretBytes::from_utf16_str(&format!("{}-secret", target));
        record
    }

    fn is_disposed_error<T: fmt::Debug>(result: Result<T, AppError>) -> bool {
        matches!(result, Err(AppError::ObjectDisposed { object: "Credential" }))
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn test_new_has_generic_defaults() {
            let (_, store) = fixture(Vec::new());
            let credential = store.credential();

            assert_eq!(credential.target().unwrap(), None);
            assert_eq!(credential.credential_type().unwrap(), CredentialType::Generic);
            assert_eq!(credential.persist().unwrap(), PersistScope::LocalMachine);
            assert!(credential.username().unwrap().is_none());
            assert!(credential.secret().unwrap().is_none());
            assert!(!credential.is_disposed());
        }

        #[test]
        fn test_builders_set_fields() {
            let (_, store) = fixture(Vec::new());
            let credential = Credential::new(store)
                .with_target("svc")
                .with_type(CredentialType::DomainPassword)
                .with_username("me")
                .with_secret("pw")
                .with_comment("note")
                .with_persist(PersistScope::Session);

            assert_eq!(credential.target().unwrap(), Some("svc"));
            assert_eq!(credential.credential_type().unwrap(), CredentialType::DomainPassword);
            assert_eq!(credential.username().unwrap(), Some("me"));
            assert_eq!(credential.secret_text().unwrap().as_deref(), Some("pw"));
            assert_eq!(credential.comment().unwrap(), Some("note"));
            assert_eq!(credential.persist().unwrap(), PersistScope::Session);
        }

        #[test]
        fn test_setters_before_dispose() {
            let (_, store) = fixture(Vec::new());
            let mut credential = store.credential();

            credential.set_target("a").unwrap();
            credential.set_credential_type(CredentialType::GenericCertificate).unwrap();
            credential.set_username(Some("u".to_string())).unwrap();
            credential.set_secret(Some("s")).unwrap();
            credential.set_comment(Some("c".to_string())).unwrap();
            credential.set_persist(PersistScope::Enterprise).unwrap();

            assert_eq!(credential.target().unwrap(), Some("a"));
            assert_eq!(credential.credential_type().unwrap(), CredentialType::GenericCertificate);
            assert_eq!(credential.secret().unwrap().map(|s| s.len()), Some(2));

            credential.set_secret(None).unwrap();
            assert!(credential.secret().unwrap().is_none());
        }

        #[test]
        fn test_every_accessor_and_operation_fails_after_dispose() {
            let (api, store) = fixture(vec![generic("a", "u")]);
            let mut credential = store.credential().with_target("a").with_secret("pw");
            credential.dispose();

            assert!(credential.is_disposed());
            assert!(is_disposed_error(credential.target()));
            assert!(is_disposed_error(credential.set_target("b")));
            assert!(is_disposed_error(credential.credential_type()));
            assert!(is_disposed_error(credential.set_credential_type(CredentialType::Generic)));
            assert!(is_disposed_error(credential.username()));
            assert!(is_disposed_error(credential.set_username(None)));
            assert!(is_disposed_error(credential.secret()));
            assert!(is_disposed_error(credential.secret_text()));
            assert!(is_disposed_error(credential.set_secret(None)));
            assert!(is_disposed_error(credential.comment()));
            assert!(is_disposed_error(credential.set_comment(None)));
            assert!(is_disposed_error(credential.persist()));
            assert!(is_disposed_error(credential.set_persist(PersistScope::Session)));
            assert!(is_disposed_error(credential.last_written()));
            assert!(is_disposed_error(credential.flags()));
            assert!(is_disposed_error(credential.target_alias()));
            assert!(is_disposed_error(credential.attributes()));
            assert!(is_disposed_error(credential.load()));
            assert!(is_disposed_error(credential.save()));
            assert!(is_disposed_error(credential.delete()));

            assert_eq!(api.stats().reads + api.stats().writes + api.stats().deletes, 0);
        }

        #[test]
        fn test_dispose_is_idempotent_and_wipes_secret() {
            let (_, store) = fixture(Vec::new());
            let mut credential = store.credential().with_secret("pw");

            credential.dispose();
            credential.dispose();

            assert!(credential.is_disposed());
            assert!(credential.secret.is_none());
        }

        #[test]
        fn test_credential_is_send() {
            fn assert_send<T: Send>() {}
            assert_send::<Credential>();
            assert_send::<CredentialStore>();
        }
    }

    mod operation_tests {
        use super::*;

        #[test]
        fn test_delete_without_target_fails_before_native_call() {
            let (api, store) = fixture(vec![generic("a", "u")]);

            let unset = store.credential();
            assert!(matches!(unset.delete(), Err(AppError::InvalidOperation { .. })));

            let empty = store.credential().with_target("");
            assert!(matches!(empty.delete(), Err(AppError::InvalidOperation { .. })));

            assert_eq!(api.deletes(), 0);
            assert!(api.contains("a", CredentialType::Generic));
        }

        #[test]
        fn test_load_without_target_is_invalid_operation() {
            let (api, store) = fixture(Vec::new());
            let mut credential = store.credential();
            assert!(matches!(credential.load(), Err(AppError::InvalidOperation { .. })));
            assert!(matches!(credential.save(), Err(AppError::InvalidOperation { .. })));
            assert_eq!(api.reads(), 0);
        }

        #[test]
        fn test_load_missing_returns_false_and_leaves_fields() {
            let (api, store) = fixture(vec![generic("present", "u")]);
            let mut credential = store
                .credential()
                .with_target("absent")
                .with_username("keep-me")
                .with_secret("keep-secret")
                .with_comment("keep-comment");

            assert!(!credential.load().unwrap());

            assert_eq!(credential.target().unwrap(), Some("absent"));
            assert_eq!(credential.username().unwrap(), Some("keep-me"));
            assert_eq!(credential.secret_text().unwrap().as_deref(), Some("keep-secret"));
            assert_eq!(credential.comment().unwrap(), Some("keep-comment"));
            assert_eq!(credential.credential_type().unwrap(), CredentialType::Generic);
            assert!(credential.last_written().unwrap().is_none());
            assert_eq!(api.reads(), 1);
            assert_eq!(api.live_allocations(), 0);
        }

        #[test]
        fn test_save_then_load_fresh_round_trip() {
            let (api, store) = fixture(Vec::new());
            let original = store
                .credential()
                .with_target("Qlik_Sense")
                .with_type(CredentialType::DomainPassword)
                .with_username("DOMAIN\\svc")
                .with_secret("p@ss")
                .with_comment("service account")
                .with_persist(PersistScope::Enterprise);
            assert!(original.save().unwrap());

            let mut fresh = store
                .credential()
                .with_target("Qlik_Sense")
                .with_type(CredentialType::DomainPassword);
            assert!(fresh.load().unwrap());

            assert_eq!(fresh.target().unwrap(), Some("Qlik_Sense"));
            assert_eq!(fresh.username().unwrap(), Some("DOMAIN\\svc"));
            assert_eq!(fresh.secret_text().unwrap().as_deref(), Some("p@ss"));
            assert_eq!(fresh.comment().unwrap(), Some("service account"));
            assert_eq!(fresh.persist().unwrap(), PersistScope::Enterprise);
            assert!(fresh.last_written().unwrap().is_some());

            assert_eq!(api.frees(), 1);
            assert_eq!(api.live_allocations(), 0);
        }

        #[test]
        fn test_save_after_load_keeps_alias_flags_and_attributes() {
            let mut stored = generic("svc", "u");
            stored.target_alias = Some("alias".to_string());
            stored.flags = CredentialFlags::USERNAME_TARGET;
            stored.attributes = vec![CredentialAttribute {
                keyword: "owner".to_string(),
                flags: 0,
                value: b"ops".to_vec(),
            }];
            let (api, store) = fixture(vec![stored.clone()]);

            let mut credential = store.credential().with_target("svc");
            assert!(credential.load().unwrap());
            assert_eq!(credential.target_alias().unwrap(), Some("alias"));
            assert_eq!(credential.flags().unwrap(), CredentialFlags::USERNAME_TARGET);
            assert_eq!(credential.attributes().unwrap(), stored.attributes.as_slice());

            credential.set_comment(Some("edited".to_string())).unwrap();
            assert!(credential.save().unwrap());

            let saved = api.get("svc", CredentialType::Generic).unwrap();
            assert_eq!(saved.comment.as_deref(), Some("edited"));
            assert_eq!(saved.target_alias.as_deref(), Some("alias"));
            assert_eq!(saved.flags, CredentialFlags::USERNAME_TARGET);
            assert_eq!(saved.attributes, stored.attributes);
        }

        #[test]
        fn test_secret_text_rejects_odd_length_blob() {
            let mut stored = generic("odd", "u");
            stored.secret = SecretBytes::new(vec![b'a', 0, b'b']);
            let (_, store) = fixture(vec![stored]);

            let mut credential = store.credential().with_target("odd");
            assert!(credential.load().unwrap());
            assert!(matches!(
                credential.secret_text(),
                Err(AppError::Marshal {
                    field: "credential_blob",
                    ..
                })
            ));
        }

        #[test]
        fn test_load_uses_type_as_part_of_key() {
            let (_, store) = fixture(vec![generic("svc", "u")]);
            let mut credential = store
                .credential()
                .with_target("svc")
                .with_type(CredentialType::DomainPassword);
            assert!(!credential.load().unwrap());
        }

        #[test]
        fn test_load_store_failure_is_raised() {
            let (api, store) = fixture(vec![generic("locked", "u")]);
            api.fail_reads_for("locked", NativeError::AccessDenied);

            let mut credential = store.credential().with_target("locked");
            let err = credential.load().unwrap_err();
            assert!(matches!(
                err,
                AppError::NativeFailure {
                    source: NativeError::AccessDenied,
                    ..
                }
            ));
            assert_eq!(credential.username().unwrap(), None);
        }

        #[test]
        fn test_save_rejected_by_store_returns_false() {
            let (api, store) = fixture(Vec::new());
            let too_long = "x".repeat(crate::core::types::MAX_SECRET_BYTES);
            let credential = store.credential().with_target("big").with_secret(&too_long);

            assert!(!credential.save().unwrap());
            assert!(api.is_empty());
        }

        #[test]
        fn test_delete_reports_existence() {
            let (api, store) = fixture(vec![generic("a", "u")]);
            let credential = store.credential().with_target("a");

            assert!(credential.delete().unwrap());
            assert!(!api.contains("a", CredentialType::Generic));
            assert!(!credential.delete().unwrap());
            assert!(!credential.is_disposed());
            assert_eq!(api.deletes(), 2);
        }

        #[test]
        fn test_permission_denied_is_raised_without_native_calls() {
            let (api, store) = fixture(vec![generic("a", "u")]);
            let store = store.with_permission(NativeAccessPermission::denied());
            let mut credential = store.credential().with_target("a");

            assert!(matches!(credential.load(), Err(AppError::PermissionDenied { .. })));
            assert!(matches!(credential.save(), Err(AppError::PermissionDenied { .. })));
            assert!(matches!(credential.delete(), Err(AppError::PermissionDenied { .. })));
            assert!(matches!(store.load_all(), Err(AppError::PermissionDenied { .. })));

            assert_eq!(api.stats(), CallStats::default());
        }
    }

    mod load_all_tests {
        use super::*;

        fn targets(iter: LoadAll) -> Vec<String> {
            iter.map(|c| c.target().unwrap().unwrap_or_default().to_string())
                .collect()
        }

        #[test]
        fn test_yields_in_store_order_and_hydrates() {
            let (api, store) = fixture(vec![generic("b", "u1"), generic("a", "u2"), generic("c", "u3")]);

            let loaded: Vec<Credential> = store.load_all().unwrap().collect();
            let names: Vec<&str> = loaded.iter().map(|c| c.target().unwrap().unwrap()).collect();
            assert_eq!(names, vec!["b", "a", "c"]);
            assert_eq!(loaded[1].username().unwrap(), Some("u2"));
            assert_eq!(loaded[1].secret_text().unwrap().as_deref(), Some("a-secret"));

            assert_eq!(api.enumerations(), 1);
            assert_eq!(api.reads(), 3);
            assert_eq!(api.frees(), 4);
            assert_eq!(api.live_allocations(), 0);
        }

        #[test]
        fn test_seeds_default_type() {
            let mut domain = CredentialRecord::new("corp", CredentialType::DomainPassword);
            domain.username = Some("CORP\\me".to_string());
            let (_, store) = fixture(vec![generic("a", "u"), domain]);

            assert_eq!(targets(store.load_all().unwrap()), vec!["a"]);
        }

        #[test]
        fn test_is_lazy_and_skips_records_that_vanish() {
            let (api, store) = fixture(vec![generic("a", "u"), generic("b", "u"), generic("c", "u")]);
            let mut iter = store.load_all().unwrap();
            assert_eq!(iter.enumerated(), 3);
            assert_eq!(api.reads(), 0);

            let first = iter.next().unwrap();
            assert_eq!(first.target().unwrap(), Some("a"));
            assert_eq!(api.reads(), 1);

            api.remove("b", CredentialType::Generic);

            let rest = targets(iter);
            assert_eq!(rest, vec!["c"]);
            assert_eq!(api.live_allocations(), 0);
        }

        #[test]
        fn test_skips_read_failures_without_aborting() {
            let (api, store) = fixture(vec![generic("a", "u"), generic("broken", "u"), generic("c", "u")]);
            api.fail_reads_for("broken", NativeError::Failure { code: 1783 });

            assert_eq!(targets(store.load_all().unwrap()), vec!["a", "c"]);
            assert_eq!(api.live_allocations(), 0);
        }

        #[test]
        fn test_buffer_released_once_for_any_count() {
            for n in [0usize, 1, 4] {
                let records = (0..n).map(|i| generic(&format!("t{}", i), "u")).collect();
                let (api, store) = fixture(records);

                let loaded = store.load_all().unwrap().count();
                assert_eq!(loaded, n);
                // One free for the buffer plus one per hydrating read
                assert_eq!(api.frees(), 1 + n, "n = {}", n);
                assert_eq!(api.invalid_frees(), 0);
                assert_eq!(api.live_allocations(), 0);
            }
        }

        #[test]
        fn test_buffer_released_when_dropped_early() {
            let (api, store) = fixture(vec![generic("a", "u"), generic("b", "u")]);
            {
                let mut iter = store.load_all().unwrap();
                let _first = iter.next();
            }
            assert_eq!(api.live_allocations(), 0);
            assert_eq!(api.invalid_frees(), 0);
        }

        #[test]
        fn test_exhausted_iterator_stays_exhausted() {
            let (_, store) = fixture(vec![generic("a", "u")]);
            let mut iter = store.load_all().unwrap();
            assert!(iter.next().is_some());
            assert!(iter.next().is_none());
            assert!(iter.next().is_none());
        }

        #[test]
        fn test_enumeration_failure_is_raised() {
            let (api, store) = fixture(vec![generic("a", "u")]);
            api.fail_enumeration(Some(NativeError::NoLogonSession));

            let err = store.load_all().unwrap_err();
            assert!(matches!(
                err,
                AppError::NativeFailure {
                    source: NativeError::NoLogonSession,
                    ..
                }
            ));
        }

        #[test]
        fn test_enumeration_not_found_is_empty() {
            let (api, store) = fixture(vec![generic("a", "u")]);
            api.fail_enumeration(Some(NativeError::NotFound));

            let iter = store.load_all().unwrap();
            assert_eq!(iter.enumerated(), 0);
            assert_eq!(iter.count(), 0);
        }

        #[test]
        fn test_load_matching_filters_by_pattern() {
            let (_, store) = fixture(vec![
                generic("TERMSRV/one", "u"),
                generic("Other", "u"),
                generic("TERMSRV/two", "u"),
            ]);

            let iter = Credential::load_matching(&store, "TERMSRV/*").unwrap();
            assert_eq!(targets(iter), vec!["TERMSRV/one", "TERMSRV/two"]);
        }
    }
}
