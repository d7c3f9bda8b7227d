//! Core domain types for CredSweep

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::string::FromUtf16Error;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Largest secret blob the credential store accepts, in bytes
pub const MAX_SECRET_BYTES: usize = 5 * 512;

/// Longest target name accepted for generic credentials, in UTF-16 units
pub const MAX_TARGET_LEN: usize = 32767;

/// Longest username accepted, in UTF-16 units
pub const MAX_USERNAME_LEN: usize = 513;

/// Classification of a stored credential
///
/// Discriminants are the values the credential store uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum CredentialType {
    #[default]
    Generic = 1,
    DomainPassword = 2,
    DomainCertificate = 3,
    DomainVisiblePassword = 4,
    GenericCertificate = 5,
    DomainExtended = 6,
    Maximum = 7,
    MaximumEx = 7 + 1000,
}

impl CredentialType {
    /// Maps a raw native value back to a credential type
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            1 => Some(CredentialType::Generic),
            2 => Some(CredentialType::DomainPassword),
            3 => Some(CredentialType::DomainCertificate),
            4 => Some(CredentialType::DomainVisiblePassword),
            5 => Some(CredentialType::GenericCertificate),
            6 => Some(CredentialType::DomainExtended),
            7 => Some(CredentialType::Maximum),
            1007 => Some(CredentialType::MaximumEx),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CredentialType::Generic => "Generic",
            CredentialType::DomainPassword => "DomainPassword",
            CredentialType::DomainCertificate => "DomainCertificate",
            CredentialType::DomainVisiblePassword => "DomainVisiblePassword",
            CredentialType::GenericCertificate => "GenericCertificate",
            CredentialType::DomainExtended => "DomainExtended",
            CredentialType::Maximum => "Maximum",
            CredentialType::MaximumEx => "MaximumEx",
        };
        f.write_str(name)
    }
}

/// Durability and visibility of a stored credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum PersistScope {
    /// Lives for the current logon session only
    Session = 1,
    /// Persists for this user on this machine
    #[default]
    LocalMachine = 2,
    /// Roams with the user profile
    Enterprise = 3,
}

impl PersistScope {
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            1 => Some(PersistScope::Session),
            2 => Some(PersistScope::LocalMachine),
            3 => Some(PersistScope::Enterprise),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// Credential flag bitmask
///
/// Unknown bits are preserved so a record read from the store can be written
/// back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CredentialFlags(u32);

impl CredentialFlags {
    pub const NONE: CredentialFlags = CredentialFlags(0);
    pub const PROMPT_NOW: CredentialFlags = CredentialFlags(0x2);
    pub const USERNAME_TARGET: CredentialFlags = CredentialFlags(0x4);

    pub fn from_bits_retain(bits: u32) -> Self {
        CredentialFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: CredentialFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CredentialFlags {
    type Output = CredentialFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        CredentialFlags(self.0 | rhs.0)
    }
}

/// Secret blob that zeroes its memory (full capacity) when dropped
///
/// `Debug` only ever reports the length.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

/// Failure to turn a secret blob back into text
#[derive(Debug, Error)]
pub enum SecretDecodeError {
    #[error("blob of {0} bytes is not a whole number of UTF-16 code units")]
    OddLength(usize),
    #[error(transparent)]
    InvalidUtf16(#[from] FromUtf16Error),
}

impl SecretBytes {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        SecretBytes(bytes.into())
    }

    /// Encodes text the way the credential store expects it: UTF-16LE, no terminator
    pub fn from_utf16_str(text: &str) -> Self {
        let bytes = text
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect::<Vec<u8>>();
        SecretBytes(bytes)
    }

    /// Decodes a UTF-16LE blob back to text
    ///
    /// Trailing NULs are trimmed so blobs written with a terminator decode the same.
    pub fn to_utf16_string(&self) -> Result<String, SecretDecodeError> {
        if self.0.len() % 2 != 0 {
            return Err(SecretDecodeError::OddLength(self.0.len()));
        }
        let wide: Zeroizing<Vec<u16>> = Zeroizing::new(
            self.0
                .chunks_exact(2)
                .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
                .collect(),
        );

        Ok(String::from_utf16(&wide)?.trim_end_matches('\0').to_string())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(*** {} bytes ***)", self.0.len())
    }
}

/// Application-defined key/value attached to a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialAttribute {
    pub keyword: String,
    pub flags: u32,
    pub value: Vec<u8>,
}

/// Managed copy of one stored credential
///
/// Independent of any native memory: produced by materializing a native block,
/// or built by the caller to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub flags: CredentialFlags,
    pub credential_type: CredentialType,
    pub target_name: String,
    pub comment: Option<String>,
    /// `None` when the store never stamped the record
    pub last_written: Option<DateTime<Utc>>,
    pub secret: SecretBytes,
    pub persist: PersistScope,
    pub attributes: Vec<CredentialAttribute>,
    pub target_alias: Option<String>,
    pub username: Option<String>,
}

impl CredentialRecord {
    pub fn new(target_name: impl Into<String>, credential_type: CredentialType) -> Self {
        CredentialRecord {
            flags: CredentialFlags::NONE,
            credential_type,
            target_name: target_name.into(),
            comment: None,
            last_written: None,
            secret: SecretBytes::default(),
            persist: PersistScope::default(),
            attributes: Vec::new(),
            target_alias: None,
            username: None,
        }
    }

    /// Checks the size limits the credential store enforces on writes
    ///
    /// # Returns
    /// * `Ok(())` - Record fits
    /// * `Err(reason)` - First limit that is exceeded
    pub fn check_limits(&self) -> Result<(), String> {
        if self.target_name.is_empty() {
            return Err("target name is empty".to_string());
        }
        if self.target_name.encode_utf16().count() > MAX_TARGET_LEN {
            return Err(format!("target name exceeds {} characters", MAX_TARGET_LEN));
        }
        if let Some(username) = &self.username {
            if username.encode_utf16().count() > MAX_USERNAME_LEN {
                return Err(format!("username exceeds {} characters", MAX_USERNAME_LEN));
            }
        }
        if self.secret.len() > MAX_SECRET_BYTES {
            return Err(format!("secret exceeds {} bytes", MAX_SECRET_BYTES));
        }
        Ok(())
    }
}
