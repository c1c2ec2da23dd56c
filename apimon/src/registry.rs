//! # Registry Key Canonicalization
//!
//! Registry APIs identify keys by handle, optionally plus a subkey or value
//! name. The kernel knows keys by names such as
//! `\REGISTRY\MACHINE\SOFTWARE\X` or `\REGISTRY\USER\S-1-5-21-...\Console`;
//! analysts know them as `HKEY_LOCAL_MACHINE\SOFTWARE\X` and
//! `HKEY_CURRENT_USER\Console`.
//!
//! ## Normalization Rules
//!
//! Applied after every join, in order:
//!
//! 1. Collapse runs of separators into one
//! 2. `\REGISTRY\USER\S-1-5-<sid>...` → `HKEY_CURRENT_USER...`
//! 3. `HKEY_USERS\S-1-5-<sid>...` → `HKEY_CURRENT_USER...`
//! 4. `\REGISTRY\MACHINE...` → `HKEY_LOCAL_MACHINE...`
//!
//! Names matching none of the rules are kept verbatim. Predefined root
//! handles (`HKEY_LOCAL_MACHINE` and friends) are named without querying the
//! OS.

use apimon_common::{ObjectAttributes, UnicodeString};
use log::debug;

use crate::diagnostics::{DiagnosticSink, Severity};
use crate::domain::{Handle, NameError};
use crate::platform::KeyNames;
use crate::pool::{BufferPool, PoolBuffer};
use crate::wide::{WideBuf, BACKSLASH};

const HKCU_PREFIX: &str = r"\REGISTRY\USER\S-1-5-";
const HKCU_PREFIX2: &str = r"HKEY_USERS\S-1-5-";
const HKLM_PREFIX: &str = r"\REGISTRY\MACHINE";

/// Rendering of an absent or empty value name
pub const DEFAULT_VALUE_NAME: &str = "(Default)";

/// `KEY_VALUE_INFORMATION_CLASS` values whose records can be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValueInformationClass {
    Basic,
    Full,
    Partial,
    FullAlign64,
    PartialAlign64,
}

impl KeyValueInformationClass {
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Basic),
            1 => Some(Self::Full),
            2 => Some(Self::Partial),
            3 => Some(Self::FullAlign64),
            4 => Some(Self::PartialAlign64),
            _ => None,
        }
    }
}

/// Fields of a `KEY_VALUE_*_INFORMATION` record returned by the OS
pub struct KeyValueInfo<'p, 'r> {
    /// Value name, absent from partial records
    pub name: Option<PoolBuffer<'p>>,
    pub value_type: u32,
    /// Data size the record declares, in bytes
    pub data_length: u32,
    /// The part of the data actually inside the record
    pub data: Option<&'r [u8]>,
}

fn field(record: &[u8], offset: usize) -> Option<u32> {
    let raw = record.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Copy a byte-counted UTF-16 name at `offset`, clamped to the record and
/// to the capacity of `out`.
fn copy_name(record: &[u8], offset: usize, name_bytes: u32, out: &mut WideBuf) {
    let available = record.get(offset..).unwrap_or_default();
    let bytes = (name_bytes as usize).min(available.len()).min(out.capacity() * 2);
    for pair in available[..bytes].chunks_exact(2) {
        out.push(u16::from_le_bytes([pair[0], pair[1]]));
    }
}

/// `length` bytes of data at `offset`, clamped to the record.
fn data_slice(record: &[u8], offset: usize, length: u32) -> Option<&[u8]> {
    let data = record.get(offset..)?;
    Some(&data[..data.len().min(length as usize)])
}

/// Apply the normalization rules to `name` in place and return its length.
pub fn normalize_key(name: &mut WideBuf) -> usize {
    name.collapse_separators();

    let user_prefix = [HKCU_PREFIX, HKCU_PREFIX2]
        .into_iter()
        .find(|prefix| name.starts_with_ignore_case(prefix))
        .map(|prefix| prefix.len());

    if let Some(prefix_len) = user_prefix {
        match name.find_from(prefix_len, BACKSLASH) {
            Some(sid_end) => {
                name.replace_prefix(sid_end, "HKEY_CURRENT_USER");
            }
            None => {
                name.clear();
                name.push_str("HKEY_CURRENT_USER");
            }
        }
    } else if name.starts_with_ignore_case(HKLM_PREFIX) {
        name.replace_prefix(HKLM_PREFIX.len(), "HKEY_LOCAL_MACHINE");
    }
    name.len()
}

/// Turns registry key handles and subkeys into canonical key names
pub struct RegistryKeyCanonicalizer<'a, P> {
    pool: &'a BufferPool,
    platform: &'a P,
    sink: &'a dyn DiagnosticSink,
}

impl<'a, P: KeyNames> RegistryKeyCanonicalizer<'a, P> {
    pub fn new(pool: &'a BufferPool, platform: &'a P, sink: &'a dyn DiagnosticSink) -> Self {
        Self { pool, platform, sink }
    }

    /// Canonical name of the key behind `handle`.
    ///
    /// Returns 0 with `out` cleared when the key cannot be named.
    pub fn resolve_key(&self, handle: Handle, out: &mut WideBuf) -> usize {
        out.clear();
        if let Some(root) = handle.predefined_key_name() {
            out.push_str(root);
            return out.len();
        }
        if handle.is_null() {
            return 0;
        }

        match self.platform.key_name(handle, out) {
            Ok(()) => normalize_key(out),
            Err(NameError::TooLong { length, .. }) => {
                self.sink.report(
                    Severity::Critical,
                    format_args!("Registry key too long?! regkey length: {length}"),
                );
                out.clear();
                0
            }
            Err(e) => {
                debug!("{e}");
                out.clear();
                0
            }
        }
    }

    /// Canonical name of `subkey` below the key behind `handle`.
    ///
    /// An absent or empty subkey renders as [`DEFAULT_VALUE_NAME`]. A handle
    /// that cannot be named contributes nothing, which leaves absolute
    /// kernel names (`\REGISTRY\...` relative to a null handle) intact.
    pub fn resolve(&self, handle: Handle, subkey: Option<&[u16]>, out: &mut WideBuf) -> usize {
        self.resolve_key(handle, out);
        out.push(BACKSLASH);
        match subkey.filter(|s| !s.is_empty()) {
            Some(subkey) => out.push_slice(subkey),
            None => out.push_str(DEFAULT_VALUE_NAME),
        };
        normalize_key(out)
    }

    /// [`Self::resolve`] for single-byte subkeys.
    pub fn resolve_ansi(&self, handle: Handle, subkey: Option<&[u8]>, out: &mut WideBuf) -> usize {
        let mut widened = self.pool.acquire();
        let subkey = match subkey {
            Some(raw) => {
                widened.push_ansi(raw);
                Some(widened.as_slice())
            }
            None => None,
        };
        self.resolve(handle, subkey, out)
    }

    /// [`Self::resolve`] for an NT counted subkey.
    ///
    /// # Safety
    /// `subkey`, if present, must describe memory valid for reads of its
    /// `length` bytes.
    #[allow(unsafe_code)]
    pub unsafe fn resolve_unicode_string(&self, handle: Handle, subkey: Option<&UnicodeString>, out: &mut WideBuf) -> usize {
        // SAFETY: upheld by the caller
        let subkey = subkey.and_then(|s| unsafe { s.as_wide() });
        self.resolve(handle, subkey, out)
    }

    /// Decode a key value information record as filled by
    /// `NtQueryValueKey` or `NtEnumerateValueKey`.
    ///
    /// Returns `None` for an absent record or one too short for its fixed
    /// fields. Names and data running past the end of `record` are cut off
    /// there.
    pub fn value_info<'r>(
        &self,
        record: Option<&'r [u8]>,
        class: KeyValueInformationClass,
    ) -> Option<KeyValueInfo<'a, 'r>> {
        let record = record?;
        match class {
            // { TitleIndex, Type, NameLength, Name }
            KeyValueInformationClass::Basic => {
                let value_type = field(record, 4)?;
                let name_bytes = field(record, 8)?;
                let mut name = self.pool.acquire();
                copy_name(record, 12, name_bytes, &mut name);
                Some(KeyValueInfo { name: Some(name), value_type, data_length: 0, data: None })
            }
            // { TitleIndex, Type, DataOffset, DataLength, NameLength, Name }
            KeyValueInformationClass::Full | KeyValueInformationClass::FullAlign64 => {
                let value_type = field(record, 4)?;
                let data_offset = field(record, 8)?;
                let data_length = field(record, 12)?;
                let name_bytes = field(record, 16)?;
                let mut name = self.pool.acquire();
                copy_name(record, 20, name_bytes, &mut name);
                let data = data_slice(record, data_offset as usize, data_length);
                Some(KeyValueInfo { name: Some(name), value_type, data_length, data })
            }
            // { TitleIndex, Type, DataLength, Data }
            KeyValueInformationClass::Partial => {
                let value_type = field(record, 4)?;
                let data_length = field(record, 8)?;
                Some(KeyValueInfo { name: None, value_type, data_length, data: data_slice(record, 12, data_length) })
            }
            // { Type, DataLength, Data }
            KeyValueInformationClass::PartialAlign64 => {
                let value_type = field(record, 0)?;
                let data_length = field(record, 4)?;
                Some(KeyValueInfo { name: None, value_type, data_length, data: data_slice(record, 8, data_length) })
            }
        }
    }

    /// Canonical name of the key an object attributes record describes.
    ///
    /// # Safety
    /// `attributes`, if present, must point to a valid record whose object
    /// name (if non-null) is valid per [`Self::resolve_unicode_string`].
    #[allow(unsafe_code)]
    pub unsafe fn resolve_object_attributes(&self, attributes: Option<&ObjectAttributes>, out: &mut WideBuf) -> usize {
        let Some(attributes) = attributes else {
            out.clear();
            return 0;
        };
        // SAFETY: upheld by the caller
        unsafe { self.resolve_unicode_string(Handle(attributes.root_directory), attributes.object_name(), out) }
    }
}
