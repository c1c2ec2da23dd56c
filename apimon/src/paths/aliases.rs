//! Kernel-namespace → drive-letter path rewrites
//!
//! Built once while attaching, before any intercepted call can run, and only
//! read afterwards. Patterns and replacements are both separator-terminated
//! so `\Device\HarddiskVolume1\` can never match inside
//! `\Device\HarddiskVolume10\`.

use apimon_common::{ALIAS_CAPACITY, MAX_PATH_W};
use log::debug;

use crate::domain::AliasError;
use crate::platform::DosDevices;
use crate::wide::{self, starts_with_ignore_case, WideBuf, BACKSLASH};

/// Symbolic link to the Windows directory in the kernel namespace
pub const SYSTEM_ROOT_PATTERN: &str = r"\SystemRoot\";

/// A prefix rewrite rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pattern: Vec<u16>,
    replacement: Vec<u16>,
}

impl Alias {
    #[must_use]
    pub fn pattern(&self) -> &[u16] {
        &self.pattern
    }

    #[must_use]
    pub fn replacement(&self) -> &[u16] {
        &self.replacement
    }
}

/// Ordered, fixed-capacity list of [`Alias`] rules; the first match wins
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: Vec<Alias>,
}

impl AliasTable {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::with_capacity(ALIAS_CAPACITY) }
    }

    /// Build the standard table: `\SystemRoot\` first, then one rule per
    /// mapped drive letter `A..Z`.
    ///
    /// # Errors
    /// Returns [`AliasError::CapacityExceeded`] if more than
    /// [`ALIAS_CAPACITY`] rules would be registered.
    pub fn from_dos_devices<D: DosDevices + ?Sized>(system_root: &str, devices: &D) -> Result<Self, AliasError> {
        let mut table = Self::new();
        table.register_str(SYSTEM_ROOT_PATTERN, system_root)?;

        let mut device = WideBuf::with_capacity(MAX_PATH_W);
        for letter in b'A'..=b'Z' {
            if !devices.query_dos_device(letter, &mut device) || device.is_empty() {
                continue;
            }
            if device.as_slice().last() != Some(&BACKSLASH) {
                device.push(BACKSLASH);
            }
            let drive = [u16::from(letter), u16::from(b':'), BACKSLASH];
            table.register(device.as_slice(), &drive)?;
            debug!("Alias {} -> {}:\\", device, char::from(letter));
        }
        Ok(table)
    }

    /// Append a rule.
    ///
    /// # Errors
    /// Returns [`AliasError::CapacityExceeded`] when the table is full and
    /// [`AliasError::EmptyPattern`] for a pattern that would match anything.
    pub fn register(&mut self, pattern: &[u16], replacement: &[u16]) -> Result<(), AliasError> {
        if pattern.is_empty() {
            return Err(AliasError::EmptyPattern { replacement: String::from_utf16_lossy(replacement) });
        }
        if self.entries.len() == ALIAS_CAPACITY {
            return Err(AliasError::CapacityExceeded {
                capacity: ALIAS_CAPACITY,
                pattern: String::from_utf16_lossy(pattern),
            });
        }
        self.entries.push(Alias { pattern: pattern.to_vec(), replacement: replacement.to_vec() });
        Ok(())
    }

    /// [`AliasTable::register`] for UTF-8 rules.
    ///
    /// # Errors
    /// As [`AliasTable::register`].
    pub fn register_str(&mut self, pattern: &str, replacement: &str) -> Result<(), AliasError> {
        self.register(&wide::wide(pattern), &wide::wide(replacement))
    }

    /// Rewrite the first matching prefix of `path` into `out`.
    ///
    /// Matching ignores ASCII case. Returns `false` and leaves `out`
    /// untouched when no rule matches.
    pub fn rewrite(&self, path: &[u16], out: &mut WideBuf) -> bool {
        let Some(alias) = self.entries.iter().find(|a| starts_with_ignore_case(path, &a.pattern)) else {
            return false;
        };
        out.assign(&alias.replacement);
        out.push_slice(&path[alias.pattern.len()..]);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alias> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::OfflinePlatform;

    fn rewrite(table: &AliasTable, path: &str) -> Option<String> {
        let mut out = WideBuf::new();
        table.rewrite(&wide::wide(path), &mut out).then(|| out.to_string_lossy())
    }

    #[test]
    fn test_system_root_comes_first() {
        let mut platform = OfflinePlatform::new();
        platform.map_drive('C', r"\Device\HarddiskVolume1");
        let table = AliasTable::from_dos_devices(r"C:\Windows\", &platform).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.iter().next().map(|a| String::from_utf16_lossy(a.pattern())), Some(SYSTEM_ROOT_PATTERN.into()));
        assert_eq!(rewrite(&table, r"\SystemRoot\System32\ntdll.dll").as_deref(), Some(r"C:\Windows\System32\ntdll.dll"));
    }

    #[test]
    fn test_drive_rules_are_separator_terminated() {
        let mut platform = OfflinePlatform::new();
        platform.map_drive('C', r"\Device\HarddiskVolume1");
        platform.map_drive('D', r"\Device\HarddiskVolume10");
        let table = AliasTable::from_dos_devices(r"C:\Windows\", &platform).unwrap();

        assert_eq!(rewrite(&table, r"\Device\HarddiskVolume10\x").as_deref(), Some(r"D:\x"));
        assert_eq!(rewrite(&table, r"\device\harddiskvolume1\x").as_deref(), Some(r"C:\x"));
        assert_eq!(rewrite(&table, r"\Device\HarddiskVolume1"), None);
    }

    #[test]
    fn test_first_match_wins() {
        let mut table = AliasTable::new();
        table.register_str(r"\A\", r"X:\").unwrap();
        table.register_str(r"\A\B\", r"Y:\").unwrap();
        assert_eq!(rewrite(&table, r"\A\B\c").as_deref(), Some(r"X:\B\c"));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut table = AliasTable::new();
        for i in 0..ALIAS_CAPACITY {
            table.register_str(&format!(r"\Device\V{i}\"), r"Z:\").unwrap();
        }
        let err = table.register_str(r"\Device\Overflow\", r"Z:\").unwrap_err();
        assert!(matches!(err, AliasError::CapacityExceeded { capacity: ALIAS_CAPACITY, .. }));
        assert_eq!(table.len(), ALIAS_CAPACITY);
    }

    #[test]
    fn test_empty_pattern_is_rejected() {
        let mut table = AliasTable::new();
        let err = table.register_str("", r"X:\").unwrap_err();
        assert_eq!(err, AliasError::EmptyPattern { replacement: r"X:\".to_string() });
        assert!(table.is_empty());
        assert_eq!(rewrite(&table, r"C:\x"), None);
    }
}
