//! Paths handed back without OS resolution
//!
//! Some kernel paths name objects that are not files (pipes, mailslots,
//! device interfaces). Resolving them through the Win32 path APIs is at best
//! useless and at worst opens the object, so the canonicalizer asks an
//! [`IgnorePolicy`] first.

use crate::wide::{self, starts_with_ignore_case};

/// Prefixes of normalized (`\\?\`-form) paths skipped by default
pub const DEFAULT_IGNORED_PREFIXES: &[&str] = &[
    r"\\?\PIPE\",
    r"\\?\MAILSLOT\",
    r"\\?\IDE#",
    r"\\?\STORAGE#",
    r"\\?\root#",
    r"\\?\Nsi",
    r"\\?\MountPointManager",
];

/// Decides whether a normalized path bypasses OS resolution
pub trait IgnorePolicy: Send + Sync {
    fn is_ignored(&self, path: &[u16]) -> bool;
}

/// Case-insensitive prefix list
#[derive(Debug, Clone)]
pub struct PrefixIgnorePolicy {
    prefixes: Vec<Vec<u16>>,
}

impl PrefixIgnorePolicy {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { prefixes: prefixes.into_iter().map(|p| wide::wide(p.as_ref())).collect() }
    }
}

impl Default for PrefixIgnorePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_PREFIXES)
    }
}

impl IgnorePolicy for PrefixIgnorePolicy {
    fn is_ignored(&self, path: &[u16]) -> bool {
        self.prefixes.iter().any(|prefix| starts_with_ignore_case(path, prefix))
    }
}

/// Policy that never skips resolution
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverIgnore;

impl IgnorePolicy for NeverIgnore {
    fn is_ignored(&self, _path: &[u16]) -> bool {
        false
    }
}
