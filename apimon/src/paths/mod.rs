//! # Path Canonicalization
//!
//! Intercepted file APIs see paths in whatever form the caller used: NT
//! namespace names (`\??\C:\x`, `\Device\HarddiskVolume1\x`), symbolic
//! roots (`\SystemRoot\x`), 8.3 short names, relative paths, or just a
//! handle. The analysis log wants one spelling per file: the long Win32 path
//! (`C:\Program Files\x`).
//!
//! ## Pipeline
//!
//! ```text
//! raw ──▶ strip \??\Globalroot\ ──▶ alias rewrite ──▶ \\?\ normalization
//!                                                        │
//!                            ignored? ◀──────────────────┘
//!                               │ no
//!                               ▼
//!                  full path ──▶ longest resolvable long-path prefix
//!                               │
//!                               ▼
//!                  resolved prefix + literal unresolved remainder
//! ```
//!
//! Every operation writes into a caller-supplied [`WideBuf`] and returns the
//! resulting length; 0 with an empty buffer means the path could not be
//! canonicalized. Scratch space comes from the [`BufferPool`].

mod aliases;
mod ignore;
mod library;

pub use aliases::{Alias, AliasTable, SYSTEM_ROOT_PATTERN};
pub use ignore::{IgnorePolicy, NeverIgnore, PrefixIgnorePolicy, DEFAULT_IGNORED_PREFIXES};
pub use library::{library_name, library_name_ansi, library_name_unicode_string};

use apimon_common::{ObjectAttributes, UnicodeString};
use log::debug;

use crate::domain::Handle;
use crate::platform::{ObjectNames, PathResolver};
use crate::pool::BufferPool;
use crate::wide::{starts_with_ascii, starts_with_ascii_ignore_case, WideBuf, BACKSLASH};

/// Device-namespace escape some callers put in front of DOS paths
pub const GLOBALROOT_PREFIX: &str = r"\??\Globalroot\";

/// Win32 extended-length path prefix
pub const EXTENDED_PREFIX: &str = r"\\?\";

/// Object manager `\??` directory prefix
pub const NT_PREFIX: &str = r"\??\";

/// Leaves the separator in place: `\??\Globalroot\Device\X` names `\Device\X`
const GLOBALROOT_LEN: usize = 14;
const EXTENDED_LEN: usize = 4;
const COLON: u16 = b':' as u16;

/// Turns raw path arguments into canonical long Win32 paths
pub struct PathCanonicalizer<'a, P> {
    aliases: &'a AliasTable,
    pool: &'a BufferPool,
    platform: &'a P,
    ignore: &'a dyn IgnorePolicy,
}

impl<'a, P: PathResolver + ObjectNames> PathCanonicalizer<'a, P> {
    pub fn new(aliases: &'a AliasTable, pool: &'a BufferPool, platform: &'a P, ignore: &'a dyn IgnorePolicy) -> Self {
        Self { aliases, pool, platform, ignore }
    }

    /// Canonicalize a raw wide path.
    ///
    /// `None` and empty input yield 0.
    pub fn from_string(&self, raw: Option<&[u16]>, out: &mut WideBuf) -> usize {
        out.clear();
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            return 0;
        };

        let mut path = self.pool.acquire();
        let mut scratch = self.pool.acquire();
        path.assign(raw);

        if path.starts_with_ignore_case(GLOBALROOT_PREFIX) {
            scratch.assign(&path.as_slice()[GLOBALROOT_LEN..]);
            std::mem::swap(&mut path, &mut scratch);
        }

        if self.aliases.rewrite(path.as_slice(), &mut scratch) {
            std::mem::swap(&mut path, &mut scratch);
        }

        if starts_with_ascii(path.as_slice(), NT_PREFIX) || starts_with_ascii(path.as_slice(), EXTENDED_PREFIX) {
            path.replace_prefix(EXTENDED_LEN, EXTENDED_PREFIX);
        } else if path.is_drive_absolute() {
            path.replace_prefix(0, EXTENDED_PREFIX);
        }

        if self.ignore.is_ignored(path.as_slice()) {
            out.assign(path.as_slice());
            return out.len();
        }

        if !self.platform.full_path_name(&path, &mut scratch) {
            debug!("Full path resolution failed for {}", *path);
            out.assign(strip_extended(path.as_slice()));
            return out.len();
        }

        self.longest_resolvable(&scratch, &mut path, out)
    }

    /// Canonicalize a single-byte path as passed to the `A` entry points.
    pub fn from_ansi(&self, raw: Option<&[u8]>, out: &mut WideBuf) -> usize {
        let Some(raw) = raw else {
            out.clear();
            return 0;
        };
        let mut widened = self.pool.acquire();
        widened.push_ansi(raw);
        self.from_string(Some(widened.as_slice()), out)
    }

    /// Canonicalize the path of the object behind `handle`.
    pub fn from_handle(&self, handle: Handle, out: &mut WideBuf) -> usize {
        out.clear();
        let mut name = self.pool.acquire();
        if let Err(e) = self.platform.object_name(handle, &mut name) {
            debug!("{e}");
            return 0;
        }
        self.from_string(Some(name.as_slice()), out)
    }

    /// Canonicalize an NT counted string.
    ///
    /// # Safety
    /// `name`, if present, must describe memory valid for reads of its
    /// `length` bytes.
    #[allow(unsafe_code)]
    pub unsafe fn from_unicode_string(&self, name: Option<&UnicodeString>, out: &mut WideBuf) -> usize {
        // SAFETY: upheld by the caller
        let raw = name.and_then(|n| unsafe { n.as_wide() });
        self.from_string(raw, out)
    }

    /// Canonicalize an object attributes record: the root directory's name
    /// and the object name, joined by a separator when both are present.
    ///
    /// # Safety
    /// `attributes`, if present, must point to a valid record whose object
    /// name (if non-null) is valid per [`Self::from_unicode_string`].
    #[allow(unsafe_code)]
    pub unsafe fn from_object_attributes(&self, attributes: Option<&ObjectAttributes>, out: &mut WideBuf) -> usize {
        out.clear();
        let Some(attributes) = attributes else {
            return 0;
        };

        let mut joined = self.pool.acquire();
        let root = Handle(attributes.root_directory);
        if !root.is_null() {
            if let Err(e) = self.platform.object_name(root, &mut joined) {
                debug!("{e}");
                joined.clear();
            }
        }

        // SAFETY: upheld by the caller
        let name = unsafe { attributes.object_name() }
            .and_then(|n| unsafe { n.as_wide() })
            .filter(|n| !n.is_empty());
        if let Some(name) = name {
            if !joined.is_empty() {
                joined.push(BACKSLASH);
            }
            joined.push_slice(name);
        }

        if joined.is_empty() {
            return 0;
        }
        self.from_string(Some(joined.as_slice()), out)
    }

    /// Emit the longest prefix of `full` that long-path resolution accepts,
    /// followed by the rest of `full` verbatim.
    fn longest_resolvable(&self, full: &WideBuf, probe: &mut WideBuf, out: &mut WideBuf) -> usize {
        let floor = if full.starts_with_ignore_case(EXTENDED_PREFIX) { EXTENDED_LEN } else { 0 };
        let mut resolved = self.pool.acquire();
        let mut cut = full.len();

        loop {
            // Keep the separator of a drive root: `X:` alone is drive-relative
            let end = if cut > 0 && cut < full.len() && full.as_slice()[cut - 1] == COLON { cut + 1 } else { cut };
            probe.assign(&full.as_slice()[..end]);

            if self.platform.long_path_name(probe, &mut resolved) {
                out.assign(strip_extended(resolved.as_slice()));
                out.push_slice(&full.as_slice()[end..]);
                return out.len();
            }

            match full.as_slice()[floor..cut].iter().rposition(|&u| u == BACKSLASH) {
                Some(pos) => cut = floor + pos,
                None => break,
            }
        }

        debug!("No prefix of {full} could be resolved");
        out.clear();
        0
    }
}

/// `path` without a leading `\\?\`.
fn strip_extended(path: &[u16]) -> &[u16] {
    if starts_with_ascii_ignore_case(path, EXTENDED_PREFIX) {
        &path[EXTENDED_LEN..]
    } else {
        path
    }
}
