//! Bounded UTF-16 buffers
//!
//! Every canonical name produced by this crate lives in a [`WideBuf`]: a
//! fixed-capacity, always NUL-terminated UTF-16 buffer. Appends truncate at
//! capacity instead of growing, so a hostile input can shorten a result but
//! never push a write past the end of the buffer.

use std::fmt;

use apimon_common::MAX_PATH_W;
use widestring::{U16Str, U16String};

/// Path separator as a UTF-16 code unit
pub const BACKSLASH: u16 = b'\\' as u16;

const COLON: u16 = b':' as u16;

/// Fixed-capacity, NUL-terminated UTF-16 string
///
/// The backing storage is allocated once with room for `capacity` code units
/// plus the terminator and is never reallocated, which keeps the storage
/// address stable for the lifetime of the buffer (the buffer pool relies on
/// that address as the buffer's identity).
pub struct WideBuf {
    data: Box<[u16]>,
    len: usize,
}

impl WideBuf {
    /// Create an empty buffer with the canonical path capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_PATH_W)
    }

    /// Create an empty buffer holding at most `capacity` code units.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: vec![0u16; capacity + 1].into_boxed_slice(), len: 0 }
    }

    /// Create a buffer initialised from a string, truncated to `capacity`.
    #[must_use]
    pub fn from_str_with_capacity(s: &str, capacity: usize) -> Self {
        let mut buf = Self::with_capacity(capacity);
        buf.push_str(s);
        buf
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len() - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Code units room left before truncation kicks in
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u16] {
        &self.data[..self.len]
    }

    /// Pointer to the NUL-terminated contents.
    ///
    /// Also serves as the identity of the buffer: it never changes while the
    /// buffer is alive.
    #[must_use]
    pub fn as_ptr(&self) -> *const u16 {
        self.data.as_ptr()
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.data[0] = 0;
    }

    /// Shorten the contents to `len` code units (no-op when already shorter).
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
            self.terminate();
        }
    }

    /// Append a single code unit. Returns `false` if the buffer is full.
    pub fn push(&mut self, unit: u16) -> bool {
        if self.len == self.capacity() {
            return false;
        }
        self.data[self.len] = unit;
        self.len += 1;
        self.terminate();
        true
    }

    /// Append as much of `src` as fits.
    ///
    /// Returns `true` when nothing had to be dropped.
    pub fn push_slice(&mut self, src: &[u16]) -> bool {
        let take = src.len().min(self.remaining());
        self.data[self.len..self.len + take].copy_from_slice(&src[..take]);
        self.len += take;
        self.terminate();
        take == src.len()
    }

    /// Append a UTF-8 string, truncating at capacity.
    pub fn push_str(&mut self, s: &str) -> bool {
        for unit in s.encode_utf16() {
            if !self.push(unit) {
                return false;
            }
        }
        true
    }

    /// Append single-byte characters, widening each byte.
    ///
    /// Stops at the first NUL byte, the way the ANSI entry points treat
    /// their arguments.
    pub fn push_ansi(&mut self, bytes: &[u8]) -> bool {
        for &byte in bytes.iter().take_while(|&&b| b != 0) {
            if !self.push(u16::from(byte)) {
                return false;
            }
        }
        true
    }

    /// Replace the contents with `src`, truncating at capacity.
    pub fn assign(&mut self, src: &[u16]) -> bool {
        self.clear();
        self.push_slice(src)
    }

    /// Replace the first `old_len` code units with `prefix`.
    ///
    /// The remainder is moved before the new prefix is written, so this is
    /// correct when the new prefix is longer than the old one. Whatever no
    /// longer fits is cut off at the end.
    pub fn replace_prefix(&mut self, old_len: usize, prefix: &str) -> bool {
        let old_len = old_len.min(self.len);
        let cap = self.capacity();
        let new_len = prefix.encode_utf16().count();
        let rest = self.len - old_len;

        let written = new_len.min(cap);
        let kept = rest.min(cap - written);

        self.data.copy_within(old_len..old_len + kept, written);
        for (slot, unit) in self.data[..written].iter_mut().zip(prefix.encode_utf16()) {
            *slot = unit;
        }

        self.len = written + kept;
        self.terminate();
        written == new_len && kept == rest
    }

    /// Remove every separator that is directly followed by another one.
    pub fn collapse_separators(&mut self) {
        let mut write = 0;
        for read in 0..self.len {
            if self.data[read] == BACKSLASH && read + 1 < self.len && self.data[read + 1] == BACKSLASH {
                continue;
            }
            self.data[write] = self.data[read];
            write += 1;
        }
        self.len = write;
        self.terminate();
    }

    /// Index of the last occurrence of `unit`.
    #[must_use]
    pub fn rfind(&self, unit: u16) -> Option<usize> {
        self.as_slice().iter().rposition(|&u| u == unit)
    }

    /// Index of the first occurrence of `unit` at or after `start`.
    #[must_use]
    pub fn find_from(&self, start: usize, unit: u16) -> Option<usize> {
        self.as_slice().get(start..)?.iter().position(|&u| u == unit).map(|pos| pos + start)
    }

    /// Case-insensitive (ASCII) prefix test.
    #[must_use]
    pub fn starts_with_ignore_case(&self, prefix: &str) -> bool {
        starts_with_ascii_ignore_case(self.as_slice(), prefix)
    }

    /// Whether the contents start with an `X:\` drive root.
    #[must_use]
    pub fn is_drive_absolute(&self) -> bool {
        is_drive_absolute(self.as_slice())
    }

    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        U16Str::from_slice(self.as_slice()).to_string_lossy()
    }

    /// Whole storage including the terminator slot, for FFI writers.
    #[cfg(any(windows, test))]
    pub(crate) fn raw_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }

    /// Adopt `len` code units written through [`Self::raw_mut`].
    #[cfg(any(windows, test))]
    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
        self.terminate();
    }

    fn terminate(&mut self) {
        self.data[self.len] = 0;
    }
}

impl Default for WideBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WideBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", U16Str::from_slice(self.as_slice()).display())
    }
}

impl fmt::Debug for WideBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WideBuf")
            .field("text", &self.to_string_lossy())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl PartialEq<str> for WideBuf {
    fn eq(&self, other: &str) -> bool {
        self.as_slice().iter().copied().eq(other.encode_utf16())
    }
}

impl PartialEq<&str> for WideBuf {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

/// Encode a string as UTF-16 without terminator.
#[must_use]
pub fn wide(s: &str) -> Vec<u16> {
    U16String::from_str(s).into_vec()
}

fn fold(unit: u16) -> u16 {
    if (u16::from(b'A')..=u16::from(b'Z')).contains(&unit) {
        unit + 32
    } else {
        unit
    }
}

/// Case-insensitive (ASCII) prefix test of a wide string against a wide prefix.
#[must_use]
pub fn starts_with_ignore_case(haystack: &[u16], prefix: &[u16]) -> bool {
    haystack.len() >= prefix.len()
        && haystack.iter().zip(prefix).all(|(&a, &b)| fold(a) == fold(b))
}

/// Case-insensitive (ASCII) prefix test of a wide string against a UTF-8 prefix.
#[must_use]
pub fn starts_with_ascii_ignore_case(haystack: &[u16], prefix: &str) -> bool {
    let mut units = haystack.iter();
    prefix.encode_utf16().all(|p| units.next().is_some_and(|&h| fold(h) == fold(p)))
}

/// Case-sensitive prefix test of a wide string against a UTF-8 prefix.
#[must_use]
pub fn starts_with_ascii(haystack: &[u16], prefix: &str) -> bool {
    let mut units = haystack.iter();
    prefix.encode_utf16().all(|p| units.next() == Some(&p))
}

/// `X:\...` test; the drive letter itself is not validated.
#[must_use]
pub fn is_drive_absolute(path: &[u16]) -> bool {
    path.len() >= 3 && path[1] == COLON && path[2] == BACKSLASH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_truncates_at_capacity() {
        let mut buf = WideBuf::with_capacity(4);
        assert!(buf.push_str("ab"));
        assert!(!buf.push_str("cdef"));
        assert_eq!(buf, "abcd");
        assert!(!buf.push(u16::from(b'x')));
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_buffer_stays_terminated() {
        let mut buf = WideBuf::with_capacity(8);
        buf.push_str("hello");
        buf.truncate(2);
        assert_eq!(buf.raw_mut()[2], 0);
        buf.clear();
        assert_eq!(buf.raw_mut()[0], 0);
    }

    #[test]
    fn test_set_len_adopts_written_units() {
        let mut buf = WideBuf::with_capacity(4);
        buf.raw_mut()[..3].copy_from_slice(&wide("abc"));
        buf.set_len(3);
        assert_eq!(buf, "abc");
        buf.set_len(99);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.raw_mut()[4], 0);
    }

    #[test]
    fn test_replace_prefix_with_longer_prefix() {
        let mut buf = WideBuf::new();
        buf.push_str(r"\REGISTRY\MACHINE\Software\Y");
        assert!(buf.replace_prefix(17, "HKEY_LOCAL_MACHINE"));
        assert_eq!(buf, r"HKEY_LOCAL_MACHINE\Software\Y");
    }

    #[test]
    fn test_replace_prefix_with_shorter_prefix() {
        let mut buf = WideBuf::new();
        buf.push_str(r"\??\C:\x");
        assert!(buf.replace_prefix(4, r"\\?\"));
        assert_eq!(buf, r"\\?\C:\x");
        buf.replace_prefix(6, "D:");
        assert_eq!(buf, r"D:\x");
    }

    #[test]
    fn test_replace_prefix_truncates_remainder() {
        let mut buf = WideBuf::with_capacity(10);
        buf.push_str("ab123456");
        assert!(!buf.replace_prefix(2, "ABCDE"));
        assert_eq!(buf, "ABCDE12345");
    }

    #[test]
    fn test_collapse_separators() {
        let mut buf = WideBuf::new();
        buf.push_str(r"\\REGISTRY\\\MACHINE\x\\");
        buf.collapse_separators();
        assert_eq!(buf, r"\REGISTRY\MACHINE\x\");
    }

    #[test]
    fn test_prefix_helpers() {
        let path = wide(r"\Device\HarddiskVolume1\Windows");
        assert!(starts_with_ascii_ignore_case(&path, r"\device\harddiskvolume1\"));
        assert!(!starts_with_ascii(&path, r"\device"));
        assert!(starts_with_ignore_case(&path, &wide(r"\DEVICE\")));
        assert!(!starts_with_ascii_ignore_case(&wide(r"\Dev"), r"\Device"));
        assert!(is_drive_absolute(&wide(r"C:\x")));
        assert!(!is_drive_absolute(&wide("C:x")));
    }

    #[test]
    fn test_find_helpers() {
        let buf = WideBuf::from_str_with_capacity(r"a\b\c", 16);
        assert_eq!(buf.rfind(BACKSLASH), Some(3));
        assert_eq!(buf.find_from(2, BACKSLASH), Some(3));
        assert_eq!(buf.find_from(4, BACKSLASH), None);
        assert_eq!(buf.find_from(99, BACKSLASH), None);
    }

    #[test]
    fn test_push_ansi_stops_at_nul() {
        let mut buf = WideBuf::new();
        buf.push_ansi(b"C:\\a\0junk");
        assert_eq!(buf, r"C:\a");
    }
}
