//! Module names as the loader APIs receive them
//!
//! `LoadLibrary` and `LdrLoadDll` callers pass anything from `user32` to a
//! full path with forward slashes. The log records the bare module name: the
//! last path component with a trailing `.dll` (any case) removed.

use apimon_common::UnicodeString;

use crate::wide::{starts_with_ascii_ignore_case, WideBuf};

const DLL_SUFFIX: &str = ".dll";

fn is_separator(unit: u16) -> bool {
    unit == u16::from(b'\\') || unit == u16::from(b'/')
}

/// Bare module name of `raw`, truncated to the capacity of `out`.
///
/// `raw` ends at its first NUL, if any. Returns the length written; `None`
/// yields 0 with `out` cleared.
pub fn library_name(raw: Option<&[u16]>, out: &mut WideBuf) -> usize {
    out.clear();
    let Some(raw) = raw else {
        return 0;
    };
    let raw = raw.iter().position(|&u| u == 0).map_or(raw, |nul| &raw[..nul]);
    let start = raw.iter().rposition(|&u| is_separator(u)).map_or(0, |sep| sep + 1);
    out.push_slice(&raw[start..]);

    if let Some(stem) = out.len().checked_sub(DLL_SUFFIX.len()) {
        if starts_with_ascii_ignore_case(&out.as_slice()[stem..], DLL_SUFFIX) {
            out.truncate(stem);
        }
    }
    out.len()
}

/// [`library_name`] for single-byte names.
pub fn library_name_ansi(raw: Option<&[u8]>, out: &mut WideBuf) -> usize {
    let Some(raw) = raw else {
        out.clear();
        return 0;
    };
    let mut widened = WideBuf::with_capacity(raw.len());
    widened.push_ansi(raw);
    library_name(Some(widened.as_slice()), out)
}

/// [`library_name`] for an NT counted string.
///
/// # Safety
/// `name`, if present, must describe memory valid for reads of its `length`
/// bytes.
#[allow(unsafe_code)]
pub unsafe fn library_name_unicode_string(name: Option<&UnicodeString>, out: &mut WideBuf) -> usize {
    // SAFETY: upheld by the caller
    let raw = name.and_then(|n| unsafe { n.as_wide() });
    library_name(raw, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wide::wide;

    fn name_of(raw: &str) -> String {
        let mut out = WideBuf::with_capacity(64);
        let len = library_name(Some(wide(raw).as_slice()), &mut out);
        assert_eq!(len, out.len());
        out.to_string_lossy()
    }

    #[test]
    fn test_last_component_without_extension() {
        assert_eq!(name_of(r"C:\Windows\System32\KERNEL32.DLL"), "KERNEL32");
        assert_eq!(name_of("C:/tools/x64/dbghelp.dll"), "dbghelp");
        assert_eq!(name_of(r"plugins/a\b/Mixed.Dll"), "Mixed");
        assert_eq!(name_of("user32"), "user32");
    }

    #[test]
    fn test_other_extensions_are_kept() {
        assert_eq!(name_of(r"C:\apps\tool.exe"), "tool.exe");
        assert_eq!(name_of("driver.dll.mui"), "driver.dll.mui");
    }

    #[test]
    fn test_short_names() {
        assert_eq!(name_of("a"), "a");
        assert_eq!(name_of("dll"), "dll");
        assert_eq!(name_of(".DLL"), "");
        assert_eq!(name_of(r"dir\"), "");
        assert_eq!(name_of(""), "");
    }

    #[test]
    fn test_input_ends_at_nul() {
        assert_eq!(name_of("ws2_32.dll\0garbage\\x.dll"), "ws2_32");
    }

    #[test]
    fn test_truncated_to_capacity() {
        let mut out = WideBuf::with_capacity(6);
        assert_eq!(library_name(Some(wide(r"C:\x\advapi32.dll").as_slice()), &mut out), 6);
        assert_eq!(out, "advapi");

        // The suffix check applies to what fits
        assert_eq!(library_name(Some(wide(r"C:\x\ab.dll").as_slice()), &mut out), 2);
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_absent_input() {
        let mut out = WideBuf::from_str_with_capacity("stale", 16);
        assert_eq!(library_name(None, &mut out), 0);
        assert!(out.is_empty());
        assert_eq!(library_name_ansi(None, &mut out), 0);
        assert_eq!(unsafe { library_name_unicode_string(None, &mut out) }, 0);
        let null = UnicodeString::null();
        assert_eq!(unsafe { library_name_unicode_string(Some(&null), &mut out) }, 0);
    }

    #[test]
    fn test_ansi_and_counted_variants() {
        let mut out = WideBuf::new();
        library_name_ansi(Some(b"C:/Windows/System32/ntdll.dll\0"), &mut out);
        assert_eq!(out, "ntdll");

        let raw = wide(r"\SystemRoot\System32\WININET.dll and beyond");
        let counted = UnicodeString::from_slice(&raw[..32]);
        assert_eq!(unsafe { library_name_unicode_string(Some(&counted), &mut out) }, 7);
        assert_eq!(out, "WININET");
    }
}
