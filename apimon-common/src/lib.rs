//! # Shared ABI Records (Hooking Engine ↔ Canonicalization Core)
//!
//! Defines the raw records and constants exchanged between the trampoline
//! side of the monitor and the canonicalization core. All records use
//! `#[repr(C)]` and mirror the native NT layouts exactly, so the hooking
//! engine can hand over the pointers it received from an intercepted call
//! without copying or translating them.
//!
//! ## Key Types
//!
//! - [`UnicodeString`] - Length-prefixed, non-terminated NT string
//! - [`ObjectAttributes`] - Root directory handle plus object name
//!
//! The crate is `no_std` so that the hooking engine, which runs before any
//! runtime is available, can depend on it.

#![no_std]

use core::ffi::c_void;
use core::mem::size_of;
use core::ptr;
use core::slice;

// ============================================================================
// Capacity Constants
// ============================================================================

/// Capacity of every canonical path and registry key buffer, in UTF-16 code
/// units (excluding the terminator).
///
/// Matches the longest path the NT object manager accepts.
pub const MAX_PATH_W: usize = 0x7fff;

/// Maximum number of path aliases registered at attach time.
///
/// Overflowing the table is fatal: a partial alias set would silently
/// produce wrong paths for every later call.
pub const ALIAS_CAPACITY: usize = 64;

/// Number of reusable wide buffers each thread may hold at once.
pub const BUFFER_SLOT_COUNT: usize = 0x1000 / size_of::<usize>();

/// Upper bound of a single x86/x64 instruction, in bytes.
///
/// The stack walker checks that this many bytes are readable at an
/// instruction pointer before handing it to the unwinder.
pub const MAX_INSTRUCTION_LENGTH: usize = 16;

/// Default number of frames captured per stack trace.
pub const DEFAULT_STACK_FRAMES: usize = 32;

/// Longest export name read from a module's name table, in bytes.
pub const MAX_EXPORT_NAME: usize = 256;

// ============================================================================
// Predefined Registry Handles
// ============================================================================

/// Sign-extends a 32-bit predefined key value the way `winreg.h` does.
const fn predefined_key(value: u32) -> usize {
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    let extended = value as i32 as isize as usize;
    extended
}

pub const HKEY_CLASSES_ROOT: usize = predefined_key(0x8000_0000);
pub const HKEY_CURRENT_USER: usize = predefined_key(0x8000_0001);
pub const HKEY_LOCAL_MACHINE: usize = predefined_key(0x8000_0002);
pub const HKEY_USERS: usize = predefined_key(0x8000_0003);
pub const HKEY_PERFORMANCE_DATA: usize = predefined_key(0x8000_0004);
pub const HKEY_CURRENT_CONFIG: usize = predefined_key(0x8000_0005);
pub const HKEY_DYN_DATA: usize = predefined_key(0x8000_0006);

// ============================================================================
// NT Records
// ============================================================================

/// Native `UNICODE_STRING`
///
/// `length` and `maximum_length` are byte counts. The buffer is not
/// guaranteed to be NUL-terminated and may be shared with the monitored
/// program, so it must only ever be read.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct UnicodeString {
    /// Length of the string in bytes, without terminator
    pub length: u16,

    /// Size of the allocation behind `buffer`, in bytes
    pub maximum_length: u16,

    /// Pointer to the UTF-16 data (may be null)
    pub buffer: *const u16,
}

// Raw views over caller-owned memory
#[allow(unsafe_code)]
impl UnicodeString {
    /// Describe an existing UTF-16 slice.
    ///
    /// Slices longer than a `UNICODE_STRING` can express are clamped to the
    /// largest even byte count.
    #[must_use]
    pub fn from_slice(data: &[u16]) -> Self {
        let bytes = data.len().saturating_mul(2).min(usize::from(u16::MAX) & !1);
        #[allow(clippy::cast_possible_truncation)]
        let length = bytes as u16;
        Self { length, maximum_length: length, buffer: data.as_ptr() }
    }

    /// An empty string with a null buffer.
    #[must_use]
    pub const fn null() -> Self {
        Self { length: 0, maximum_length: 0, buffer: ptr::null() }
    }

    /// Number of whole UTF-16 code units described by `length`.
    #[must_use]
    pub const fn len_units(&self) -> usize {
        self.length as usize / 2
    }

    /// View the string as a slice of code units.
    ///
    /// Returns `None` when the buffer pointer is null.
    ///
    /// # Safety
    /// `buffer` must be valid for reads of `length` bytes for the lifetime of
    /// the returned slice.
    #[must_use]
    pub unsafe fn as_wide(&self) -> Option<&[u16]> {
        if self.buffer.is_null() {
            return None;
        }
        // SAFETY: upheld by the caller
        Some(unsafe { slice::from_raw_parts(self.buffer, self.len_units()) })
    }
}

/// Native `OBJECT_ATTRIBUTES`
///
/// Only `root_directory` and `object_name` are interpreted by the core; the
/// remaining fields are carried so the layout matches the native record.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ObjectAttributes {
    /// Size of the record in bytes
    pub length: u32,

    /// Handle the object name is relative to (0 when absolute)
    pub root_directory: usize,

    /// Object name, possibly relative to `root_directory` (may be null)
    pub object_name: *const UnicodeString,

    /// `OBJ_*` attribute flags
    pub attributes: u32,

    /// Optional security descriptor (never read)
    pub security_descriptor: *const c_void,

    /// Optional quality of service record (never read)
    pub security_quality_of_service: *const c_void,
}

#[allow(unsafe_code)]
impl ObjectAttributes {
    /// Build a record the way `InitializeObjectAttributes` does.
    #[must_use]
    pub fn new(root_directory: usize, object_name: Option<&UnicodeString>) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let length = size_of::<Self>() as u32;
        Self {
            length,
            root_directory,
            object_name: object_name.map_or(ptr::null(), ptr::from_ref),
            attributes: 0,
            security_descriptor: ptr::null(),
            security_quality_of_service: ptr::null(),
        }
    }

    /// Whether `length` matches the native record size.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.length as usize == size_of::<Self>()
    }

    /// Borrow the object name record.
    ///
    /// # Safety
    /// `object_name` must be null or point to a valid [`UnicodeString`].
    #[must_use]
    pub unsafe fn object_name(&self) -> Option<&UnicodeString> {
        // SAFETY: upheld by the caller
        unsafe { self.object_name.as_ref() }
    }
}
