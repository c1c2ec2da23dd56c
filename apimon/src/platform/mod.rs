//! # Platform Capabilities
//!
//! Every OS query the canonicalizers make goes through one of the traits in
//! this module. The core never calls the OS directly, which keeps it testable
//! and keeps the set of system calls it depends on explicit.
//!
//! ## Capabilities
//!
//! - [`DosDevices`]: drive letter → kernel device name (alias table setup)
//! - [`PathResolver`]: full-path and long-path resolution
//! - [`ObjectNames`]: handle → kernel object name
//! - [`KeyNames`]: registry key handle → raw kernel key name
//! - [`ProcessMemory`]: region queries and guarded reads
//! - [`Unwinder`](crate::stack::Unwinder): execution context and frame
//!   unwinding, see the [`stack`](crate::stack) module
//!
//! ## Implementations
//!
//! - `WindowsPlatform` (only on Windows): the live process, through
//!   `windows-sys` and `ntdll`
//! - [`OfflinePlatform`]: an in-memory process description used by the CLI
//!   when no live process is available, and by the tests

use std::mem::size_of;

use crate::domain::{Handle, NameError};
use crate::wide::WideBuf;

pub mod offline;
#[cfg(windows)]
pub mod windows;

pub use offline::OfflinePlatform;
#[cfg(windows)]
pub use windows::WindowsPlatform;

/// Drive letter enumeration
pub trait DosDevices {
    /// Write the device name behind drive `letter` (`b'A'..=b'Z'`) into `out`.
    ///
    /// Returns `false` when the letter is not mapped.
    fn query_dos_device(&self, letter: u8, out: &mut WideBuf) -> bool;
}

/// Win32 path resolution
///
/// Inputs are [`WideBuf`]s so implementations can rely on NUL termination.
pub trait PathResolver {
    /// Resolve `path` to an absolute path (`GetFullPathNameW` semantics).
    fn full_path_name(&self, path: &WideBuf, out: &mut WideBuf) -> bool;

    /// Expand short name components of an existing path
    /// (`GetLongPathNameW` semantics). Fails when the path does not exist.
    fn long_path_name(&self, path: &WideBuf, out: &mut WideBuf) -> bool;
}

/// Kernel object names behind handles
pub trait ObjectNames {
    /// Write the kernel name of the object behind `handle` into `out`.
    ///
    /// # Errors
    /// [`NameError::Unresolved`] when the handle is invalid or unnamed,
    /// [`NameError::TooLong`] when the name does not fit `out`.
    fn object_name(&self, handle: Handle, out: &mut WideBuf) -> Result<(), NameError>;
}

/// Kernel names of registry keys
pub trait KeyNames {
    /// Write the raw kernel name of the key behind `handle` into `out`.
    ///
    /// # Errors
    /// [`NameError::Unresolved`] when the handle is not a key,
    /// [`NameError::TooLong`] when the name does not fit `out`.
    fn key_name(&self, handle: Handle, out: &mut WideBuf) -> Result<(), NameError>;
}

/// A committed or reserved range of the address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Start of the region containing the queried address
    pub base: usize,

    /// Start of the allocation the region belongs to (module base for images)
    pub allocation_base: usize,

    pub size: usize,

    /// Committed and mapped with a readable, non-guard protection
    pub readable: bool,
}

impl MemoryRegion {
    #[must_use]
    pub fn end(&self) -> usize {
        self.base.saturating_add(self.size)
    }
}

/// Read access to the monitored process's memory
///
/// Reads copy out of the address space and fail instead of faulting. They
/// are best-effort snapshots: memory may change concurrently.
pub trait ProcessMemory {
    /// Describe the region containing `address`.
    fn region(&self, address: usize) -> Option<MemoryRegion>;

    /// Copy `buf.len()` bytes starting at `address`.
    ///
    /// Returns `false` without touching memory if any part of the range is
    /// not readable.
    fn read(&self, address: usize, buf: &mut [u8]) -> bool;

    /// Whether every byte of `[address, address + len)` is readable.
    fn is_range_readable(&self, address: usize, len: usize) -> bool {
        let Some(end) = address.checked_add(len) else {
            return false;
        };
        let mut cursor = address;
        while cursor < end {
            match self.region(cursor) {
                Some(region) if region.readable && region.end() > cursor => cursor = region.end(),
                _ => return false,
            }
        }
        true
    }

    fn read_u16(&self, address: usize) -> Option<u16> {
        let mut raw = [0u8; 2];
        self.read(address, &mut raw).then(|| u16::from_le_bytes(raw))
    }

    fn read_u32(&self, address: usize) -> Option<u32> {
        let mut raw = [0u8; 4];
        self.read(address, &mut raw).then(|| u32::from_le_bytes(raw))
    }

    fn read_pointer(&self, address: usize) -> Option<usize> {
        let mut raw = [0u8; size_of::<usize>()];
        self.read(address, &mut raw).then(|| usize::from_le_bytes(raw))
    }

    /// Read a NUL-terminated byte string of at most `max` bytes.
    ///
    /// A string cut short by an unreadable page ends there.
    fn read_c_string(&self, address: usize, max: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; max];
        if !self.read(address, &mut bytes) {
            let readable = (0..max)
                .take_while(|&i| address.checked_add(i).is_some_and(|a| self.is_range_readable(a, 1)))
                .count();
            bytes.truncate(readable);
            if !self.read(address, &mut bytes) {
                bytes.clear();
            }
        }
        if let Some(nul) = bytes.iter().position(|&b| b == 0) {
            bytes.truncate(nul);
        }
        bytes
    }
}

impl<T: ProcessMemory + ?Sized> ProcessMemory for &T {
    fn region(&self, address: usize) -> Option<MemoryRegion> {
        (**self).region(address)
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> bool {
        (**self).read(address, buf)
    }
}
