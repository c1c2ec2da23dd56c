//! Live process capabilities
//!
//! [`WindowsPlatform`] answers every capability query against the process the
//! agent is loaded into. Path and drive queries go through `kernel32`,
//! object and key names through `ntdll`, memory queries through
//! `VirtualQuery`. Name queries share one scratch record per thread, so the
//! hot path does not allocate once a thread has made its first query.

#![allow(unsafe_code)]

use std::cell::RefCell;
use std::ffi::c_void;
use std::mem::{size_of, MaybeUninit};
use std::ptr;
use std::slice;

use apimon_common::UnicodeString;
use windows_sys::Win32::Foundation::{
    HANDLE, NTSTATUS, STATUS_BUFFER_OVERFLOW, STATUS_BUFFER_TOO_SMALL, STATUS_INFO_LENGTH_MISMATCH,
};
use windows_sys::Win32::Storage::FileSystem::{GetFullPathNameW, GetLongPathNameW, QueryDosDeviceW};
use windows_sys::Win32::System::Memory::{
    VirtualQuery, MEMORY_BASIC_INFORMATION, MEM_COMMIT, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE,
    PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_READONLY, PAGE_READWRITE, PAGE_WRITECOPY,
};

use super::{DosDevices, KeyNames, MemoryRegion, ObjectNames, PathResolver, ProcessMemory};
use crate::domain::{Handle, NameError};
use crate::wide::WideBuf;

/// `OBJECT_INFORMATION_CLASS::ObjectNameInformation`
const OBJECT_NAME_INFORMATION: u32 = 1;

/// `KEY_INFORMATION_CLASS::KeyNameInformation`
const KEY_NAME_INFORMATION: u32 = 3;

/// Offset of `Name` in `KEY_NAME_INFORMATION`
const KEY_NAME_OFFSET: usize = size_of::<u32>();

#[link(name = "ntdll")]
extern "system" {
    fn NtQueryObject(
        handle: HANDLE,
        information_class: u32,
        information: *mut c_void,
        information_length: u32,
        return_length: *mut u32,
    ) -> NTSTATUS;

    fn NtQueryKey(
        key_handle: HANDLE,
        information_class: u32,
        information: *mut c_void,
        length: u32,
        result_length: *mut u32,
    ) -> NTSTATUS;
}

/// Capabilities of the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsPlatform;

impl WindowsPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn ffi_len(raw: &[u16]) -> u32 {
    u32::try_from(raw.len()).unwrap_or(u32::MAX)
}

/// Adopt the result of a `kernel32` call that writes a NUL-terminated string
/// and returns its length, or the required size when the buffer is too
/// small.
fn adopt_written(out: &mut WideBuf, written: u32) -> bool {
    let written = written as usize;
    if written == 0 || written >= out.raw_mut().len() {
        out.clear();
        return false;
    }
    out.set_len(written);
    true
}

fn is_name_overflow(status: NTSTATUS) -> bool {
    matches!(status, STATUS_BUFFER_OVERFLOW | STATUS_BUFFER_TOO_SMALL | STATUS_INFO_LENGTH_MISMATCH)
}

thread_local! {
    static INFORMATION: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Run `query` over 8-byte aligned scratch for an `ntdll` information record
/// of `header` bytes followed by up to `capacity` code units.
///
/// The scratch is kept per thread and only grows. A query nested inside
/// another on the same thread, or one running during thread teardown, gets
/// a temporary buffer instead.
fn with_information_buffer<R>(header: usize, capacity: usize, mut query: impl FnMut(&mut [u64]) -> R) -> R {
    let words = (header + (capacity + 1) * 2).div_ceil(size_of::<u64>());
    let reused = INFORMATION.try_with(|cell| {
        let mut scratch = cell.try_borrow_mut().ok()?;
        if scratch.len() < words {
            scratch.resize(words, 0);
        }
        Some(query(&mut scratch[..words]))
    });
    match reused {
        Ok(Some(result)) => result,
        _ => query(&mut vec![0u64; words]),
    }
}

fn information_len(info: &[u64]) -> u32 {
    u32::try_from(info.len() * size_of::<u64>()).unwrap_or(u32::MAX)
}

impl DosDevices for WindowsPlatform {
    fn query_dos_device(&self, letter: u8, out: &mut WideBuf) -> bool {
        let device = [u16::from(letter), u16::from(b':'), 0];
        out.clear();
        let first_len = {
            let raw = out.raw_mut();
            // SAFETY: `device` is NUL-terminated and `raw` is writable for its length
            let written = unsafe { QueryDosDeviceW(device.as_ptr(), raw.as_mut_ptr(), ffi_len(raw)) } as usize;
            let written = written.min(raw.len());
            // The target list is a multi-string; only the first entry is used
            raw[..written].iter().position(|&u| u == 0).unwrap_or(written)
        };
        out.set_len(first_len);
        !out.is_empty()
    }
}

impl PathResolver for WindowsPlatform {
    fn full_path_name(&self, path: &WideBuf, out: &mut WideBuf) -> bool {
        let raw = out.raw_mut();
        // SAFETY: `path` is NUL-terminated and `raw` is writable for its length
        let written = unsafe { GetFullPathNameW(path.as_ptr(), ffi_len(raw), raw.as_mut_ptr(), ptr::null_mut()) };
        adopt_written(out, written)
    }

    fn long_path_name(&self, path: &WideBuf, out: &mut WideBuf) -> bool {
        let raw = out.raw_mut();
        // SAFETY: as above
        let written = unsafe { GetLongPathNameW(path.as_ptr(), raw.as_mut_ptr(), ffi_len(raw)) };
        adopt_written(out, written)
    }
}

impl ObjectNames for WindowsPlatform {
    fn object_name(&self, handle: Handle, out: &mut WideBuf) -> Result<(), NameError> {
        out.clear();
        let header = size_of::<UnicodeString>();
        with_information_buffer(header, out.capacity(), |info| {
            let mut returned = 0u32;
            // SAFETY: `info` is writable for the length passed
            let status = unsafe {
                NtQueryObject(
                    handle.0 as HANDLE,
                    OBJECT_NAME_INFORMATION,
                    info.as_mut_ptr().cast(),
                    information_len(info),
                    &mut returned,
                )
            };
            if is_name_overflow(status) {
                let length = (returned as usize).saturating_sub(header) / 2;
                return Err(NameError::TooLong { handle, length });
            }
            if status < 0 {
                return Err(NameError::Unresolved(handle));
            }

            // SAFETY: on success the record starts with a UNICODE_STRING whose
            // buffer points into `info`
            let name = unsafe { ptr::read(info.as_ptr().cast::<UnicodeString>()) };
            let units = unsafe { name.as_wide() }.unwrap_or_default();
            if units.is_empty() {
                return Err(NameError::Unresolved(handle));
            }
            if units.len() > out.capacity() {
                return Err(NameError::TooLong { handle, length: units.len() });
            }
            out.assign(units);
            Ok(())
        })
    }
}

impl KeyNames for WindowsPlatform {
    fn key_name(&self, handle: Handle, out: &mut WideBuf) -> Result<(), NameError> {
        out.clear();
        with_information_buffer(KEY_NAME_OFFSET, out.capacity(), |info| {
            let mut returned = 0u32;
            // SAFETY: `info` is writable for the length passed
            let status = unsafe {
                NtQueryKey(
                    handle.0 as HANDLE,
                    KEY_NAME_INFORMATION,
                    info.as_mut_ptr().cast(),
                    information_len(info),
                    &mut returned,
                )
            };
            if is_name_overflow(status) {
                let length = (returned as usize).saturating_sub(KEY_NAME_OFFSET) / 2;
                return Err(NameError::TooLong { handle, length });
            }
            if status < 0 {
                return Err(NameError::Unresolved(handle));
            }

            // SAFETY: on success the record is `{ NameLength: u32, Name: [u16] }`
            let name_bytes = unsafe { ptr::read(info.as_ptr().cast::<u32>()) } as usize;
            let length = name_bytes / 2;
            if length > out.capacity() {
                return Err(NameError::TooLong { handle, length });
            }
            let available = (info.len() * size_of::<u64>() - KEY_NAME_OFFSET) / 2;
            // SAFETY: `Name` starts 2-aligned at `KEY_NAME_OFFSET` and the slice
            // is clamped to the buffer
            let units = unsafe {
                slice::from_raw_parts(info.as_ptr().cast::<u8>().add(KEY_NAME_OFFSET).cast::<u16>(), length.min(available))
            };
            out.assign(units);
            Ok(())
        })
    }
}

fn is_readable_protection(protect: u32) -> bool {
    if protect & PAGE_GUARD != 0 {
        return false;
    }
    matches!(
        protect & 0xff,
        PAGE_READONLY | PAGE_READWRITE | PAGE_WRITECOPY | PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE | PAGE_EXECUTE_WRITECOPY
    )
}

impl ProcessMemory for WindowsPlatform {
    fn region(&self, address: usize) -> Option<MemoryRegion> {
        let mut info = MaybeUninit::<MEMORY_BASIC_INFORMATION>::zeroed();
        // SAFETY: `info` is writable for the size passed
        let written =
            unsafe { VirtualQuery(address as *const c_void, info.as_mut_ptr(), size_of::<MEMORY_BASIC_INFORMATION>()) };
        if written == 0 {
            return None;
        }
        // SAFETY: VirtualQuery filled the record
        let info = unsafe { info.assume_init() };
        Some(MemoryRegion {
            base: info.BaseAddress as usize,
            allocation_base: info.AllocationBase as usize,
            size: info.RegionSize,
            readable: info.State == MEM_COMMIT && is_readable_protection(info.Protect),
        })
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> bool {
        if buf.is_empty() {
            return true;
        }
        if !self.is_range_readable(address, buf.len()) {
            return false;
        }
        // SAFETY: the whole range is committed and readable
        unsafe { ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len()) };
        true
    }
}

#[cfg(target_arch = "x86_64")]
mod unwind {
    use std::arch::asm;
    use std::ffi::c_void;
    use std::ptr;

    use windows_sys::Win32::System::Diagnostics::Debug::{RtlCaptureContext, CONTEXT};

    use super::WindowsPlatform;
    use crate::stack::{Registers, StackLimits, UnwindStep, UnwindStrategy, Unwinder};

    const UNW_FLAG_NHANDLER: u32 = 0;

    #[repr(C)]
    struct RuntimeFunction {
        begin_address: u32,
        end_address: u32,
        unwind_info_address: u32,
    }

    #[link(name = "kernel32")]
    extern "system" {
        fn RtlLookupFunctionEntry(control_pc: u64, image_base: *mut u64, history_table: *mut c_void) -> *mut RuntimeFunction;

        fn RtlVirtualUnwind(
            handler_type: u32,
            image_base: u64,
            control_pc: u64,
            function_entry: *mut RuntimeFunction,
            context: *mut CONTEXT,
            handler_data: *mut *mut c_void,
            establisher_frame: *mut u64,
            context_pointers: *mut c_void,
        ) -> *mut c_void;
    }

    impl Unwinder for WindowsPlatform {
        type Context = CONTEXT;

        #[inline(always)]
        fn capture_context(&self) -> CONTEXT {
            // SAFETY: CONTEXT is plain data; RtlCaptureContext fills it
            let mut context: CONTEXT = unsafe { std::mem::zeroed() };
            unsafe { RtlCaptureContext(&mut context) };
            context
        }

        fn stack_limits(&self) -> StackLimits {
            let (high, low): (usize, usize);
            // SAFETY: gs points at the current thread's TEB; StackBase and
            // StackLimit are at 0x08 and 0x10
            unsafe {
                asm!("mov {}, gs:[0x08]", out(reg) high, options(nostack, readonly, preserves_flags));
                asm!("mov {}, gs:[0x10]", out(reg) low, options(nostack, readonly, preserves_flags));
            }
            StackLimits { low, high }
        }

        fn strategy(&self) -> UnwindStrategy {
            UnwindStrategy::Metadata
        }

        fn registers(&self, context: &CONTEXT) -> Registers {
            Registers { ip: context.Rip as usize, sp: context.Rsp as usize, fp: context.Rbp as usize }
        }

        fn set_registers(&self, context: &mut CONTEXT, registers: Registers) {
            context.Rip = registers.ip as u64;
            context.Rsp = registers.sp as u64;
            context.Rbp = registers.fp as u64;
        }

        fn unwind_frame(&self, context: &mut CONTEXT) -> UnwindStep {
            let mut image_base = 0u64;
            // SAFETY: lookups only read loader data
            let entry = unsafe { RtlLookupFunctionEntry(context.Rip, &mut image_base, ptr::null_mut()) };
            if entry.is_null() {
                return UnwindStep::NoFunctionEntry;
            }

            let mut handler_data = ptr::null_mut();
            let mut establisher_frame = 0u64;
            // SAFETY: `entry` came from the lookup above and `context` is a
            // complete register record
            unsafe {
                RtlVirtualUnwind(
                    UNW_FLAG_NHANDLER,
                    image_base,
                    context.Rip,
                    entry,
                    context,
                    &mut handler_data,
                    &mut establisher_frame,
                    ptr::null_mut(),
                );
            }
            UnwindStep::Unwound
        }
    }
}

#[cfg(target_arch = "x86")]
mod unwind {
    use std::arch::asm;

    use windows_sys::Win32::System::Diagnostics::Debug::{RtlCaptureContext, CONTEXT};

    use super::WindowsPlatform;
    use crate::stack::{Registers, StackLimits, UnwindStep, UnwindStrategy, Unwinder};

    impl Unwinder for WindowsPlatform {
        type Context = CONTEXT;

        #[inline(always)]
        fn capture_context(&self) -> CONTEXT {
            // SAFETY: CONTEXT is plain data; RtlCaptureContext fills it
            let mut context: CONTEXT = unsafe { std::mem::zeroed() };
            unsafe { RtlCaptureContext(&mut context) };
            context
        }

        fn stack_limits(&self) -> StackLimits {
            let (high, low): (usize, usize);
            // SAFETY: fs points at the current thread's TEB; StackBase and
            // StackLimit are at 0x04 and 0x08
            unsafe {
                asm!("mov {}, fs:[0x04]", out(reg) high, options(nostack, readonly, preserves_flags));
                asm!("mov {}, fs:[0x08]", out(reg) low, options(nostack, readonly, preserves_flags));
            }
            StackLimits { low, high }
        }

        fn strategy(&self) -> UnwindStrategy {
            UnwindStrategy::FramePointer
        }

        fn registers(&self, context: &CONTEXT) -> Registers {
            Registers { ip: context.Eip as usize, sp: context.Esp as usize, fp: context.Ebp as usize }
        }

        fn set_registers(&self, context: &mut CONTEXT, registers: Registers) {
            context.Eip = registers.ip as u32;
            context.Esp = registers.sp as u32;
            context.Ebp = registers.fp as u32;
        }

        fn unwind_frame(&self, _context: &mut CONTEXT) -> UnwindStep {
            UnwindStep::Failed
        }
    }
}
