//! Export directory access through [`ProcessMemory`]
//!
//! Headers are copied out of the monitored process one record at a time and
//! decoded with the `object` crate's PE layouts. Nothing here dereferences a
//! module pointer directly, so a module unloaded mid-read yields an error
//! instead of a fault.

use std::mem::size_of;

use object::pe::{
    ImageDataDirectory, ImageDosHeader, ImageExportDirectory, ImageNtHeaders32, ImageNtHeaders64,
    IMAGE_DIRECTORY_ENTRY_EXPORT, IMAGE_DOS_SIGNATURE, IMAGE_NT_OPTIONAL_HDR32_MAGIC,
    IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_NT_SIGNATURE,
};
use object::pod::{self, Pod};
use object::LittleEndian as LE;

use apimon_common::MAX_EXPORT_NAME;

use crate::domain::{Address, SymbolError};
use crate::platform::ProcessMemory;

/// Largest name count accepted from an export directory
const MAX_EXPORT_NAMES: u32 = 0x1_0000;

/// Offset of the optional header magic from the NT headers
const OPTIONAL_MAGIC_OFFSET: usize = 4 + 20;

/// Largest header record copied by [`read_pod`] (PE32+ NT headers are 264)
const MAX_RECORD: usize = 512;

/// Copy a header record out of process memory.
fn read_pod<T: Pod, M: ProcessMemory + ?Sized>(memory: &M, address: usize) -> Option<T> {
    let mut raw = [0u8; MAX_RECORD];
    let raw = raw.get_mut(..size_of::<T>())?;
    if !memory.read(address, raw) {
        return None;
    }
    pod::from_bytes::<T>(raw).ok().map(|(record, _)| *record)
}

/// Base of the module image containing `address`.
///
/// The allocation containing the address must be readable and start with the
/// `MZ` signature.
pub fn module_base<M: ProcessMemory + ?Sized>(memory: &M, address: usize) -> Option<usize> {
    let region = memory.region(address)?;
    let base = region.allocation_base;
    (base != 0 && memory.read_u16(base) == Some(IMAGE_DOS_SIGNATURE)).then_some(base)
}

/// Located export directory of one module
#[derive(Debug, Clone)]
pub struct ExportTable {
    pub base: usize,
    pub number_of_functions: u32,
    pub number_of_names: u32,
    functions: usize,
    names: usize,
    ordinals: usize,
    name: u32,
}

impl ExportTable {
    /// Locate and validate the export directory of the module at `base`.
    ///
    /// # Errors
    /// - [`SymbolError::NoExportDirectory`] if the data directory is absent
    /// - [`SymbolError::NoExports`] if it exports no names
    /// - [`SymbolError::MalformedExports`] if the headers or tables are
    ///   unreadable or inconsistent
    pub fn read<M: ProcessMemory + ?Sized>(memory: &M, base: usize) -> Result<Self, SymbolError> {
        let malformed = |reason| SymbolError::MalformedExports { base: Address(base), reason };

        let dos: ImageDosHeader = read_pod(memory, base).ok_or_else(|| malformed("unreadable DOS header"))?;
        if dos.e_magic.get(LE) != IMAGE_DOS_SIGNATURE {
            return Err(malformed("bad DOS signature"));
        }
        let nt = base
            .checked_add(dos.e_lfanew.get(LE) as usize)
            .ok_or_else(|| malformed("NT headers out of range"))?;

        let magic_at = nt
            .checked_add(OPTIONAL_MAGIC_OFFSET)
            .ok_or_else(|| malformed("NT headers out of range"))?;
        let magic = memory.read_u16(magic_at).ok_or_else(|| malformed("unreadable NT headers"))?;
        let (signature, rva_count, directories) = match magic {
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => {
                let headers: ImageNtHeaders64 =
                    read_pod(memory, nt).ok_or_else(|| malformed("unreadable NT headers"))?;
                (
                    headers.signature.get(LE),
                    headers.optional_header.number_of_rva_and_sizes.get(LE),
                    nt.checked_add(size_of::<ImageNtHeaders64>()),
                )
            }
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => {
                let headers: ImageNtHeaders32 =
                    read_pod(memory, nt).ok_or_else(|| malformed("unreadable NT headers"))?;
                (
                    headers.signature.get(LE),
                    headers.optional_header.number_of_rva_and_sizes.get(LE),
                    nt.checked_add(size_of::<ImageNtHeaders32>()),
                )
            }
            _ => return Err(malformed("unknown optional header magic")),
        };
        if signature != IMAGE_NT_SIGNATURE {
            return Err(malformed("bad NT signature"));
        }

        if rva_count as usize <= IMAGE_DIRECTORY_ENTRY_EXPORT {
            return Err(SymbolError::NoExportDirectory(Address(base)));
        }
        let entry = directories
            .and_then(|d| d.checked_add(IMAGE_DIRECTORY_ENTRY_EXPORT * size_of::<ImageDataDirectory>()))
            .ok_or_else(|| malformed("NT headers out of range"))?;
        let directory: ImageDataDirectory =
            read_pod(memory, entry).ok_or_else(|| malformed("unreadable data directory"))?;
        let (va, size) = (directory.virtual_address.get(LE), directory.size.get(LE));
        if va == 0 || size == 0 {
            return Err(SymbolError::NoExportDirectory(Address(base)));
        }

        let exports: ImageExportDirectory = read_pod(memory, base.wrapping_add(va as usize))
            .ok_or_else(|| malformed("unreadable export directory"))?;
        let table = Self {
            base,
            number_of_functions: exports.number_of_functions.get(LE),
            number_of_names: exports.number_of_names.get(LE),
            functions: base.wrapping_add(exports.address_of_functions.get(LE) as usize),
            names: base.wrapping_add(exports.address_of_names.get(LE) as usize),
            ordinals: base.wrapping_add(exports.address_of_name_ordinals.get(LE) as usize),
            name: exports.name.get(LE),
        };

        if table.number_of_names == 0 || table.number_of_functions == 0 {
            return Err(SymbolError::NoExports(Address(base)));
        }
        if table.number_of_names > MAX_EXPORT_NAMES || table.number_of_functions > MAX_EXPORT_NAMES {
            return Err(malformed("export count out of range"));
        }
        let names = table.number_of_names as usize;
        let readable = memory.is_range_readable(table.names, names * 4)
            && memory.is_range_readable(table.ordinals, names * 2)
            && memory.is_range_readable(table.functions, table.number_of_functions as usize * 4);
        if !readable {
            return Err(malformed("export tables unreadable"));
        }
        Ok(table)
    }

    /// Absolute address of the function behind name `index`.
    ///
    /// `None` for ordinals outside the function table and unused slots.
    pub fn function_address<M: ProcessMemory + ?Sized>(&self, memory: &M, index: u32) -> Option<usize> {
        let ordinal = memory.read_u16(self.ordinals.wrapping_add(index as usize * 2))?;
        if u32::from(ordinal) >= self.number_of_functions {
            return None;
        }
        let rva = memory.read_u32(self.functions.wrapping_add(usize::from(ordinal) * 4))?;
        (rva != 0).then(|| self.base.wrapping_add(rva as usize))
    }

    /// Exported name at `index`, bounded to [`MAX_EXPORT_NAME`] bytes.
    pub fn name<M: ProcessMemory + ?Sized>(&self, memory: &M, index: u32) -> Option<String> {
        let rva = memory.read_u32(self.names.wrapping_add(index as usize * 4))?;
        let bytes = memory.read_c_string(self.base.wrapping_add(rva as usize), MAX_EXPORT_NAME);
        (!bytes.is_empty()).then(|| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Name the module gave itself at link time (e.g. `KERNEL32.dll`).
    pub fn module_name<M: ProcessMemory + ?Sized>(&self, memory: &M) -> Option<String> {
        if self.name == 0 {
            return None;
        }
        let bytes = memory.read_c_string(self.base.wrapping_add(self.name as usize), MAX_EXPORT_NAME);
        (!bytes.is_empty()).then(|| String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::OfflinePlatform;

    fn dos_header(e_lfanew: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 0x1000];
        bytes[..2].copy_from_slice(b"MZ");
        bytes[0x3c..0x40].copy_from_slice(&e_lfanew.to_le_bytes());
        bytes
    }

    #[test]
    fn test_nt_headers_past_address_space_end() {
        let base = usize::MAX - 0x1fff;
        let mut platform = OfflinePlatform::new();
        platform.map_memory(base, dos_header(0x1ff0), true);

        match ExportTable::read(&platform, base) {
            Err(SymbolError::MalformedExports { reason, .. }) => assert_eq!(reason, "NT headers out of range"),
            other => panic!("expected malformed exports, got {other:?}"),
        }
    }

    #[test]
    fn test_unmapped_nt_headers() {
        let base = 0x7000_0000;
        let mut platform = OfflinePlatform::new();
        platform.map_memory(base, dos_header(0x8000), true);

        match ExportTable::read(&platform, base) {
            Err(SymbolError::MalformedExports { reason, .. }) => assert_eq!(reason, "unreadable NT headers"),
            other => panic!("expected malformed exports, got {other:?}"),
        }
    }
}
