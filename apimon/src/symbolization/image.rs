//! PE images loaded from disk
//!
//! Export tables are addressed by RVA, so a module file has to be laid out
//! the way the loader maps it before the resolver can walk it. [`MappedImage`]
//! does that layout (headers plus every section at its virtual address) and
//! then serves reads as if the image were mapped at its preferred base.

use std::fs;
use std::path::Path;

use object::{BinaryFormat, Object, ObjectSection};

use crate::domain::ImageError;
use crate::platform::{MemoryRegion, ProcessMemory};

/// A module image in loader layout at a fixed base address
#[derive(Clone)]
pub struct MappedImage {
    base: usize,
    bytes: Vec<u8>,
}

impl MappedImage {
    /// Read and lay out a PE file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not a PE image, or
    /// has sections outside its declared layout.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let data = fs::read(path.as_ref())?;
        Self::parse(&data)
    }

    /// Lay out a PE file already in memory.
    ///
    /// # Errors
    /// Returns an error if the data is not a PE image or a section does not
    /// fit the address space.
    pub fn parse(data: &[u8]) -> Result<Self, ImageError> {
        let file = object::File::parse(data)?;
        if file.format() != BinaryFormat::Pe {
            return Err(ImageError::NotPe);
        }
        let image_base = file.relative_address_base();
        let base = usize::try_from(image_base).map_err(|_| ImageError::NotPe)?;

        // Headers end where the first section's raw data starts
        let headers = file
            .sections()
            .filter_map(|section| section.file_range().map(|(offset, _)| offset))
            .filter(|&offset| offset > 0)
            .min()
            .map_or(data.len(), |offset| usize::try_from(offset).unwrap_or(data.len()))
            .min(data.len());

        let mut placements = Vec::new();
        let mut size = headers;
        for section in file.sections() {
            let name = section.name().unwrap_or("<unnamed>").to_string();
            let out_of_bounds = || ImageError::SectionOutOfBounds { name: name.clone() };
            let rva = section
                .address()
                .checked_sub(image_base)
                .and_then(|rva| usize::try_from(rva).ok())
                .ok_or_else(out_of_bounds)?;
            let raw = section.data()?;
            let virtual_size = usize::try_from(section.size()).map_err(|_| out_of_bounds())?;
            let end = rva.checked_add(virtual_size.max(raw.len())).ok_or_else(out_of_bounds)?;
            size = size.max(end);
            placements.push((rva, raw));
        }

        let mut bytes = vec![0u8; size];
        bytes[..headers].copy_from_slice(&data[..headers]);
        for (rva, raw) in placements {
            bytes[rva..rva + raw.len()].copy_from_slice(raw);
        }
        log::debug!("Mapped PE image at {base:#x} ({size:#x} bytes)");
        Ok(Self { base, bytes })
    }

    /// Wrap bytes that are already in loader layout.
    #[must_use]
    pub fn from_image_bytes(base: usize, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Absolute address of `rva` in this image.
    #[must_use]
    pub fn address_of(&self, rva: usize) -> usize {
        self.base.wrapping_add(rva)
    }

    #[must_use]
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address - self.base < self.bytes.len()
    }
}

impl ProcessMemory for MappedImage {
    fn region(&self, address: usize) -> Option<MemoryRegion> {
        self.contains(address).then(|| MemoryRegion {
            base: self.base,
            allocation_base: self.base,
            size: self.bytes.len(),
            readable: true,
        })
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> bool {
        if !self.contains(address) {
            return false;
        }
        let offset = address - self.base;
        match offset.checked_add(buf.len()).and_then(|end| self.bytes.get(offset..end)) {
            Some(src) => {
                buf.copy_from_slice(src);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_image_bytes_reads() {
        let image = MappedImage::from_image_bytes(0x1000_0000, b"MZ\x90\x00".to_vec());
        assert_eq!(image.read_u16(0x1000_0000), Some(0x5a4d));
        assert_eq!(image.read_u32(0x1000_0002), None);
        assert_eq!(image.region(0x1000_0003).map(|r| r.allocation_base), Some(0x1000_0000));
        assert!(image.region(0x1000_0004).is_none());
    }

    #[test]
    fn test_rejects_non_pe() {
        assert!(MappedImage::parse(b"\x7fELF not really").is_err());
    }
}
