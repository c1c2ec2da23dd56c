//! Shared fixtures for the integration tests

#![allow(dead_code)]

/// Where the single section of a built image starts
pub const SECTION_RVA: u32 = 0x1000;

/// Size of that section, in file and in memory
pub const SECTION_SIZE: u32 = 0x2000;

/// First RVA free for fake function bodies
pub const CODE_RVA: u32 = 0x1800;

const HEADERS_SIZE: usize = 0x200;
const EXPORT_DIRECTORY_RVA: u32 = SECTION_RVA;
const TABLES_RVA: u32 = SECTION_RVA + 0x40;

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn raw_offset(rva: u32) -> usize {
    HEADERS_SIZE + (rva - SECTION_RVA) as usize
}

/// Builds minimal PE DLL files with a single section holding the export
/// directory and the (fake) code.
pub struct PeBuilder {
    image_base: u64,
    pe32: bool,
    module_name: Option<String>,
    exports: Vec<(String, u32)>,
    export_directory: bool,
    names_rva_override: Option<u32>,
}

impl Default for PeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PeBuilder {
    pub fn new() -> Self {
        Self {
            image_base: 0x1_8000_0000,
            pe32: false,
            module_name: Some("TEST.dll".to_string()),
            exports: Vec::new(),
            export_directory: true,
            names_rva_override: None,
        }
    }

    /// 32-bit optional header; the image base is truncated to 32 bits.
    pub fn pe32(mut self) -> Self {
        self.pe32 = true;
        self.image_base = 0x1000_0000;
        self
    }

    pub fn image_base(mut self, base: u64) -> Self {
        self.image_base = base;
        self
    }

    pub fn module_name(mut self, name: Option<&str>) -> Self {
        self.module_name = name.map(ToString::to_string);
        self
    }

    pub fn export(mut self, name: &str, rva: u32) -> Self {
        self.exports.push((name.to_string(), rva));
        self
    }

    pub fn without_export_directory(mut self) -> Self {
        self.export_directory = false;
        self
    }

    /// Point the name table outside the image.
    pub fn corrupt_name_table(mut self) -> Self {
        self.names_rva_override = Some(0x7000_0000);
        self
    }

    pub fn base(&self) -> u64 {
        self.image_base
    }

    pub fn build(&self) -> Vec<u8> {
        let mut file = vec![0u8; HEADERS_SIZE + SECTION_SIZE as usize];

        file[0..2].copy_from_slice(b"MZ");
        put_u32(&mut file, 0x3c, 0x40);
        file[0x40..0x44].copy_from_slice(b"PE\0\0");

        let coff = 0x44;
        let optional_size: u16 = if self.pe32 { 224 } else { 240 };
        put_u16(&mut file, coff, if self.pe32 { 0x014c } else { 0x8664 });
        put_u16(&mut file, coff + 2, 1);
        put_u16(&mut file, coff + 16, optional_size);
        put_u16(&mut file, coff + 18, if self.pe32 { 0x2102 } else { 0x2022 });

        let opt = coff + 20;
        put_u16(&mut file, opt, if self.pe32 { 0x10b } else { 0x20b });
        if self.pe32 {
            put_u32(&mut file, opt + 28, self.image_base as u32);
        } else {
            put_u64(&mut file, opt + 24, self.image_base);
        }
        put_u32(&mut file, opt + 32, 0x1000);
        put_u32(&mut file, opt + 36, 0x200);
        put_u16(&mut file, opt + 40, 6);
        put_u16(&mut file, opt + 48, 6);
        put_u32(&mut file, opt + 56, SECTION_RVA + SECTION_SIZE);
        put_u32(&mut file, opt + 60, HEADERS_SIZE as u32);
        put_u16(&mut file, opt + 68, 2);
        let (rva_count, directories) = if self.pe32 { (opt + 92, opt + 96) } else { (opt + 108, opt + 112) };
        put_u32(&mut file, rva_count, 16);

        let section = opt + usize::from(optional_size);
        file[section..section + 5].copy_from_slice(b".text");
        put_u32(&mut file, section + 8, SECTION_SIZE);
        put_u32(&mut file, section + 12, SECTION_RVA);
        put_u32(&mut file, section + 16, SECTION_SIZE);
        put_u32(&mut file, section + 20, HEADERS_SIZE as u32);
        put_u32(&mut file, section + 36, 0x6000_0020);

        if !self.export_directory {
            return file;
        }

        let count = self.exports.len() as u32;
        let functions_rva = TABLES_RVA;
        let names_rva = functions_rva + 4 * count;
        let ordinals_rva = names_rva + 4 * count;
        let mut string_rva = ordinals_rva + 2 * count;

        let directory = raw_offset(EXPORT_DIRECTORY_RVA);
        if let Some(name) = &self.module_name {
            put_u32(&mut file, directory + 12, string_rva);
            string_rva = write_c_string(&mut file, string_rva, name);
        }
        put_u32(&mut file, directory + 16, 1);
        put_u32(&mut file, directory + 20, count);
        put_u32(&mut file, directory + 24, count);
        put_u32(&mut file, directory + 28, functions_rva);
        put_u32(&mut file, directory + 32, self.names_rva_override.unwrap_or(names_rva));
        put_u32(&mut file, directory + 36, ordinals_rva);

        for (i, (name, rva)) in self.exports.iter().enumerate() {
            let i = i as u32;
            put_u32(&mut file, raw_offset(functions_rva + 4 * i), *rva);
            put_u32(&mut file, raw_offset(names_rva + 4 * i), string_rva);
            put_u16(&mut file, raw_offset(ordinals_rva + 2 * i), i as u16);
            string_rva = write_c_string(&mut file, string_rva, name);
        }
        assert!(string_rva <= CODE_RVA, "export tables overlap the code area");

        put_u32(&mut file, directories, EXPORT_DIRECTORY_RVA);
        put_u32(&mut file, directories + 4, string_rva - EXPORT_DIRECTORY_RVA);
        file
    }
}

/// Write a NUL-terminated string at `rva`, returning the RVA after it.
fn write_c_string(file: &mut [u8], rva: u32, value: &str) -> u32 {
    let offset = raw_offset(rva);
    file[offset..offset + value.len()].copy_from_slice(value.as_bytes());
    file[offset + value.len()] = 0;
    rva + value.len() as u32 + 1
}
