//! Builders for synthetic PE images used by the integration tests.
//!
//! Every image has its PE header at 0x80 and the optional header right
//! behind it. Unless built headers-only, it carries two sections laid out so
//! that any RVA in 0x1000..0x3000 sits at file offset `rva - 0xC00`:
//!
//! | section | RVA    | size   | file offset |
//! |---------|--------|--------|-------------|
//! | .text   | 0x1000 | 0x1000 | 0x400       |
//! | .rdata  | 0x2000 | 0x1000 | 0x1400      |
#![allow(dead_code)]

use std::io::Write;

use pescope::pe::types::*;
use tempfile::NamedTempFile;

pub const PE_OFFSET: usize = 0x80;
pub const OPTIONAL_OFFSET: usize = PE_OFFSET + 24;
pub const IMAGE_BASE_32: u64 = 0x400000;
pub const IMAGE_BASE_64: u64 = 0x1_4000_0000;
pub const FILE_SIZE: usize = 0x2400;

/// File offset of an RVA inside one of the two default sections.
pub fn rva(rva: u32) -> usize {
    rva as usize - 0xC00
}

pub struct PeBuilder {
    pub data: Vec<u8>,
    is_64bit: bool,
}

impl PeBuilder {
    pub fn pe32() -> Self {
        Self::new(false, true)
    }

    pub fn pe32plus() -> Self {
        Self::new(true, true)
    }

    /// An image without a section table.
    pub fn headers_only(is_64bit: bool) -> Self {
        Self::new(is_64bit, false)
    }

    fn new(is_64bit: bool, with_sections: bool) -> Self {
        let mut builder = Self {
            data: vec![0u8; FILE_SIZE],
            is_64bit,
        };
        builder.data[0..2].copy_from_slice(b"MZ");
        builder.put_u32(0x3C, PE_OFFSET as u32);

        builder.data[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");
        let machine = if is_64bit { 0x8664 } else { 0x014c };
        builder.put_u16(PE_OFFSET + 4, machine);
        let optional_size = if is_64bit { 0xF0 } else { 0xE0 };
        builder.put_u16(PE_OFFSET + 20, optional_size);
        builder.put_u16(PE_OFFSET + 22, 0x2102);

        let opt = OPTIONAL_OFFSET;
        if is_64bit {
            builder.put_u16(opt, PE32PLUS_MAGIC);
            builder.put_u64(opt + 24, IMAGE_BASE_64);
            builder.put_u32(opt + 108, 16);
        } else {
            builder.put_u16(opt, PE32_MAGIC);
            builder.put_u32(opt + 28, IMAGE_BASE_32 as u32);
            builder.put_u32(opt + 92, 16);
        }
        builder.put_u32(opt + 16, 0x1000); // AddressOfEntryPoint
        builder.put_u32(opt + 32, 0x1000); // SectionAlignment
        builder.put_u32(opt + 36, 0x200); // FileAlignment
        builder.put_u16(opt + 68, 3); // Subsystem

        if with_sections {
            builder.add_section(".text", 0x1000, 0x1000, 0x400, 0x1000, 0x6000_0020);
            builder.add_section(".rdata", 0x2000, 0x1000, 0x1400, 0x1000, 0x4000_0040);
        }
        builder
    }

    pub fn is_64bit(&self) -> bool {
        self.is_64bit
    }

    pub fn image_base(&self) -> u64 {
        if self.is_64bit {
            IMAGE_BASE_64
        } else {
            IMAGE_BASE_32
        }
    }

    pub fn optional_header_size(&self) -> usize {
        u16::from_le_bytes([self.data[PE_OFFSET + 20], self.data[PE_OFFSET + 21]]) as usize
    }

    pub fn section_count(&self) -> usize {
        u16::from_le_bytes([self.data[PE_OFFSET + 6], self.data[PE_OFFSET + 7]]) as usize
    }

    fn directory_offset(&self, slot: usize) -> usize {
        let start = if self.is_64bit { 112 } else { 96 };
        OPTIONAL_OFFSET + start + slot * 8
    }

    fn number_of_rva_offset(&self) -> usize {
        OPTIONAL_OFFSET + if self.is_64bit { 108 } else { 92 }
    }

    pub fn add_section(
        &mut self,
        name: &str,
        virtual_address: u32,
        virtual_size: u32,
        raw_pointer: u32,
        raw_size: u32,
        characteristics: u32,
    ) {
        let index = self.section_count();
        let at = OPTIONAL_OFFSET + self.optional_header_size() + index * 40;
        self.data[at..at + name.len()].copy_from_slice(name.as_bytes());
        self.put_u32(at + 8, virtual_size);
        self.put_u32(at + 12, virtual_address);
        self.put_u32(at + 16, raw_size);
        self.put_u32(at + 20, raw_pointer);
        self.put_u32(at + 36, characteristics);
        self.put_u16(PE_OFFSET + 6, (index + 1) as u16);
    }

    pub fn directory(mut self, slot: usize, virtual_address: u32, size: u32) -> Self {
        let at = self.directory_offset(slot);
        self.put_u32(at, virtual_address);
        self.put_u32(at + 4, size);
        self
    }

    pub fn number_of_rva_and_sizes(mut self, count: u32) -> Self {
        let at = self.number_of_rva_offset();
        self.put_u32(at, count);
        self
    }

    pub fn put_u16(&mut self, offset: usize, value: u16) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub fn put_u64(&mut self, offset: usize, value: u64) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    /// Writes a pointer-sized value for this image's shape.
    pub fn put_pointer(&mut self, offset: usize, value: u64) {
        if self.is_64bit {
            self.put_u64(offset, value);
        } else {
            self.put_u32(offset, value as u32);
        }
    }

    /// Writes `bytes` at `offset`, growing the image as needed.
    pub fn put_bytes(&mut self, offset: usize, bytes: &[u8]) {
        if self.data.len() < offset + bytes.len() {
            self.data.resize(offset + bytes.len(), 0);
        }
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn truncate(mut self, len: usize) -> Self {
        self.data.truncate(len);
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Writes the image to a temporary file.
    pub fn write(&self) -> NamedTempFile {
        create_temp_file(&self.data)
    }
}

/// Creates a temporary file with the given content.
pub fn create_temp_file(content: &[u8]) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Export directory at RVA 0x2000 naming `test.dll`, with ordinal base 5 and
/// three functions: `alpha` at 0x1000, an unnamed forwarder to
/// `KERNEL32.Sleep` and `gamma` at 0x1010.
pub fn with_exports(builder: PeBuilder) -> PeBuilder {
    let mut b = builder.directory(IMAGE_DIRECTORY_ENTRY_EXPORT, 0x2000, 0x100);
    let dir = rva(0x2000);
    b.put_u32(dir + 12, 0x2050);
    b.put_u32(dir + 16, 5);
    b.put_u32(dir + 20, 3);
    b.put_u32(dir + 24, 2);
    b.put_u32(dir + 28, 0x2080);
    b.put_u32(dir + 32, 0x2100);
    b.put_u32(dir + 36, 0x2110);
    b.put_bytes(rva(0x2050), b"test.dll\0");

    b.put_u32(rva(0x2080), 0x1000);
    b.put_u32(rva(0x2084), 0x20C0);
    b.put_u32(rva(0x2088), 0x1010);
    b.put_bytes(rva(0x20C0), b"KERNEL32.Sleep\0");

    b.put_u32(rva(0x2100), 0x2120);
    b.put_u32(rva(0x2104), 0x2130);
    b.put_u16(rva(0x2110), 0);
    b.put_u16(rva(0x2112), 2);
    b.put_bytes(rva(0x2120), b"alpha\0");
    b.put_bytes(rva(0x2130), b"gamma\0");
    b
}

/// Two relocation blocks at RVA 0x2200, 22 bytes in total.
pub fn with_relocations(builder: PeBuilder, declared_size: u32) -> PeBuilder {
    let mut b = builder.directory(IMAGE_DIRECTORY_ENTRY_BASERELOC, 0x2200, declared_size);
    let at = rva(0x2200);
    b.put_u32(at, 0x1000);
    b.put_u32(at + 4, 12);
    b.put_u16(at + 8, 0x3004);
    b.put_u16(at + 10, 0x3008);
    b.put_u32(at + 12, 0x2000);
    b.put_u32(at + 16, 10);
    b.put_u16(at + 20, 0xA010);
    b
}

/// TLS directory at RVA 0x2300 whose callback table at RVA 0x2340 holds
/// `callbacks` (RVAs, turned into VAs) followed by a null pointer.
pub fn with_tls(builder: PeBuilder, callbacks: &[u32]) -> PeBuilder {
    let width = if builder.is_64bit() { 8 } else { 4 };
    let base = builder.image_base();
    let size = if builder.is_64bit() { 40 } else { 24 };
    let mut b = builder.directory(IMAGE_DIRECTORY_ENTRY_TLS, 0x2300, size);
    let at = rva(0x2300);
    b.put_pointer(at, base + 0x2400);
    b.put_pointer(at + width, base + 0x2410);
    b.put_pointer(at + 2 * width, base + 0x2420);
    b.put_pointer(at + 3 * width, base + 0x2340);
    b.put_u32(at + 4 * width + 4, 0x0030_0000);
    for (i, &callback) in callbacks.iter().enumerate() {
        b.put_pointer(rva(0x2340) + i * width, base + u64::from(callback));
    }
    b.put_pointer(rva(0x2340) + callbacks.len() * width, 0);
    b
}

pub const CERTIFICATE_OFFSET: usize = FILE_SIZE;

/// Two certificates appended to the file: 13 bytes (3 bytes of padding)
/// then 10 bytes.
pub fn with_certificates(builder: PeBuilder, declared_size: u32) -> PeBuilder {
    let mut b = builder.directory(
        IMAGE_DIRECTORY_ENTRY_SECURITY,
        CERTIFICATE_OFFSET as u32,
        declared_size,
    );
    let at = CERTIFICATE_OFFSET;
    b.put_u32(at, 13);
    b.put_u16(at + 4, 0x0200);
    b.put_u16(at + 6, 2);
    b.put_bytes(at + 8, &[0x30, 0x82, 0x01, 0x02, 0x03]);
    b.put_bytes(at + 13, &[0, 0, 0]);
    b.put_u32(at + 16, 10);
    b.put_u16(at + 20, 0x0200);
    b.put_u16(at + 22, 2);
    b.put_bytes(at + 24, &[0xAA, 0xBB]);
    b.put_bytes(at + 26, &[0u8; 6]);
    b
}

/// One import descriptor at RVA 0x2500 for `KERNEL32.dll`, importing
/// `Sleep` by name and ordinal 42.
pub fn with_imports(builder: PeBuilder) -> PeBuilder {
    let width = if builder.is_64bit() { 8 } else { 4 };
    let ordinal_flag = if builder.is_64bit() { 1u64 << 63 } else { 1u64 << 31 };
    let mut b = builder.directory(IMAGE_DIRECTORY_ENTRY_IMPORT, 0x2500, 40);
    let at = rva(0x2500);
    b.put_u32(at, 0x2580);
    b.put_u32(at + 12, 0x2560);
    b.put_u32(at + 16, 0x25C0);
    b.put_bytes(rva(0x2560), b"KERNEL32.dll\0");

    for table in [0x2580, 0x25C0] {
        b.put_pointer(rva(table), 0x2600);
        b.put_pointer(rva(table) + width, ordinal_flag | 42);
        b.put_pointer(rva(table) + 2 * width, 0);
    }
    b.put_u16(rva(0x2600), 0x55);
    b.put_bytes(rva(0x2602), b"Sleep\0");
    b
}
