//! Core PE data types and structures

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

// PE constants
pub const DOS_SIGNATURE: [u8; 2] = *b"MZ";
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;

// On-disk record sizes
pub const DOS_HEADER_SIZE: u64 = 64;
/// Signature plus COFF file header.
pub const PE_HEADER_SIZE: u64 = 24;
pub const SECTION_HEADER_SIZE: u64 = 40;
pub const DATA_DIRECTORY_SIZE: u64 = 8;
/// The loader ignores directory slots past this count.
pub const MAX_DATA_DIRECTORIES: usize = 16;

// Data directory indices
pub const IMAGE_DIRECTORY_ENTRY_EXPORT: usize = 0;
pub const IMAGE_DIRECTORY_ENTRY_IMPORT: usize = 1;
pub const IMAGE_DIRECTORY_ENTRY_RESOURCE: usize = 2;
pub const IMAGE_DIRECTORY_ENTRY_EXCEPTION: usize = 3;
pub const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;
pub const IMAGE_DIRECTORY_ENTRY_BASERELOC: usize = 5;
pub const IMAGE_DIRECTORY_ENTRY_DEBUG: usize = 6;
pub const IMAGE_DIRECTORY_ENTRY_ARCHITECTURE: usize = 7;
pub const IMAGE_DIRECTORY_ENTRY_GLOBALPTR: usize = 8;
pub const IMAGE_DIRECTORY_ENTRY_TLS: usize = 9;
pub const IMAGE_DIRECTORY_ENTRY_LOAD_CONFIG: usize = 10;
pub const IMAGE_DIRECTORY_ENTRY_BOUND_IMPORT: usize = 11;
pub const IMAGE_DIRECTORY_ENTRY_IAT: usize = 12;
pub const IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT: usize = 13;
pub const IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR: usize = 14;

// Section characteristics
pub const IMAGE_SCN_CNT_CODE: u32 = 0x00000020;
pub const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x00000040;
pub const IMAGE_SCN_CNT_UNINITIALIZED_DATA: u32 = 0x00000080;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x20000000;
pub const IMAGE_SCN_MEM_READ: u32 = 0x40000000;
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x80000000;

/// Machine types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Machine {
    #[default]
    Unknown,
    I386,   // 0x014c
    X86_64, // 0x8664
    Arm,    // 0x01c0
    Arm64,  // 0xaa64
    ArmNT,  // 0x01c4
    IA64,   // 0x0200
    EBC,    // 0x0ebc
    Other(u16),
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        match value {
            0x014c => Self::I386,
            0x8664 => Self::X86_64,
            0x01c0 => Self::Arm,
            0xaa64 => Self::Arm64,
            0x01c4 => Self::ArmNT,
            0x0200 => Self::IA64,
            0x0ebc => Self::EBC,
            0 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

/// Subsystem types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Subsystem {
    #[default]
    Unknown,
    Native,                 // 1
    WindowsGui,             // 2
    WindowsCui,             // 3
    Os2Cui,                 // 5
    PosixCui,               // 7
    WindowsCeGui,           // 9
    EfiApplication,         // 10
    EfiBootServiceDriver,   // 11
    EfiRuntimeDriver,       // 12
    EfiRom,                 // 13
    Xbox,                   // 14
    WindowsBootApplication, // 16
    Other(u16),
}

impl From<u16> for Subsystem {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Native,
            2 => Self::WindowsGui,
            3 => Self::WindowsCui,
            5 => Self::Os2Cui,
            7 => Self::PosixCui,
            9 => Self::WindowsCeGui,
            10 => Self::EfiApplication,
            11 => Self::EfiBootServiceDriver,
            12 => Self::EfiRuntimeDriver,
            13 => Self::EfiRom,
            14 => Self::Xbox,
            16 => Self::WindowsBootApplication,
            other => Self::Other(other),
        }
    }
}

/// DOS header (64 bytes)
///
/// Only `e_magic` and `e_lfanew` matter to the parser; the rest is kept as read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DosHeader {
    pub e_magic: [u8; 2],  // Magic number (MZ)
    pub e_cblp: u16,       // Bytes on last page of file
    pub e_cp: u16,         // Pages in file
    pub e_crlc: u16,       // Relocations
    pub e_cparhdr: u16,    // Size of header in paragraphs
    pub e_minalloc: u16,   // Minimum extra paragraphs needed
    pub e_maxalloc: u16,   // Maximum extra paragraphs needed
    pub e_ss: u16,         // Initial (relative) SS value
    pub e_sp: u16,         // Initial SP value
    pub e_csum: u16,       // Checksum
    pub e_ip: u16,         // Initial IP value
    pub e_cs: u16,         // Initial (relative) CS value
    pub e_lfarlc: u16,     // File address of relocation table
    pub e_ovno: u16,       // Overlay number
    pub e_res: [u16; 4],   // Reserved words
    pub e_oemid: u16,      // OEM identifier
    pub e_oeminfo: u16,    // OEM information
    pub e_res2: [u16; 10], // Reserved words
    pub e_lfanew: u32,     // File address of PE header
}

/// PE signature followed by the COFF file header (24 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeHeader {
    pub signature: [u8; 4],
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

/// Data directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_empty(&self) -> bool {
        self.virtual_address == 0 && self.size == 0
    }

    /// True when `rva` lies strictly between the directory's bounds.
    pub fn strictly_contains(&self, rva: u32) -> bool {
        let start = u64::from(self.virtual_address);
        let end = start + u64::from(self.size);
        u64::from(rva) > start && u64::from(rva) < end
    }
}

/// The 0x18-byte prefix shared by both optional header shapes, ending with `base_of_code`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionalHeaderCommon {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
}

/// The 0x28-byte block starting at `SectionAlignment`, identical in PE32 and PE32+.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowsFields {
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: u16,
}

/// 32-bit optional header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionalHeader32 {
    pub common: OptionalHeaderCommon,
    pub base_of_data: u32,
    pub image_base: u32,
    pub windows: WindowsFields,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

/// 64-bit optional header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionalHeader64 {
    pub common: OptionalHeaderCommon,
    pub image_base: u64,
    pub windows: WindowsFields,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

/// Optional header, selected by its magic value.
///
/// `Absent` stands for a PE whose `SizeOfOptionalHeader` is zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum OptionalHeader {
    #[default]
    Absent,
    Pe32(OptionalHeader32),
    Pe32Plus(OptionalHeader64),
}

impl OptionalHeader {
    pub fn common(&self) -> Option<&OptionalHeaderCommon> {
        match self {
            Self::Absent => None,
            Self::Pe32(h) => Some(&h.common),
            Self::Pe32Plus(h) => Some(&h.common),
        }
    }

    pub fn windows(&self) -> Option<&WindowsFields> {
        match self {
            Self::Absent => None,
            Self::Pe32(h) => Some(&h.windows),
            Self::Pe32Plus(h) => Some(&h.windows),
        }
    }

    pub fn magic(&self) -> u16 {
        self.common().map_or(0, |c| c.magic)
    }

    pub fn entry_point(&self) -> u32 {
        self.common().map_or(0, |c| c.address_of_entry_point)
    }

    pub fn image_base(&self) -> u64 {
        match self {
            Self::Absent => 0,
            Self::Pe32(h) => h.image_base as u64,
            Self::Pe32Plus(h) => h.image_base,
        }
    }

    pub fn subsystem(&self) -> Subsystem {
        self.windows().map_or(Subsystem::Unknown, |w| w.subsystem)
    }

    pub fn dll_characteristics(&self) -> u16 {
        self.windows().map_or(0, |w| w.dll_characteristics)
    }

    pub fn checksum(&self) -> u32 {
        self.windows().map_or(0, |w| w.checksum)
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            Self::Absent => 0,
            Self::Pe32(h) => h.number_of_rva_and_sizes,
            Self::Pe32Plus(h) => h.number_of_rva_and_sizes,
        }
    }

    pub fn is_64bit(&self) -> bool {
        matches!(self, Self::Pe32Plus(_))
    }

    /// Width in bytes of pointer-sized fields (TLS, thunks) in this image.
    pub fn pointer_width(&self) -> u64 {
        if self.is_64bit() {
            8
        } else {
            4
        }
    }
}

/// Section header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: u32,
}

impl SectionHeader {
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).to_string()
    }

    /// Checks `rva` against `[VirtualAddress, VirtualAddress + size)`, where
    /// size is the virtual size or, with `use_raw_size`, the raw data size.
    pub fn contains_rva(&self, rva: u64, use_raw_size: bool) -> bool {
        let size = if use_raw_size {
            self.size_of_raw_data
        } else {
            self.virtual_size
        };
        let start = u64::from(self.virtual_address);
        rva >= start && rva < start + u64::from(size)
    }

    pub fn is_executable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_EXECUTE) != 0
    }

    pub fn is_readable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_READ) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_WRITE) != 0
    }

    pub fn contains_code(&self) -> bool {
        (self.characteristics & IMAGE_SCN_CNT_CODE) != 0
    }
}

/// Section header plus the path of the file it was read from
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub header: SectionHeader,
    #[serde(skip)]
    pub path: Arc<Path>,
}
