//! PE header parsing
//!
//! The headers are read strictly in file order: DOS header, then the PE
//! header at `e_lfanew`, then the optional header right behind it. Each
//! stage produces the offsets the next one needs.

use bytes::Buf;
use tracing::{debug, warn};

use crate::error::{PeError, Result};
use crate::io::ImageReader;
use crate::pe::types::*;

/// Parse the DOS header at the start of the file.
pub fn parse_dos_header(reader: &mut ImageReader) -> Result<DosHeader> {
    if reader.size() < DOS_HEADER_SIZE {
        return Err(PeError::FileTooSmall {
            size: reader.size(),
            expected: DOS_HEADER_SIZE,
        });
    }

    reader.seek(0)?;
    let mut buf = reader
        .read_exact(DOS_HEADER_SIZE)
        .map_err(PeError::truncated("DOS header"))?;

    let mut e_magic = [0u8; 2];
    buf.copy_to_slice(&mut e_magic);
    if e_magic != DOS_SIGNATURE {
        return Err(PeError::InvalidDosSignature { found: e_magic });
    }

    let mut header = DosHeader {
        e_magic,
        e_cblp: buf.get_u16_le(),
        e_cp: buf.get_u16_le(),
        e_crlc: buf.get_u16_le(),
        e_cparhdr: buf.get_u16_le(),
        e_minalloc: buf.get_u16_le(),
        e_maxalloc: buf.get_u16_le(),
        e_ss: buf.get_u16_le(),
        e_sp: buf.get_u16_le(),
        e_csum: buf.get_u16_le(),
        e_ip: buf.get_u16_le(),
        e_cs: buf.get_u16_le(),
        e_lfarlc: buf.get_u16_le(),
        e_ovno: buf.get_u16_le(),
        ..Default::default()
    };
    for word in header.e_res.iter_mut() {
        *word = buf.get_u16_le();
    }
    header.e_oemid = buf.get_u16_le();
    header.e_oeminfo = buf.get_u16_le();
    for word in header.e_res2.iter_mut() {
        *word = buf.get_u16_le();
    }
    header.e_lfanew = buf.get_u32_le();

    Ok(header)
}

/// Parse the PE signature and COFF file header at `e_lfanew`.
pub fn parse_pe_header(reader: &mut ImageReader, dos: &DosHeader) -> Result<PeHeader> {
    let offset = u64::from(dos.e_lfanew);
    reader.seek(offset).map_err(|_| PeError::Unreachable {
        what: "PE header",
        offset,
    })?;

    let mut buf = reader
        .read_exact(PE_HEADER_SIZE)
        .map_err(PeError::truncated("PE header"))?;

    let mut signature = [0u8; 4];
    buf.copy_to_slice(&mut signature);
    if signature != PE_SIGNATURE {
        return Err(PeError::InvalidPeSignature { found: signature });
    }

    Ok(PeHeader {
        signature,
        machine: Machine::from(buf.get_u16_le()),
        number_of_sections: buf.get_u16_le(),
        time_date_stamp: buf.get_u32_le(),
        pointer_to_symbol_table: buf.get_u32_le(),
        number_of_symbols: buf.get_u32_le(),
        size_of_optional_header: buf.get_u16_le(),
        characteristics: buf.get_u16_le(),
    })
}

fn read_common(buf: &mut impl Buf) -> OptionalHeaderCommon {
    OptionalHeaderCommon {
        magic: buf.get_u16_le(),
        major_linker_version: buf.get_u8(),
        minor_linker_version: buf.get_u8(),
        size_of_code: buf.get_u32_le(),
        size_of_initialized_data: buf.get_u32_le(),
        size_of_uninitialized_data: buf.get_u32_le(),
        address_of_entry_point: buf.get_u32_le(),
        base_of_code: buf.get_u32_le(),
    }
}

fn read_windows_fields(buf: &mut impl Buf) -> WindowsFields {
    WindowsFields {
        section_alignment: buf.get_u32_le(),
        file_alignment: buf.get_u32_le(),
        major_operating_system_version: buf.get_u16_le(),
        minor_operating_system_version: buf.get_u16_le(),
        major_image_version: buf.get_u16_le(),
        minor_image_version: buf.get_u16_le(),
        major_subsystem_version: buf.get_u16_le(),
        minor_subsystem_version: buf.get_u16_le(),
        win32_version_value: buf.get_u32_le(),
        size_of_image: buf.get_u32_le(),
        size_of_headers: buf.get_u32_le(),
        checksum: buf.get_u32_le(),
        subsystem: Subsystem::from(buf.get_u16_le()),
        dll_characteristics: buf.get_u16_le(),
    }
}

/// Parse the optional header and its data directory array.
///
/// A PE may legally carry no optional header; that case yields
/// `OptionalHeader::Absent` and no directories.
pub fn parse_optional_header(
    reader: &mut ImageReader,
    dos: &DosHeader,
    pe: &PeHeader,
) -> Result<(OptionalHeader, Vec<DataDirectory>)> {
    if pe.size_of_optional_header == 0 {
        warn!("This PE has no Image Optional Header");
        return Ok((OptionalHeader::Absent, Vec::new()));
    }

    let offset = u64::from(dos.e_lfanew) + PE_HEADER_SIZE;
    reader.seek(offset).map_err(|_| PeError::Unreachable {
        what: "Image Optional Header",
        offset,
    })?;

    // Only the first 0x18 bytes have the same layout in both shapes.
    let mut prefix = reader
        .read_exact(0x18)
        .map_err(PeError::truncated("Image Optional Header"))?;
    let common = read_common(&mut prefix);

    let header = match common.magic {
        PE32_MAGIC => {
            let mut specific = reader
                .read_exact(8)
                .map_err(PeError::truncated("PE32 specific part of the Image Optional Header"))?;
            let base_of_data = specific.get_u32_le();
            let image_base = specific.get_u32_le();

            let mut shared = reader
                .read_exact(0x28)
                .map_err(PeError::truncated("common part of the Image Optional Header"))?;
            let windows = read_windows_fields(&mut shared);

            let mut sizes = reader
                .read_exact(24)
                .map_err(PeError::truncated("PE32 stack and heap sizes"))?;

            OptionalHeader::Pe32(OptionalHeader32 {
                common,
                base_of_data,
                image_base,
                windows,
                size_of_stack_reserve: sizes.get_u32_le(),
                size_of_stack_commit: sizes.get_u32_le(),
                size_of_heap_reserve: sizes.get_u32_le(),
                size_of_heap_commit: sizes.get_u32_le(),
                loader_flags: sizes.get_u32_le(),
                number_of_rva_and_sizes: sizes.get_u32_le(),
            })
        }
        PE32PLUS_MAGIC => {
            // BaseOfData does not exist in PE32+, and ImageBase is 8 bytes wide.
            let image_base = reader
                .read_u64()
                .map_err(PeError::truncated("PE32+ specific part of the Image Optional Header"))?;

            let mut shared = reader
                .read_exact(0x28)
                .map_err(PeError::truncated("common part of the Image Optional Header"))?;
            let windows = read_windows_fields(&mut shared);

            let mut sizes = reader
                .read_exact(40)
                .map_err(PeError::truncated("PE32+ stack and heap sizes"))?;

            OptionalHeader::Pe32Plus(OptionalHeader64 {
                common,
                image_base,
                windows,
                size_of_stack_reserve: sizes.get_u64_le(),
                size_of_stack_commit: sizes.get_u64_le(),
                size_of_heap_reserve: sizes.get_u64_le(),
                size_of_heap_commit: sizes.get_u64_le(),
                loader_flags: sizes.get_u32_le(),
                number_of_rva_and_sizes: sizes.get_u32_le(),
            })
        }
        other => return Err(PeError::InvalidMagic(other)),
    };

    // The Windows loader disregards values above 0x10; crafted files use this to crash parsers.
    let declared = header.number_of_rva_and_sizes();
    if declared as usize > MAX_DATA_DIRECTORIES {
        warn!(
            number_of_rva_and_sizes = declared,
            "NumberOfRvaAndSizes > 0x10. This PE may have manually been crafted"
        );
    }

    let count = (declared as usize).min(MAX_DATA_DIRECTORIES);
    let mut directories = Vec::with_capacity(count);
    for index in 0..count {
        let mut entry = reader
            .read_exact(DATA_DIRECTORY_SIZE)
            .map_err(PeError::truncated("data directory entry"))?;
        let directory = DataDirectory {
            virtual_address: entry.get_u32_le(),
            size: entry.get_u32_le(),
        };
        debug!(
            index = index,
            rva = directory.virtual_address,
            size = directory.size,
            "Read data directory"
        );
        directories.push(directory);
    }

    let consumed = reader.position() - offset;
    if consumed > u64::from(pe.size_of_optional_header) {
        warn!(
            consumed = consumed,
            declared = pe.size_of_optional_header,
            "Image Optional Header extends past SizeOfOptionalHeader"
        );
    }

    Ok((header, directories))
}
