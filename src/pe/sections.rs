//! Section table loading and address translation

use bytes::{Buf, Bytes};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{PeError, Result};
use crate::io::{IOLimits, ImageReader};
use crate::pe::types::*;

/// Section table in on-disk order.
///
/// Translation scans the table front to back, so the first matching section
/// wins when sections overlap. The order is never changed after loading.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct SectionTable {
    sections: Vec<Section>,
}

impl SectionTable {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Get all sections
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Find section by name
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.header.name() == name)
    }

    /// Find the first section whose virtual range contains `rva`
    pub fn section_containing_rva(&self, rva: u64) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.header.contains_rva(rva, false))
    }

    /// Convert an RVA to a file offset.
    ///
    /// Without any section the RVA is returned as-is (truncated to 32 bits),
    /// which is right for headers-only images. Otherwise sections are matched
    /// by virtual size first, then by raw data size for images whose virtual
    /// size undershoots. `None` means the address is not backed by the file;
    /// a match landing on file offset 0 counts as unmapped too.
    pub fn rva_to_offset(&self, rva: u64) -> Option<u32> {
        if self.sections.is_empty() {
            return Some(rva as u32);
        }

        let section = self
            .sections
            .iter()
            .find(|s| s.header.contains_rva(rva, false))
            .or_else(|| {
                self.sections
                    .iter()
                    .find(|s| s.header.contains_rva(rva, true))
            });

        match section {
            Some(section) => {
                let delta = rva - u64::from(section.header.virtual_address);
                let offset = (delta + u64::from(section.header.pointer_to_raw_data)) as u32;
                if offset == 0 {
                    trace!(rva = rva, "RVA translates to file offset 0");
                    return None;
                }
                Some(offset)
            }
            None => {
                trace!(rva = rva, "RVA is not mapped by any section");
                None
            }
        }
    }

    /// Convert a VA to a file offset, given the image base.
    ///
    /// Only addresses strictly above the image base are translated.
    pub fn va_to_offset(&self, va: u64, image_base: u64) -> Option<u32> {
        if va > image_base {
            self.rva_to_offset(va - image_base)
        } else {
            None
        }
    }

    /// Convert file offset to RVA
    pub fn offset_to_rva(&self, offset: u64) -> Option<u32> {
        self.sections.iter().find_map(|section| {
            let raw_start = u64::from(section.header.pointer_to_raw_data);
            let raw_end = raw_start + u64::from(section.header.size_of_raw_data);
            if offset >= raw_start && offset < raw_end {
                let rva = u64::from(section.header.virtual_address) + (offset - raw_start);
                Some(rva as u32)
            } else {
                None
            }
        })
    }

    /// Get executable sections
    pub fn executable_sections(&self) -> Vec<&Section> {
        self.sections
            .iter()
            .filter(|s| s.header.is_executable())
            .collect()
    }
}

impl Section {
    pub fn name(&self) -> String {
        self.header.name()
    }

    /// Re-reads this section's raw bytes from the file it was loaded from.
    ///
    /// The file is opened for the duration of the call only. Data past the
    /// end of the file is silently cut off.
    pub fn raw_data(&self, limits: &IOLimits) -> Result<Bytes> {
        let mut reader = ImageReader::open(&self.path, limits.clone())?;
        let data = reader.read_at(
            u64::from(self.header.pointer_to_raw_data),
            u64::from(self.header.size_of_raw_data),
        )?;
        Ok(data)
    }
}

fn decode_section_header(mut buf: Bytes) -> SectionHeader {
    let mut name = [0u8; 8];
    buf.copy_to_slice(&mut name);
    SectionHeader {
        name,
        virtual_size: buf.get_u32_le(),
        virtual_address: buf.get_u32_le(),
        size_of_raw_data: buf.get_u32_le(),
        pointer_to_raw_data: buf.get_u32_le(),
        pointer_to_relocations: buf.get_u32_le(),
        pointer_to_line_numbers: buf.get_u32_le(),
        number_of_relocations: buf.get_u16_le(),
        number_of_line_numbers: buf.get_u16_le(),
        characteristics: buf.get_u32_le(),
    }
}

/// Load the section table that follows the optional header.
///
/// The table starts at `e_lfanew + 24 + SizeOfOptionalHeader`, whatever the
/// optional header parser actually consumed.
pub fn parse_section_table(
    reader: &mut ImageReader,
    dos: &DosHeader,
    pe: &PeHeader,
) -> Result<SectionTable> {
    let offset =
        u64::from(dos.e_lfanew) + PE_HEADER_SIZE + u64::from(pe.size_of_optional_header);
    reader.seek(offset).map_err(|_| PeError::Unreachable {
        what: "section table",
        offset,
    })?;

    let path = reader.shared_path();
    let count = pe.number_of_sections as usize;
    let mut sections = Vec::with_capacity(count);
    for index in 0..count {
        let raw = reader
            .read_exact(SECTION_HEADER_SIZE)
            .map_err(PeError::truncated("section header"))?;
        let header = decode_section_header(raw);
        debug!(
            index = index,
            name = %header.name(),
            virtual_address = header.virtual_address,
            virtual_size = header.virtual_size,
            pointer_to_raw_data = header.pointer_to_raw_data,
            size_of_raw_data = header.size_of_raw_data,
            "Read section header"
        );
        sections.push(Section {
            header,
            path: path.clone(),
        });
    }

    Ok(SectionTable::new(sections))
}
