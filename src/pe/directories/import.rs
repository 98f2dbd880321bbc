//! Import table parsing

use bytes::Buf;
use serde::Serialize;
use tracing::{debug, warn};

use super::{DirectoryParser, ParseContext};
use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::io::ImageReader;
use crate::pe::types::*;

const IMPORT_DESCRIPTOR_SIZE: u64 = 20;

/// Import table containing all imports
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportTable {
    pub descriptors: Vec<ImportDescriptor>,
}

impl ImportTable {
    /// Get total import count
    pub fn count(&self) -> usize {
        self.descriptors.iter().map(|d| d.entries.len()).sum()
    }

    /// Get all DLL names
    pub fn dll_names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.dll_name.as_str()).collect()
    }

    /// Check if an import exists by name
    pub fn has_import(&self, name: &str) -> bool {
        self.descriptors
            .iter()
            .flat_map(|d| d.entries.iter())
            .any(|e| e.name.as_deref() == Some(name))
    }

    /// Get imports by DLL name, ignoring case
    pub fn imports_from_dll(&self, dll: &str) -> Option<&[ImportEntry]> {
        self.descriptors
            .iter()
            .find(|d| d.dll_name.eq_ignore_ascii_case(dll))
            .map(|d| d.entries.as_slice())
    }
}

/// `IMAGE_IMPORT_DESCRIPTOR` with its resolved entries
#[derive(Debug, Clone, Serialize)]
pub struct ImportDescriptor {
    pub dll_name: String,
    pub original_first_thunk: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub first_thunk: u32,
    pub entries: Vec<ImportEntry>,
}

/// Import entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportEntry {
    pub name: Option<String>,
    pub ordinal: Option<u16>,
    pub hint: Option<u16>,
    /// VA of the entry's IAT slot, 0 without an IAT
    pub iat_va: u64,
}

pub struct ImportParser;

impl DirectoryParser for ImportParser {
    type Output = ImportTable;

    const NAME: &'static str = "imports";
    const SLOT: usize = IMAGE_DIRECTORY_ENTRY_IMPORT;

    fn enabled(options: &ParseOptions) -> bool {
        options.parse_imports
    }

    fn parse(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<Self::Output> {
        let mut table = ImportTable::default();
        let mut total_imports = 0;

        loop {
            let mut raw = reader
                .read_exact(IMPORT_DESCRIPTOR_SIZE)
                .map_err(PeError::truncated("import descriptor"))?;

            // Check for terminator (all zeros)
            if raw.iter().all(|&b| b == 0) {
                break;
            }

            let original_first_thunk = raw.get_u32_le();
            let time_date_stamp = raw.get_u32_le();
            let forwarder_chain = raw.get_u32_le();
            let name_rva = raw.get_u32_le();
            let first_thunk = raw.get_u32_le();

            // Skip invalid entries
            if name_rva == 0 {
                warn!("Import descriptor without a DLL name");
                continue;
            }

            let name_offset = ctx
                .rva_to_offset(u64::from(name_rva))
                .ok_or(PeError::UnmappedAddress {
                    what: "imported DLL name",
                    address: u64::from(name_rva),
                })?;
            let dll_name = reader
                .read_cstring_at(u64::from(name_offset), ctx.options.max_string_length)
                .map_err(PeError::truncated("imported DLL name"))?;

            let budget = ctx.options.max_imports.saturating_sub(total_imports);
            let entries =
                parse_thunks(reader, ctx, original_first_thunk, first_thunk, budget)?;
            total_imports += entries.len();

            table.descriptors.push(ImportDescriptor {
                dll_name,
                original_first_thunk,
                time_date_stamp,
                forwarder_chain,
                name_rva,
                first_thunk,
                entries,
            });

            if total_imports >= ctx.options.max_imports {
                warn!(
                    limit = ctx.options.max_imports,
                    "Too many imports, ignoring the rest"
                );
                break;
            }
        }

        debug!(
            dlls = table.descriptors.len(),
            imports = total_imports,
            "Parsed import directory"
        );
        Ok(table)
    }
}

fn parse_thunks(
    reader: &mut ImageReader,
    ctx: &ParseContext<'_>,
    original_first_thunk: u32,
    first_thunk: u32,
    max_count: usize,
) -> Result<Vec<ImportEntry>> {
    let mut entries = Vec::new();

    // Use original first thunk if available, otherwise first thunk
    let thunk_rva = if original_first_thunk != 0 {
        original_first_thunk
    } else {
        first_thunk
    };

    if thunk_rva == 0 {
        return Ok(entries);
    }

    let thunk_table = ctx
        .rva_to_offset(u64::from(thunk_rva))
        .ok_or(PeError::UnmappedAddress {
            what: "import lookup table",
            address: u64::from(thunk_rva),
        })?;
    let thunk_table = u64::from(thunk_table);

    let width = ctx.pointer_width();
    let ordinal_flag = if width == 8 { 1u64 << 63 } else { 1u64 << 31 };
    let mut index = 0u64;

    while entries.len() < max_count {
        let mut raw = reader
            .read_exact_at(thunk_table + index * width, width)
            .map_err(PeError::truncated("import lookup table"))?;
        let value = if width == 8 {
            raw.get_u64_le()
        } else {
            u64::from(raw.get_u32_le())
        };

        // Check for terminator
        if value == 0 {
            break;
        }

        let iat_va = if first_thunk != 0 {
            ctx.image_base()
                .wrapping_add(u64::from(first_thunk))
                .wrapping_add(index * width)
        } else {
            0
        };

        let entry = if value & ordinal_flag != 0 {
            ImportEntry {
                name: None,
                ordinal: Some((value & 0xFFFF) as u16),
                hint: None,
                iat_va,
            }
        } else {
            let (hint, name) = read_hint_name(reader, ctx, (value & 0x7FFF_FFFF) as u32);
            ImportEntry {
                name,
                ordinal: None,
                hint,
                iat_va,
            }
        };
        entries.push(entry);
        index += 1;
    }

    Ok(entries)
}

/// `IMAGE_IMPORT_BY_NAME`. An unresolvable record leaves the entry unnamed.
fn read_hint_name(
    reader: &mut ImageReader,
    ctx: &ParseContext<'_>,
    rva: u32,
) -> (Option<u16>, Option<String>) {
    let Some(offset) = ctx.rva_to_offset(u64::from(rva)) else {
        debug!(rva = rva, "Import name is not mapped");
        return (None, None);
    };
    let offset = u64::from(offset);

    let hint = match reader.read_exact_at(offset, 2) {
        Ok(mut raw) => raw.get_u16_le(),
        Err(_) => return (None, None),
    };
    let name = reader
        .read_cstring_at(offset + 2, ctx.options.max_string_length)
        .ok();
    (Some(hint), name)
}
