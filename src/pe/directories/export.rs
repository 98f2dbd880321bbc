//! Export directory parsing

use bytes::Buf;
use serde::Serialize;
use tracing::debug;

use super::{DirectoryParser, ParseContext};
use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::io::ImageReader;
use crate::pe::types::*;

/// `IMAGE_EXPORT_DIRECTORY` without the trailing name storage
const EXPORT_DIRECTORY_SIZE: u64 = 40;

/// One entry of the export address table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportedFunction {
    /// RVA of the exported code or data. Inside the export directory for forwarders.
    pub address: u32,
    pub ordinal: u32,
    pub name: Option<String>,
    /// `module.function` for exports forwarded to another DLL
    pub forward_name: Option<String>,
}

impl ExportedFunction {
    pub fn is_forwarder(&self) -> bool {
        self.forward_name.is_some()
    }
}

/// Export directory and the functions it lists
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub name_rva: u32,
    pub base: u32,
    pub number_of_functions: u32,
    pub number_of_names: u32,
    pub address_of_functions: u32,
    pub address_of_names: u32,
    pub address_of_name_ordinals: u32,
    /// The module's own name
    pub name: String,
    pub functions: Vec<ExportedFunction>,
}

impl ExportDirectory {
    /// Get export by name
    pub fn get_by_name(&self, name: &str) -> Option<&ExportedFunction> {
        self.functions
            .iter()
            .find(|f| f.name.as_deref() == Some(name))
    }

    /// Get export by ordinal
    pub fn get_by_ordinal(&self, ordinal: u32) -> Option<&ExportedFunction> {
        self.functions.iter().find(|f| f.ordinal == ordinal)
    }

    /// Get all export names
    pub fn names(&self) -> Vec<&str> {
        self.functions
            .iter()
            .filter_map(|f| f.name.as_deref())
            .collect()
    }

    pub fn forwarders(&self) -> impl Iterator<Item = &ExportedFunction> {
        self.functions.iter().filter(|f| f.is_forwarder())
    }

    /// Count of exports
    pub fn count(&self) -> usize {
        self.functions.len()
    }

    /// Count of named exports
    pub fn named_count(&self) -> usize {
        self.functions.iter().filter(|f| f.name.is_some()).count()
    }
}

fn read_string_at_rva(
    reader: &mut ImageReader,
    ctx: &ParseContext<'_>,
    rva: u32,
    what: &'static str,
) -> Result<String> {
    let offset = ctx
        .rva_to_offset(u64::from(rva))
        .ok_or(PeError::UnmappedAddress {
            what,
            address: u64::from(rva),
        })?;
    reader
        .read_cstring_at(u64::from(offset), ctx.options.max_string_length)
        .map_err(PeError::truncated(what))
}

fn check_count(what: &'static str, count: u32, limit: usize) -> Result<()> {
    if count as usize > limit {
        return Err(PeError::LimitExceeded {
            what,
            count: u64::from(count),
            limit: limit as u64,
        });
    }
    Ok(())
}

pub struct ExportParser;

impl DirectoryParser for ExportParser {
    type Output = Option<ExportDirectory>;

    const NAME: &'static str = "exports";
    const SLOT: usize = IMAGE_DIRECTORY_ENTRY_EXPORT;

    fn enabled(options: &ParseOptions) -> bool {
        options.parse_exports
    }

    fn parse(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<Self::Output> {
        let bounds = ctx.directory(Self::SLOT).unwrap_or_default();

        let mut raw = reader
            .read_exact(EXPORT_DIRECTORY_SIZE)
            .map_err(PeError::truncated("export directory"))?;
        let mut exports = ExportDirectory {
            characteristics: raw.get_u32_le(),
            time_date_stamp: raw.get_u32_le(),
            major_version: raw.get_u16_le(),
            minor_version: raw.get_u16_le(),
            name_rva: raw.get_u32_le(),
            base: raw.get_u32_le(),
            number_of_functions: raw.get_u32_le(),
            number_of_names: raw.get_u32_le(),
            address_of_functions: raw.get_u32_le(),
            address_of_names: raw.get_u32_le(),
            address_of_name_ordinals: raw.get_u32_le(),
            ..Default::default()
        };

        check_count("exported functions", exports.number_of_functions, ctx.options.max_exports)?;
        check_count("exported names", exports.number_of_names, ctx.options.max_exports)?;

        exports.name = read_string_at_rva(reader, ctx, exports.name_rva, "export name")?;

        if exports.number_of_functions > 0 {
            let table = ctx
                .rva_to_offset(u64::from(exports.address_of_functions))
                .ok_or(PeError::UnmappedAddress {
                    what: "export address table",
                    address: u64::from(exports.address_of_functions),
                })?;
            let mut addresses = reader
                .read_exact_at(u64::from(table), u64::from(exports.number_of_functions) * 4)
                .map_err(PeError::truncated("export address table"))?;

            let mut functions = Vec::with_capacity(exports.number_of_functions as usize);
            for index in 0..exports.number_of_functions {
                let address = addresses.get_u32_le();
                // Addresses pointing back into the export directory are forwarder strings.
                let forward_name = if bounds.strictly_contains(address) {
                    Some(read_string_at_rva(reader, ctx, address, "export forwarder")?)
                } else {
                    None
                };
                functions.push(ExportedFunction {
                    address,
                    ordinal: exports.base.wrapping_add(index),
                    name: None,
                    forward_name,
                });
            }
            exports.functions = functions;
        }

        if exports.number_of_names > 0 {
            let count = u64::from(exports.number_of_names);
            let names_offset = ctx
                .rva_to_offset(u64::from(exports.address_of_names))
                .ok_or(PeError::UnmappedAddress {
                    what: "export name table",
                    address: u64::from(exports.address_of_names),
                })?;
            let ordinals_offset = ctx
                .rva_to_offset(u64::from(exports.address_of_name_ordinals))
                .ok_or(PeError::UnmappedAddress {
                    what: "export ordinal table",
                    address: u64::from(exports.address_of_name_ordinals),
                })?;

            let mut names = reader
                .read_exact_at(u64::from(names_offset), count * 4)
                .map_err(PeError::truncated("export name table"))?;
            let mut ordinals = reader
                .read_exact_at(u64::from(ordinals_offset), count * 2)
                .map_err(PeError::truncated("export ordinal table"))?;

            for _ in 0..count {
                let name_rva = names.get_u32_le();
                let index = ordinals.get_u16_le();
                let count = exports.functions.len();
                if usize::from(index) >= count {
                    return Err(PeError::OrdinalOutOfRange { index, count });
                }
                let name = read_string_at_rva(reader, ctx, name_rva, "exported function name")?;
                exports.functions[usize::from(index)].name = Some(name);
            }
        }

        debug!(
            module = %exports.name,
            functions = exports.functions.len(),
            named = exports.named_count(),
            "Parsed export directory"
        );

        Ok(Some(exports))
    }
}
