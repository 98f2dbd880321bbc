//! TLS directory parsing

use bytes::Buf;
use serde::Serialize;
use tracing::{debug, warn};

use super::{DirectoryParser, ParseContext};
use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::io::ImageReader;
use crate::pe::types::*;

/// `IMAGE_TLS_DIRECTORY32` / `IMAGE_TLS_DIRECTORY64`, widened to 64 bits.
///
/// All address fields are VAs, not RVAs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TlsDirectory {
    pub start_address_of_raw_data: u64,
    pub end_address_of_raw_data: u64,
    pub address_of_index: u64,
    pub address_of_callbacks: u64,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
    pub callbacks: Vec<u64>,
}

fn read_pe32_field(reader: &mut ImageReader) -> Result<u64> {
    reader
        .read_u32()
        .map(u64::from)
        .map_err(PeError::truncated("TLS directory"))
}

fn read_record(reader: &mut ImageReader, is_64bit: bool) -> Result<TlsDirectory> {
    if is_64bit {
        let mut raw = reader
            .read_exact(40)
            .map_err(PeError::truncated("TLS directory"))?;
        return Ok(TlsDirectory {
            start_address_of_raw_data: raw.get_u64_le(),
            end_address_of_raw_data: raw.get_u64_le(),
            address_of_index: raw.get_u64_le(),
            address_of_callbacks: raw.get_u64_le(),
            size_of_zero_fill: raw.get_u32_le(),
            characteristics: raw.get_u32_le(),
            callbacks: Vec::new(),
        });
    }

    let start_address_of_raw_data = read_pe32_field(reader)?;
    let end_address_of_raw_data = read_pe32_field(reader)?;
    let address_of_index = read_pe32_field(reader)?;
    let address_of_callbacks = read_pe32_field(reader)?;
    let mut tail = reader
        .read_exact(8)
        .map_err(PeError::truncated("TLS directory"))?;

    Ok(TlsDirectory {
        start_address_of_raw_data,
        end_address_of_raw_data,
        address_of_index,
        address_of_callbacks,
        size_of_zero_fill: tail.get_u32_le(),
        characteristics: tail.get_u32_le(),
        callbacks: Vec::new(),
    })
}

pub struct TlsParser;

impl DirectoryParser for TlsParser {
    type Output = Option<TlsDirectory>;

    const NAME: &'static str = "tls";
    const SLOT: usize = IMAGE_DIRECTORY_ENTRY_TLS;

    fn enabled(options: &ParseOptions) -> bool {
        options.parse_tls
    }

    fn parse(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<Self::Output> {
        let mut tls = read_record(reader, ctx.is_64bit())?;

        let table = ctx
            .va_to_offset(tls.address_of_callbacks)
            .ok_or(PeError::UnmappedAddress {
                what: "TLS callback table",
                address: tls.address_of_callbacks,
            })?;
        let table = u64::from(table);
        reader.seek(table).map_err(|_| PeError::Unreachable {
            what: "TLS callback table",
            offset: table,
        })?;

        // The table is terminated by a null pointer; a table cut by the end of
        // the file keeps what was read.
        let width = ctx.pointer_width();
        loop {
            if tls.callbacks.len() >= ctx.options.max_tls_callbacks {
                warn!(
                    limit = ctx.options.max_tls_callbacks,
                    "Too many TLS callbacks, ignoring the rest"
                );
                break;
            }

            let mut raw = reader.read_up_to(width)?;
            if (raw.len() as u64) < width {
                debug!(
                    callbacks = tls.callbacks.len(),
                    "TLS callback table runs past the end of the file"
                );
                break;
            }
            let callback = if width == 8 {
                raw.get_u64_le()
            } else {
                u64::from(raw.get_u32_le())
            };
            if callback == 0 {
                break;
            }
            tls.callbacks.push(callback);
        }

        debug!(callbacks = tls.callbacks.len(), "Parsed TLS directory");
        Ok(Some(tls))
    }
}
