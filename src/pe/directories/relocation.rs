//! Base relocation table parsing

use bytes::Buf;
use serde::Serialize;
use tracing::debug;

use super::{DirectoryParser, ParseContext};
use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::io::ImageReader;
use crate::pe::types::*;

const BLOCK_HEADER_SIZE: u32 = 8;

/// Relocation type stored in the high 4 bits of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelocationKind {
    Absolute,
    High,
    Low,
    HighLow,
    HighAdj,
    Dir64,
    Other(u8),
}

impl From<u8> for RelocationKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Absolute,
            1 => Self::High,
            2 => Self::Low,
            3 => Self::HighLow,
            4 => Self::HighAdj,
            10 => Self::Dir64,
            other => Self::Other(other),
        }
    }
}

/// A decoded relocation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationEntry {
    pub kind: RelocationKind,
    /// Offset within the block's page (low 12 bits)
    pub offset: u16,
    /// `page_rva + offset`
    pub rva: u32,
}

/// One `IMAGE_BASE_RELOCATION` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BaseRelocationBlock {
    pub page_rva: u32,
    pub block_size: u32,
    pub type_offsets: Vec<u16>,
}

impl BaseRelocationBlock {
    /// Number of entries implied by the block size
    pub fn entry_count(&self) -> usize {
        (self.block_size.saturating_sub(BLOCK_HEADER_SIZE) / 2) as usize
    }

    pub fn entries(&self) -> impl Iterator<Item = RelocationEntry> + '_ {
        self.type_offsets.iter().map(move |&raw| {
            let offset = raw & 0x0FFF;
            RelocationEntry {
                kind: RelocationKind::from((raw >> 12) as u8),
                offset,
                rva: self.page_rva.wrapping_add(u32::from(offset)),
            }
        })
    }
}

pub struct RelocationParser;

impl DirectoryParser for RelocationParser {
    type Output = Vec<BaseRelocationBlock>;

    const NAME: &'static str = "relocations";
    const SLOT: usize = IMAGE_DIRECTORY_ENTRY_BASERELOC;

    fn enabled(options: &ParseOptions) -> bool {
        options.parse_relocations
    }

    fn parse(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<Self::Output> {
        let mut remaining = ctx.directory(Self::SLOT).map_or(0, |d| d.size);
        let mut offset = reader.position();
        let mut blocks = Vec::new();

        while remaining > 0 {
            let mut header = reader
                .read_exact_at(offset, u64::from(BLOCK_HEADER_SIZE))
                .map_err(PeError::truncated("relocation block header"))?;
            let page_rva = header.get_u32_le();
            let block_size = header.get_u32_le();

            // A block smaller than its own header would never advance.
            if block_size < BLOCK_HEADER_SIZE || block_size > remaining {
                return Err(PeError::MalformedRelocationBlock {
                    offset,
                    block_size,
                    remaining,
                });
            }

            let count = u64::from((block_size - BLOCK_HEADER_SIZE) / 2);
            let mut raw = reader
                .read_exact_at(offset + u64::from(BLOCK_HEADER_SIZE), count * 2)
                .map_err(PeError::truncated("relocation entries"))?;
            let type_offsets = (0..count).map(|_| raw.get_u16_le()).collect();

            blocks.push(BaseRelocationBlock {
                page_rva,
                block_size,
                type_offsets,
            });

            offset += u64::from(block_size);
            remaining -= block_size;
        }

        debug!(blocks = blocks.len(), "Parsed base relocations");
        Ok(blocks)
    }
}
