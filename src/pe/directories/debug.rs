//! Debug directory parsing

use bytes::Buf;
use serde::Serialize;
use tracing::debug;

use super::{DirectoryParser, ParseContext};
use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::io::ImageReader;
use crate::pe::types::*;

const DEBUG_ENTRY_SIZE: u32 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DebugType {
    Unknown,
    Coff,
    CodeView,
    Fpo,
    Misc,
    Exception,
    Fixup,
    Borland,
    Clsid,
    VcFeature,
    Pogo,
    Iltcg,
    Repro,
    ExDllCharacteristics,
    Other(u32),
}

impl From<u32> for DebugType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Coff,
            2 => Self::CodeView,
            3 => Self::Fpo,
            4 => Self::Misc,
            5 => Self::Exception,
            6 => Self::Fixup,
            9 => Self::Borland,
            11 => Self::Clsid,
            12 => Self::VcFeature,
            13 => Self::Pogo,
            14 => Self::Iltcg,
            16 => Self::Repro,
            20 => Self::ExDllCharacteristics,
            other => Self::Other(other),
        }
    }
}

/// `IMAGE_DEBUG_DIRECTORY`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugEntry {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub debug_type: DebugType,
    pub size_of_data: u32,
    pub address_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}

pub struct DebugParser;

impl DirectoryParser for DebugParser {
    type Output = Vec<DebugEntry>;

    const NAME: &'static str = "debug";
    const SLOT: usize = IMAGE_DIRECTORY_ENTRY_DEBUG;

    fn enabled(options: &ParseOptions) -> bool {
        options.parse_debug_info
    }

    fn parse(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<Self::Output> {
        let count = ctx.directory(Self::SLOT).map_or(0, |d| d.size) / DEBUG_ENTRY_SIZE;
        let mut entries = Vec::new();

        for _ in 0..count {
            let mut raw = reader
                .read_exact(u64::from(DEBUG_ENTRY_SIZE))
                .map_err(PeError::truncated("debug directory entry"))?;
            entries.push(DebugEntry {
                characteristics: raw.get_u32_le(),
                time_date_stamp: raw.get_u32_le(),
                major_version: raw.get_u16_le(),
                minor_version: raw.get_u16_le(),
                debug_type: DebugType::from(raw.get_u32_le()),
                size_of_data: raw.get_u32_le(),
                address_of_raw_data: raw.get_u32_le(),
                pointer_to_raw_data: raw.get_u32_le(),
            });
        }

        debug!(entries = entries.len(), "Parsed debug directory");
        Ok(entries)
    }
}
