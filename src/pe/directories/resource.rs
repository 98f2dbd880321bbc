//! Resource directory parsing
//!
//! The resource tree is walked depth first and flattened into its leaves.
//! Offsets inside the tree are relative to the start of the root directory.
//! The walk is bounded by a depth limit, a leaf limit and a visited set, as
//! crafted files can point subdirectories back at their ancestors.

use std::collections::HashSet;

use bytes::Buf;
use serde::Serialize;
use tracing::{debug, warn};

use super::{DirectoryParser, ParseContext};
use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::io::ImageReader;
use crate::pe::types::*;

const RESOURCE_DIRECTORY_SIZE: u64 = 16;
const RESOURCE_ENTRY_SIZE: u64 = 8;
const RESOURCE_DATA_ENTRY_SIZE: u64 = 16;
const HIGH_BIT: u32 = 0x8000_0000;

/// Name or numeric id of a node in the resource tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceId {
    Id(u32),
    Name(String),
}

impl ResourceId {
    /// Name of a predefined resource type (`RT_*`), for ids at the type level.
    pub fn type_name(&self) -> Option<&'static str> {
        let name = match self {
            Self::Id(1) => "RT_CURSOR",
            Self::Id(2) => "RT_BITMAP",
            Self::Id(3) => "RT_ICON",
            Self::Id(4) => "RT_MENU",
            Self::Id(5) => "RT_DIALOG",
            Self::Id(6) => "RT_STRING",
            Self::Id(7) => "RT_FONTDIR",
            Self::Id(8) => "RT_FONT",
            Self::Id(9) => "RT_ACCELERATOR",
            Self::Id(10) => "RT_RCDATA",
            Self::Id(11) => "RT_MESSAGETABLE",
            Self::Id(12) => "RT_GROUP_CURSOR",
            Self::Id(14) => "RT_GROUP_ICON",
            Self::Id(16) => "RT_VERSION",
            Self::Id(17) => "RT_DLGINCLUDE",
            Self::Id(19) => "RT_PLUGPLAY",
            Self::Id(20) => "RT_VXD",
            Self::Id(21) => "RT_ANICURSOR",
            Self::Id(22) => "RT_ANIICON",
            Self::Id(23) => "RT_HTML",
            Self::Id(24) => "RT_MANIFEST",
            _ => return None,
        };
        Some(name)
    }
}

/// A leaf of the resource tree (`IMAGE_RESOURCE_DATA_ENTRY`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceEntry {
    /// Ids from the root down: usually type, name, language
    pub path: Vec<ResourceId>,
    pub data_rva: u32,
    pub size: u32,
    pub code_page: u32,
}

impl ResourceEntry {
    pub fn resource_type(&self) -> Option<&ResourceId> {
        self.path.first()
    }

    pub fn name(&self) -> Option<&ResourceId> {
        self.path.get(1)
    }

    pub fn language(&self) -> Option<&ResourceId> {
        self.path.get(2)
    }
}

struct Walker<'r, 'c> {
    reader: &'r mut ImageReader,
    ctx: &'r ParseContext<'c>,
    root: u64,
    visited: HashSet<u64>,
    path: Vec<ResourceId>,
    entries: Vec<ResourceEntry>,
}

impl Walker<'_, '_> {
    /// Length-prefixed UTF-16LE name. Unreadable names fall back to their raw offset.
    fn read_name(&mut self, relative: u32) -> ResourceId {
        let offset = self.root + u64::from(relative);
        let length = match self.reader.read_exact_at(offset, 2) {
            Ok(mut raw) => usize::from(raw.get_u16_le()),
            Err(_) => return ResourceId::Id(relative),
        };
        let length = length.min(self.ctx.options.max_string_length);
        match self.reader.read_exact_at(offset + 2, length as u64 * 2) {
            Ok(mut raw) => {
                let units: Vec<u16> = (0..length).map(|_| raw.get_u16_le()).collect();
                ResourceId::Name(String::from_utf16_lossy(&units))
            }
            Err(_) => {
                debug!(offset = offset, "Resource name runs past the end of the file");
                ResourceId::Id(relative)
            }
        }
    }

    /// Returns `false` once the walk must stop altogether.
    fn walk(&mut self, relative: u64, depth: usize) -> Result<bool> {
        if depth >= self.ctx.options.max_resource_depth {
            warn!(depth = depth, "Resource tree is too deep, skipping subdirectory");
            return Ok(true);
        }
        if !self.visited.insert(relative) {
            warn!(offset = relative, "Resource subdirectory visited twice, skipping");
            return Ok(true);
        }

        let offset = self.root + relative;
        let mut header = self
            .reader
            .read_exact_at(offset, RESOURCE_DIRECTORY_SIZE)
            .map_err(PeError::truncated("resource directory"))?;
        header.advance(12);
        let count = u64::from(header.get_u16_le()) + u64::from(header.get_u16_le());

        let mut raw = self
            .reader
            .read_exact_at(offset + RESOURCE_DIRECTORY_SIZE, count * RESOURCE_ENTRY_SIZE)
            .map_err(PeError::truncated("resource directory entries"))?;

        for _ in 0..count {
            let name = raw.get_u32_le();
            let target = raw.get_u32_le();

            let id = if name & HIGH_BIT != 0 {
                self.read_name(name & !HIGH_BIT)
            } else {
                ResourceId::Id(name)
            };

            self.path.push(id);
            let keep_going = if target & HIGH_BIT != 0 {
                self.walk(u64::from(target & !HIGH_BIT), depth + 1)?
            } else {
                self.leaf(u64::from(target))?
            };
            self.path.pop();

            if !keep_going {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn leaf(&mut self, relative: u64) -> Result<bool> {
        if self.entries.len() >= self.ctx.options.max_resource_entries {
            warn!(
                limit = self.ctx.options.max_resource_entries,
                "Too many resources, ignoring the rest"
            );
            return Ok(false);
        }

        let mut raw = self
            .reader
            .read_exact_at(self.root + relative, RESOURCE_DATA_ENTRY_SIZE)
            .map_err(PeError::truncated("resource data entry"))?;
        self.entries.push(ResourceEntry {
            path: self.path.clone(),
            data_rva: raw.get_u32_le(),
            size: raw.get_u32_le(),
            code_page: raw.get_u32_le(),
        });
        Ok(true)
    }
}

pub struct ResourceParser;

impl DirectoryParser for ResourceParser {
    type Output = Vec<ResourceEntry>;

    const NAME: &'static str = "resources";
    const SLOT: usize = IMAGE_DIRECTORY_ENTRY_RESOURCE;

    fn enabled(options: &ParseOptions) -> bool {
        options.parse_resources
    }

    fn parse(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<Self::Output> {
        let root = reader.position();
        let mut walker = Walker {
            reader,
            ctx,
            root,
            visited: HashSet::new(),
            path: Vec::new(),
            entries: Vec::new(),
        };
        walker.walk(0, 0)?;

        debug!(resources = walker.entries.len(), "Parsed resource directory");
        Ok(walker.entries)
    }
}
