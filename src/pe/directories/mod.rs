//! Data directory parsers
//!
//! Every directory parser implements [`DirectoryParser`]. The dispatcher
//! locates the directory, positions the reader at its file offset and hands
//! over the reader together with the already parsed header state. A parser
//! either returns its complete output or a fatal error; a directory that is
//! absent, unreachable or disabled yields the parser's default output.

pub mod certificate;
pub mod debug;
pub mod export;
pub mod import;
pub mod relocation;
pub mod resource;
pub mod tls;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::ParseOptions;
use crate::error::Result;
use crate::io::ImageReader;
use crate::pe::sections::SectionTable;
use crate::pe::types::*;

pub use certificate::{Certificate, CertificateParser, CertificateRevision, CertificateType};
pub use debug::{DebugEntry, DebugParser, DebugType};
pub use export::{ExportDirectory, ExportParser, ExportedFunction};
pub use import::{ImportDescriptor, ImportEntry, ImportParser, ImportTable};
pub use relocation::{BaseRelocationBlock, RelocationEntry, RelocationKind, RelocationParser};
pub use resource::{ResourceEntry, ResourceId, ResourceParser};
pub use tls::{TlsDirectory, TlsParser};

/// Header state shared with every directory parser.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub optional_header: &'a OptionalHeader,
    pub data_directories: &'a [DataDirectory],
    pub sections: &'a SectionTable,
    pub options: &'a ParseOptions,
}

impl<'a> ParseContext<'a> {
    /// The declared directory at `slot`, if the optional header has one.
    pub fn directory(&self, slot: usize) -> Option<DataDirectory> {
        self.data_directories.get(slot).copied()
    }

    /// Like [`SectionTable::rva_to_offset`], but offset 0 is never a valid
    /// target, even in headers-only images.
    pub fn rva_to_offset(&self, rva: u64) -> Option<u32> {
        self.sections.rva_to_offset(rva).filter(|&offset| offset != 0)
    }

    pub fn va_to_offset(&self, va: u64) -> Option<u32> {
        self.sections
            .va_to_offset(va, self.optional_header.image_base())
            .filter(|&offset| offset != 0)
    }

    pub fn image_base(&self) -> u64 {
        self.optional_header.image_base()
    }

    pub fn is_64bit(&self) -> bool {
        self.optional_header.is_64bit()
    }

    pub fn pointer_width(&self) -> u64 {
        self.optional_header.pointer_width()
    }
}

/// Checks the declared entry at `slot` without translating it.
///
/// Returns `None` when the directory is absent or its entry is invalid.
pub(crate) fn declared_directory(ctx: &ParseContext<'_>, slot: usize) -> Option<DataDirectory> {
    if slot >= MAX_DATA_DIRECTORIES {
        error!(slot = slot, "Invalid data directory index");
        return None;
    }

    let directory = match ctx.directory(slot) {
        Some(directory) => directory,
        None => {
            debug!(slot = slot, "Data directory is not declared");
            return None;
        }
    };

    if directory.is_empty() {
        return None;
    }
    if directory.size == 0 {
        warn!(
            slot = slot,
            virtual_address = directory.virtual_address,
            "Directory has a size of 0"
        );
    }
    if directory.virtual_address == 0 {
        error!(
            slot = slot,
            size = directory.size,
            "Directory has a RVA of 0 but a non-null size"
        );
        return None;
    }

    Some(directory)
}

/// Positions the reader at the file offset of the directory in `slot`.
///
/// Returns the offset, or `None` when the directory is absent, invalid,
/// unmapped or lies past the end of the file.
pub fn reach_directory(reader: &mut ImageReader, ctx: &ParseContext<'_>, slot: usize) -> Option<u64> {
    let directory = declared_directory(ctx, slot)?;

    let offset = match ctx.rva_to_offset(u64::from(directory.virtual_address)) {
        Some(offset) => u64::from(offset),
        None => {
            error!(
                slot = slot,
                rva = directory.virtual_address,
                "Could not translate the directory RVA"
            );
            return None;
        }
    };

    if let Err(e) = reader.seek(offset) {
        error!(slot = slot, offset = offset, error = %e, "Could not reach the directory");
        return None;
    }

    Some(offset)
}

/// One parser per data directory slot.
pub trait DirectoryParser {
    type Output: Default;

    /// Name used in logs.
    const NAME: &'static str;
    const SLOT: usize;

    fn enabled(options: &ParseOptions) -> bool;

    /// Positions the reader at the start of the directory.
    fn locate(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Option<u64> {
        reach_directory(reader, ctx, Self::SLOT)
    }

    /// Parses the directory starting at the reader's position.
    fn parse(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<Self::Output>;
}

/// Runs one directory parser, treating a disabled or missing directory as empty.
pub fn run<P: DirectoryParser>(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<P::Output> {
    if !P::enabled(ctx.options) {
        debug!(directory = P::NAME, "Directory parsing disabled");
        return Ok(P::Output::default());
    }

    let Some(offset) = P::locate(reader, ctx) else {
        return Ok(P::Output::default());
    };

    let span = crate::span_trace!("parse_directory", directory = P::NAME, offset = offset);
    let _guard = span.enter();
    P::parse(reader, ctx)
}

/// Everything parsed out of the data directories.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Directories {
    pub imports: ImportTable,
    pub exports: Option<ExportDirectory>,
    pub resources: Vec<ResourceEntry>,
    pub debug: Vec<DebugEntry>,
    pub relocations: Vec<BaseRelocationBlock>,
    pub tls: Option<TlsDirectory>,
    pub certificates: Vec<Certificate>,
}

/// Runs every directory parser in a fixed order. The first fatal error aborts.
pub fn parse_directories(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<Directories> {
    let imports = run::<ImportParser>(reader, ctx)?;
    let exports = run::<ExportParser>(reader, ctx)?;
    let resources = run::<ResourceParser>(reader, ctx)?;
    let debug = run::<DebugParser>(reader, ctx)?;
    let relocations = run::<RelocationParser>(reader, ctx)?;
    let tls = run::<TlsParser>(reader, ctx)?;
    let certificates = run::<CertificateParser>(reader, ctx)?;

    Ok(Directories {
        imports,
        exports,
        resources,
        debug,
        relocations,
        tls,
        certificates,
    })
}
