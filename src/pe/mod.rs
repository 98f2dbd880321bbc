//! PE image parsing
//!
//! `ParsedImage` is built in one sequential pass: DOS header, PE header,
//! optional header, section table, then every data directory. Each stage
//! needs the offsets produced by the previous one. The file is held open by
//! a single `ImageReader` for the duration of the pass and released on every
//! exit path.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

pub mod directories;
pub mod headers;
pub mod sections;
pub mod types;

use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::io::ImageReader;

use directories::*;
use headers::*;
use sections::*;
pub use types::*;

/// A parsed PE image.
///
/// Images returned by [`ParsedImage::open`] must be checked with
/// [`is_initialized`](Self::is_initialized) before any field is trusted; a
/// failed parse leaves every structure in its default state.
#[derive(Debug, Default, Serialize)]
pub struct ParsedImage {
    path: PathBuf,
    file_size: u64,
    initialized: bool,
    #[serde(skip)]
    error: Option<PeError>,
    dos_header: DosHeader,
    pe_header: PeHeader,
    optional_header: OptionalHeader,
    data_directories: Vec<DataDirectory>,
    sections: SectionTable,
    directories: Directories,
}

impl ParsedImage {
    /// Parses the file at `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self::open_with_options(path, &ParseOptions::default())
    }

    /// Parses the file at `path`, never failing.
    ///
    /// On a fatal error the returned image is not initialized and carries
    /// the error.
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: &ParseOptions) -> Self {
        let path = path.as_ref();
        match Self::parse(path, options) {
            Ok(image) => image,
            Err(e) => {
                let e = crate::log_error!(e, "Could not parse PE image");
                Self {
                    path: path.to_path_buf(),
                    error: Some(e),
                    ..Default::default()
                }
            }
        }
    }

    /// Parses the file at `path`, returning only fully initialized images.
    pub fn parse<P: AsRef<Path>>(path: P, options: &ParseOptions) -> Result<Self> {
        let mut reader = ImageReader::open(path.as_ref(), options.io.clone())?;
        Self::parse_reader(&mut reader, options)
    }

    /// Parses an in-memory image. `label` stands in for the file path.
    pub fn from_bytes<P: AsRef<Path>>(
        label: P,
        data: impl Into<bytes::Bytes>,
        options: &ParseOptions,
    ) -> Result<Self> {
        let mut reader = ImageReader::from_bytes(label, data, options.io.clone())?;
        Self::parse_reader(&mut reader, options)
    }

    fn parse_reader(reader: &mut ImageReader, options: &ParseOptions) -> Result<Self> {
        let span = crate::span_trace!(
            "parse_image",
            path = %reader.path().display(),
            size = reader.size()
        );
        let _guard = span.enter();

        let dos_header = parse_dos_header(reader)?;
        let pe_header = parse_pe_header(reader, &dos_header)?;
        let (optional_header, data_directories) =
            parse_optional_header(reader, &dos_header, &pe_header)?;
        let sections = parse_section_table(reader, &dos_header, &pe_header)?;

        let ctx = ParseContext {
            optional_header: &optional_header,
            data_directories: &data_directories,
            sections: &sections,
            options,
        };
        let directories = parse_directories(reader, &ctx)?;

        debug!(
            sections = sections.len(),
            bytes_read = reader.bytes_read(),
            "Parsed PE image"
        );

        Ok(Self {
            path: reader.path().to_path_buf(),
            file_size: reader.size(),
            initialized: true,
            error: None,
            dos_header,
            pe_header,
            optional_header,
            data_directories,
            sections,
            directories,
        })
    }

    /// True only if every stage of the parse succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The error that stopped the parse, for images built by `open`.
    pub fn error(&self) -> Option<&PeError> {
        self.error.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn dos_header(&self) -> &DosHeader {
        &self.dos_header
    }

    pub fn pe_header(&self) -> &PeHeader {
        &self.pe_header
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.optional_header
    }

    /// Get machine type
    pub fn machine(&self) -> Machine {
        self.pe_header.machine
    }

    /// Check if PE is 64-bit
    pub fn is_64bit(&self) -> bool {
        self.optional_header.is_64bit()
    }

    /// Get image base
    pub fn image_base(&self) -> u64 {
        self.optional_header.image_base()
    }

    /// Get entry point RVA
    pub fn entry_point(&self) -> u32 {
        self.optional_header.entry_point()
    }

    pub fn data_directories(&self) -> &[DataDirectory] {
        &self.data_directories
    }

    /// The declared directory in `slot`, if any.
    pub fn data_directory(&self, slot: usize) -> Option<&DataDirectory> {
        self.data_directories.get(slot)
    }

    pub fn section_table(&self) -> &SectionTable {
        &self.sections
    }

    /// Get all sections
    pub fn sections(&self) -> &[Section] {
        self.sections.sections()
    }

    /// Find section by name
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.section_by_name(name)
    }

    pub fn rva_to_offset(&self, rva: u64) -> Option<u32> {
        self.sections.rva_to_offset(rva)
    }

    pub fn va_to_offset(&self, va: u64) -> Option<u32> {
        self.sections.va_to_offset(va, self.image_base())
    }

    pub fn directories(&self) -> &Directories {
        &self.directories
    }

    pub fn imports(&self) -> &ImportTable {
        &self.directories.imports
    }

    pub fn exports(&self) -> Option<&ExportDirectory> {
        self.directories.exports.as_ref()
    }

    pub fn resources(&self) -> &[ResourceEntry] {
        &self.directories.resources
    }

    pub fn debug_entries(&self) -> &[DebugEntry] {
        &self.directories.debug
    }

    pub fn relocations(&self) -> &[BaseRelocationBlock] {
        &self.directories.relocations
    }

    pub fn tls(&self) -> Option<&TlsDirectory> {
        self.directories.tls.as_ref()
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.directories.certificates
    }

    /// Pretty-printed JSON rendering of the whole image.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
