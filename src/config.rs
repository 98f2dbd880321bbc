//! Parser configuration.
//!
//! Toggles for each directory parser, count caps for tables whose size is
//! declared by the (possibly hostile) file, and the I/O limits of the reader.

use serde::{Deserialize, Serialize};

use crate::io::IOLimits;

/// Options controlling one image parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    pub parse_imports: bool,
    pub parse_exports: bool,
    pub parse_resources: bool,
    pub parse_debug_info: bool,
    pub parse_relocations: bool,
    pub parse_tls: bool,
    pub parse_certificates: bool,
    /// Upper bound on `NumberOfFunctions` / `NumberOfNames` of the export directory.
    pub max_exports: usize,
    /// Imported functions collected across all descriptors.
    pub max_imports: usize,
    pub max_tls_callbacks: usize,
    pub max_resource_depth: usize,
    pub max_resource_entries: usize,
    /// Longest NUL-terminated string read from the image.
    pub max_string_length: usize,
    pub io: IOLimits,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            parse_imports: true,
            parse_exports: true,
            parse_resources: true,
            parse_debug_info: true,
            parse_relocations: true,
            parse_tls: true,
            parse_certificates: true,
            max_exports: 0x10000,
            max_imports: 10000,
            max_tls_callbacks: 1024,
            max_resource_depth: 8,
            max_resource_entries: 10000,
            max_string_length: 1024,
            io: IOLimits::default(),
        }
    }
}

impl ParseOptions {
    /// Loads options from JSON. Missing fields keep their defaults.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Options that only parse headers and the section table.
    pub fn headers_only() -> Self {
        Self {
            parse_imports: false,
            parse_exports: false,
            parse_resources: false,
            parse_debug_info: false,
            parse_relocations: false,
            parse_tls: false,
            parse_certificates: false,
            ..Self::default()
        }
    }
}
