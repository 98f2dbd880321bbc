//! Error types for PE image parsing.
//!
//! Every variant here is a fatal, structural failure: it aborts the parse of
//! the whole image. Recoverable and advisory conditions never surface as
//! errors; they are logged and parsing continues.

use thiserror::Error;

use crate::io::error::IoError;

/// Main error type for pescope operations.
#[derive(Debug, Error)]
pub enum PeError {
    /// Input shorter than the fixed DOS header
    #[error("Input file is too small to be a valid PE: {size} bytes (need at least {expected})")]
    FileTooSmall { size: u64, expected: u64 },

    #[error("Invalid DOS signature: {found:02x?}")]
    InvalidDosSignature { found: [u8; 2] },

    #[error("Invalid PE signature: {found:02x?}")]
    InvalidPeSignature { found: [u8; 4] },

    /// Optional header magic is neither PE32 nor PE32+
    #[error("Invalid optional header magic: {0:#06x}")]
    InvalidMagic(u16),

    /// A header or table could not be reached
    #[error("Could not reach the {what} (offset {offset:#x})")]
    Unreachable { what: &'static str, offset: u64 },

    /// A fixed-size record was cut short
    #[error("Could not read the {what}: {source}")]
    Truncated {
        what: &'static str,
        #[source]
        source: IoError,
    },

    /// An address that must be mapped by a section is not
    #[error("Could not translate the {what} address {address:#x} to a file offset")]
    UnmappedAddress { what: &'static str, address: u64 },

    #[error("Export name ordinal {index} is out of range ({count} exported functions)")]
    OrdinalOutOfRange { index: u16, count: usize },

    #[error("Relocation block at offset {offset:#x} declares {block_size} bytes ({remaining} remaining in directory)")]
    MalformedRelocationBlock {
        offset: u64,
        block_size: u32,
        remaining: u32,
    },

    #[error("Certificate at offset {offset:#x} declares {length} bytes ({remaining} remaining in directory)")]
    MalformedCertificate {
        offset: u64,
        length: u32,
        remaining: u32,
    },

    #[error("Limit exceeded: {what} ({count} > {limit})")]
    LimitExceeded {
        what: &'static str,
        count: u64,
        limit: u64,
    },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl PeError {
    /// Wraps a failed fixed-size read with the name of the record being read.
    pub(crate) fn truncated(what: &'static str) -> impl FnOnce(IoError) -> PeError {
        move |source| PeError::Truncated { what, source }
    }
}

/// Result type alias for pescope operations
pub type Result<T> = std::result::Result<T, PeError>;
