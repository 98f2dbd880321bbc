//! Attribute certificate table parsing
//!
//! The security directory is the one directory whose address is a raw file
//! offset rather than an RVA: certificates are appended to the file and never
//! mapped. Parsing is best effort. A header whose type and revision are both
//! unknown is taken as the end of the table, which can drop a legitimately
//! unusual certificate.

use bytes::Buf;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use super::{declared_directory, DirectoryParser, ParseContext};
use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::io::error::IoError;
use crate::io::ImageReader;
use crate::pe::types::*;

/// `Length` + `Revision` + `CertificateType`
const CERTIFICATE_HEADER_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CertificateType {
    X509,
    PkcsSignedData,
    Reserved1,
    TsStackSigned,
    Unknown(u16),
}

impl From<u16> for CertificateType {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::X509,
            2 => Self::PkcsSignedData,
            3 => Self::Reserved1,
            4 => Self::TsStackSigned,
            other => Self::Unknown(other),
        }
    }
}

impl CertificateType {
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CertificateRevision {
    Revision1_0,
    Revision2_0,
    Unknown(u16),
}

impl From<u16> for CertificateRevision {
    fn from(value: u16) -> Self {
        match value {
            0x0100 => Self::Revision1_0,
            0x0200 => Self::Revision2_0,
            other => Self::Unknown(other),
        }
    }
}

impl CertificateRevision {
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

fn serialize_hex<T, S>(data: &T, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_str(&hex::encode(data.as_ref()))
}

/// `WIN_CERTIFICATE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Certificate {
    /// Length of the whole record, header included
    pub length: u32,
    pub revision: CertificateRevision,
    pub certificate_type: CertificateType,
    #[serde(serialize_with = "serialize_hex")]
    pub data: Vec<u8>,
}

pub struct CertificateParser;

impl DirectoryParser for CertificateParser {
    type Output = Vec<Certificate>;

    const NAME: &'static str = "certificates";
    const SLOT: usize = IMAGE_DIRECTORY_ENTRY_SECURITY;

    fn enabled(options: &ParseOptions) -> bool {
        options.parse_certificates
    }

    /// The directory address is used as a file offset as-is.
    fn locate(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Option<u64> {
        let directory = declared_directory(ctx, Self::SLOT)?;
        let offset = u64::from(directory.virtual_address);
        if reader.seek(offset).is_err() {
            debug!(
                offset = offset,
                "Certificate table lies past the end of the file"
            );
            return None;
        }
        Some(offset)
    }

    fn parse(reader: &mut ImageReader, ctx: &ParseContext<'_>) -> Result<Self::Output> {
        let mut remaining = u64::from(ctx.directory(Self::SLOT).map_or(0, |d| d.size));
        let mut offset = reader.position();
        let mut certificates = Vec::new();

        while remaining > CERTIFICATE_HEADER_SIZE {
            let mut header = match reader.read_exact_at(offset, CERTIFICATE_HEADER_SIZE) {
                Ok(header) => header,
                Err(IoError::ShortRead { .. }) => {
                    warn!(offset = offset, "Certificate header runs past the end of the file");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let length = header.get_u32_le();
            let revision = CertificateRevision::from(header.get_u16_le());
            let certificate_type = CertificateType::from(header.get_u16_le());

            if !revision.is_known() && !certificate_type.is_known() {
                warn!(
                    offset = offset,
                    revision = ?revision,
                    certificate_type = ?certificate_type,
                    "Certificate header looks like garbage, ignoring the rest of the table"
                );
                break;
            }

            if u64::from(length) < CERTIFICATE_HEADER_SIZE || u64::from(length) > remaining {
                return Err(PeError::MalformedCertificate {
                    offset,
                    length,
                    remaining: remaining as u32,
                });
            }

            let data = reader
                .read_exact_at(
                    offset + CERTIFICATE_HEADER_SIZE,
                    u64::from(length) - CERTIFICATE_HEADER_SIZE,
                )
                .map_err(PeError::truncated("certificate data"))?;

            certificates.push(Certificate {
                length,
                revision,
                certificate_type,
                data: data.to_vec(),
            });

            offset += u64::from(length);
            remaining -= u64::from(length);

            // Records are 8-byte aligned within the table.
            let padding = (8 - u64::from(length) % 8) % 8;
            let skip = padding.min(remaining);
            offset += skip;
            remaining -= skip;
        }

        debug!(certificates = certificates.len(), "Parsed certificate table");
        Ok(certificates)
    }
}
