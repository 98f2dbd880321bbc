use pescope::pe::types::*;
use pescope::{ParseOptions, ParsedImage, PeError};

use crate::common::*;

fn parse(builder: &PeBuilder) -> pescope::Result<ParsedImage> {
    let file = builder.write();
    ParsedImage::parse(file.path(), &ParseOptions::default())
}

#[test]
fn pe32_image_parses() {
    let image = parse(&PeBuilder::pe32()).unwrap();
    assert!(image.is_initialized());
    assert!(image.error().is_none());
    assert_eq!(image.dos_header().e_lfanew, PE_OFFSET as u32);
    assert_eq!(image.machine(), Machine::I386);
    assert_eq!(image.pe_header().number_of_sections, 2);
    assert!(!image.is_64bit());
    assert_eq!(image.image_base(), IMAGE_BASE_32);
    assert_eq!(image.entry_point(), 0x1000);
    assert_eq!(image.optional_header().subsystem(), Subsystem::WindowsCui);
    assert_eq!(image.data_directories().len(), 16);
    assert_eq!(image.file_size(), FILE_SIZE as u64);

    match image.optional_header() {
        OptionalHeader::Pe32(header) => {
            assert_eq!(header.image_base, IMAGE_BASE_32 as u32);
            assert_eq!(header.windows.file_alignment, 0x200);
        }
        other => panic!("expected a PE32 optional header, got {:?}", other),
    }
}

#[test]
fn pe32plus_image_parses() {
    let image = parse(&PeBuilder::pe32plus()).unwrap();
    assert!(image.is_initialized());
    assert_eq!(image.machine(), Machine::X86_64);
    assert!(image.is_64bit());
    assert_eq!(image.image_base(), IMAGE_BASE_64);
    assert_eq!(image.data_directories().len(), 16);
    assert_eq!(image.sections().len(), 2);

    match image.optional_header() {
        OptionalHeader::Pe32Plus(header) => {
            assert_eq!(header.image_base, IMAGE_BASE_64);
            assert_eq!(header.windows.section_alignment, 0x1000);
            assert_eq!(header.common.address_of_entry_point, 0x1000);
        }
        other => panic!("expected a PE32+ optional header, got {:?}", other),
    }
}

#[test]
fn file_shorter_than_dos_header_fails() {
    let builder = PeBuilder::pe32().truncate(32);
    assert!(matches!(
        parse(&builder),
        Err(PeError::FileTooSmall { size: 32, .. })
    ));
}

#[test]
fn file_cut_at_pe_signature_fails() {
    let builder = PeBuilder::pe32().truncate(PE_OFFSET);
    assert!(parse(&builder).is_err());

    let builder = PeBuilder::pe32().truncate(PE_OFFSET + 2);
    assert!(matches!(
        parse(&builder),
        Err(PeError::Truncated {
            what: "PE header",
            ..
        })
    ));
}

#[test]
fn bad_signatures_fail() {
    let mut builder = PeBuilder::pe32();
    builder.put_bytes(0, b"ZM");
    assert!(matches!(
        parse(&builder),
        Err(PeError::InvalidDosSignature { .. })
    ));

    let mut builder = PeBuilder::pe32();
    builder.put_bytes(PE_OFFSET, b"NE\0\0");
    assert!(matches!(
        parse(&builder),
        Err(PeError::InvalidPeSignature { .. })
    ));

    let mut builder = PeBuilder::pe32();
    builder.put_u16(OPTIONAL_OFFSET, 0x107);
    assert!(matches!(parse(&builder), Err(PeError::InvalidMagic(0x107))));
}

#[test]
fn absent_optional_header() {
    let mut builder = PeBuilder::headers_only(false);
    builder.put_u16(PE_OFFSET + 20, 0);
    let image = parse(&builder).unwrap();
    assert!(image.is_initialized());
    assert_eq!(image.optional_header(), &OptionalHeader::Absent);
    assert!(image.data_directories().is_empty());
    assert!(image.exports().is_none());
}

#[test]
fn oversized_directory_count_is_clamped() {
    let builder = PeBuilder::pe32().number_of_rva_and_sizes(0x20);
    let image = parse(&builder).unwrap();
    assert!(image.is_initialized());
    assert_eq!(image.optional_header().number_of_rva_and_sizes(), 0x20);
    assert_eq!(image.data_directories().len(), 16);
}

#[test]
fn truncated_section_table_fails() {
    let builder = PeBuilder::pe32().truncate(OPTIONAL_OFFSET + 0xE0 + 60);
    assert!(matches!(
        parse(&builder),
        Err(PeError::Truncated {
            what: "section header",
            ..
        })
    ));
}

#[test]
fn open_returns_uninitialized_image_on_failure() {
    let file = PeBuilder::pe32().truncate(40).write();
    let image = ParsedImage::open(file.path());
    assert!(!image.is_initialized());
    assert!(matches!(image.error(), Some(PeError::FileTooSmall { .. })));
    assert_eq!(image.path(), file.path());
    assert!(image.sections().is_empty());

    let missing = ParsedImage::open("/nonexistent/pescope/sample.exe");
    assert!(!missing.is_initialized());
    assert!(matches!(missing.error(), Some(PeError::Io(_))));
}

#[test]
fn file_too_large_for_limits_fails() {
    let mut options = ParseOptions::default();
    options.io.max_file_size = 0x100;
    let file = PeBuilder::pe32().write();
    assert!(matches!(
        ParsedImage::parse(file.path(), &options),
        Err(PeError::Io(_))
    ));
}

#[test]
fn from_bytes_matches_file_parse() {
    let builder = PeBuilder::pe32plus();
    let from_file = parse(&builder).unwrap();
    let from_memory =
        ParsedImage::from_bytes("memory.dll", builder.bytes(), &ParseOptions::default()).unwrap();
    assert_eq!(from_memory.optional_header(), from_file.optional_header());
    assert_eq!(from_memory.data_directories(), from_file.data_directories());
    assert_eq!(from_memory.path().to_str(), Some("memory.dll"));
}
