use pescope::pe::types::*;
use pescope::{ParseOptions, ParsedImage, PeError};

use crate::common::*;

#[test]
fn exports_have_one_entry_per_function() {
    let file = with_exports(PeBuilder::pe32()).write();
    let image = ParsedImage::open(file.path());
    assert!(image.is_initialized(), "{:?}", image.error());

    let exports = image.exports().unwrap();
    assert_eq!(exports.name, "test.dll");
    assert_eq!(exports.base, 5);
    assert_eq!(exports.count(), 3);
    assert_eq!(exports.named_count(), 2);

    let ordinals: Vec<u32> = exports.functions.iter().map(|f| f.ordinal).collect();
    assert_eq!(ordinals, vec![5, 6, 7]);

    let alpha = exports.get_by_name("alpha").unwrap();
    assert_eq!(alpha.address, 0x1000);
    assert!(!alpha.is_forwarder());

    let gamma = exports.get_by_name("gamma").unwrap();
    assert_eq!(gamma.ordinal, 7);
    assert_eq!(gamma.address, 0x1010);
}

#[test]
fn forwarded_export_resolves_its_target() {
    let file = with_exports(PeBuilder::pe32plus()).write();
    let image = ParsedImage::open(file.path());
    let exports = image.exports().unwrap();

    let forwarded = exports.get_by_ordinal(6).unwrap();
    assert_eq!(forwarded.address, 0x20C0);
    assert_eq!(forwarded.forward_name.as_deref(), Some("KERNEL32.Sleep"));
    assert!(forwarded.name.is_none());
}

#[test]
fn name_ordinal_past_function_table_fails() {
    let mut builder = with_exports(PeBuilder::pe32());
    builder.put_u16(rva(0x2112), 3);
    let file = builder.write();
    assert!(matches!(
        ParsedImage::parse(file.path(), &ParseOptions::default()),
        Err(PeError::OrdinalOutOfRange { index: 3, count: 3 })
    ));

    let image = ParsedImage::open(file.path());
    assert!(!image.is_initialized());
}

#[test]
fn unmapped_address_table_fails() {
    let mut builder = with_exports(PeBuilder::pe32());
    builder.put_u32(rva(0x2000) + 28, 0x8000);
    let file = builder.write();
    assert!(matches!(
        ParsedImage::parse(file.path(), &ParseOptions::default()),
        Err(PeError::UnmappedAddress {
            what: "export address table",
            ..
        })
    ));
}

#[test]
fn unmapped_export_directory_is_absent() {
    let builder = with_exports(PeBuilder::pe32()).directory(IMAGE_DIRECTORY_ENTRY_EXPORT, 0x9000, 0x100);
    let file = builder.write();
    let image = ParsedImage::open(file.path());
    assert!(image.is_initialized());
    assert!(image.exports().is_none());
}

#[test]
fn disabled_exports_are_skipped() {
    let mut builder = with_exports(PeBuilder::pe32());
    builder.put_u16(rva(0x2112), 3);
    let file = builder.write();
    let options = ParseOptions {
        parse_exports: false,
        ..ParseOptions::default()
    };
    let image = ParsedImage::open_with_options(file.path(), &options);
    assert!(image.is_initialized());
    assert!(image.exports().is_none());
}
