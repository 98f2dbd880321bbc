use pescope::pe::directories::{CertificateRevision, CertificateType};
use pescope::{ParseOptions, ParsedImage, PeError};

use crate::common::*;

#[test]
fn two_unaligned_certificates_with_padding() {
    for declared in [26u32, 32] {
        let file = with_certificates(PeBuilder::pe32(), declared).write();
        let image = ParsedImage::open(file.path());
        assert!(image.is_initialized(), "{:?}", image.error());

        let certificates = image.certificates();
        assert_eq!(certificates.len(), 2);
        assert_eq!(certificates[0].length, 13);
        assert_eq!(certificates[0].data, vec![0x30, 0x82, 0x01, 0x02, 0x03]);
        assert_eq!(certificates[0].revision, CertificateRevision::Revision2_0);
        assert_eq!(certificates[0].certificate_type, CertificateType::PkcsSignedData);
        assert_eq!(certificates[1].length, 10);
        assert_eq!(certificates[1].data, vec![0xAA, 0xBB]);

        // 13 + 3 bytes of padding + 10
        let consumed: u32 = certificates.iter().map(|c| c.length).sum::<u32>() + 3;
        assert!(consumed <= declared);
    }
}

#[test]
fn garbage_certificate_header_is_ignored() {
    let mut builder = with_certificates(PeBuilder::pe32(), 32);
    builder.put_u16(CERTIFICATE_OFFSET + 4, 0x1234);
    builder.put_u16(CERTIFICATE_OFFSET + 6, 0x77);
    let file = builder.write();
    let image = ParsedImage::open(file.path());
    assert!(image.is_initialized());
    assert!(image.certificates().is_empty());
}

#[test]
fn certificate_table_past_end_of_file_is_absent() {
    let builder = PeBuilder::pe32().directory(4, 0x10_0000, 0x40);
    let file = builder.write();
    let image = ParsedImage::open(file.path());
    assert!(image.is_initialized());
    assert!(image.certificates().is_empty());
}

#[test]
fn truncated_certificate_payload_fails() {
    let builder = with_certificates(PeBuilder::pe32(), 32).truncate(CERTIFICATE_OFFSET + 25);
    let file = builder.write();
    assert!(matches!(
        ParsedImage::parse(file.path(), &ParseOptions::default()),
        Err(PeError::Truncated {
            what: "certificate data",
            ..
        })
    ));
}
