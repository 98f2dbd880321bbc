#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let options = pescope::ParseOptions::default();
    if let Ok(image) = pescope::ParsedImage::from_bytes("fuzz.bin", data.to_vec(), &options) {
        let _ = image.to_json();
    }
});
