#![no_main]
use addon_host::module::image::{is_sealed, unseal, ModuleImage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Image parsing runs on untrusted files: errors are fine, panics are not

    let _header = ModuleImage::parse_header(data);

    if let Ok(image) = ModuleImage::parse(data) {
        if let Ok(bytes) = image.to_bytes() {
            let reparsed = ModuleImage::parse(&bytes);
            assert_eq!(reparsed.ok(), Some(image));
        }
    }

    if is_sealed(data) {
        if let Ok(plain) = unseal(data) {
            let _ = ModuleImage::parse(&plain);
        }
    }

    // Truncations of whatever was given
    for len in [4usize, 6, 16, 64] {
        if data.len() > len {
            let _ = ModuleImage::parse(&data[..len]);
        }
    }
});
