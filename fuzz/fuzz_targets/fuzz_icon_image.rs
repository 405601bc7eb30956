#![no_main]

use confwd_wire::IconImage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(icon) = IconImage::from_bytes(data) else {
        return;
    };
    let bytes = icon.to_bytes().expect("decoded icon must re-encode");
    let again = IconImage::from_bytes(&bytes).expect("re-encoded icon must decode");
    assert_eq!(again, icon);
});
