#![no_main]
use libfuzzer_sys::fuzz_target;
use wormarc::io::{ContentKey, TopKey};

fuzz_target!(|data: &[u8]| {
    if let Ok(top) = TopKey::from_bytes(data) {
        // Anything accepted that fits re-encodes to the same bytes.
        if let Ok(bytes) = top.to_bytes() {
            assert_eq!(bytes, data);
        }
    }
    let _ = ContentKey::from_uri(&String::from_utf8_lossy(data));
});
