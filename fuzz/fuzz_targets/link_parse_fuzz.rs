#![no_main]
use libfuzzer_sys::fuzz_target;
use wormarc::delta::zlib;
use wormarc::link::binary;

fuzz_target!(|data: &[u8]| {
    // Untrusted link streams, payloads and root objects: errors only.
    let _ = binary::read_all(data);
    let _ = zlib::decompress(data);
    wormarc::archive::fuzz_try_parse_root_objects(data);
});
