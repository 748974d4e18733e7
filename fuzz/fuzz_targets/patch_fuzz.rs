#![no_main]
use libfuzzer_sys::fuzz_target;
use wormarc::delta::mpatch;

fuzz_target!(|data: &[u8]| {
    // Arbitrary patches must be rejected cleanly, never panic.
    let _ = mpatch::fragments(data);
    let _ = mpatch::patched_size(0, data);

    if data.len() >= 2 {
        let split = data[0] as usize % data.len();
        let (base, patch) = data[1..].split_at(split.min(data.len() - 1));
        if let Ok(size) = mpatch::patched_size(base.len(), patch) {
            if let Ok(out) = mpatch::apply(base, patch) {
                assert_eq!(out.len(), size);
            }
        }
    }
});
