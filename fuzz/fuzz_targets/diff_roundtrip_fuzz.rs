#![no_main]
use libfuzzer_sys::fuzz_target;
use wormarc::delta::{DeltaCoder, bdiff, mpatch};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let split = data[0] as usize % data.len();
    let (old, new) = data[1..].split_at(split.min(data.len() - 1));

    let patch = bdiff::diff(old, new).unwrap();
    assert_eq!(mpatch::apply(old, &patch).unwrap(), new);
    assert_eq!(mpatch::patched_size(old.len(), &patch).unwrap(), new.len());

    let coder = DeltaCoder::new();
    let base = coder.make_delta(None, None, old).unwrap();
    let delta = coder.make_delta(Some(base.digest()), Some(old), new).unwrap();
    assert_eq!(coder.apply_deltas([&delta, &base]).unwrap(), new);
});
