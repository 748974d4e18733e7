// Apply binary line patches.
//
// A patch is a list of hunks `(start, end, len, data[len])` with big-endian
// u32 fields, sorted by `start` and non-overlapping. Applying it replaces
// `base[start..end]` with `data` for every hunk. Several patches are applied
// in order, each one against the output of the previous.

use crate::cursor::SliceCursor;
use crate::delta::bdiff::HUNK_HEADER_LEN;
use crate::error::{Error, Result};

/// One decoded hunk, borrowing its replacement text from the patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub start: usize,
    pub end: usize,
    pub data: &'a [u8],
}

/// Decode every hunk of `patch`.
pub fn fragments(patch: &[u8]) -> Result<Vec<Fragment<'_>>> {
    let mut cur = SliceCursor::new(patch);
    let mut out = Vec::new();
    while !cur.is_empty() {
        if cur.remaining() < HUNK_HEADER_LEN {
            return Err(Error::corrupt(format!(
                "truncated hunk header at patch offset {}",
                cur.position()
            )));
        }
        let start = cur.read_u32()? as usize;
        let end = cur.read_u32()? as usize;
        let len = cur.read_u32()? as usize;
        let data = cur.take(len)?;
        out.push(Fragment { start, end, data });
    }
    Ok(out)
}

/// Apply a single patch to `base`.
pub fn apply(base: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let frags = fragments(patch)?;
    let grow: usize = frags.iter().map(|f| f.data.len()).sum();
    let mut out = Vec::with_capacity(base.len() + grow);

    let mut cursor = 0usize;
    for f in &frags {
        if f.start < cursor || f.end < f.start || f.end > base.len() {
            return Err(Error::HunkOutOfRange {
                start: f.start,
                end: f.end,
                cursor,
                len: base.len(),
            });
        }
        out.extend_from_slice(&base[cursor..f.start]);
        out.extend_from_slice(f.data);
        cursor = f.end;
    }
    out.extend_from_slice(&base[cursor..]);
    Ok(out)
}

/// Apply `patches` oldest first.
pub fn patch<P: AsRef<[u8]>>(base: &[u8], patches: &[P]) -> Result<Vec<u8>> {
    let mut text = base.to_vec();
    for (i, p) in patches.iter().enumerate() {
        text = apply(&text, p.as_ref()).inspect_err(|e| {
            log::debug!("mpatch: patch {i} of {} failed: {e}", patches.len());
        })?;
    }
    Ok(text)
}

/// Length of `base` after applying `patch`, without building the output.
pub fn patched_size(base_len: usize, patch: &[u8]) -> Result<usize> {
    let mut size = base_len;
    let mut cursor = 0usize;
    for f in fragments(patch)? {
        if f.start < cursor || f.end < f.start || f.end > base_len {
            return Err(Error::HunkOutOfRange {
                start: f.start,
                end: f.end,
                cursor,
                len: base_len,
            });
        }
        size = size - (f.end - f.start) + f.data.len();
        cursor = f.end;
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::bdiff;
    use crate::error::ErrorKind;

    fn hunk(start: u32, end: u32, data: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&start.to_be_bytes());
        v.extend_from_slice(&end.to_be_bytes());
        v.extend_from_slice(&(data.len() as u32).to_be_bytes());
        v.extend_from_slice(data);
        v
    }

    #[test]
    fn empty_patch_is_identity() {
        assert_eq!(apply(b"abc", b"").unwrap(), b"abc");
        assert_eq!(patch::<&[u8]>(b"abc", &[]).unwrap(), b"abc");
    }

    #[test]
    fn replace_middle() {
        let p = hunk(2, 4, b"X\n");
        assert_eq!(apply(b"a\nb\nc\n", &p).unwrap(), b"a\nX\nc\n");
    }

    #[test]
    fn multiple_hunks_keep_gaps() {
        let mut p = hunk(0, 1, b"A");
        p.extend(hunk(3, 3, b"++"));
        p.extend(hunk(5, 6, b""));
        assert_eq!(apply(b"abcdef", &p).unwrap(), b"Abc++de");
    }

    #[test]
    fn chained_patches_apply_in_order() {
        let v0 = b"one\n".to_vec();
        let v1 = b"one\ntwo\n".to_vec();
        let v2 = b"zero\none\ntwo\n".to_vec();
        let p1 = bdiff::diff(&v0, &v1).unwrap();
        let p2 = bdiff::diff(&v1, &v2).unwrap();
        assert_eq!(patch(&v0, &[p1, p2]).unwrap(), v2);
    }

    #[test]
    fn out_of_range_hunk_is_corrupt() {
        let p = hunk(2, 10, b"");
        let err = apply(b"abc", &p).unwrap_err();
        assert!(matches!(err, Error::HunkOutOfRange { end: 10, len: 3, .. }));
        assert_eq!(err.kind(), ErrorKind::CorruptData);
    }

    #[test]
    fn backwards_hunks_rejected() {
        let mut p = hunk(2, 3, b"");
        p.extend(hunk(0, 1, b""));
        assert!(apply(b"abcdef", &p).is_err());
        assert!(apply(b"abcdef", &hunk(3, 2, b"")).is_err());
    }

    #[test]
    fn truncated_patch_rejected() {
        let p = hunk(0, 0, b"hello");
        assert!(apply(b"", &p[..p.len() - 1]).is_err());
        assert!(apply(b"", &p[..7]).is_err());
    }

    #[test]
    fn size_matches_application() {
        let old = b"alpha\nbeta\ngamma\n";
        let new = b"alpha\nBETA!\ngamma\ndelta\n";
        let p = bdiff::diff(old, new).unwrap();
        assert_eq!(patched_size(old.len(), &p).unwrap(), new.len());
    }
}
