// Binary link representation.
//
//   [flags u8][parent 20 bytes, iff HAS_PARENT][payload length varint][payload]
//
// Links are written back to back with no framing; a stream ends where the
// next flags byte would be.

use std::io::Write;
use std::sync::Arc;

use crate::cursor::SliceCursor;
use crate::digest::{DIGEST_LEN, LinkDigest};
use crate::error::{Error, Result};
use crate::link::HistoryLink;
use crate::varint;

bitflags::bitflags! {
    /// Leading byte of a link representation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LinkFlags: u8 {
        /// Payload is a full copy of the version.
        const END_OF_CHAIN = 0b0001;
        /// A 20-byte parent digest follows the flags byte.
        const HAS_PARENT = 0b0010;
    }
}

/// Length of the representation of `link`.
pub fn rep_len(link: &HistoryLink) -> usize {
    let parent = if link.parent().is_some() { DIGEST_LEN } else { 0 };
    1 + parent + varint::sizeof_usize(link.payload_len()) + link.payload_len()
}

/// Append the representation of `link` to `out`.
pub fn encode_into(link: &HistoryLink, out: &mut Vec<u8>) {
    out.reserve(rep_len(link));
    out.push(link.flags().bits());
    if let Some(parent) = link.parent() {
        out.extend_from_slice(parent.as_bytes());
    }
    varint::push_usize(out, link.payload_len());
    out.extend_from_slice(link.payload());
}

/// Representation of `link`.
pub fn encode(link: &HistoryLink) -> Vec<u8> {
    let mut out = Vec::with_capacity(rep_len(link));
    encode_into(link, &mut out);
    out
}

/// Write the representation of `link` to `w`.
pub fn write<W: Write>(w: &mut W, link: &HistoryLink) -> Result<()> {
    w.write_all(&encode(link))?;
    Ok(())
}

/// Parse the next link from `cur`. Returns `Ok(None)` at end of input.
pub fn read_link(cur: &mut SliceCursor<'_, u8>) -> Result<Option<HistoryLink>> {
    if cur.is_empty() {
        return Ok(None);
    }
    let rep = cur.rest();
    let start = cur.position();

    let raw = cur.read_u8()?;
    let flags = LinkFlags::from_bits(raw)
        .ok_or_else(|| Error::corrupt(format!("unknown link flag bits {raw:#04x} at offset {start}")))?;

    let parent = if flags.contains(LinkFlags::HAS_PARENT) {
        let p = cur.read_digest()?;
        if p.is_null() {
            return Err(Error::corrupt(format!("NULL parent digest in link at offset {start}")));
        }
        Some(p)
    } else {
        None
    };
    let is_end = flags.contains(LinkFlags::END_OF_CHAIN);
    if parent.is_none() && !is_end {
        return Err(Error::corrupt(format!(
            "link at offset {start} has no parent and is not end-of-chain"
        )));
    }

    let len = cur.read_varint()?;
    let payload: Arc<[u8]> = Arc::from(cur.take(len)?);

    let consumed = cur.position() - start;
    let digest = LinkDigest::of(&rep[..consumed]);
    Ok(Some(HistoryLink::from_parts(digest, parent, payload, is_end)))
}

/// Parse exactly one link from `bytes`; trailing data is an error.
pub fn read_one(bytes: &[u8]) -> Result<HistoryLink> {
    let mut cur = SliceCursor::new(bytes);
    let link = read_link(&mut cur)?.ok_or_else(|| Error::corrupt("empty link representation"))?;
    if !cur.is_empty() {
        return Err(Error::corrupt(format!(
            "{} trailing bytes after link {}",
            cur.remaining(),
            link.digest()
        )));
    }
    Ok(link)
}

/// Parse every link in `bytes`.
pub fn read_all(bytes: &[u8]) -> Result<Vec<HistoryLink>> {
    let mut cur = SliceCursor::new(bytes);
    let mut links = Vec::new();
    while let Some(link) = read_link(&mut cur)? {
        links.push(link);
    }
    Ok(links)
}

/// Parse one link and check that it has the expected digest.
pub fn read_verified(bytes: &[u8], expected: LinkDigest) -> Result<HistoryLink> {
    let link = read_one(bytes)?;
    if link.digest() != expected {
        return Err(Error::DigestMismatch {
            expected,
            actual: link.digest(),
        });
    }
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (HistoryLink, HistoryLink) {
        let base = HistoryLink::new(None, &b"ubase text"[..], true).unwrap();
        let delta = HistoryLink::new(Some(base.digest()), vec![7u8; 300], false).unwrap();
        (base, delta)
    }

    #[test]
    fn layout_of_parentless_link() {
        let (base, _) = chain();
        let bytes = encode(&base);
        assert_eq!(bytes[0], LinkFlags::END_OF_CHAIN.bits());
        assert_eq!(bytes[1] as usize, base.payload_len());
        assert_eq!(&bytes[2..], base.payload());
        assert_eq!(bytes.len(), rep_len(&base));
    }

    #[test]
    fn layout_of_delta_link() {
        let (base, delta) = chain();
        let bytes = encode(&delta);
        assert_eq!(bytes[0], LinkFlags::HAS_PARENT.bits());
        assert_eq!(&bytes[1..21], base.digest().as_bytes());
        // 300 needs two varint bytes.
        assert_eq!(&bytes[21..23], &[0x82, 0x2C]);
        assert_eq!(bytes.len(), rep_len(&delta));
    }

    #[test]
    fn stream_parse_recomputes_digests() {
        let (base, delta) = chain();
        let mut bytes = encode(&base);
        encode_into(&delta, &mut bytes);
        let links = read_all(&bytes).unwrap();
        assert_eq!(links, vec![base, delta]);
    }

    #[test]
    fn empty_input_is_end_of_stream() {
        assert!(read_all(b"").unwrap().is_empty());
        let mut cur = SliceCursor::new(&b""[..]);
        assert!(read_link(&mut cur).unwrap().is_none());
    }

    #[test]
    fn single_byte_change_breaks_verification() {
        let (_, delta) = chain();
        let mut bytes = encode(&delta);
        assert!(read_verified(&bytes, delta.digest()).is_ok());
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        let err = read_verified(&bytes, delta.digest()).unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));
    }

    #[test]
    fn malformed_links_rejected() {
        // Unknown flag bits.
        assert!(read_one(&[0x80, 0x00]).is_err());
        // No parent and not end-of-chain.
        assert!(read_one(&[0x00, 0x00]).is_err());
        // Truncated payload.
        assert!(read_one(&[0x01, 0x05, b'a']).is_err());
        // Trailing bytes.
        assert!(read_one(&[0x01, 0x00, 0x01]).is_err());
    }
}
