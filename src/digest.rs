// 20-byte SHA-1 digests used as link and file identity.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Digest length in bytes.
pub const DIGEST_LEN: usize = 20;

/// Content identity of a link or file.
///
/// Ordering is bytewise, which is the same as ordering by hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LinkDigest([u8; DIGEST_LEN]);

impl LinkDigest {
    /// "No link". Never the digest of real data.
    pub const NULL: LinkDigest = LinkDigest([0u8; DIGEST_LEN]);

    /// SHA-1 of the empty byte string.
    pub const EMPTY: LinkDigest = LinkDigest([
        0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60, 0x18,
        0x90, 0xaf, 0xd8, 0x07, 0x09,
    ]);

    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice that must be exactly [`DIGEST_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; DIGEST_LEN] = bytes.try_into().map_err(|_| {
            Error::corrupt(format!(
                "digest must be {DIGEST_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// SHA-1 of `data`.
    pub fn of(data: &[u8]) -> Self {
        let out = Sha1::digest(data);
        Self(out.into())
    }

    /// SHA-1 of everything readable from `r`.
    pub fn of_reader<R: Read>(r: &mut R) -> Result<Self> {
        let mut hasher = Sha1::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 40 character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut out = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| Error::corrupt(format!("bad hex digest {s:?}: {e}")))?;
        Ok(Self(out))
    }
}

impl fmt::Display for LinkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for LinkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkDigest({})", self.to_hex())
    }
}

impl FromStr for LinkDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl From<[u8; DIGEST_LEN]> for LinkDigest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for LinkDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_constant_matches_sha1() {
        assert_eq!(LinkDigest::of(b""), LinkDigest::EMPTY);
        assert_eq!(
            LinkDigest::EMPTY.to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn null_is_zero() {
        assert!(LinkDigest::NULL.is_null());
        assert!(!LinkDigest::EMPTY.is_null());
        assert_eq!(LinkDigest::default(), LinkDigest::NULL);
    }

    #[test]
    fn hex_roundtrip() {
        let d = LinkDigest::of(b"abc");
        assert_eq!(d.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(d.to_hex().parse::<LinkDigest>().unwrap(), d);
        assert!(LinkDigest::from_hex("zz").is_err());
        assert!(LinkDigest::from_hex("abcd").is_err());
    }

    #[test]
    fn ordering_matches_hex_ordering() {
        let mut ds: Vec<LinkDigest> = (0..32u8).map(|i| LinkDigest::of(&[i])).collect();
        let mut hexes: Vec<String> = ds.iter().map(LinkDigest::to_hex).collect();
        ds.sort();
        hexes.sort();
        let sorted: Vec<String> = ds.iter().map(LinkDigest::to_hex).collect();
        assert_eq!(sorted, hexes);
    }

    #[test]
    fn reader_digest_matches_slice_digest() {
        let data = vec![7u8; 20_000];
        let d = LinkDigest::of_reader(&mut &data[..]).unwrap();
        assert_eq!(d, LinkDigest::of(&data));
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(LinkDigest::from_slice(&[0u8; 19]).is_err());
        assert_eq!(
            LinkDigest::from_slice(&[0u8; 20]).unwrap(),
            LinkDigest::NULL
        );
    }
}
