// Top key: the small root record a remote archive version is published
// under. It names the root objects and, for each block, its length and the
// content keys the block was stored under.
//
//   [8 bytes]  "WORM0201"
//   [u16 BE]   root object count, then (20 byte digest, u32 BE kind) each
//   [u16 BE]   block count, then per block:
//              [u64 BE length][u16 BE key count][69 byte key]*

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::alphabet::Alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::archive::{RootObject, RootObjectKind};
use crate::cursor::SliceCursor;
use crate::digest::DIGEST_LEN;
use crate::error::{Error, Result};

/// URL-safe alphabet used in content key URIs.
const KEY_ALPHABET: Alphabet =
    match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789~-") {
        Ok(a) => a,
        Err(_) => panic!("invalid content key alphabet"),
    };

const KEY_BASE64: GeneralPurpose = GeneralPurpose::new(
    &KEY_ALPHABET,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

// ---------------------------------------------------------------------------
// Content keys
// ---------------------------------------------------------------------------

/// Binary content hash key of one stored block.
///
/// The 69 bytes are 5 bytes of extra data, a 32 byte routing key and a 32
/// byte crypto key. The URI form is `CHK@<routing>,<crypto>,<extra>`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentKey([u8; KEY_LEN]);

const KEY_LEN: usize = 69;

impl ContentKey {
    pub const LEN: usize = KEY_LEN;
    pub const URI_LEN: usize = 99;
    pub const URI_PREFIX: &'static str = "CHK@";

    const EXTRA: std::ops::Range<usize> = 0..5;
    const ROUTING: std::ops::Range<usize> = 5..37;
    const CRYPTO: std::ops::Range<usize> = 37..69;

    pub const fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; Self::LEN] = bytes
            .try_into()
            .map_err(|_| Error::corrupt(format!("content key is {} bytes, expected {}", bytes.len(), Self::LEN)))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn to_uri(&self) -> String {
        let mut uri = String::with_capacity(Self::URI_LEN);
        uri.push_str(Self::URI_PREFIX);
        KEY_BASE64.encode_string(&self.0[Self::ROUTING], &mut uri);
        uri.push(',');
        KEY_BASE64.encode_string(&self.0[Self::CRYPTO], &mut uri);
        uri.push(',');
        KEY_BASE64.encode_string(&self.0[Self::EXTRA], &mut uri);
        debug_assert_eq!(uri.len(), Self::URI_LEN);
        uri
    }

    /// Parse a bare `CHK@` URI. Anything after the three key fields (a file
    /// name, a trailing slash) is rejected.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let Some(fields) = uri.strip_prefix(Self::URI_PREFIX) else {
            return Err(Error::corrupt(format!("content key URI must start with {}", Self::URI_PREFIX)));
        };
        if uri.len() != Self::URI_LEN {
            return Err(Error::corrupt(format!(
                "content key URI is {} chars, expected {}",
                uri.len(),
                Self::URI_LEN
            )));
        }
        let parts: Vec<&str> = fields.split(',').collect();
        let [routing, crypto, extra] = parts.as_slice() else {
            return Err(Error::corrupt("content key URI needs three ',' separated fields"));
        };

        let mut out = [0u8; Self::LEN];
        for (field, range) in [(extra, Self::EXTRA), (routing, Self::ROUTING), (crypto, Self::CRYPTO)] {
            let decoded = KEY_BASE64
                .decode(field)
                .map_err(|e| Error::corrupt(format!("bad base64 in content key URI: {e}")))?;
            if decoded.len() != range.len() {
                return Err(Error::corrupt(format!(
                    "content key field decodes to {} bytes, expected {}",
                    decoded.len(),
                    range.len()
                )));
            }
            out[range].copy_from_slice(&decoded);
        }
        Ok(Self(out))
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", self.to_uri())
    }
}

impl FromStr for ContentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_uri(s)
    }
}

// ---------------------------------------------------------------------------
// Top key
// ---------------------------------------------------------------------------

/// One block: its byte length and the keys it can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDescription {
    length: u64,
    keys: Vec<ContentKey>,
}

impl BlockDescription {
    pub fn new(length: u64, keys: Vec<ContentKey>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::invariant("a block description needs at least one key"));
        }
        if length > i64::MAX as u64 {
            return Err(Error::invariant(format!("block length {length} out of range")));
        }
        Ok(Self { length, keys })
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn keys(&self) -> &[ContentKey] {
        &self.keys
    }

    /// The key to fetch from first.
    pub fn primary_key(&self) -> &ContentKey {
        &self.keys[0]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopKey {
    root_objects: Vec<RootObject>,
    blocks: Vec<BlockDescription>,
}

impl TopKey {
    pub const HEADER: &'static [u8; 8] = b"WORM0201";

    /// Largest serialized top key.
    pub const MAX_LENGTH: usize = 1024;

    /// Largest value the signed 16-bit count fields hold.
    const MAX_COUNT: usize = i16::MAX as usize;

    pub fn new(root_objects: Vec<RootObject>, blocks: Vec<BlockDescription>) -> Result<Self> {
        if blocks.is_empty() {
            return Err(Error::invariant("a top key needs at least one block"));
        }
        Ok(Self {
            root_objects,
            blocks,
        })
    }

    pub fn root_objects(&self) -> &[RootObject] {
        &self.root_objects
    }

    pub fn blocks(&self) -> &[BlockDescription] {
        &self.blocks
    }

    fn count(n: usize, what: &str) -> Result<u16> {
        if n > Self::MAX_COUNT {
            return Err(Error::invariant(format!("{n} {what}, at most {}", Self::MAX_COUNT)));
        }
        Ok(n as u16)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(Self::MAX_LENGTH);
        out.extend_from_slice(Self::HEADER);

        out.extend_from_slice(&Self::count(self.root_objects.len(), "root objects")?.to_be_bytes());
        for obj in &self.root_objects {
            out.extend_from_slice(obj.digest.as_bytes());
            out.extend_from_slice(&obj.kind.0.to_be_bytes());
        }

        out.extend_from_slice(&Self::count(self.blocks.len(), "blocks")?.to_be_bytes());
        for block in &self.blocks {
            out.extend_from_slice(&block.length.to_be_bytes());
            out.extend_from_slice(&Self::count(block.keys.len(), "block keys")?.to_be_bytes());
            for key in &block.keys {
                out.extend_from_slice(key.as_bytes());
            }
        }

        if out.len() > Self::MAX_LENGTH {
            return Err(Error::invariant(format!(
                "top key is {} bytes, at most {}",
                out.len(),
                Self::MAX_LENGTH
            )));
        }
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cur = SliceCursor::new(bytes);
        let header = cur.array::<8>()?;
        if &header != Self::HEADER {
            return Err(Error::VersionMismatch {
                expected: Self::HEADER.to_vec(),
                found: header.to_vec(),
            });
        }

        let root_count = read_count(&mut cur, "root object")?;
        if root_count.saturating_mul(DIGEST_LEN + 4) > cur.remaining() {
            return Err(Error::corrupt(format!("top key claims {root_count} root objects, data too short")));
        }
        let mut root_objects = Vec::with_capacity(root_count);
        for _ in 0..root_count {
            let digest = cur.read_digest()?;
            let kind = RootObjectKind(cur.read_u32()?);
            root_objects.push(RootObject::new(digest, kind));
        }

        let block_count = read_count(&mut cur, "block")?;
        if block_count == 0 {
            return Err(Error::corrupt("top key has no blocks"));
        }
        let mut blocks = Vec::with_capacity(block_count.min(cur.remaining() / (8 + 2)));
        for _ in 0..block_count {
            let length = cur.read_u64()?;
            if length > i64::MAX as u64 {
                return Err(Error::corrupt(format!("negative block length {length}")));
            }
            let key_count = read_count(&mut cur, "block key")?;
            if key_count == 0 {
                return Err(Error::corrupt("block description has no keys"));
            }
            let mut keys = Vec::with_capacity(key_count.min(cur.remaining() / ContentKey::LEN));
            for _ in 0..key_count {
                keys.push(ContentKey::new(cur.array::<{ ContentKey::LEN }>()?));
            }
            blocks.push(BlockDescription { length, keys });
        }

        if !cur.is_empty() {
            return Err(Error::corrupt(format!("{} trailing bytes after top key", cur.remaining())));
        }
        Ok(Self {
            root_objects,
            blocks,
        })
    }
}

fn read_count(cur: &mut SliceCursor<'_, u8>, what: &str) -> Result<usize> {
    let count = cur.read_u16()?;
    if usize::from(count) > TopKey::MAX_COUNT {
        return Err(Error::corrupt(format!("negative {what} count {count:#06x}")));
    }
    Ok(usize::from(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::LinkDigest;

    fn key(seed: u8) -> ContentKey {
        let mut bytes = [0u8; ContentKey::LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = seed.wrapping_mul(31).wrapping_add(i as u8);
        }
        ContentKey::new(bytes)
    }

    #[test]
    fn uri_layout() {
        let k = key(7);
        let uri = k.to_uri();
        assert_eq!(uri.len(), ContentKey::URI_LEN);
        assert!(uri.starts_with("CHK@"));
        let fields: Vec<_> = uri[4..].split(',').collect();
        assert_eq!(fields.iter().map(|f| f.len()).collect::<Vec<_>>(), [43, 43, 7]);
        assert!(!uri.contains(['+', '/', '=']));
        assert_eq!(ContentKey::from_uri(&uri).unwrap(), k);
        assert_eq!(uri.parse::<ContentKey>().unwrap(), k);
    }

    #[test]
    fn uri_alphabet() {
        let k = ContentKey::new([0xff; ContentKey::LEN]);
        let uri = k.to_uri();
        assert!(uri[4..].chars().all(|c| c == '-' || c == ',' || c == '8' || c == 'w'));
        assert!(uri.contains('-'));
        let zero = ContentKey::new([0; ContentKey::LEN]).to_uri();
        assert_eq!(&zero[4..47], "A".repeat(43));
    }

    #[test]
    fn uri_rejects_malformed() {
        let uri = key(1).to_uri();
        assert!(ContentKey::from_uri(&uri.replacen("CHK@", "SSK@", 1)).is_err());
        assert!(ContentKey::from_uri(&format!("{uri}/")).is_err());
        assert!(ContentKey::from_uri(&uri[..98]).is_err());
        let swapped = uri.replacen(',', ".", 1);
        assert!(ContentKey::from_uri(&swapped).is_err());
        let bad_char = format!("CHK@+{}", &uri[5..]);
        assert!(ContentKey::from_uri(&bad_char).is_err());
    }

    #[test]
    fn bytes_layout() {
        let roots = vec![RootObject::new(LinkDigest::EMPTY, RootObjectKind::ARCHIVE_MANIFEST)];
        let blocks = vec![
            BlockDescription::new(1234, vec![key(1)]).unwrap(),
            BlockDescription::new(5, vec![key(2), key(3)]).unwrap(),
        ];
        let top = TopKey::new(roots, blocks).unwrap();
        let bytes = top.to_bytes().unwrap();
        assert_eq!(&bytes[..8], b"WORM0201");
        assert_eq!(&bytes[8..10], &1u16.to_be_bytes());
        assert_eq!(&bytes[10..30], LinkDigest::EMPTY.as_bytes());
        assert_eq!(&bytes[30..34], &1u32.to_be_bytes());
        assert_eq!(&bytes[34..36], &2u16.to_be_bytes());
        assert_eq!(&bytes[36..44], &1234u64.to_be_bytes());
        assert_eq!(bytes.len(), 8 + 2 + 24 + 2 + (8 + 2 + 69) + (8 + 2 + 2 * 69));
        assert_eq!(TopKey::from_bytes(&bytes).unwrap(), top);
    }

    #[test]
    fn needs_a_block() {
        assert!(TopKey::new(Vec::new(), Vec::new()).is_err());
        let mut bytes = TopKey::HEADER.to_vec();
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        assert!(TopKey::from_bytes(&bytes).is_err());
        assert!(BlockDescription::new(1, Vec::new()).is_err());
    }

    #[test]
    fn size_limit() {
        let blocks: Vec<_> = (0..15)
            .map(|i| BlockDescription::new(10, vec![key(i)]).unwrap())
            .collect();
        let top = TopKey::new(Vec::new(), blocks).unwrap();
        assert!(top.to_bytes().is_err());
        let fits = TopKey::new(Vec::new(), top.blocks()[..12].to_vec()).unwrap();
        assert!(fits.to_bytes().unwrap().len() <= TopKey::MAX_LENGTH);
    }

    #[test]
    fn rejects_corruption() {
        let top = TopKey::new(Vec::new(), vec![BlockDescription::new(9, vec![key(4)]).unwrap()]).unwrap();
        let bytes = top.to_bytes().unwrap();
        assert!(TopKey::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(TopKey::from_bytes(&extra).is_err());
        let mut header = bytes.clone();
        header[7] = b'0';
        assert!(matches!(TopKey::from_bytes(&header), Err(Error::VersionMismatch { .. })));
        let mut negative = bytes;
        negative[12] = 0x80;
        assert!(TopKey::from_bytes(&negative).is_err());
    }
}
