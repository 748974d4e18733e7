// Self-describing payload compression.
//
// The first byte of a stored payload says how to read it:
//   'x'  zlib stream (zlib headers always start with 0x78)
//   'u'  raw bytes follow the tag
//   0x00 raw bytes, untagged (a leading NUL cannot be confused with a tag)
// An empty payload is an empty text.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{Error, Result};

/// Texts shorter than this are never compressed.
pub const MIN_COMPRESS_LEN: usize = 44;

const TAG_ZLIB: u8 = b'x';
const TAG_RAW: u8 = b'u';

fn deflate(text: &[u8]) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::with_capacity(text.len() / 3), Compression::default());
    enc.write_all(text)?;
    Ok(enc.finish()?)
}

/// Encode `text` for storage.
///
/// The zlib form is kept only when strictly smaller than the raw text;
/// otherwise the raw text is stored, tagged with `'u'` unless it starts
/// with a NUL byte.
pub fn compress(text: &[u8]) -> Result<Vec<u8>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    if text.len() >= MIN_COMPRESS_LEN {
        let packed = deflate(text)?;
        if packed.len() < text.len() {
            return Ok(packed);
        }
    }
    if text[0] == 0 {
        return Ok(text.to_vec());
    }
    let mut out = Vec::with_capacity(text.len() + 1);
    out.push(TAG_RAW);
    out.extend_from_slice(text);
    Ok(out)
}

/// Decode a stored payload.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let Some(&tag) = data.first() else {
        return Ok(Vec::new());
    };
    match tag {
        TAG_RAW => Ok(data[1..].to_vec()),
        TAG_ZLIB => {
            let mut out = Vec::with_capacity(data.len() * 3);
            ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| Error::corrupt(format!("zlib decompression failed: {e}")))?;
            Ok(out)
        }
        0 => Ok(data.to_vec()),
        other => Err(Error::corrupt(format!(
            "unknown payload tag {other:#04x}"
        ))),
    }
}
