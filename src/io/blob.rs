// Single-stream archive serialization.
//
// Layout:
//
//   [8 bytes]  "BLOB0002"
//   [20 bytes] ARCHIVE_MANIFEST chain head
//   [u16 BE]   metadata length, then that many bytes of UTF-8 metadata
//   [...]      binary link representations until end of stream
//
// Every link named by a block appears exactly once. Reading rebuilds the
// archive manifest from the links, then checks that the links read are
// exactly the ones the manifest's blocks name.

use std::collections::HashSet;
use std::io::{Read, Write};

use crate::archive::{Archive, ArchiveData, ArchiveIo, ArchiveManifest, RootObject, RootObjectKind};
use crate::block::Block;
use crate::cursor::SliceCursor;
use crate::digest::LinkDigest;
use crate::error::{Error, Result};
use crate::link::{HistoryLinkMap, binary};

/// Magic bytes at the start of every blob.
pub const BLOB_VERSION: &[u8; 8] = b"BLOB0002";

/// Longest metadata string the u16 length field holds.
pub const MAX_METADATA_LEN: usize = u16::MAX as usize;

/// Blob encoder/decoder carrying the free-form metadata string stored in
/// the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobIo {
    metadata: String,
}

impl BlobIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(metadata: impl Into<String>) -> Result<Self> {
        let mut blob = Self::new();
        blob.set_metadata(metadata)?;
        Ok(blob)
    }

    /// Metadata written by the next `write_to`, or read by the last
    /// `read_from`.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: impl Into<String>) -> Result<()> {
        let metadata = metadata.into();
        if metadata.len() > MAX_METADATA_LEN {
            return Err(Error::invariant(format!(
                "blob metadata is {} bytes, at most {MAX_METADATA_LEN}",
                metadata.len()
            )));
        }
        self.metadata = metadata;
        Ok(())
    }

    /// Serialize an archive to `w`.
    pub fn write_to<W: Write>(
        &self,
        w: &mut W,
        links: &HistoryLinkMap,
        blocks: &[Block],
        root_objects: &[RootObject],
    ) -> Result<()> {
        let head = root_objects
            .iter()
            .find(|o| o.kind == RootObjectKind::ARCHIVE_MANIFEST)
            .map(|o| o.digest)
            .filter(|d| !d.is_null())
            .ok_or_else(|| Error::invariant("a blob needs a non-NULL ARCHIVE_MANIFEST root object"))?;

        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for digest in blocks.iter().flat_map(|b| b.iter()) {
            if seen.insert(*digest) {
                ordered.push(links.link(digest)?);
            }
        }
        for obj in root_objects.iter().filter(|o| !o.digest.is_null()) {
            if !seen.contains(&obj.digest) {
                return Err(Error::invariant(format!(
                    "{} root object {} is not in any block",
                    obj.kind, obj.digest
                )));
            }
        }

        w.write_all(BLOB_VERSION)?;
        w.write_all(head.as_bytes())?;
        w.write_all(&(self.metadata.len() as u16).to_be_bytes())?;
        w.write_all(self.metadata.as_bytes())?;
        for link in &ordered {
            binary::write(w, link)?;
        }
        w.flush()?;
        log::debug!("blob: wrote {} links, manifest {head}", ordered.len());
        Ok(())
    }

    /// Parse a blob, adding its links to `links`.
    pub fn read_from<R: Read>(&mut self, r: &mut R, links: &mut HistoryLinkMap) -> Result<ArchiveData> {
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)?;
        self.read_bytes(&bytes, links)
    }

    pub fn read_bytes(&mut self, bytes: &[u8], links: &mut HistoryLinkMap) -> Result<ArchiveData> {
        let mut cur = SliceCursor::new(bytes);
        let version = cur.array::<8>()?;
        if &version != BLOB_VERSION {
            return Err(Error::VersionMismatch {
                expected: BLOB_VERSION.to_vec(),
                found: version.to_vec(),
            });
        }
        let head = cur.read_digest()?;
        if head.is_null() {
            return Err(Error::corrupt("blob manifest head is NULL"));
        }
        let meta_len = usize::from(cur.read_u16()?);
        let metadata = std::str::from_utf8(cur.take(meta_len)?)
            .map_err(|e| Error::corrupt(format!("blob metadata is not UTF-8: {e}")))?
            .to_string();

        let mut read = HistoryLinkMap::new();
        let mut digests = HashSet::new();
        while let Some(link) = binary::read_link(&mut cur)? {
            if !digests.insert(link.digest()) {
                return Err(Error::corrupt(format!("link {} appears twice in blob", link.digest())));
            }
            read.add_link(link);
        }

        let manifest = ArchiveManifest::from_bytes(&Archive::read_file_from(head, &read)?, head)?;
        let expected = manifest.referenced_links();
        if let Some(extra) = digests.iter().find(|d| !expected.contains(d)) {
            return Err(Error::corrupt(format!("blob holds unreferenced link {extra}")));
        }
        if let Some(missing) = expected.iter().find(|d| !digests.contains(d)) {
            return Err(Error::LinkNotFound(*missing));
        }

        log::debug!("blob: read {} links, manifest {head}", digests.len());
        links.add_links(read.iter().cloned());
        self.metadata = metadata;
        Ok(manifest.into_data())
    }
}

/// Manifest chain head stored in a blob header, without parsing the links.
pub fn blob_manifest_head(bytes: &[u8]) -> Result<LinkDigest> {
    let mut cur = SliceCursor::new(bytes);
    let version = cur.array::<8>()?;
    if &version != BLOB_VERSION {
        return Err(Error::VersionMismatch {
            expected: BLOB_VERSION.to_vec(),
            found: version.to_vec(),
        });
    }
    cur.read_digest()
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Keeps the blob in memory.
#[derive(Debug, Clone, Default)]
pub struct ByteArrayIo {
    blob: BlobIo,
    bytes: Vec<u8>,
}

impl ByteArrayIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            blob: BlobIo::new(),
            bytes,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn blob(&self) -> &BlobIo {
        &self.blob
    }

    pub fn blob_mut(&mut self) -> &mut BlobIo {
        &mut self.blob
    }
}

impl ArchiveIo for ByteArrayIo {
    fn write(&mut self, links: &HistoryLinkMap, blocks: &[Block], root_objects: &[RootObject]) -> Result<()> {
        let mut out = Vec::new();
        self.blob.write_to(&mut out, links, blocks, root_objects)?;
        self.bytes = out;
        Ok(())
    }

    fn read(&mut self, links: &mut HistoryLinkMap) -> Result<ArchiveData> {
        let Self { blob, bytes } = self;
        blob.read_bytes(bytes, links)
    }
}

/// Keeps the blob in a file. Writes replace the file atomically.
#[cfg(feature = "file-io")]
#[derive(Debug, Clone)]
pub struct FileIo {
    blob: BlobIo,
    path: std::path::PathBuf,
}

#[cfg(feature = "file-io")]
impl FileIo {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            blob: BlobIo::new(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn blob(&self) -> &BlobIo {
        &self.blob
    }

    pub fn blob_mut(&mut self) -> &mut BlobIo {
        &mut self.blob
    }
}

#[cfg(feature = "file-io")]
impl ArchiveIo for FileIo {
    fn write(&mut self, links: &HistoryLinkMap, blocks: &[Block], root_objects: &[RootObject]) -> Result<()> {
        let mut out = Vec::new();
        self.blob.write_to(&mut out, links, blocks, root_objects)?;
        crate::io::write_atomically(&self.path, &out)
    }

    fn read(&mut self, links: &mut HistoryLinkMap) -> Result<ArchiveData> {
        let file = std::fs::File::open(&self.path)?;
        let mut reader = std::io::BufReader::new(file);
        self.blob.read_from(&mut reader, links)
    }
}
