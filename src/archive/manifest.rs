// Binary form of the ARCHIVE_MANIFEST root object.
//
// The manifest describes the archive it is stored in, so it can't contain
// its own chain head. Both places where that head belongs (the
// ARCHIVE_MANIFEST root and the first digest of the first block) are written
// as NULL and filled in from the chain head when read back.

use std::collections::HashSet;

use crate::archive::{ArchiveData, RootObject, RootObjectKind};
use crate::block::Block;
use crate::cursor::SliceCursor;
use crate::digest::LinkDigest;
use crate::error::{Error, Result};

/// Root object and block lists, as stored in the manifest file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveManifest {
    root_objects: Vec<RootObject>,
    blocks: Vec<Block>,
}

impl ArchiveManifest {
    pub const VERSION: u64 = 1;

    /// Largest root object or block count the one-byte count fields hold.
    pub const MAX_COUNT: usize = 127;

    pub fn new(root_objects: Vec<RootObject>, blocks: Vec<Block>) -> Self {
        Self {
            root_objects,
            blocks,
        }
    }

    pub fn root_objects(&self) -> &[RootObject] {
        &self.root_objects
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_data(self) -> ArchiveData {
        ArchiveData::new(self.blocks, self.root_objects)
    }

    /// Every digest listed in a block.
    pub fn referenced_links(&self) -> HashSet<LinkDigest> {
        self.blocks.iter().flat_map(|b| b.iter().copied()).collect()
    }

    fn manifest_root(&self) -> Result<LinkDigest> {
        let mut found = self
            .root_objects
            .iter()
            .filter(|o| o.kind == RootObjectKind::ARCHIVE_MANIFEST);
        match (found.next(), found.next()) {
            (Some(obj), None) => Ok(obj.digest),
            (None, _) => Err(Error::invariant("manifest has no ARCHIVE_MANIFEST root object")),
            (Some(_), Some(_)) => Err(Error::invariant("manifest has more than one ARCHIVE_MANIFEST root object")),
        }
    }

    /// Serialize.
    ///
    /// If the ARCHIVE_MANIFEST root is NULL the manifest head is not in the
    /// block list yet and a placeholder is inserted at the front of the first
    /// block. Otherwise the first digest of the first block must be that head.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.blocks.is_empty() {
            return Err(Error::invariant("manifest needs at least one block"));
        }
        if self.root_objects.len() > Self::MAX_COUNT || self.blocks.len() > Self::MAX_COUNT {
            return Err(Error::invariant(format!(
                "manifest too large: {} root objects, {} blocks",
                self.root_objects.len(),
                self.blocks.len()
            )));
        }
        let head = self.manifest_root()?;
        let placeholder = head.is_null();
        if !placeholder && self.blocks[0].first() != Some(head) {
            return Err(Error::invariant(
                "ARCHIVE_MANIFEST root must be the first digest of the first block",
            ));
        }

        let link_count: usize = self.blocks.iter().map(Block::len).sum();
        let mut out = Vec::with_capacity(8 + 2 + 24 * self.root_objects.len() + 4 * self.blocks.len() + 20 * (link_count + 1));
        out.extend_from_slice(&Self::VERSION.to_be_bytes());

        out.push(self.root_objects.len() as u8);
        for obj in &self.root_objects {
            let digest = if obj.kind == RootObjectKind::ARCHIVE_MANIFEST {
                LinkDigest::NULL
            } else {
                obj.digest
            };
            out.extend_from_slice(digest.as_bytes());
            out.extend_from_slice(&obj.kind.0.to_be_bytes());
        }

        out.push(self.blocks.len() as u8);
        for (index, block) in self.blocks.iter().enumerate() {
            let count = if index == 0 && placeholder { block.len() + 1 } else { block.len() };
            let count = u32::try_from(count)
                .ok()
                .filter(|&c| c <= i32::MAX as u32)
                .ok_or(Error::OffsetOverflow(count))?;
            out.extend_from_slice(&count.to_be_bytes());
        }

        out.extend_from_slice(LinkDigest::NULL.as_bytes());
        let skip = usize::from(!placeholder);
        for digest in self.blocks.iter().flat_map(|b| b.iter()).skip(skip) {
            out.extend_from_slice(digest.as_bytes());
        }
        Ok(out)
    }

    /// Parse a manifest stored at `chain_head`, filling in the NULL
    /// placeholders with it.
    pub fn from_bytes(bytes: &[u8], chain_head: LinkDigest) -> Result<Self> {
        if chain_head.is_null() {
            return Err(Error::invariant("manifest chain head is NULL"));
        }
        let mut cur = SliceCursor::new(bytes);

        let version = cur.read_u64()?;
        if version != Self::VERSION {
            return Err(Error::VersionMismatch {
                expected: Self::VERSION.to_be_bytes().to_vec(),
                found: version.to_be_bytes().to_vec(),
            });
        }

        let root_count = read_count(&mut cur, "root object")?;
        let mut root_objects = Vec::with_capacity(root_count);
        for _ in 0..root_count {
            let mut digest = cur.read_digest()?;
            let kind = RootObjectKind(cur.read_u32()?);
            if kind == RootObjectKind::ARCHIVE_MANIFEST {
                if !digest.is_null() {
                    return Err(Error::corrupt("stored ARCHIVE_MANIFEST root is not NULL"));
                }
                digest = chain_head;
            }
            root_objects.push(RootObject::new(digest, kind));
        }

        let block_count = read_count(&mut cur, "block")?;
        let mut counts = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let count = cur.read_u32()?;
            if count > i32::MAX as u32 {
                return Err(Error::corrupt(format!("negative block link count {count}")));
            }
            counts.push(count as usize);
        }

        let mut blocks = Vec::with_capacity(block_count);
        for (index, count) in counts.into_iter().enumerate() {
            // Reject counts the remaining bytes can't hold before allocating.
            if count.saturating_mul(20) > cur.remaining() {
                return Err(Error::corrupt(format!("block {index} claims {count} links, data too short")));
            }
            let mut block = Vec::with_capacity(count);
            for _ in 0..count {
                block.push(cur.read_digest()?);
            }
            blocks.push(Block::from(block));
        }

        match blocks.first().and_then(Block::first) {
            Some(first) if first.is_null() => {
                let fixed: Block = std::iter::once(chain_head)
                    .chain(blocks[0].iter().skip(1).copied())
                    .collect();
                blocks[0] = fixed;
            }
            Some(_) => return Err(Error::corrupt("manifest placeholder digest is not NULL")),
            None => return Err(Error::corrupt("manifest has no placeholder digest")),
        }

        if !cur.is_empty() {
            return Err(Error::corrupt(format!("{} trailing bytes after manifest", cur.remaining())));
        }
        Ok(Self::new(root_objects, blocks))
    }
}

fn read_count(cur: &mut SliceCursor<'_, u8>, what: &str) -> Result<usize> {
    let count = cur.read_u8()?;
    if usize::from(count) > ArchiveManifest::MAX_COUNT {
        return Err(Error::corrupt(format!("{what} count {count} out of range")));
    }
    Ok(usize::from(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn d(s: &str) -> LinkDigest {
        LinkDigest::of(s.as_bytes())
    }

    fn pending() -> ArchiveManifest {
        ArchiveManifest::new(
            vec![
                RootObject::new(LinkDigest::NULL, RootObjectKind::ARCHIVE_MANIFEST),
                RootObject::new(d("fm"), RootObjectKind::FILE_MANIFEST),
            ],
            vec![Block::from(vec![d("fm"), d("a")]), Block::from(vec![d("b")])],
        )
    }

    #[test]
    fn placeholder_is_fixed_up() {
        let bytes = pending().to_bytes().unwrap();
        let head = d("manifest head");
        let read = ArchiveManifest::from_bytes(&bytes, head).unwrap();
        assert_eq!(read.root_objects()[0], RootObject::new(head, RootObjectKind::ARCHIVE_MANIFEST));
        assert_eq!(read.root_objects()[1], RootObject::new(d("fm"), RootObjectKind::FILE_MANIFEST));
        assert_eq!(read.blocks()[0].digests(), &[head, d("fm"), d("a")]);
        assert_eq!(read.blocks()[1].digests(), &[d("b")]);
    }

    #[test]
    fn reserialize_after_fixup_is_stable() {
        let bytes = pending().to_bytes().unwrap();
        let head = d("manifest head");
        let read = ArchiveManifest::from_bytes(&bytes, head).unwrap();
        assert_eq!(read.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn layout() {
        let bytes = pending().to_bytes().unwrap();
        assert_eq!(&bytes[..8], &1u64.to_be_bytes());
        assert_eq!(bytes[8], 2);
        // Two roots of 24 bytes, block count, two u32 counts, 4 digests.
        assert_eq!(bytes.len(), 8 + 1 + 48 + 1 + 8 + 4 * 20);
        assert_eq!(&bytes[58..62], &3u32.to_be_bytes());
    }

    #[test]
    fn write_rejects_bad_input() {
        let no_blocks = ArchiveManifest::new(
            vec![RootObject::new(LinkDigest::NULL, RootObjectKind::ARCHIVE_MANIFEST)],
            vec![],
        );
        assert_eq!(no_blocks.to_bytes().unwrap_err().kind(), ErrorKind::Invariant);

        let no_root = ArchiveManifest::new(vec![], vec![Block::new()]);
        assert!(no_root.to_bytes().is_err());

        let misplaced = ArchiveManifest::new(
            vec![RootObject::new(d("x"), RootObjectKind::ARCHIVE_MANIFEST)],
            vec![Block::from(vec![d("y"), d("x")])],
        );
        assert!(misplaced.to_bytes().is_err());
    }

    #[test]
    fn read_rejects_corruption() {
        let bytes = pending().to_bytes().unwrap();
        let head = d("h");

        let mut bad_version = bytes.clone();
        bad_version[7] = 2;
        assert!(matches!(
            ArchiveManifest::from_bytes(&bad_version, head),
            Err(Error::VersionMismatch { .. })
        ));

        let truncated = &bytes[..bytes.len() - 1];
        assert_eq!(
            ArchiveManifest::from_bytes(truncated, head).unwrap_err().kind(),
            ErrorKind::CorruptData
        );

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(ArchiveManifest::from_bytes(&trailing, head).is_err());

        let mut no_placeholder = bytes;
        no_placeholder[66] = 1;
        assert!(ArchiveManifest::from_bytes(&no_placeholder, head).is_err());
    }
}
