// Archives: root objects plus blocks of history links, with the update,
// compression and self-validation logic that keeps them consistent.
//
// An archive's persistent state is its `ArchiveData` (block lists and root
// object pointers) and the links those lists name. Every change goes through
// an update cycle (`start_update` .. `commit_update`), which adds one new
// block at the front; `compress` later merges blocks and drops links that no
// root object can reach.

pub mod audit;
pub mod file_manifest;
pub mod manifest;
pub mod partition;
pub mod refs;

use std::collections::HashSet;
use std::fmt;

use crate::block::Block;
use crate::config::ArchiveConfig;
use crate::delta::DeltaCoder;
use crate::digest::LinkDigest;
use crate::error::{Error, Result};
use crate::link::{HistoryLink, HistoryLinkMap, LinkSource};

pub use file_manifest::{Changes, FileManifest, FileTreeIo};
pub use manifest::ArchiveManifest;
pub use partition::Partition;
pub use refs::{ExternalRefs, Reference};

// ---------------------------------------------------------------------------
// Root objects
// ---------------------------------------------------------------------------

/// Tag naming what a root object points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootObjectKind(pub u32);

impl RootObjectKind {
    /// The archive's own manifest file.
    pub const ARCHIVE_MANIFEST: Self = Self(1);
    /// A [`FileManifest`] mapping names to file chains.
    pub const FILE_MANIFEST: Self = Self(2);
    /// A single file, for archives too small to need a file manifest.
    pub const SINGLE_FILE: Self = Self(3);
    /// [`ExternalRefs`] naming the archive versions this one was built on.
    pub const PARENT_REFERENCES: Self = Self(4);
    /// [`ExternalRefs`] naming versions whose history was folded in.
    pub const REBASE_REFERENCES: Self = Self(5);
}

impl fmt::Display for RootObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ARCHIVE_MANIFEST => f.write_str("ARCHIVE_MANIFEST"),
            Self::FILE_MANIFEST => f.write_str("FILE_MANIFEST"),
            Self::SINGLE_FILE => f.write_str("SINGLE_FILE"),
            Self::PARENT_REFERENCES => f.write_str("PARENT_REFERENCES"),
            Self::REBASE_REFERENCES => f.write_str("REBASE_REFERENCES"),
            Self(other) => write!(f, "kind {other}"),
        }
    }
}

/// A named pointer to a chain head. A NULL digest means "absent".
///
/// Ordered by kind, then digest, so equal sets always serialize the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootObject {
    pub kind: RootObjectKind,
    pub digest: LinkDigest,
}

impl RootObject {
    pub fn new(digest: LinkDigest, kind: RootObjectKind) -> Self {
        Self { kind, digest }
    }
}

/// The backend-independent content of one archive version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveData {
    pub blocks: Vec<Block>,
    pub root_objects: Vec<RootObject>,
}

impl ArchiveData {
    pub fn new(blocks: Vec<Block>, root_objects: Vec<RootObject>) -> Self {
        Self {
            blocks,
            root_objects,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend traits
// ---------------------------------------------------------------------------

/// Persistence backend for whole archives.
pub trait ArchiveIo {
    /// Persist the links named by `blocks` and `root_objects`, then the
    /// pointer that makes them reachable. The pointer is written last.
    fn write(&mut self, links: &HistoryLinkMap, blocks: &[Block], root_objects: &[RootObject]) -> Result<()>;

    /// Load links into `links` and return the archive's block and root lists.
    fn read(&mut self, links: &mut HistoryLinkMap) -> Result<ArchiveData>;
}

/// Turns an [`ExternalRefs`] entry into the archive it names.
pub trait ArchiveResolver {
    fn resolve(&mut self, reference: &Reference) -> Result<Archive>;
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

/// A loaded, editable archive.
pub struct Archive {
    blocks: Vec<Block>,
    root_objects: Vec<RootObject>,
    updates: Option<Block>,
    links: HistoryLinkMap,
    coder: DeltaCoder,
    config: ArchiveConfig,
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive {
    pub fn new() -> Self {
        Self::with_config(ArchiveConfig::default())
    }

    pub fn with_config(config: ArchiveConfig) -> Self {
        Self {
            blocks: Vec::new(),
            root_objects: Vec::new(),
            updates: None,
            links: HistoryLinkMap::new(),
            coder: DeltaCoder::new(),
            config,
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Copy of this archive sharing no mutable state.
    pub fn deep_copy(&self) -> Result<Archive> {
        if self.updates.is_some() {
            return Err(Error::invariant("can't copy an archive while updating"));
        }
        let mut copy = Archive::with_config(self.config);
        copy.blocks = self.blocks.clone();
        copy.root_objects = self.root_objects.clone();
        copy.links.add_links(self.links.iter().cloned());
        Ok(copy)
    }

    /// Drop all blocks and root objects. Links stay in the map.
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.root_objects.clear();
        self.updates = None;
    }

    pub fn data(&self) -> ArchiveData {
        ArchiveData::new(self.blocks.clone(), self.root_objects.clone())
    }

    pub fn set_from_data(&mut self, data: ArchiveData) {
        self.blocks = data.blocks;
        self.root_objects = data.root_objects;
        self.updates = None;
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn root_objects(&self) -> &[RootObject] {
        &self.root_objects
    }

    pub fn link_map(&self) -> &HistoryLinkMap {
        &self.links
    }

    pub fn link_map_mut(&mut self) -> &mut HistoryLinkMap {
        &mut self.links
    }

    pub fn is_updating(&self) -> bool {
        self.updates.is_some()
    }

    fn require_idle(&self, what: &str) -> Result<()> {
        if self.updates.is_some() {
            return Err(Error::invariant(format!("can't {what} while updating")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    /// Rebuild the version whose chain ends at `head`.
    pub fn read_file(&self, head: LinkDigest) -> Result<Vec<u8>> {
        let chain = self.links.chain(head, true)?;
        self.coder.apply_deltas(&chain)
    }

    /// Chain digests ending at `head`, newest first. Pass `stop_at_end =
    /// false` to follow history past the last full copy.
    pub fn chain(&self, head: LinkDigest, stop_at_end: bool) -> Result<Vec<LinkDigest>> {
        self.links.chain_digests(head, stop_at_end)
    }

    /// Number of links needed to rebuild `head`, or `None` if the chain is
    /// broken.
    pub fn chain_length(&self, head: LinkDigest) -> Option<usize> {
        self.links.chain(head, true).ok().map(|c| c.len())
    }

    /// Store a new version of a file, returning the new chain head.
    ///
    /// The version is stored as a patch against `prev` unless `prev`'s chain
    /// has reached the configured maximum length, in which case a full copy
    /// is stored that still names `prev` as its parent.
    pub fn put_file(&mut self, bytes: &[u8], prev: Option<LinkDigest>) -> Result<LinkDigest> {
        if self.updates.is_none() {
            return Err(Error::invariant("not updating; call start_update first"));
        }
        let prev = prev.filter(|d| !d.is_null());

        let old = match prev {
            Some(head) => {
                let chain = self.links.chain(head, true)?;
                if chain.len() < self.config.max_chain_length {
                    Some(self.coder.apply_deltas(&chain)?)
                } else {
                    log::debug!("archive: chain at {head} is full, storing a full copy");
                    None
                }
            }
            None => None,
        };

        let link = self.coder.make_delta(prev, old.as_deref(), bytes)?;
        let digest = link.digest();
        self.links.add_link(link);
        if let Some(updates) = self.updates.as_mut() {
            updates.append(digest);
        }
        Ok(digest)
    }

    /// Read one file out of a bare link source, without loading an archive.
    /// Used to bootstrap an archive from its manifest chain head.
    pub fn read_file_from(head: LinkDigest, source: &dyn LinkSource) -> Result<Vec<u8>> {
        if head.is_null() {
            return Err(Error::invariant("chain head is NULL"));
        }
        let mut chain: Vec<HistoryLink> = Vec::new();
        let mut next = Some(head);
        while let Some(digest) = next {
            if chain.iter().any(|l| l.digest() == digest) {
                return Err(Error::corrupt(format!("cycle in chain at {digest}")));
            }
            let link = source.read_link(digest)?;
            if link.digest() != digest {
                return Err(Error::DigestMismatch {
                    expected: digest,
                    actual: link.digest(),
                });
            }
            next = if link.is_end() { None } else { link.parent() };
            chain.push(link);
        }
        DeltaCoder::new().apply_deltas(&chain)
    }

    // -----------------------------------------------------------------------
    // Update cycle
    // -----------------------------------------------------------------------

    pub fn start_update(&mut self) -> Result<()> {
        self.require_idle("start an update")?;
        self.updates = Some(Block::new());
        Ok(())
    }

    /// Forget the pending update block. Links already added to the map stay
    /// there but are unreferenced.
    pub fn abandon_update(&mut self) {
        self.updates = None;
    }

    /// Prepend the pending update as the newest block. Returns `false` if
    /// nothing was added.
    pub fn commit_update(&mut self) -> Result<bool> {
        let Some(updates) = self.updates.take() else {
            return Err(Error::invariant("not updating; call start_update first"));
        };
        if updates.is_empty() {
            return Ok(false);
        }
        log::debug!("archive: committing block of {} links", updates.len());
        self.blocks.insert(0, updates);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Root objects
    // -----------------------------------------------------------------------

    /// Point the root object of `kind` at `digest`, replacing any existing one.
    pub fn set_root_object(&mut self, digest: LinkDigest, kind: RootObjectKind) {
        match self.root_objects.iter_mut().find(|o| o.kind == kind) {
            Some(obj) => obj.digest = digest,
            None => self.root_objects.push(RootObject::new(digest, kind)),
        }
        self.root_objects.sort();
    }

    pub fn unset_root_object(&mut self, kind: RootObjectKind) {
        self.root_objects.retain(|o| o.kind != kind);
    }

    /// Digest of the root object of `kind`, if set and not NULL.
    pub fn root_object(&self, kind: RootObjectKind) -> Option<LinkDigest> {
        self.root_objects
            .iter()
            .find(|o| o.kind == kind)
            .map(|o| o.digest)
            .filter(|d| !d.is_null())
    }

    /// Store a new version of the root object of `kind`.
    pub fn update_root_object(&mut self, bytes: &[u8], kind: RootObjectKind) -> Result<LinkDigest> {
        let digest = self.put_file(bytes, self.root_object(kind))?;
        self.set_root_object(digest, kind);
        Ok(digest)
    }

    // -----------------------------------------------------------------------
    // Link sets
    // -----------------------------------------------------------------------

    /// Add every link named by a block to `all`.
    pub fn add_all_links(&self, all: &mut HashSet<LinkDigest>) -> Result<()> {
        for block in &self.blocks {
            all.extend(block.iter().copied());
        }
        if all.contains(&LinkDigest::NULL) {
            return Err(Error::invariant("NULL digest in block list"));
        }
        for obj in &self.root_objects {
            if !obj.digest.is_null() && !all.contains(&obj.digest) {
                return Err(Error::invariant(format!(
                    "{} root object {} is not in any block",
                    obj.kind, obj.digest
                )));
            }
        }
        Ok(())
    }

    /// Every link named by a block.
    pub fn all_links(&self) -> Result<HashSet<LinkDigest>> {
        let mut all = HashSet::new();
        self.add_all_links(&mut all)?;
        Ok(all)
    }

    /// Links reachable from root objects: each root's own chain plus the
    /// chains of every file listed in a file manifest.
    pub fn referenced_links(&self) -> Result<HashSet<LinkDigest>> {
        let mut links = HashSet::new();
        for obj in &self.root_objects {
            if obj.digest.is_null() {
                continue;
            }
            links.extend(self.chain(obj.digest, true)?);
            if obj.kind == RootObjectKind::FILE_MANIFEST {
                let manifest = FileManifest::from_bytes(&self.read_file(obj.digest)?)?;
                links.extend(manifest.referenced_links(&self.links)?);
            }
        }
        Ok(links)
    }

    // -----------------------------------------------------------------------
    // Compression
    // -----------------------------------------------------------------------

    /// Merge blocks down to at most `max_blocks`, dropping unreferenced
    /// links from merged blocks. Returns `false` if nothing changed.
    pub fn compress(&mut self, max_blocks: usize) -> Result<bool> {
        self.require_idle("compress")?;

        let referenced = self.referenced_links()?;
        let mut uncompressed = Vec::with_capacity(self.blocks.len());
        for (index, block) in self.blocks.iter().enumerate() {
            let survivors = block.iter().filter(|d| referenced.contains(d));
            uncompressed.push(Partition::new(index, index, self.links.rep_len(survivors)?));
        }

        let compressed = partition::compress(&uncompressed, max_blocks, self.config.repartition_multiple)?;
        if compressed.len() == uncompressed.len() {
            return Ok(false);
        }
        log::debug!(
            "archive: compressed {} blocks into {}",
            uncompressed.len(),
            compressed.len()
        );
        self.blocks = merge_blocks(&self.blocks, &compressed, referenced);
        Ok(true)
    }

    /// Compress if over the block limit, then store a new version of the
    /// archive manifest and point the ARCHIVE_MANIFEST root object at it.
    ///
    /// The new manifest head becomes the first link of the first block.
    pub fn compress_and_update_archive_manifest(&mut self) -> Result<()> {
        let max_blocks = self.config.max_blocks;
        self.compress_and_update_archive_manifest_with(max_blocks)
    }

    pub fn compress_and_update_archive_manifest_with(&mut self, max_blocks: usize) -> Result<()> {
        self.require_idle("update the archive manifest")?;

        if self.blocks.len() > max_blocks {
            self.compress(max_blocks)?;
        }

        // The manifest is serialized with a NULL ARCHIVE_MANIFEST root and a
        // NULL placeholder for its own head; reading fixes both up.
        let previous = self.root_object(RootObjectKind::ARCHIVE_MANIFEST);
        self.set_root_object(LinkDigest::NULL, RootObjectKind::ARCHIVE_MANIFEST);
        let added_block = self.blocks.is_empty();
        if added_block {
            self.blocks.push(Block::new());
        }

        let stored = ArchiveManifest::new(self.root_objects.clone(), self.blocks.clone())
            .to_bytes()
            .and_then(|bytes| {
                self.updates = Some(Block::new());
                let head = self.put_file(&bytes, previous);
                self.updates = None;
                head
            });

        match stored {
            Ok(head) => {
                if let Some(first) = self.blocks.first_mut() {
                    first.prepend(head);
                }
                self.set_root_object(head, RootObjectKind::ARCHIVE_MANIFEST);
            }
            Err(e) => {
                match previous {
                    Some(d) => self.set_root_object(d, RootObjectKind::ARCHIVE_MANIFEST),
                    None => self.unset_root_object(RootObjectKind::ARCHIVE_MANIFEST),
                }
                if added_block {
                    self.blocks.pop();
                }
                return Err(e);
            }
        }

        self.assert_archive_manifest_is_valid("updating the archive manifest produced an invalid manifest")
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// True if the ARCHIVE_MANIFEST root object decodes to exactly this
    /// archive's data. False if there is no manifest.
    pub fn has_valid_archive_manifest(&self) -> Result<bool> {
        self.require_idle("validate the archive manifest")?;
        let Some(head) = self.root_object(RootObjectKind::ARCHIVE_MANIFEST) else {
            return Ok(false);
        };
        let manifest = ArchiveManifest::from_bytes(&self.read_file(head)?, head)?;
        Ok(manifest.into_data() == self.data())
    }

    /// Fail with an invariant error if a manifest is present but invalid.
    pub fn assert_archive_manifest_is_valid(&self, msg: &str) -> Result<()> {
        if self.root_object(RootObjectKind::ARCHIVE_MANIFEST).is_some() && !self.has_valid_archive_manifest()? {
            return Err(Error::invariant(msg.to_string()));
        }
        Ok(())
    }

    /// Every root is in a block and every block digest is in the link map.
    fn validate_links(&self) -> Result<()> {
        for digest in self.all_links()? {
            if !self.links.contains(&digest) {
                return Err(Error::LinkNotFound(digest));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Replace this archive's data with what `source` holds.
    pub fn read(&mut self, source: &mut dyn ArchiveIo) -> Result<()> {
        self.require_idle("read")?;
        let data = source.read(&mut self.links)?;
        self.set_from_data(data);
        Ok(())
    }

    /// Validate, then hand everything to `sink`.
    pub fn write(&self, sink: &mut dyn ArchiveIo) -> Result<()> {
        self.require_idle("write")?;
        self.assert_archive_manifest_is_valid("refusing to write an archive with an invalid ARCHIVE_MANIFEST")?;
        self.validate_links()?;
        sink.write(&self.links, &self.blocks, &self.root_objects)
    }

    /// Read an archive and check its manifest.
    pub fn load(source: &mut dyn ArchiveIo) -> Result<Archive> {
        Self::load_with(source, ArchiveConfig::default(), false)
    }

    pub fn load_with(source: &mut dyn ArchiveIo, config: ArchiveConfig, skip_validation: bool) -> Result<Archive> {
        let mut archive = Archive::with_config(config);
        archive.read(source)?;
        if !skip_validation
            && archive.root_object(RootObjectKind::ARCHIVE_MANIFEST).is_some()
            && !archive.has_valid_archive_manifest()?
        {
            return Err(Error::InvalidManifest(
                "ARCHIVE_MANIFEST does not match the data read".into(),
            ));
        }
        Ok(archive)
    }

    /// The archives named by the PARENT_REFERENCES root object.
    pub fn parent_archives(&self, resolver: &mut dyn ArchiveResolver) -> Result<Vec<Archive>> {
        let Some(digest) = self.root_object(RootObjectKind::PARENT_REFERENCES) else {
            return Ok(Vec::new());
        };
        let refs = ExternalRefs::from_bytes(&self.read_file(digest)?)?;
        refs.refs().iter().map(|r| resolver.resolve(r)).collect()
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    fn skipped(&self, skip_unreferenced: bool) -> Result<HashSet<LinkDigest>> {
        if !skip_unreferenced {
            return Ok(HashSet::new());
        }
        let referenced = self.referenced_links()?;
        Ok(self.all_links()?.into_iter().filter(|d| !referenced.contains(d)).collect())
    }

    /// Total stored size of all (or only referenced) links.
    pub fn size_in_bytes(&self, skip_unreferenced: bool) -> Result<u64> {
        if skip_unreferenced {
            return self.links.rep_len(&self.referenced_links()?);
        }
        self.links.rep_len(&self.all_links()?)
    }

    /// Distinct link count per block.
    pub fn block_link_counts(&self, skip_unreferenced: bool) -> Result<Vec<usize>> {
        let skip = self.skipped(skip_unreferenced)?;
        Ok(self
            .blocks
            .iter()
            .map(|b| b.iter().filter(|d| !skip.contains(d)).collect::<HashSet<_>>().len())
            .collect())
    }

    /// Stored size per block.
    pub fn block_lengths(&self, skip_unreferenced: bool) -> Result<Vec<u64>> {
        let skip = self.skipped(skip_unreferenced)?;
        self.blocks
            .iter()
            .map(|b| {
                let distinct: HashSet<_> = b.iter().filter(|d| !skip.contains(d)).collect();
                self.links.rep_len(distinct)
            })
            .collect()
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("root_objects", &self.root_objects)
            .field("blocks", &self.blocks.iter().map(Block::len).collect::<Vec<_>>())
            .field("links", &self.links.len())
            .field("updating", &self.updates.is_some())
            .finish()
    }
}

/// Build the merged block list. Single-block partitions are kept as they
/// are; merged partitions keep only `survivors`, each digest once.
fn merge_blocks(blocks: &[Block], partitions: &[Partition], mut survivors: HashSet<LinkDigest>) -> Vec<Block> {
    let mut merged = Vec::with_capacity(partitions.len());
    for p in partitions {
        if p.start == p.end {
            merged.push(blocks[p.start].clone());
            continue;
        }
        let block = blocks[p.start..=p.end]
            .iter()
            .flat_map(|b| b.iter().copied())
            .filter(|d| survivors.remove(d))
            .collect();
        merged.push(block);
    }
    merged
}

/// Run every root object parser over `data`. Each must fail cleanly on
/// garbage.
#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_root_objects(data: &[u8]) {
    let _ = ArchiveManifest::from_bytes(data, LinkDigest::of(data));
    let _ = FileManifest::from_bytes(data);
    let _ = ExternalRefs::from_bytes(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn text(n: usize) -> Vec<u8> {
        (0..n).map(|i| format!("line {i}\n")).collect::<String>().into_bytes()
    }

    #[test]
    fn put_and_read_file() {
        let mut a = Archive::new();
        a.start_update().unwrap();
        let h1 = a.put_file(&text(10), None).unwrap();
        let h2 = a.put_file(&text(12), Some(h1)).unwrap();
        assert!(a.commit_update().unwrap());
        assert_eq!(a.read_file(h1).unwrap(), text(10));
        assert_eq!(a.read_file(h2).unwrap(), text(12));
        assert_eq!(a.chain(h2, true).unwrap(), vec![h2, h1]);
        assert_eq!(a.blocks().len(), 1);
        assert_eq!(a.blocks()[0].digests(), &[h1, h2]);
    }

    #[test]
    fn put_requires_update() {
        let mut a = Archive::new();
        let err = a.put_file(b"x", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);
        a.start_update().unwrap();
        assert!(a.start_update().is_err());
        assert!(!a.commit_update().unwrap());
        assert!(a.blocks().is_empty());
    }

    #[test]
    fn chain_is_truncated_at_max_length() {
        let mut a = Archive::with_config(ArchiveConfig {
            max_chain_length: 3,
            ..ArchiveConfig::default()
        });
        a.start_update().unwrap();
        let mut head = None;
        let mut heads = Vec::new();
        for i in 0..7 {
            let h = a.put_file(&text(i + 1), head).unwrap();
            heads.push(h);
            head = Some(h);
        }
        a.commit_update().unwrap();
        for (i, h) in heads.iter().enumerate() {
            assert!(a.chain_length(*h).unwrap() <= 3);
            assert_eq!(a.read_file(*h).unwrap(), text(i + 1));
        }
        // Full history is still reachable through the kept parents.
        assert_eq!(a.chain(heads[6], false).unwrap().len(), 7);
    }

    #[test]
    fn root_objects_sorted_and_replaced() {
        let mut a = Archive::new();
        let d1 = LinkDigest::of(b"1");
        let d2 = LinkDigest::of(b"2");
        a.set_root_object(d1, RootObjectKind::PARENT_REFERENCES);
        a.set_root_object(d2, RootObjectKind::FILE_MANIFEST);
        assert_eq!(a.root_objects()[0].kind, RootObjectKind::FILE_MANIFEST);
        a.set_root_object(d1, RootObjectKind::FILE_MANIFEST);
        assert_eq!(a.root_objects().len(), 2);
        assert_eq!(a.root_object(RootObjectKind::FILE_MANIFEST), Some(d1));
        a.unset_root_object(RootObjectKind::FILE_MANIFEST);
        assert_eq!(a.root_object(RootObjectKind::FILE_MANIFEST), None);
        a.set_root_object(LinkDigest::NULL, RootObjectKind::SINGLE_FILE);
        assert_eq!(a.root_object(RootObjectKind::SINGLE_FILE), None);
    }

    #[test]
    fn manifest_update_is_self_consistent() {
        let mut a = Archive::new();
        a.start_update().unwrap();
        a.update_root_object(b"single file\n", RootObjectKind::SINGLE_FILE)
            .unwrap();
        a.commit_update().unwrap();
        a.compress_and_update_archive_manifest().unwrap();
        assert!(a.has_valid_archive_manifest().unwrap());
        let head = a.root_object(RootObjectKind::ARCHIVE_MANIFEST).unwrap();
        assert_eq!(a.blocks()[0].first(), Some(head));

        // A second round deltas the manifest against its previous version.
        a.start_update().unwrap();
        a.update_root_object(b"single file v2\n", RootObjectKind::SINGLE_FILE)
            .unwrap();
        a.commit_update().unwrap();
        a.compress_and_update_archive_manifest().unwrap();
        let head2 = a.root_object(RootObjectKind::ARCHIVE_MANIFEST).unwrap();
        assert_eq!(a.chain(head2, true).unwrap(), vec![head2, head]);
        assert!(a.has_valid_archive_manifest().unwrap());
    }

    #[test]
    fn manifest_on_empty_archive() {
        let mut a = Archive::new();
        a.compress_and_update_archive_manifest().unwrap();
        assert_eq!(a.blocks().len(), 1);
        assert!(a.has_valid_archive_manifest().unwrap());
    }

    #[test]
    fn tampered_data_fails_validation() {
        let mut a = Archive::new();
        a.start_update().unwrap();
        a.update_root_object(b"x", RootObjectKind::SINGLE_FILE).unwrap();
        a.commit_update().unwrap();
        a.compress_and_update_archive_manifest().unwrap();

        let mut data = a.data();
        data.blocks[0].append(LinkDigest::of(b"bogus"));
        a.set_from_data(data);
        assert!(!a.has_valid_archive_manifest().unwrap());
        assert!(a.assert_archive_manifest_is_valid("bad").is_err());
    }

    #[test]
    fn compress_merges_and_drops_unreferenced() {
        let mut a = Archive::new();
        let mut head = None;
        for i in 0..8 {
            a.start_update().unwrap();
            // An unreferenced scratch version in every block.
            a.put_file(format!("scratch {i}\n").as_bytes(), None).unwrap();
            let h = a.put_file(&text(20 + i), head).unwrap();
            a.set_root_object(h, RootObjectKind::SINGLE_FILE);
            head = Some(h);
            a.commit_update().unwrap();
        }
        assert_eq!(a.blocks().len(), 8);
        let before = a.all_links().unwrap().len();
        assert!(a.compress(4).unwrap());
        assert!(a.blocks().len() <= 4);
        assert!(a.all_links().unwrap().len() < before);
        let h = a.root_object(RootObjectKind::SINGLE_FILE).unwrap();
        assert_eq!(a.read_file(h).unwrap(), text(27));
        for d in a.referenced_links().unwrap() {
            assert!(a.all_links().unwrap().contains(&d));
        }
    }

    #[test]
    fn root_outside_blocks_is_invariant_error() {
        let mut a = Archive::new();
        a.set_root_object(LinkDigest::of(b"nowhere"), RootObjectKind::SINGLE_FILE);
        assert_eq!(a.all_links().unwrap_err().kind(), ErrorKind::Invariant);
    }

    #[test]
    fn read_file_from_bare_source() {
        let mut a = Archive::new();
        a.start_update().unwrap();
        let h1 = a.put_file(b"v1\n", None).unwrap();
        let h2 = a.put_file(b"v1\nv2\n", Some(h1)).unwrap();
        a.commit_update().unwrap();
        let bytes = Archive::read_file_from(h2, a.link_map()).unwrap();
        assert_eq!(bytes, b"v1\nv2\n");
        assert!(Archive::read_file_from(LinkDigest::of(b"?"), a.link_map()).is_err());
    }

    #[test]
    fn deep_copy_is_independent() {
        let mut a = Archive::new();
        a.start_update().unwrap();
        let h = a.put_file(b"x\n", None).unwrap();
        a.commit_update().unwrap();
        let mut b = a.deep_copy().unwrap();
        b.reset();
        assert_eq!(a.blocks().len(), 1);
        assert_eq!(b.read_file(h).unwrap(), b"x\n");
    }

    #[test]
    fn stats() {
        let mut a = Archive::new();
        a.start_update().unwrap();
        let h = a.put_file(&text(5), None).unwrap();
        a.put_file(b"orphan\n", None).unwrap();
        a.set_root_object(h, RootObjectKind::SINGLE_FILE);
        a.commit_update().unwrap();
        let all = a.size_in_bytes(false).unwrap();
        let referenced = a.size_in_bytes(true).unwrap();
        assert!(referenced < all);
        assert_eq!(a.block_link_counts(false).unwrap(), vec![2]);
        assert_eq!(a.block_link_counts(true).unwrap(), vec![1]);
        assert_eq!(a.block_lengths(false).unwrap(), vec![all]);
    }

    #[test]
    fn root_object_parsers_survive_garbage() {
        let mut a = Archive::new();
        a.compress_and_update_archive_manifest().unwrap();
        let head = a.root_object(RootObjectKind::ARCHIVE_MANIFEST).unwrap();
        let manifest = a.read_file(head).unwrap();
        for cut in 0..manifest.len() {
            fuzz_try_parse_root_objects(&manifest[..cut]);
        }
        fuzz_try_parse_root_objects(&[0xff; 64]);
    }
}
