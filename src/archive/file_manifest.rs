// Named files stored in an archive (the FILE_MANIFEST root object).
//
// Two maps: name -> file digest (SHA-1 of the file's bytes) and file digest
// -> chain head. Files with equal content share one chain no matter how many
// names point at them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::archive::{Archive, RootObjectKind};
use crate::cursor::SliceCursor;
use crate::digest::{DIGEST_LEN, LinkDigest};
use crate::error::{Error, Result};
use crate::link::HistoryLinkMap;

/// Entry header: u16 total length plus two digests.
const HEADER_LEN: usize = 2 + 2 * DIGEST_LEN;

/// Largest entry length the signed 16-bit length field holds.
const MAX_ENTRY_LEN: usize = i16::MAX as usize;

/// A file tree the manifest can be synced with.
///
/// Names are `/` separated relative paths. How they map onto directories is
/// up to the implementation.
pub trait FileTreeIo {
    /// Every file and its digest. `LinkDigest::NULL` means "not hashed yet";
    /// the caller reads the file and hashes it.
    fn files(&mut self) -> Result<BTreeMap<String, LinkDigest>>;

    fn read_file(&mut self, name: &str) -> Result<Vec<u8>>;

    fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<()>;

    fn delete_file(&mut self, name: &str) -> Result<()>;

    /// Called before a sync with the names that will exist afterwards.
    fn start_sync(&mut self, _all_files: &BTreeSet<String>) -> Result<()> {
        Ok(())
    }

    /// Called after a sync with the names that now exist.
    fn end_sync(&mut self, _all_files: &BTreeSet<String>) -> Result<()> {
        Ok(())
    }
}

/// The edits that turn one name -> digest map into another.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Changes {
    pub deleted: BTreeSet<String>,
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub unmodified: BTreeSet<String>,
}

impl Changes {
    pub fn is_unmodified(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty() && self.modified.is_empty()
    }
}

/// Name -> file -> chain head index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileManifest {
    names: BTreeMap<String, LinkDigest>,
    heads: HashMap<LinkDigest, LinkDigest>,
}

impl FileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the archive's FILE_MANIFEST, or an empty manifest if it has none.
    pub fn from_archive(archive: &Archive) -> Result<Self> {
        match archive.root_object(RootObjectKind::FILE_MANIFEST) {
            Some(head) => Self::from_bytes(&archive.read_file(head)?),
            None => Ok(Self::new()),
        }
    }

    /// Store this manifest as a new version of the archive's FILE_MANIFEST.
    pub fn save(&mut self, archive: &mut Archive) -> Result<LinkDigest> {
        self.purge()?;
        archive.update_root_object(&self.to_bytes()?, RootObjectKind::FILE_MANIFEST)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn contains_digest(&self, file_digest: &LinkDigest) -> bool {
        self.heads.contains_key(file_digest)
    }

    pub fn file_digest(&self, name: &str) -> Result<LinkDigest> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("file not in archive: {name}")))
    }

    pub fn chain_head(&self, name: &str) -> Result<LinkDigest> {
        let file = self.file_digest(name)?;
        self.heads
            .get(&file)
            .copied()
            .ok_or_else(|| Error::corrupt(format!("no chain head for {name} ({file})")))
    }

    /// name -> file digest.
    pub fn files(&self) -> &BTreeMap<String, LinkDigest> {
        &self.names
    }

    pub fn all_files(&self) -> BTreeSet<String> {
        self.names.keys().cloned().collect()
    }

    /// May include orphans until [`purge`](Self::purge) is called.
    pub fn referenced_file_digests(&self) -> HashSet<LinkDigest> {
        self.heads.keys().copied().collect()
    }

    /// May include orphans until [`purge`](Self::purge) is called.
    pub fn referenced_chain_heads(&self) -> HashSet<LinkDigest> {
        self.heads.values().copied().collect()
    }

    pub fn read_file(&self, archive: &Archive, name: &str) -> Result<Vec<u8>> {
        archive.read_file(self.chain_head(name)?)
    }

    pub fn read_file_by_digest(&self, archive: &Archive, file_digest: &LinkDigest) -> Result<Vec<u8>> {
        let head = self
            .heads
            .get(file_digest)
            .ok_or_else(|| Error::NotFound(format!("file digest not in manifest: {file_digest}")))?;
        archive.read_file(*head)
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    /// Store `bytes` under `name`, as a new version of whatever `name`
    /// held before. Returns the file digest.
    pub fn put_file(&mut self, archive: &mut Archive, name: &str, bytes: &[u8]) -> Result<LinkDigest> {
        let prev = self.names.get(name).and_then(|f| self.heads.get(f)).copied();
        self.put_with_prev(archive, name, prev, bytes)
    }

    /// Store `bytes` under `name` as a new version of the file with digest
    /// `prev_file`. Used to fork or rename cheaply.
    pub fn put_file_from(
        &mut self,
        archive: &mut Archive,
        name: &str,
        prev_file: &LinkDigest,
        bytes: &[u8],
    ) -> Result<LinkDigest> {
        let prev = self.heads.get(prev_file).copied();
        self.put_with_prev(archive, name, prev, bytes)
    }

    fn put_with_prev(
        &mut self,
        archive: &mut Archive,
        name: &str,
        prev: Option<LinkDigest>,
        bytes: &[u8],
    ) -> Result<LinkDigest> {
        let file = LinkDigest::of(bytes);
        // Reuse the chain of an identical file stored under another name.
        if !self.heads.contains_key(&file) {
            let head = archive.put_file(bytes, prev)?;
            self.heads.insert(file, head);
        }
        self.names.insert(name.to_string(), file);
        Ok(file)
    }

    /// Forget `names`, then drop file entries nothing points at.
    pub fn remove_files<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut changed = false;
        for name in names {
            changed |= self.names.remove(name.as_ref()).is_some();
        }
        if changed {
            self.purge()?;
        }
        Ok(())
    }

    /// Point `to` at the same file as `from`, replacing what `to` held.
    pub fn copy(&mut self, from: &str, to: &str) -> Result<()> {
        let file = self.file_digest(from)?;
        self.names.insert(to.to_string(), file);
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let file = self.file_digest(from)?;
        self.names.remove(from);
        self.names.insert(to.to_string(), file);
        Ok(())
    }

    /// Drop file digest entries no name points at.
    pub fn purge(&mut self) -> Result<()> {
        if let Some(missing) = self.names.values().find(|f| !self.heads.contains_key(f)) {
            return Err(Error::invariant(format!("file digest {missing} has no chain head")));
        }
        let live: HashSet<LinkDigest> = self.names.values().copied().collect();
        self.heads.retain(|file, _| live.contains(file));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Entries sorted by name: `[u16 entry length][file digest][chain head][name]`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (name, file) in &self.names {
            let len = HEADER_LEN + name.len();
            if len > MAX_ENTRY_LEN {
                return Err(Error::invariant(format!("file name too long: {} bytes", name.len())));
            }
            let head = self
                .heads
                .get(file)
                .ok_or_else(|| Error::invariant(format!("file digest {file} has no chain head")))?;
            out.extend_from_slice(&(len as u16).to_be_bytes());
            out.extend_from_slice(file.as_bytes());
            out.extend_from_slice(head.as_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut manifest = Self::new();
        let mut cur = SliceCursor::new(bytes);
        while !cur.is_empty() {
            let len = usize::from(cur.read_u16()?);
            if !(HEADER_LEN..=MAX_ENTRY_LEN).contains(&len) {
                return Err(Error::corrupt(format!("file manifest entry length {len} out of range")));
            }
            let file = cur.read_digest()?;
            let head = cur.read_digest()?;
            let name = std::str::from_utf8(cur.take(len - HEADER_LEN)?)
                .map_err(|e| Error::corrupt(format!("file name is not UTF-8: {e}")))?;
            manifest.heads.insert(file, head);
            manifest.names.insert(name.to_string(), file);
        }
        Ok(manifest)
    }

    // -----------------------------------------------------------------------
    // Syncing with file trees
    // -----------------------------------------------------------------------

    /// Edits turning `old` into `new`.
    pub fn diff(old: &BTreeMap<String, LinkDigest>, new: &BTreeMap<String, LinkDigest>) -> Changes {
        let mut changes = Changes::default();
        for (name, digest) in old {
            match new.get(name) {
                None => {
                    changes.deleted.insert(name.clone());
                }
                Some(other) if other == digest => {
                    changes.unmodified.insert(name.clone());
                }
                Some(_) => {
                    changes.modified.insert(name.clone());
                }
            }
        }
        changes.added = new.keys().filter(|n| !old.contains_key(*n)).cloned().collect();
        changes
    }

    /// Edits turning this manifest into the contents of `newer`.
    pub fn diff_to(&self, newer: &mut dyn FileTreeIo) -> Result<Changes> {
        let mut files = newer.files()?;
        hash_missing(newer, &mut files)?;
        Ok(Self::diff(&self.names, &files))
    }

    /// Make this manifest match `source`, storing new versions in `archive`,
    /// which must be updating.
    pub fn update_from(&mut self, archive: &mut Archive, source: &mut dyn FileTreeIo) -> Result<Changes> {
        if !archive.is_updating() {
            return Err(Error::invariant("archive is not updating"));
        }
        let mut files = source.files()?;
        hash_missing(source, &mut files)?;
        let changes = Self::diff(&self.names, &files);
        if changes.is_unmodified() {
            return Ok(changes);
        }

        self.remove_files(&changes.deleted)?;
        for name in changes.added.iter().chain(&changes.modified) {
            let bytes = source.read_file(name)?;
            self.put_file(archive, name, &bytes)?;
        }
        log::debug!(
            "file manifest: update added {}, modified {}, deleted {}",
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len()
        );
        Ok(changes)
    }

    /// Make `sink` match this manifest, reading file contents from `archive`.
    pub fn sync_to(&self, archive: &Archive, sink: &mut dyn FileTreeIo) -> Result<Changes> {
        let wanted = self.all_files();
        sink.start_sync(&wanted)?;

        // Files about to be deleted are never hashed.
        let mut existing = sink.files()?;
        let deleted: BTreeSet<String> = existing
            .keys()
            .filter(|n| !self.names.contains_key(*n))
            .cloned()
            .collect();
        existing.retain(|name, _| !deleted.contains(name));
        hash_missing(sink, &mut existing)?;
        let mut changes = Self::diff(&existing, &self.names);
        changes.deleted = deleted;

        for name in &changes.deleted {
            sink.delete_file(name)?;
        }
        for name in changes.added.iter().chain(&changes.modified) {
            sink.write_file(name, &self.read_file(archive, name)?)?;
        }
        sink.end_sync(&wanted)?;
        Ok(changes)
    }

    /// Every link needed to rebuild every named file.
    pub fn referenced_links(&self, links: &HistoryLinkMap) -> Result<HashSet<LinkDigest>> {
        let mut out = HashSet::new();
        for file in self.names.values().collect::<HashSet<_>>() {
            let head = self
                .heads
                .get(file)
                .ok_or_else(|| Error::corrupt(format!("file digest {file} has no chain head")))?;
            out.extend(links.chain_digests(*head, true)?);
        }
        Ok(out)
    }

    /// Human readable listing with each file's chain.
    pub fn pretty(&self, archive: &Archive) -> String {
        let mut out = String::from("--- FileManifest ---\n");
        for (name, file) in &self.names {
            out.push_str(&format!("   {file} : [{name}]\n"));
            match self.chain_head(name).and_then(|h| archive.chain(h, true)) {
                Ok(chain) => {
                    for digest in chain {
                        out.push_str(&format!("      {digest}\n"));
                    }
                }
                Err(e) => out.push_str(&format!("      <{e}>\n")),
            }
        }
        out.push_str("---\n");
        out
    }
}

impl fmt::Display for Changes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deleted {:?}, added {:?}, modified {:?}, unmodified {}",
            self.deleted,
            self.added,
            self.modified,
            self.unmodified.len()
        )
    }
}

/// Replace NULL digests in `files` with hashes of the file contents.
fn hash_missing(io: &mut dyn FileTreeIo, files: &mut BTreeMap<String, LinkDigest>) -> Result<()> {
    for (name, digest) in files.iter_mut() {
        if digest.is_null() {
            *digest = LinkDigest::of(&io.read_file(name)?);
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory file tree for tests.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryTree {
        pub files: BTreeMap<String, Vec<u8>>,
        pub report_hashes: bool,
        pub syncs: usize,
    }

    impl FileTreeIo for MemoryTree {
        fn files(&mut self) -> Result<BTreeMap<String, LinkDigest>> {
            Ok(self
                .files
                .iter()
                .map(|(n, b)| {
                    let d = if self.report_hashes { LinkDigest::of(b) } else { LinkDigest::NULL };
                    (n.clone(), d)
                })
                .collect())
        }

        fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
            self.files
                .get(name)
                .cloned()
                .ok_or_else(|| Error::NotFound(name.to_string()))
        }

        fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
            self.files.insert(name.to_string(), bytes.to_vec());
            Ok(())
        }

        fn delete_file(&mut self, name: &str) -> Result<()> {
            self.files.remove(name);
            Ok(())
        }

        fn end_sync(&mut self, _all: &BTreeSet<String>) -> Result<()> {
            self.syncs += 1;
            Ok(())
        }
    }

    fn tree(entries: &[(&str, &str)]) -> MemoryTree {
        MemoryTree {
            files: entries
                .iter()
                .map(|(n, b)| (n.to_string(), b.as_bytes().to_vec()))
                .collect(),
            ..MemoryTree::default()
        }
    }

    #[test]
    fn identical_files_share_a_chain() {
        let mut archive = Archive::new();
        archive.start_update().unwrap();
        let mut fm = FileManifest::new();
        let a = fm.put_file(&mut archive, "a.txt", b"same\n").unwrap();
        let b = fm.put_file(&mut archive, "b.txt", b"same\n").unwrap();
        assert_eq!(a, b);
        assert_eq!(fm.chain_head("a.txt").unwrap(), fm.chain_head("b.txt").unwrap());
        assert_eq!(fm.referenced_chain_heads().len(), 1);
        assert_eq!(fm.read_file(&archive, "b.txt").unwrap(), b"same\n");
    }

    #[test]
    fn new_version_deltas_against_old() {
        let mut archive = Archive::new();
        archive.start_update().unwrap();
        let mut fm = FileManifest::new();
        fm.put_file(&mut archive, "f", b"one\n").unwrap();
        fm.put_file(&mut archive, "f", b"one\ntwo\n").unwrap();
        fm.purge().unwrap();
        let head = fm.chain_head("f").unwrap();
        assert_eq!(archive.chain(head, true).unwrap().len(), 2);
        assert_eq!(fm.referenced_file_digests().len(), 1);
    }

    #[test]
    fn copy_rename_remove() {
        let mut archive = Archive::new();
        archive.start_update().unwrap();
        let mut fm = FileManifest::new();
        fm.put_file(&mut archive, "a", b"x\n").unwrap();
        fm.copy("a", "b").unwrap();
        fm.rename("a", "c").unwrap();
        assert!(!fm.contains("a"));
        assert_eq!(fm.file_digest("b").unwrap(), fm.file_digest("c").unwrap());
        fm.remove_files(["b", "c"]).unwrap();
        assert!(fm.referenced_file_digests().is_empty());
        assert!(matches!(fm.file_digest("b"), Err(Error::NotFound(_))));
        assert!(fm.copy("nope", "x").is_err());
    }

    #[test]
    fn bytes_roundtrip_sorted() {
        let mut archive = Archive::new();
        archive.start_update().unwrap();
        let mut fm = FileManifest::new();
        fm.put_file(&mut archive, "zeta", b"z\n").unwrap();
        fm.put_file(&mut archive, "alpha", b"a\n").unwrap();
        let bytes = fm.to_bytes().unwrap();
        assert_eq!(&bytes[..2], &(42u16 + 5).to_be_bytes());
        assert_eq!(&bytes[42..47], b"alpha");
        assert_eq!(FileManifest::from_bytes(&bytes).unwrap(), fm);

        assert!(FileManifest::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(FileManifest::from_bytes(&[0, 10]).is_err());
    }

    #[test]
    fn diff_classifies_names() {
        let d = |s: &str| LinkDigest::of(s.as_bytes());
        let old: BTreeMap<_, _> = [("keep", d("1")), ("edit", d("2")), ("gone", d("3"))]
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        let new: BTreeMap<_, _> = [("keep", d("1")), ("edit", d("9")), ("new", d("4"))]
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        let c = FileManifest::diff(&old, &new);
        assert_eq!(c.deleted, BTreeSet::from(["gone".to_string()]));
        assert_eq!(c.added, BTreeSet::from(["new".to_string()]));
        assert_eq!(c.modified, BTreeSet::from(["edit".to_string()]));
        assert_eq!(c.unmodified, BTreeSet::from(["keep".to_string()]));
        assert!(!c.is_unmodified());
    }

    #[test]
    fn update_then_sync() {
        let mut archive = Archive::new();
        let mut fm = FileManifest::new();
        let mut source = tree(&[("a", "alpha\n"), ("dir/b", "beta\n")]);

        assert!(fm.update_from(&mut archive, &mut source).is_err());
        archive.start_update().unwrap();
        let changes = fm.update_from(&mut archive, &mut source).unwrap();
        assert_eq!(changes.added.len(), 2);
        fm.save(&mut archive).unwrap();
        archive.commit_update().unwrap();

        let loaded = FileManifest::from_archive(&archive).unwrap();
        assert_eq!(loaded, fm);

        let mut sink = tree(&[("a", "stale\n"), ("junk", "x")]);
        sink.report_hashes = true;
        let changes = loaded.sync_to(&archive, &mut sink).unwrap();
        assert_eq!(changes.deleted, BTreeSet::from(["junk".to_string()]));
        assert_eq!(changes.modified, BTreeSet::from(["a".to_string()]));
        assert_eq!(changes.added, BTreeSet::from(["dir/b".to_string()]));
        assert_eq!(sink.files, source.files);
        assert_eq!(sink.syncs, 1);

        // Already in sync.
        archive.start_update().unwrap();
        assert!(fm.update_from(&mut archive, &mut source).unwrap().is_unmodified());
    }

    #[test]
    fn referenced_links_cover_file_chains() {
        let mut archive = Archive::new();
        archive.start_update().unwrap();
        let mut fm = FileManifest::new();
        fm.put_file(&mut archive, "f", b"v1\n").unwrap();
        fm.put_file(&mut archive, "f", b"v1\nv2\n").unwrap();
        let links = fm.referenced_links(archive.link_map()).unwrap();
        assert_eq!(links.len(), 2);
    }
}
