// Named archive versions in a local link cache.
//
// Links live in the cache directory as usual. Each version adds one pointer
// file, named by the version name, holding
// `<manifest chain head (20 bytes)><ArchiveManifest bytes>`. The pointer is
// written after every link it references.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::archive::{
    Archive, ArchiveData, ArchiveIo, ArchiveManifest, ArchiveResolver, ExternalRefs, Reference, RootObject,
    RootObjectKind,
};
use crate::block::Block;
use crate::cursor::SliceCursor;
use crate::digest::LinkDigest;
use crate::error::{Error, Result};
use crate::io::{LinkCache, write_atomically};
use crate::link::HistoryLinkMap;

/// An [`ArchiveIo`] over a [`LinkCache`] that reads and writes one named
/// version at a time.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    cache: LinkCache,
    name: Option<String>,
}

impl ArchiveCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            cache: LinkCache::new(dir)?,
            name: None,
        })
    }

    pub fn links(&self) -> &LinkCache {
        &self.cache
    }

    pub fn dir(&self) -> &Path {
        self.cache.dir()
    }

    /// The version the next `read` or `write` uses.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// True if a pointer file exists for `name`.
    pub fn has_version(&self, name: &str) -> bool {
        check_name(name).is_ok() && self.dir().join(name).is_file()
    }

    fn pointer_path(&self) -> Result<PathBuf> {
        let name = self
            .name
            .as_deref()
            .ok_or_else(|| Error::invariant("archive cache name not set"))?;
        check_name(name)?;
        Ok(self.dir().join(name))
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::invariant(format!("bad archive version name {name:?}")));
    }
    // Hex digest names belong to link files.
    if name.len() == 40 && LinkDigest::from_hex(name).is_ok() {
        return Err(Error::invariant(format!("version name {name} collides with a link file")));
    }
    Ok(())
}

fn manifest_digest(root_objects: &[RootObject]) -> Result<LinkDigest> {
    let mut found = root_objects
        .iter()
        .filter(|o| o.kind == RootObjectKind::ARCHIVE_MANIFEST);
    match (found.next(), found.next()) {
        (Some(obj), None) if !obj.digest.is_null() => Ok(obj.digest),
        (Some(_), None) => Err(Error::invariant("ARCHIVE_MANIFEST root object is NULL")),
        (None, _) => Err(Error::invariant("no ARCHIVE_MANIFEST root object")),
        (Some(_), Some(_)) => Err(Error::invariant("more than one ARCHIVE_MANIFEST root object")),
    }
}

impl ArchiveIo for ArchiveCache {
    fn write(&mut self, links: &HistoryLinkMap, blocks: &[Block], root_objects: &[RootObject]) -> Result<()> {
        let path = self.pointer_path()?;
        let head = manifest_digest(root_objects)?;
        let manifest = ArchiveManifest::new(root_objects.to_vec(), blocks.to_vec()).to_bytes()?;

        for obj in root_objects.iter().filter(|o| !o.digest.is_null()) {
            self.cache.write_link(links.link(&obj.digest)?)?;
        }
        for digest in blocks.iter().flat_map(|b| b.iter()) {
            self.cache.write_link(links.link(digest)?)?;
        }

        let mut pointer = Vec::with_capacity(head.as_bytes().len() + manifest.len());
        pointer.extend_from_slice(head.as_bytes());
        pointer.extend_from_slice(&manifest);
        write_atomically(&path, &pointer)?;
        log::debug!("archive cache: wrote version {} at {head}", path.display());
        Ok(())
    }

    fn read(&mut self, links: &mut HistoryLinkMap) -> Result<ArchiveData> {
        let path = self.pointer_path()?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(Error::NotFound(format!("no archive version at {}", path.display())));
            }
            Err(e) => return Err(e.into()),
        };
        let mut cur = SliceCursor::new(&bytes);
        let head = cur.read_digest()?;
        let data = ArchiveManifest::from_bytes(cur.rest(), head)?.into_data();

        for obj in data.root_objects.iter().filter(|o| !o.digest.is_null()) {
            self.cache.load_link(links, obj.digest)?;
        }
        for digest in data.blocks.iter().flat_map(|b| b.iter()) {
            self.cache.load_link(links, *digest)?;
        }
        log::debug!("archive cache: read version {} at {head}", path.display());
        Ok(data)
    }
}

impl ArchiveResolver for ArchiveCache {
    /// Load the local version `reference` names. The cache's own name is left
    /// unchanged.
    fn resolve(&mut self, reference: &Reference) -> Result<Archive> {
        if reference.kind != ExternalRefs::KIND_LOCAL {
            return Err(Error::NotFound(format!("archive cache can't resolve {reference}")));
        }
        let saved = self.name.replace(reference.key.clone());
        let loaded = Archive::load(self);
        self.name = saved;
        loaded
    }
}
