// Flat directory of links, one file per link named by its hex digest.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::digest::LinkDigest;
use crate::error::{Error, Result};
use crate::io::{LinkSink, write_atomically};
use crate::link::{HistoryLink, HistoryLinkMap, LinkSource, binary};

/// Link files in a single directory.
#[derive(Debug, Clone)]
pub struct LinkCache {
    dir: PathBuf,
}

impl LinkCache {
    /// Use `dir`, which must already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("cache directory {} does not exist", dir.display())));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn link_path(&self, digest: &LinkDigest) -> PathBuf {
        self.dir.join(digest.to_hex())
    }

    pub fn contains(&self, digest: &LinkDigest) -> bool {
        self.link_path(digest).is_file()
    }

    /// Read one link and check it hashes to `digest`.
    pub fn read_link(&self, digest: LinkDigest) -> Result<HistoryLink> {
        if digest.is_null() {
            return Err(Error::invariant("refused to read the NULL link"));
        }
        let bytes = match fs::read(self.link_path(&digest)) {
            Ok(b) => b,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Err(Error::LinkNotFound(digest)),
            Err(e) => return Err(e.into()),
        };
        let link = binary::read_verified(&bytes, digest)?;
        log::trace!("link cache: read {digest}");
        Ok(link)
    }

    /// Read `digest` into `links`.
    pub fn load_link(&self, links: &mut HistoryLinkMap, digest: LinkDigest) -> Result<()> {
        if !links.contains(&digest) {
            links.add_link(self.read_link(digest)?);
        }
        Ok(())
    }

    /// Write one link. Links already on disk are left alone.
    pub fn write_link(&self, link: &HistoryLink) -> Result<()> {
        let digest = link.digest();
        if digest.is_null() {
            return Err(Error::invariant("refused to write the NULL link"));
        }
        let path = self.link_path(&digest);
        if path.is_file() {
            return Ok(());
        }
        write_atomically(&path, &link.to_bytes())?;
        log::trace!("link cache: wrote {digest}");
        Ok(())
    }
}

impl LinkSource for LinkCache {
    fn read_link(&self, digest: LinkDigest) -> Result<HistoryLink> {
        LinkCache::read_link(self, digest)
    }
}

impl LinkSink for LinkCache {
    fn write_link(&self, link: &HistoryLink) -> Result<()> {
        LinkCache::write_link(self, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn link(text: &[u8]) -> HistoryLink {
        HistoryLink::new(None, text, true).unwrap()
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LinkCache::new(dir.path()).unwrap();
        let l = link(b"ucontent");
        cache.write_link(&l).unwrap();
        assert!(cache.contains(&l.digest()));
        assert!(dir.path().join(l.digest().to_hex()).is_file());
        assert_eq!(cache.read_link(l.digest()).unwrap(), l);
        // Second write is a no-op.
        cache.write_link(&l).unwrap();
    }

    #[test]
    fn missing_and_null() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LinkCache::new(dir.path()).unwrap();
        let err = cache.read_link(LinkDigest::EMPTY).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(cache.read_link(LinkDigest::NULL).unwrap_err().kind(), ErrorKind::Invariant);
        assert!(LinkCache::new(dir.path().join("nope")).is_err());
    }

    #[test]
    fn tampered_file_fails_digest_check() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LinkCache::new(dir.path()).unwrap();
        let l = link(b"uoriginal");
        cache.write_link(&l).unwrap();
        let path = dir.path().join(l.digest().to_hex());
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(cache.read_link(l.digest()), Err(Error::DigestMismatch { .. })));
    }

    #[test]
    fn backs_a_link_map() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LinkCache::new(dir.path()).unwrap();
        let l = link(b"ubacked");
        cache.write_link(&l).unwrap();
        let mut map = HistoryLinkMap::with_source(Box::new(cache));
        assert_eq!(map.resolve(l.digest()).unwrap(), l);
    }
}
