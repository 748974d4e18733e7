// Storage backends for archives and file trees.
//
// - `blob`: a whole archive version as one byte stream (BLOB0002).
// - `link_cache` / `archive_cache`: one file per link plus named pointer
//   files in a local directory.
// - `directory`: a plain directory tree as a `FileTreeIo`.
// - `remote`: blocks and a top key on a content-addressed store, with
//   `topkey`, `runner` and `memory_store` as its building blocks.

pub mod blob;
pub mod memory_store;
pub mod remote;
pub mod runner;
pub mod topkey;

#[cfg(feature = "file-io")]
pub mod archive_cache;
#[cfg(feature = "file-io")]
pub mod directory;
#[cfg(feature = "file-io")]
pub mod link_cache;

pub use blob::{BlobIo, ByteArrayIo};
pub use memory_store::MemoryStore;
pub use remote::{ContentStore, RemoteIo};
pub use runner::{CancelToken, Request, RequestRunner};
pub use topkey::{BlockDescription, ContentKey, TopKey};

#[cfg(feature = "file-io")]
pub use archive_cache::ArchiveCache;
#[cfg(feature = "file-io")]
pub use blob::FileIo;
#[cfg(feature = "file-io")]
pub use directory::DirectoryIo;
#[cfg(feature = "file-io")]
pub use link_cache::LinkCache;

use crate::error::Result;
use crate::link::HistoryLink;

/// Somewhere links can be copied to as they are read, e.g. a local cache
/// filled while fetching from a remote store.
pub trait LinkSink {
    fn write_link(&self, link: &HistoryLink) -> Result<()>;
}

/// Write `bytes` to `path` through a temporary file in the same directory,
/// so readers see either the old contents or the new ones.
#[cfg(feature = "file-io")]
pub(crate) fn write_atomically(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => std::path::Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
