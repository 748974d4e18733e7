//! Wormarc: write-once, content-addressed version history archives.
//!
//! Every stored file version is a [`HistoryLink`]: either a full copy or a
//! line-based binary patch against its parent, zlib compressed when that
//! helps, and addressed by the SHA-1 of its encoded bytes. Links are grouped
//! into append-only blocks; an [`Archive`] tracks those blocks plus a few
//! named root objects and can describe itself through its own manifest.
//!
//! The crate provides:
//! - The delta codec: `bdiff` line diff, `mpatch` patch application and the
//!   [`DeltaCoder`] that turns versions into links (`delta`)
//! - Links, link maps and blocks (`link`, `block`, `digest`)
//! - Archives, their manifests, named file trees and audit queries
//!   (`archive`)
//! - Storage backends: single-stream blobs, a local link/archive cache,
//!   plain directories and remote content stores (`io`)
//!
//! # Quick Start
//!
//! ```
//! use wormarc::archive::{Archive, FileManifest};
//! use wormarc::io::ByteArrayIo;
//!
//! let mut archive = Archive::new();
//! archive.start_update().unwrap();
//! let mut files = FileManifest::new();
//! files.put_file(&mut archive, "notes.txt", b"first line\n").unwrap();
//! files.save(&mut archive).unwrap();
//! archive.commit_update().unwrap();
//! archive.compress_and_update_archive_manifest().unwrap();
//!
//! let mut blob = ByteArrayIo::new();
//! archive.write(&mut blob).unwrap();
//!
//! let loaded = Archive::load(&mut blob).unwrap();
//! let files = FileManifest::from_archive(&loaded).unwrap();
//! assert_eq!(files.read_file(&loaded, "notes.txt").unwrap(), b"first line\n");
//! ```

pub mod archive;
pub mod block;
pub mod config;
pub mod cursor;
pub mod delta;
pub mod digest;
pub mod error;
pub mod io;
pub mod link;
pub mod varint;

pub use archive::{Archive, ArchiveData, ArchiveIo, ArchiveResolver, RootObject, RootObjectKind};
pub use block::Block;
pub use config::{ArchiveConfig, RemoteConfig};
pub use delta::DeltaCoder;
pub use digest::LinkDigest;
pub use error::{Error, ErrorKind, Result};
pub use link::{HistoryLink, HistoryLinkMap, LinkSource};
