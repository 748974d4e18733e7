// A directory on disk as a `FileTreeIo`.
//
// Empty directories are stored as a sentinel file name inside them, so
// syncing a manifest that contains one recreates the directory. The
// sentinel never exists on disk.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::archive::FileTreeIo;
use crate::digest::LinkDigest;
use crate::error::{Error, Result};

/// File name standing in for an empty directory.
pub const EMPTY_DIRECTORY_SENTINEL: &str = "~3mpt1~";

/// [`FileTreeIo`] rooted at a directory.
#[derive(Debug, Clone)]
pub struct DirectoryIo {
    root: PathBuf,
    ignored: HashSet<String>,
}

impl DirectoryIo {
    /// `root` must be an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::NotFound(format!("{} is not a directory", root.display())));
        }
        Ok(Self {
            root,
            ignored: HashSet::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Skip the directory with this relative path (e.g. `.git`) when
    /// listing, and never prune it.
    pub fn ignore(&mut self, relative: impl Into<String>) {
        self.ignored.insert(relative.into());
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        scrub(name)?;
        Ok(self.root.join(name))
    }

    /// Every file below the root, keyed by relative path. With `hash` the
    /// values are content digests, otherwise NULL.
    fn traverse(&self, hash: bool) -> Result<BTreeMap<String, LinkDigest>> {
        let mut files = BTreeMap::new();
        self.traverse_dir(&self.root, "", hash, &mut files)?;
        Ok(files)
    }

    fn traverse_dir(
        &self,
        dir: &Path,
        relative: &str,
        hash: bool,
        files: &mut BTreeMap<String, LinkDigest>,
    ) -> Result<()> {
        if self.ignored.contains(relative) {
            return Ok(());
        }
        let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
        if entries.is_empty() {
            files.insert(join(relative, EMPTY_DIRECTORY_SENTINEL), LinkDigest::EMPTY);
            return Ok(());
        }
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                log::warn!("directory: skipping non UTF-8 name {:?}", entry.path());
                continue;
            };
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.traverse_dir(&path, &join(relative, &name), hash, files)?;
            } else if file_type.is_file() {
                let digest = if hash {
                    LinkDigest::of_reader(&mut BufReader::new(fs::File::open(&path)?))?
                } else {
                    LinkDigest::NULL
                };
                files.insert(join(relative, &name), digest);
            }
        }
        Ok(())
    }

    /// Remove `relative` and every directory below it. Fails if a file is
    /// still present.
    fn delete_empty_tree(&self, relative: &str) -> Result<()> {
        let dir = self.path_of(relative)?;
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let child = join(relative, &name);
            if self.ignored.contains(&child) || self.ignored.contains(&name) {
                continue;
            }
            if entry.file_type()?.is_dir() {
                self.delete_empty_tree(&child)?;
            }
        }
        fs::remove_dir(&dir)?;
        log::debug!("directory: pruned {relative}");
        Ok(())
    }
}

impl FileTreeIo for DirectoryIo {
    fn files(&mut self) -> Result<BTreeMap<String, LinkDigest>> {
        self.traverse(true)
    }

    fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        if is_sentinel(name) {
            return Ok(Vec::new());
        }
        Ok(fs::read(self.path_of(name)?)?)
    }

    fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(name)?;
        if is_sentinel(name) {
            let (dir, _) = split(name)?;
            fs::create_dir_all(self.root.join(dir))?;
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(())
    }

    fn delete_file(&mut self, name: &str) -> Result<()> {
        // Empty directories are pruned by end_sync once they really are empty.
        if is_sentinel(name) {
            return Ok(());
        }
        fs::remove_file(self.path_of(name)?)?;
        Ok(())
    }

    /// Remove directories the synced version doesn't have.
    fn end_sync(&mut self, all_files: &BTreeSet<String>) -> Result<()> {
        let allowed = allowed_directories(all_files.iter().map(String::as_str))?;
        let present = self.traverse(false)?;
        let mut victims: BTreeSet<String> = allowed_directories(present.keys().map(String::as_str))?
            .into_iter()
            .filter(|d| !allowed.contains(d))
            .collect();

        while let Some(victim) = victims.pop_last() {
            self.delete_empty_tree(&victim)?;
            // Removing the last entry can leave the parent empty too.
            let (parent, _) = split(&victim)?;
            if !parent.is_empty() && !allowed.contains(parent) && !self.ignored.contains(parent) {
                victims.insert(parent.to_string());
            }
        }
        Ok(())
    }
}

fn is_sentinel(name: &str) -> bool {
    name == EMPTY_DIRECTORY_SENTINEL || name.ends_with(&format!("/{EMPTY_DIRECTORY_SENTINEL}"))
}

fn join(relative: &str, name: &str) -> String {
    if relative.is_empty() {
        name.to_string()
    } else {
        format!("{relative}/{name}")
    }
}

/// Reject relative paths that could escape the root or name nothing.
fn scrub(relative: &str) -> Result<()> {
    let bad = |why: &str| Err(Error::invariant(format!("bad relative path {relative:?}: {why}")));
    if relative.is_empty() {
        return bad("empty");
    }
    if relative.trim() != relative {
        return bad("leading or trailing whitespace");
    }
    if relative.contains("//") {
        return bad("empty component");
    }
    if relative.starts_with('/') {
        return bad("absolute");
    }
    if relative.split('/').any(|c| c == "." || c == "..") {
        return bad("dot component");
    }
    Ok(())
}

/// `("a/b", "c")` for `"a/b/c"`, `("", "c")` for `"c"`.
fn split(relative: &str) -> Result<(&str, &str)> {
    scrub(relative)?;
    Ok(match relative.rfind('/') {
        Some(pos) => (&relative[..pos], &relative[pos + 1..]),
        None => ("", relative),
    })
}

/// Every ancestor directory of every path.
fn allowed_directories<'a, I>(paths: I) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut allowed = BTreeSet::new();
    for path in paths {
        let (mut dir, _) = split(path)?;
        while !dir.is_empty() {
            if !allowed.insert(dir.to_string()) {
                break;
            }
            dir = split(dir)?.0;
        }
    }
    Ok(allowed)
}
