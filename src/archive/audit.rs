// Comparisons between archive versions: which links a version added, which
// version introduced a given link, and a per-version file change log.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::archive::{Archive, ArchiveResolver, Changes, ExternalRefs, FileManifest, Reference, RootObjectKind};
use crate::digest::LinkDigest;
use crate::error::{Error, Result};

/// Link-level difference between two archive versions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkChanges {
    /// In the newer version only.
    pub added: HashSet<LinkDigest>,
    /// In the older version only.
    pub removed: HashSet<LinkDigest>,
    /// In both.
    pub common: HashSet<LinkDigest>,
}

fn require_valid(archive: &Archive, what: &str) -> Result<()> {
    if !archive.has_valid_archive_manifest()? {
        return Err(Error::InvalidManifest(format!("{what} doesn't have a valid manifest")));
    }
    Ok(())
}

fn parent_refs(archive: &Archive) -> Result<ExternalRefs> {
    match archive.root_object(RootObjectKind::PARENT_REFERENCES) {
        Some(digest) => ExternalRefs::from_bytes(&archive.read_file(digest)?),
        None => Ok(ExternalRefs::default()),
    }
}

/// Compare `newer` against the version `older` resolves to.
pub fn changes(newer: &Archive, older: &Reference, resolver: &mut dyn ArchiveResolver) -> Result<LinkChanges> {
    require_valid(newer, "the newer archive")?;
    let other = resolver.resolve(older)?;
    require_valid(&other, "the older archive")?;

    let old_links = other.all_links()?;
    let new_links = newer.all_links()?;
    Ok(LinkChanges {
        added: new_links.difference(&old_links).copied().collect(),
        removed: old_links.difference(&new_links).copied().collect(),
        common: new_links.intersection(&old_links).copied().collect(),
    })
}

/// Links in `archive` that none of its parents have.
pub fn added(archive: &Archive, resolver: &mut dyn ArchiveResolver) -> Result<HashSet<LinkDigest>> {
    if archive.root_object(RootObjectKind::PARENT_REFERENCES).is_none() {
        return Err(Error::NotFound("archive has no PARENT_REFERENCES".into()));
    }
    let mut parent_links = HashSet::new();
    for r in parent_refs(archive)?.refs() {
        let parent = resolver.resolve(r)?;
        require_valid(&parent, &format!("parent archive {r}"))?;
        parent.add_all_links(&mut parent_links)?;
    }
    let mut current = archive.all_links()?;
    current.retain(|d| !parent_links.contains(d));
    Ok(current)
}

// ---------------------------------------------------------------------------
// Link history
// ---------------------------------------------------------------------------

struct Suspect {
    links: HashSet<LinkDigest>,
    parents: ExternalRefs,
}

struct Investigation<'r> {
    resolver: &'r mut dyn ArchiveResolver,
    suspects: HashMap<Reference, Suspect>,
}

impl Investigation<'_> {
    fn remember(&mut self, reference: &Reference, archive: &Archive) -> Result<()> {
        require_valid(archive, &format!("archive {reference}"))?;
        let suspect = Suspect {
            links: archive.all_links()?,
            parents: parent_refs(archive)?,
        };
        self.suspects.insert(reference.clone(), suspect);
        Ok(())
    }

    fn suspect(&mut self, reference: &Reference) -> Result<&Suspect> {
        if !self.suspects.contains_key(reference) {
            log::debug!("audit: resolving {reference}");
            let archive = self.resolver.resolve(reference)?;
            self.remember(reference, &archive)?;
        }
        self.suspects
            .get(reference)
            .ok_or_else(|| Error::NotFound(reference.to_string()))
    }

    /// True if `reference` has `link` and none of its parents do.
    fn introduced(&mut self, reference: &Reference, link: &LinkDigest) -> Result<bool> {
        let (has_link, parents) = {
            let suspect = self.suspect(reference)?;
            (suspect.links.contains(link), suspect.parents.refs().to_vec())
        };
        if !has_link {
            return Ok(false);
        }
        for parent in &parents {
            if self.suspect(parent)?.links.contains(link) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Breadth first search back through parents for the version that
    /// introduced `link`.
    fn culprit(&mut self, start: &Reference, link: &LinkDigest) -> Result<Reference> {
        let mut queue = VecDeque::from([start.clone()]);
        let mut visited = HashSet::new();
        while let Some(reference) = queue.pop_front() {
            if !visited.insert(reference.clone()) {
                continue;
            }
            if self.introduced(&reference, link)? {
                return Ok(reference);
            }
            queue.extend(self.suspect(&reference)?.parents.refs().iter().cloned());
        }
        Err(Error::LinkNotFound(*link))
    }
}

/// For each link in `chain` (newest first), the archive version that
/// introduced it. `archive` is the version `archive_ref` names; it defaults
/// to the local current archive.
pub fn history(
    archive: &Archive,
    archive_ref: Option<Reference>,
    chain: &[LinkDigest],
    resolver: &mut dyn ArchiveResolver,
) -> Result<Vec<Reference>> {
    let mut current = archive_ref.unwrap_or_else(|| Reference::local(ExternalRefs::CURRENT_ARCHIVE));
    let mut investigation = Investigation {
        resolver,
        suspects: HashMap::new(),
    };
    investigation.remember(&current, archive)?;

    let mut out = Vec::with_capacity(chain.len());
    for link in chain {
        // Older links can't have been introduced after the newer ones.
        current = investigation.culprit(&current, link)?;
        out.push(current.clone());
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Change log
// ---------------------------------------------------------------------------

/// Walk back from `archive` (named `latest`) through its single-parent
/// history, calling `entry(newer, older, changes)` for each step, where
/// `changes` turns the older file manifest into the newer one. The last
/// step compares against the empty null archive. Stops early when `entry`
/// returns `false`.
pub fn manifest_change_log<F>(
    latest: &Reference,
    archive: &Archive,
    resolver: &mut dyn ArchiveResolver,
    mut entry: F,
) -> Result<()>
where
    F: FnMut(&Reference, &Reference, &Changes) -> bool,
{
    let null = Reference::local(ExternalRefs::NULL_ARCHIVE);
    let file_map = |archive: &Archive, reference: &Reference| -> Result<FileManifest> {
        if archive.root_object(RootObjectKind::FILE_MANIFEST).is_none() {
            return Err(Error::NotFound(format!("no FILE_MANIFEST in {reference}")));
        }
        FileManifest::from_archive(archive)
    };

    let mut current_ref = latest.clone();
    let mut current_map = file_map(archive, latest)?.files().clone();
    let mut parents = parent_refs(archive)?;

    while current_ref != null {
        if parents.refs().len() > 1 {
            return Err(Error::invariant(format!(
                "{current_ref} has {} parents; only linear history is supported",
                parents.refs().len()
            )));
        }
        let (next_ref, next_map, next_parents) = match parents.refs().first() {
            Some(parent) if *parent != null => {
                let older = resolver.resolve(parent)?;
                let map = file_map(&older, parent)?.files().clone();
                (parent.clone(), map, parent_refs(&older)?)
            }
            _ => (null.clone(), Default::default(), ExternalRefs::default()),
        };

        let changes = FileManifest::diff(&next_map, &current_map);
        if !entry(&current_ref, &next_ref, &changes) {
            break;
        }
        current_ref = next_ref;
        current_map = next_map;
        parents = next_parents;
    }
    Ok(())
}
