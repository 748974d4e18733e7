// In-memory index of history links keyed by digest.

use std::collections::{HashMap, HashSet};

use crate::block::Block;
use crate::digest::LinkDigest;
use crate::error::{Error, Result};
use crate::link::{HistoryLink, binary};

/// Something links can be fetched from by digest (a cache directory, a
/// remote store, another map).
pub trait LinkSource {
    fn read_link(&self, digest: LinkDigest) -> Result<HistoryLink>;
}

/// Digest -> link index, optionally backed by a [`LinkSource`] that is
/// consulted when a digest is not present.
#[derive(Default)]
pub struct HistoryLinkMap {
    links: HashMap<LinkDigest, HistoryLink>,
    source: Option<Box<dyn LinkSource>>,
}

impl HistoryLinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map that falls back to `source` for missing links.
    pub fn with_source(source: Box<dyn LinkSource>) -> Self {
        Self {
            links: HashMap::new(),
            source: Some(source),
        }
    }

    pub fn set_source(&mut self, source: Option<Box<dyn LinkSource>>) {
        self.source = source;
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, digest: &LinkDigest) -> bool {
        self.links.contains_key(digest)
    }

    /// Insert `link`. A link already present under the same digest is kept;
    /// equal digests mean equal bytes.
    pub fn add_link(&mut self, link: HistoryLink) {
        self.links.entry(link.digest()).or_insert(link);
    }

    pub fn add_links<I: IntoIterator<Item = HistoryLink>>(&mut self, links: I) {
        for link in links {
            self.add_link(link);
        }
    }

    pub fn remove_link(&mut self, digest: &LinkDigest) -> Option<HistoryLink> {
        self.links.remove(digest)
    }

    /// Look up a link already in the map.
    pub fn link(&self, digest: &LinkDigest) -> Result<&HistoryLink> {
        self.links.get(digest).ok_or(Error::LinkNotFound(*digest))
    }

    /// Look up a link, reading it from the backing source when missing.
    pub fn resolve(&mut self, digest: LinkDigest) -> Result<HistoryLink> {
        if let Some(link) = self.links.get(&digest) {
            return Ok(link.clone());
        }
        let link = self.fetch(digest)?;
        self.links.insert(digest, link.clone());
        Ok(link)
    }

    /// Read a missing link from the backing source without caching it.
    fn fetch(&self, digest: LinkDigest) -> Result<HistoryLink> {
        let Some(source) = self.source.as_ref() else {
            return Err(Error::LinkNotFound(digest));
        };
        let link = source.read_link(digest)?;
        if link.digest() != digest {
            return Err(Error::DigestMismatch {
                expected: digest,
                actual: link.digest(),
            });
        }
        log::trace!("link map: resolved {digest} from backing source");
        Ok(link)
    }

    /// Iterate over every link in the map, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryLink> {
        self.links.values()
    }

    pub fn digests(&self) -> impl Iterator<Item = &LinkDigest> {
        self.links.keys()
    }

    /// Links for `block`, in block order.
    pub fn links(&self, block: &Block) -> Result<Vec<&HistoryLink>> {
        block.iter().map(|d| self.link(d)).collect()
    }

    // -----------------------------------------------------------------------
    // Chains
    // -----------------------------------------------------------------------

    /// The chain ending at `head`, newest first.
    ///
    /// With `stop_at_end` the walk stops at the first full copy (everything
    /// needed to rebuild `head`). Without it the walk follows parents past
    /// truncation points to the first version ever stored.
    pub fn chain(&self, head: LinkDigest, stop_at_end: bool) -> Result<Vec<HistoryLink>> {
        walk_chain(head, stop_at_end, |d| self.link(&d).cloned())
    }

    /// Like [`chain`](Self::chain), fetching missing links from the source.
    pub fn fetch_chain(&mut self, head: LinkDigest, stop_at_end: bool) -> Result<Vec<HistoryLink>> {
        walk_chain(head, stop_at_end, |d| self.resolve(d))
    }

    /// Digests of [`chain`](Self::chain).
    pub fn chain_digests(&self, head: LinkDigest, stop_at_end: bool) -> Result<Vec<LinkDigest>> {
        Ok(self.chain(head, stop_at_end)?.iter().map(HistoryLink::digest).collect())
    }

    // -----------------------------------------------------------------------
    // Block representation
    // -----------------------------------------------------------------------

    /// Total length of the binary representations of `digests`.
    pub fn rep_len<'a, I>(&self, digests: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a LinkDigest>,
    {
        digests
            .into_iter()
            .map(|d| self.link(d).map(|l| l.rep_len() as u64))
            .sum()
    }

    /// Concatenated binary representations of the links in `block`.
    pub fn binary_rep(&self, block: &Block) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.rep_len(block)? as usize);
        for digest in block {
            binary::encode_into(self.link(digest)?, &mut out);
        }
        Ok(out)
    }

    /// Parse a run of links, add them to the map and return them as a block.
    /// Nothing is added if any link fails to parse.
    pub fn read_block(&mut self, bytes: &[u8]) -> Result<Block> {
        let links = binary::read_all(bytes)?;
        let block = links.iter().map(HistoryLink::digest).collect();
        self.add_links(links);
        Ok(block)
    }
}

fn walk_chain<F>(head: LinkDigest, stop_at_end: bool, mut lookup: F) -> Result<Vec<HistoryLink>>
where
    F: FnMut(LinkDigest) -> Result<HistoryLink>,
{
    if head.is_null() {
        return Err(Error::invariant("chain head is NULL"));
    }
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(head);
    while let Some(digest) = next {
        if !seen.insert(digest) {
            return Err(Error::corrupt(format!(
                "cycle in chain starting at {head}: {digest} repeats"
            )));
        }
        let link = lookup(digest)?;
        next = link.parent();
        let end = link.is_end();
        chain.push(link);
        if stop_at_end && end {
            break;
        }
    }
    Ok(chain)
}

impl LinkSource for HistoryLinkMap {
    /// Links already in the map, then the backing source. Links read from
    /// the source are not kept.
    fn read_link(&self, digest: LinkDigest) -> Result<HistoryLink> {
        match self.links.get(&digest) {
            Some(link) => Ok(link.clone()),
            None => self.fetch(digest),
        }
    }
}

impl std::fmt::Debug for HistoryLinkMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLinkMap")
            .field("links", &self.links.len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}
