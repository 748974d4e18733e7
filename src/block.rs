// Blocks: ordered groups of link digests stored or transferred as one unit.

use crate::digest::LinkDigest;

/// An ordered list of link digests.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Block {
    digests: Vec<LinkDigest>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn digests(&self) -> &[LinkDigest] {
        &self.digests
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn append(&mut self, digest: LinkDigest) {
        self.digests.push(digest);
    }

    pub fn prepend(&mut self, digest: LinkDigest) {
        self.digests.insert(0, digest);
    }

    pub fn contains(&self, digest: &LinkDigest) -> bool {
        self.digests.contains(digest)
    }

    pub fn first(&self) -> Option<LinkDigest> {
        self.digests.first().copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LinkDigest> {
        self.digests.iter()
    }

    pub fn into_digests(self) -> Vec<LinkDigest> {
        self.digests
    }
}

impl From<Vec<LinkDigest>> for Block {
    fn from(digests: Vec<LinkDigest>) -> Self {
        Self { digests }
    }
}

impl FromIterator<LinkDigest> for Block {
    fn from_iter<I: IntoIterator<Item = LinkDigest>>(iter: I) -> Self {
        Self {
            digests: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Block {
    type Item = &'a LinkDigest;
    type IntoIter = std::slice::Iter<'a, LinkDigest>;

    fn into_iter(self) -> Self::IntoIter {
        self.digests.iter()
    }
}
