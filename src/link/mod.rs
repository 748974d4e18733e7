// History links: immutable, digest-addressed nodes of a version chain.
//
// A link carries either a full copy of one version (end of chain) or a
// patch against its parent's version. Its digest is the SHA-1 of its binary
// representation, so the digest is both identity and storage address.

pub mod binary;
pub mod map;

use std::sync::Arc;

use crate::digest::LinkDigest;
use crate::error::{Error, Result};

pub use binary::LinkFlags;
pub use map::{HistoryLinkMap, LinkSource};

/// One node of a version chain.
#[derive(Clone, PartialEq, Eq)]
pub struct HistoryLink {
    digest: LinkDigest,
    parent: Option<LinkDigest>,
    payload: Arc<[u8]>,
    is_end: bool,
}

impl HistoryLink {
    /// Build a link and compute its digest.
    ///
    /// `payload` is the stored (possibly compressed) form. A link without a
    /// parent must be the end of its chain.
    pub fn new(parent: Option<LinkDigest>, payload: impl Into<Arc<[u8]>>, is_end: bool) -> Result<Self> {
        if parent.is_none() && !is_end {
            return Err(Error::invariant("a link without a parent must be end-of-chain"));
        }
        if parent.is_some_and(|p| p.is_null()) {
            return Err(Error::invariant("parent digest must not be NULL; use None"));
        }
        let mut link = Self {
            digest: LinkDigest::NULL,
            parent,
            payload: payload.into(),
            is_end,
        };
        link.digest = LinkDigest::of(&binary::encode(&link));
        Ok(link)
    }

    /// Assemble a link whose digest was computed over `rep` by the parser.
    pub(crate) fn from_parts(digest: LinkDigest, parent: Option<LinkDigest>, payload: Arc<[u8]>, is_end: bool) -> Self {
        Self {
            digest,
            parent,
            payload,
            is_end,
        }
    }

    pub fn digest(&self) -> LinkDigest {
        self.digest
    }

    pub fn parent(&self) -> Option<LinkDigest> {
        self.parent
    }

    /// Parent digest, or [`LinkDigest::NULL`] for a chain root.
    pub fn parent_or_null(&self) -> LinkDigest {
        self.parent.unwrap_or(LinkDigest::NULL)
    }

    /// Stored payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Length of the stored payload.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// True when this link holds a full copy rather than a patch.
    pub fn is_end(&self) -> bool {
        self.is_end
    }

    pub fn flags(&self) -> LinkFlags {
        let mut flags = LinkFlags::empty();
        flags.set(LinkFlags::END_OF_CHAIN, self.is_end);
        flags.set(LinkFlags::HAS_PARENT, self.parent.is_some());
        flags
    }

    /// Binary representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        binary::encode(self)
    }

    /// Length of the binary representation.
    pub fn rep_len(&self) -> usize {
        binary::rep_len(self)
    }
}

impl std::fmt::Debug for HistoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLink")
            .field("digest", &self.digest)
            .field("parent", &self.parent)
            .field("payload_len", &self.payload.len())
            .field("is_end", &self.is_end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_covers_every_field() {
        let a = HistoryLink::new(None, &b"payload"[..], true).unwrap();
        let b = HistoryLink::new(Some(a.digest()), &b"payload"[..], true).unwrap();
        let c = HistoryLink::new(Some(a.digest()), &b"payload"[..], false).unwrap();
        let d = HistoryLink::new(Some(a.digest()), &b"payloaD"[..], false).unwrap();
        let all = [a.digest(), b.digest(), c.digest(), d.digest()];
        for i in 0..all.len() {
            for j in i + 1..all.len() {
                assert_ne!(all[i], all[j]);
            }
        }
        assert_eq!(a.digest(), LinkDigest::of(&a.to_bytes()));
    }

    #[test]
    fn parentless_delta_rejected() {
        let err = HistoryLink::new(None, &b"x"[..], false).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invariant);
        assert!(HistoryLink::new(Some(LinkDigest::NULL), &b"x"[..], true).is_err());
    }

    #[test]
    fn flags_reflect_fields() {
        let root = HistoryLink::new(None, &b""[..], true).unwrap();
        assert_eq!(root.flags(), LinkFlags::END_OF_CHAIN);
        let delta = HistoryLink::new(Some(root.digest()), &b"p"[..], false).unwrap();
        assert_eq!(delta.flags(), LinkFlags::HAS_PARENT);
        assert_eq!(delta.parent_or_null(), root.digest());
        assert_eq!(root.parent_or_null(), LinkDigest::NULL);
    }
}
