// External references: pointers from one archive version to others, stored
// in the PARENT_REFERENCES and REBASE_REFERENCES root objects.

use std::fmt;

use crate::cursor::SliceCursor;
use crate::error::{Error, Result};

/// One reference to another archive version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub kind: u8,
    pub key: String,
}

impl Reference {
    pub fn new(kind: u8, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn local(key: impl Into<String>) -> Self {
        Self::new(ExternalRefs::KIND_LOCAL, key)
    }

    pub fn remote(key: impl Into<String>) -> Self {
        Self::new(ExternalRefs::KIND_REMOTE, key)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExternalRefs::KIND_LOCAL => write!(f, "LOCAL:{}", self.key),
            ExternalRefs::KIND_REMOTE => write!(f, "REMOTE:{}", self.key),
            other => write!(f, "{other}:{}", self.key),
        }
    }
}

/// A sorted list of [`Reference`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExternalRefs {
    refs: Vec<Reference>,
}

impl ExternalRefs {
    /// Key names an archive cache entry on the local machine.
    pub const KIND_LOCAL: u8 = 1;
    /// Key is a remote top-key request URI.
    pub const KIND_REMOTE: u8 = 2;

    pub const MAX_REFS: usize = 127;

    /// Local name of the working archive version.
    pub const CURRENT_ARCHIVE: &'static str = "current_archive";
    /// Local name of the empty archive every history starts from.
    pub const NULL_ARCHIVE: &'static str = "null_archive";

    pub fn new(mut refs: Vec<Reference>) -> Result<Self> {
        if refs.len() > Self::MAX_REFS {
            return Err(Error::invariant(format!("{} references, at most {}", refs.len(), Self::MAX_REFS)));
        }
        if let Some(r) = refs.iter().find(|r| r.key.len() > usize::from(u16::MAX)) {
            return Err(Error::invariant(format!("reference key of {} bytes is too long", r.key.len())));
        }
        refs.sort();
        Ok(Self { refs })
    }

    /// References to the current and null local archives.
    pub fn current_and_null() -> Self {
        Self {
            refs: vec![
                Reference::local(Self::CURRENT_ARCHIVE),
                Reference::local(Self::NULL_ARCHIVE),
            ],
        }
    }

    pub fn refs(&self) -> &[Reference] {
        &self.refs
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.refs.iter().map(|r| 3 + r.key.len()).sum::<usize>());
        out.push(self.refs.len() as u8);
        for r in &self.refs {
            out.push(r.kind);
            out.extend_from_slice(&(r.key.len() as u16).to_be_bytes());
            out.extend_from_slice(r.key.as_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cur = SliceCursor::new(bytes);
        let count = usize::from(cur.read_u8()?);
        if count > Self::MAX_REFS {
            return Err(Error::corrupt(format!("reference count {count} out of range")));
        }
        let mut refs = Vec::with_capacity(count);
        for _ in 0..count {
            let kind = cur.read_u8()?;
            let len = usize::from(cur.read_u16()?);
            let key = std::str::from_utf8(cur.take(len)?)
                .map_err(|e| Error::corrupt(format!("reference key is not UTF-8: {e}")))?;
            refs.push(Reference::new(kind, key));
        }
        if !cur.is_empty() {
            return Err(Error::corrupt("trailing bytes after references"));
        }
        refs.sort();
        Ok(Self { refs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_by_kind_then_key() {
        let refs = ExternalRefs::new(vec![
            Reference::remote("USK@a"),
            Reference::local("b"),
            Reference::local("a"),
        ])
        .unwrap();
        let keys: Vec<_> = refs.refs().iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "USK@a"]);
    }

    #[test]
    fn bytes_roundtrip() {
        let refs = ExternalRefs::current_and_null();
        let bytes = refs.to_bytes();
        assert_eq!(bytes[0], 2);
        assert_eq!(bytes[1], ExternalRefs::KIND_LOCAL);
        assert_eq!(&bytes[2..4], &15u16.to_be_bytes());
        assert_eq!(ExternalRefs::from_bytes(&bytes).unwrap(), refs);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ExternalRefs::from_bytes(&[]).is_err());
        assert!(ExternalRefs::from_bytes(&[200]).is_err());
        assert!(ExternalRefs::from_bytes(&[1, 1, 0, 2, 0xff, 0xfe]).is_err());
        assert!(ExternalRefs::from_bytes(&[1, 1, 0, 5, b'a']).is_err());
        let many = vec![Reference::local("x"); 128];
        assert!(ExternalRefs::new(many).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Reference::remote("SSK@x").to_string(), "REMOTE:SSK@x");
    }
}
