// Crate-wide error type.
//
// Every failure surfaces as one `Error` variant. `Error::kind()` folds the
// variants into the coarse classes callers branch on: corrupt data, a missing
// link or resource, a timeout, a broken caller-side invariant, and plain I/O.

use std::io;

use crate::digest::LinkDigest;
use crate::varint::VarIntError;

/// Coarse failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed bytes, version mismatches, bad offsets, digest mismatches.
    CorruptData,
    /// A link, base version, file or resource could not be found.
    NotFound,
    /// A backend operation did not finish in its allotted time.
    Timeout,
    /// The caller broke an API contract.
    Invariant,
    /// Underlying I/O failure.
    Io,
}

/// Error type for archive, delta and storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("unsupported version: expected {expected:?}, found {found:?}")]
    VersionMismatch { expected: Vec<u8>, found: Vec<u8> },

    #[error("patch hunk [{start}, {end}) out of range (cursor {cursor}, base length {len})")]
    HunkOutOfRange {
        start: usize,
        end: usize,
        cursor: usize,
        len: usize,
    },

    #[error("offset {0} does not fit in a signed 32-bit field")]
    OffsetOverflow(usize),

    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch {
        expected: LinkDigest,
        actual: LinkDigest,
    },

    #[error("link not found: {0}")]
    LinkNotFound(LinkDigest),

    #[error("no end-of-chain base link in chain starting at {0}")]
    MissingBase(LinkDigest),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("request abandoned: {0}")]
    Abandoned(String),

    #[error("archive is internally inconsistent: {0}")]
    InvalidManifest(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Corrupt(_)
            | Self::VersionMismatch { .. }
            | Self::HunkOutOfRange { .. }
            | Self::OffsetOverflow(_)
            | Self::DigestMismatch { .. }
            | Self::InvalidManifest(_) => ErrorKind::CorruptData,
            Self::LinkNotFound(_) | Self::MissingBase(_) | Self::NotFound(_) => {
                ErrorKind::NotFound
            }
            Self::Timeout(_) | Self::Abandoned(_) => ErrorKind::Timeout,
            Self::Invariant(_) => ErrorKind::Invariant,
            Self::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorKind::NotFound,
            Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => ErrorKind::CorruptData,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}

impl From<VarIntError> for Error {
    fn from(e: VarIntError) -> Self {
        Self::Corrupt(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(Error::corrupt("x").kind(), ErrorKind::CorruptData);
        assert_eq!(
            Error::LinkNotFound(LinkDigest::NULL).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(Error::Timeout("t".into()).kind(), ErrorKind::Timeout);
        assert_eq!(Error::invariant("i").kind(), ErrorKind::Invariant);
        let eof = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(eof.kind(), ErrorKind::CorruptData);
        let missing = Error::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn varint_errors_are_corrupt() {
        let e: Error = VarIntError::Underflow.into();
        assert_eq!(e.kind(), ErrorKind::CorruptData);
    }

    #[test]
    fn messages_carry_context() {
        let e = Error::HunkOutOfRange {
            start: 4,
            end: 9,
            cursor: 0,
            len: 6,
        };
        let msg = e.to_string();
        assert!(msg.contains("[4, 9)"));
        assert!(msg.contains("length 6"));
    }
}
