// Build chain links from versions and rebuild versions from chains.

use crate::delta::{bdiff, mpatch, zlib};
use crate::digest::LinkDigest;
use crate::error::{Error, Result};
use crate::link::HistoryLink;

/// Encodes new versions as links and decodes link chains back to text.
///
/// Full copies and patches are both stored through [`zlib::compress`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaCoder;

impl DeltaCoder {
    pub fn new() -> Self {
        Self
    }

    /// Build the link storing `new`.
    ///
    /// Without `old` the link is a full copy (end of chain). With `old` the
    /// link stores the patch from `old` to `new`; `parent` must then be the
    /// link that `old` was read from. A full copy may still name a parent,
    /// which keeps history reachable across chain truncation.
    pub fn make_delta(&self, parent: Option<LinkDigest>, old: Option<&[u8]>, new: &[u8]) -> Result<HistoryLink> {
        match old {
            None => {
                let payload = zlib::compress(new)?;
                log::trace!("coder: full copy {} -> {} bytes", new.len(), payload.len());
                HistoryLink::new(parent, payload, true)
            }
            Some(old) => {
                if parent.is_none() {
                    return Err(Error::invariant("a delta link needs a parent"));
                }
                let patch = bdiff::diff(old, new)?;
                let payload = zlib::compress(&patch)?;
                log::trace!(
                    "coder: delta {} -> {} bytes (patch {}, stored {})",
                    old.len(),
                    new.len(),
                    patch.len(),
                    payload.len()
                );
                HistoryLink::new(parent, payload, false)
            }
        }
    }

    /// Rebuild the newest version from `history`, given newest first.
    ///
    /// Walks until the first end-of-chain link, then applies the collected
    /// patches oldest first. Links after the base are ignored.
    pub fn apply_deltas<'a, I>(&self, history: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = &'a HistoryLink>,
    {
        let mut head = None;
        let mut deltas = Vec::new();
        for link in history {
            head.get_or_insert(link.digest());
            let text = zlib::decompress(link.payload()).map_err(|e| {
                Error::corrupt(format!("payload of link {}: {e}", link.digest()))
            })?;
            if link.is_end() {
                deltas.reverse();
                return mpatch::patch(&text, &deltas);
            }
            deltas.push(text);
        }
        Err(Error::MissingBase(head.unwrap_or(LinkDigest::NULL)))
    }
}
