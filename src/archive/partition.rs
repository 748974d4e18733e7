// Block partitioning: decides which adjacent blocks to merge so that block
// sizes grow geometrically from newest to oldest.

use crate::error::{Error, Result};

/// A run of adjacent blocks `start..=end` and their combined length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub start: usize,
    pub end: usize,
    pub length: u64,
}

impl Partition {
    pub fn new(start: usize, end: usize, length: u64) -> Self {
        Self { start, end, length }
    }

    fn merge(self, next: Partition) -> Partition {
        Partition::new(self.start, next.end, self.length + next.length)
    }
}

/// True if lengths never decrease. Trailing empty partitions are ignored.
pub fn is_ordered(partitions: &[Partition]) -> bool {
    let live = partitions
        .iter()
        .rposition(|p| p.length != 0)
        .map_or(0, |i| i + 1);
    partitions[..live].windows(2).all(|w| w[0].length <= w[1].length)
}

/// True if each partition is well formed and starts at or right after the
/// end of the one before it.
pub fn is_contiguous(partitions: &[Partition]) -> bool {
    partitions.iter().all(|p| p.start <= p.end)
        && partitions
            .windows(2)
            .all(|w| w[1].start == w[0].end || w[1].start == w[0].end + 1)
}

/// Merge any partition that is not smaller than its successor by at least
/// `multiple` into that successor, until no such pair remains.
pub fn repartition(partitions: &[Partition], multiple: u64) -> Vec<Partition> {
    let mut parts = partitions.to_vec();
    let mut from = 0;
    while let Some(i) = (from..parts.len().saturating_sub(1))
        .find(|&i| parts[i].length.saturating_mul(multiple) >= parts[i + 1].length)
    {
        debug_assert!(parts[i + 1].start >= parts[i].end);
        let next = parts.remove(i + 1);
        parts[i] = parts[i].merge(next);
        from = i;
    }
    parts
}

/// Reduce `partitions` to at most `max_len` entries.
///
/// Empty partitions are dropped first. While too many remain, the two
/// newest are merged and the whole list is repartitioned.
pub fn compress(partitions: &[Partition], max_len: usize, multiple: u64) -> Result<Vec<Partition>> {
    if !is_contiguous(partitions) {
        return Err(Error::invariant("partitions are not contiguous"));
    }
    let mut parts: Vec<Partition> = partitions.iter().copied().filter(|p| p.length > 0).collect();
    if parts.len() <= max_len {
        return Ok(parts);
    }
    if max_len < 2 {
        return Err(Error::invariant(format!("can't compress to {max_len} partitions")));
    }

    while parts.len() > max_len {
        let second = parts.remove(1);
        parts[0] = parts[0].merge(second);
        parts = repartition(&parts, multiple);
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn singles(lengths: &[u64]) -> Vec<Partition> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, &l)| Partition::new(i, i, l))
            .collect()
    }

    #[test]
    fn ordered_ignores_trailing_zeros() {
        assert!(is_ordered(&singles(&[1, 2, 2, 5, 0, 0])));
        assert!(!is_ordered(&singles(&[3, 2])));
        assert!(is_ordered(&[]));
    }

    #[test]
    fn contiguity() {
        assert!(is_contiguous(&singles(&[1, 1, 1])));
        assert!(is_contiguous(&[Partition::new(0, 2, 1), Partition::new(3, 3, 1)]));
        assert!(!is_contiguous(&[Partition::new(0, 0, 1), Partition::new(2, 2, 1)]));
        assert!(!is_contiguous(&[Partition::new(2, 1, 1)]));
    }

    #[test]
    fn repartition_merges_until_geometric() {
        // 5*2 >= 8, so the first two merge; 13*2 >= 20 merges again.
        let parts = repartition(&singles(&[5, 8, 20, 100]), 2);
        assert_eq!(parts, vec![Partition::new(0, 2, 33), Partition::new(3, 3, 100)]);
        assert!(is_ordered(&parts));
    }

    #[test]
    fn repartition_leaves_geometric_alone() {
        let input = singles(&[1, 3, 10, 40]);
        assert_eq!(repartition(&input, 2), input);
    }

    #[test]
    fn compress_noop_when_small_enough() {
        let input = singles(&[10, 1, 0]);
        let out = compress(&input, 4, 2).unwrap();
        assert_eq!(out, singles(&[10, 1]));
    }

    #[test]
    fn compress_reaches_limit() {
        let input = singles(&[1, 2, 4, 8, 16, 32, 64, 128]);
        let out = compress(&input, 4, 2).unwrap();
        assert!(out.len() <= 4);
        assert!(is_contiguous(&out));
        assert_eq!(out.iter().map(|p| p.length).sum::<u64>(), 255);
        assert_eq!(out.first().unwrap().start, 0);
        assert_eq!(out.last().unwrap().end, 7);
    }

    #[test]
    fn compress_rejects_tiny_limit() {
        assert!(compress(&singles(&[1, 1, 1]), 1, 2).is_err());
        assert!(compress(&[Partition::new(0, 0, 1), Partition::new(5, 5, 1)], 4, 2).is_err());
    }
}
