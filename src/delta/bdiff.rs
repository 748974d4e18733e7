// Line-oriented binary diff.
//
// Produces the classic revlog patch stream: a sequence of 12-byte big-endian
// headers `(old_start, old_end, new_len)` each followed by `new_len` bytes of
// replacement text. The matcher (line hashing, equivalence classes, longest
// match search and hunk normalization) has to reproduce the reference output
// byte for byte, because stored deltas are addressed by the digest of their
// encoding.
//
// Lines and hunks are plain index records over the two input buffers; no
// pointers into the buffers are kept.

use crate::error::{Error, Result};

/// "No line" marker for chain links and table slots.
const NONE: usize = usize::MAX;

/// Length of one encoded hunk header.
pub const HUNK_HEADER_LEN: usize = 12;

/// Largest offset or length the patch format can carry.
const MAX_ENCODED: usize = i32::MAX as usize;

// ---------------------------------------------------------------------------
// Line table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Line {
    /// Rolling hash of the line's bytes.
    h: u32,
    /// Byte length including the trailing `\n`, if any.
    len: usize,
    /// Offset of the first byte in the owning buffer.
    start: usize,
    /// Next line in the other file with the same content (or `NONE`).
    n: usize,
    /// Equivalence class (hash table slot).
    e: usize,
}

impl Line {
    const fn sentinel(start: usize) -> Self {
        Self {
            h: 0,
            len: 0,
            start,
            n: NONE,
            e: 0,
        }
    }
}

/// Split `buf` into lines. A line ends at `\n` or at the last byte of the
/// buffer. One zero-length sentinel line pointing at `buf.len()` is appended,
/// so the returned table has `line_count + 1` entries.
fn splitlines(buf: &[u8]) -> Vec<Line> {
    let count = buf
        .iter()
        .enumerate()
        .filter(|&(i, &c)| c == b'\n' || i + 1 == buf.len())
        .count();

    let mut lines = Vec::with_capacity(count + 1);
    let mut h: u32 = 0;
    let mut start = 0usize;
    for (i, &c) in buf.iter().enumerate() {
        h = h
            .wrapping_mul(1_664_525)
            .wrapping_add(u32::from(c))
            .wrapping_add(1_013_904_223);
        if c == b'\n' || i + 1 == buf.len() {
            lines.push(Line {
                h,
                len: i + 1 - start,
                start,
                n: NONE,
                e: 0,
            });
            h = 0;
            start = i + 1;
        }
    }
    lines.push(Line::sentinel(buf.len()));
    lines
}

#[inline]
fn same_line(a: &Line, abuf: &[u8], b: &Line, bbuf: &[u8]) -> bool {
    a.h == b.h
        && a.len == b.len
        && abuf[a.start..a.start + a.len] == bbuf[b.start..b.start + b.len]
}

// ---------------------------------------------------------------------------
// Equivalence classes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Slot {
    /// Most recently inserted `b` line of this class.
    pos: usize,
    /// Number of `b` lines in this class.
    len: usize,
}

/// Allocate a cleared hash table, trying 4x, 2x and 1x `buckets` slots.
fn alloc_table(buckets: usize) -> Option<Vec<Slot>> {
    let mut scale = 4usize;
    while scale > 0 {
        if let Some(size) = buckets.checked_mul(scale) {
            let mut table = Vec::new();
            if table.try_reserve_exact(size).is_ok() {
                table.resize(size, Slot { pos: NONE, len: 0 });
                return Some(table);
            }
        }
        scale /= 2;
    }
    None
}

/// Assign equivalence classes to every line of both files and link each
/// `a` line to the newest matching `b` line. Returns `false` when no table
/// could be allocated.
fn equatelines(a: &mut [Line], an: usize, abuf: &[u8], b: &mut [Line], bn: usize, bbuf: &[u8]) -> bool {
    let mut buckets = 1usize;
    while buckets < bn + 1 {
        buckets *= 2;
    }

    let Some(mut table) = alloc_table(buckets) else {
        return false;
    };
    let mask = table.len() - 1;

    for i in (0..bn).rev() {
        let mut j = b[i].h as usize & mask;
        while table[j].pos != NONE {
            if same_line(&b[i], bbuf, &b[table[j].pos], bbuf) {
                break;
            }
            j = (j + 1) & mask;
        }
        b[i].n = table[j].pos;
        b[i].e = j;
        table[j].pos = i;
        table[j].len += 1;
    }

    // Popularity threshold: very common lines (blank lines, braces) are not
    // chained into the match search.
    let t = if bn >= 4000 { bn / 1000 } else { bn + 1 };

    for i in 0..an {
        let mut j = a[i].h as usize & mask;
        while table[j].pos != NONE {
            if same_line(&a[i], abuf, &b[table[j].pos], bbuf) {
                break;
            }
            j = (j + 1) & mask;
        }
        a[i].e = j;
        a[i].n = if table[j].len <= t { table[j].pos } else { NONE };
    }
    true
}

// ---------------------------------------------------------------------------
// Match search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Pos {
    pos: usize,
    len: usize,
}

/// A matched region: old lines `[a1, a2)` equal new lines `[b1, b2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hunk {
    pub a1: usize,
    pub a2: usize,
    pub b1: usize,
    pub b2: usize,
}

/// Longest run of matching lines inside `[a1, a2) x [b1, b2)`.
/// Returns `(i, j, k)`: the run starts at old line `i`, new line `j` and is
/// `k` lines long (`k == 0` means no match).
///
/// `pos` is shared across every call of one diff and never cleared; stale
/// entries are part of the reference behaviour.
#[allow(clippy::too_many_arguments)]
fn longest_match(
    a: &[Line],
    b: &[Line],
    pos: &mut [Pos],
    a1: usize,
    a2: usize,
    b1: usize,
    b2: usize,
) -> (usize, usize, usize) {
    let (mut mi, mut mj, mut mk, mut mb) = (a1, b1, 0usize, 0usize);

    for i in a1..a2 {
        let mut j = a[i].n;
        while j < b1 {
            j = b[j].n;
        }
        while j < b2 {
            let k = if i > a1 && j > b1 && pos[j - 1].pos == i - 1 {
                pos[j - 1].len + 1
            } else {
                1
            };
            pos[j] = Pos { pos: i, len: k };
            if k > mk {
                mi = i;
                mj = j;
                mk = k;
            }
            j = b[j].n;
        }
    }

    if mk != 0 {
        mi = mi + 1 - mk;
        mj = mj + 1 - mk;
    }

    // Grow over neighbouring lines that were skipped as too popular.
    while mi - mb > a1 && mj - mb > b1 && a[mi - mb - 1].e == b[mj - mb - 1].e {
        mb += 1;
    }
    while mi + mk < a2 && mj + mk < b2 && a[mi + mk].e == b[mj + mk].e {
        mk += 1;
    }

    (mi - mb, mj - mb, mk + mb)
}

enum Work {
    Range { a1: usize, a2: usize, b1: usize, b2: usize },
    Emit(Hunk),
}

/// Collect matches left to right. Equivalent to "recurse left, emit,
/// recurse right", with an explicit stack so deep inputs cannot overflow.
/// Match searches run in the same order as the recursive form, which matters
/// because they share `pos`.
fn collect_matches(a: &[Line], b: &[Line], pos: &mut [Pos], an: usize, bn: usize, out: &mut Vec<Hunk>) {
    let mut stack = vec![Work::Range {
        a1: 0,
        a2: an,
        b1: 0,
        b2: bn,
    }];
    while let Some(work) = stack.pop() {
        match work {
            Work::Emit(h) => out.push(h),
            Work::Range { a1, a2, b1, b2 } => {
                let (i, j, k) = longest_match(a, b, pos, a1, a2, b1, b2);
                if k == 0 {
                    continue;
                }
                stack.push(Work::Range {
                    a1: i + k,
                    a2,
                    b1: j + k,
                    b2,
                });
                stack.push(Work::Emit(Hunk {
                    a1: i,
                    a2: i + k,
                    b1: j,
                    b2: j + k,
                }));
                stack.push(Work::Range {
                    a1,
                    a2: i,
                    b1,
                    b2: j,
                });
            }
        }
    }
}

/// Slide each boundary between adjacent hunks towards the end of the file
/// while the lines crossing it are identical.
fn normalize(hunks: &mut [Hunk], a: &[Line], abuf: &[u8], an: usize, b: &[Line], bbuf: &[u8], bn: usize) {
    for idx in 0..hunks.len().saturating_sub(1) {
        let curr = hunks[idx];
        let next = hunks[idx + 1];
        let mut shift = 0usize;

        if curr.a2 == next.a1 {
            while curr.a2 + shift < an
                && curr.b2 + shift < bn
                && same_line(&a[curr.a2 + shift], abuf, &b[curr.b2 + shift], bbuf)
            {
                shift += 1;
            }
        } else if curr.b2 == next.b1 {
            while curr.b2 + shift < bn
                && curr.a2 + shift < an
                && same_line(&b[curr.b2 + shift], bbuf, &a[curr.a2 + shift], abuf)
            {
                shift += 1;
            }
        }

        if shift == 0 {
            continue;
        }
        hunks[idx].a2 += shift;
        hunks[idx].b2 += shift;
        hunks[idx + 1].a1 += shift;
        hunks[idx + 1].b1 += shift;
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

struct Matched {
    a: Vec<Line>,
    b: Vec<Line>,
    hunks: Vec<Hunk>,
}

fn match_lines(old: &[u8], new: &[u8]) -> Matched {
    let mut a = splitlines(old);
    let mut b = splitlines(new);
    let an = a.len() - 1;
    let bn = b.len() - 1;

    let mut hunks = Vec::with_capacity(an.min(bn) + 1);
    if equatelines(&mut a, an, old, &mut b, bn, new) {
        let mut pos = vec![Pos { pos: 0, len: 0 }; bn.max(1)];
        collect_matches(&a, &b, &mut pos, an, bn, &mut hunks);
    } else {
        log::warn!("bdiff: no memory for line table ({bn} lines), emitting full replacement");
    }
    hunks.push(Hunk {
        a1: an,
        a2: an,
        b1: bn,
        b2: bn,
    });

    normalize(&mut hunks, &a, old, an, &b, new, bn);
    Matched { a, b, hunks }
}

/// Matched line regions between `old` and `new`, in order, terminated by the
/// empty hunk `(an, an, bn, bn)`.
pub fn hunks(old: &[u8], new: &[u8]) -> Vec<Hunk> {
    match_lines(old, new).hunks
}

fn encoded(value: usize) -> Result<[u8; 4]> {
    if value > MAX_ENCODED {
        return Err(Error::OffsetOverflow(value));
    }
    Ok((value as u32).to_be_bytes())
}

/// Binary patch turning `old` into `new`. Identical inputs give an empty patch.
pub fn diff(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    let Matched { a, b, hunks } = match_lines(old, new);

    let mut out = Vec::new();
    let (mut la, mut lb) = (0usize, 0usize);
    for h in &hunks {
        if h.a1 != la || h.b1 != lb {
            let from = b[lb].start;
            let len = b[h.b1].start - from;
            out.extend_from_slice(&encoded(a[la].start)?);
            out.extend_from_slice(&encoded(a[h.a1].start)?);
            out.extend_from_slice(&encoded(len)?);
            out.extend_from_slice(&new[from..from + len]);
        }
        la = h.a2;
        lb = h.b2;
    }
    log::trace!(
        "bdiff: {} -> {} bytes, {} hunks, {} patch bytes",
        old.len(),
        new.len(),
        hunks.len(),
        out.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(start: u32, end: u32, len: u32) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&start.to_be_bytes());
        v.extend_from_slice(&end.to_be_bytes());
        v.extend_from_slice(&len.to_be_bytes());
        v
    }

    #[test]
    fn splitlines_counts_unterminated_tail() {
        let lines = splitlines(b"a\nbc\nd");
        assert_eq!(lines.len(), 4);
        assert_eq!((lines[0].start, lines[0].len), (0, 2));
        assert_eq!((lines[1].start, lines[1].len), (2, 3));
        assert_eq!((lines[2].start, lines[2].len), (5, 1));
        assert_eq!((lines[3].start, lines[3].len, lines[3].h), (6, 0, 0));
    }

    #[test]
    fn splitlines_empty() {
        let lines = splitlines(b"");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].start, 0);
    }

    #[test]
    fn line_hash_is_wrapping_lcg() {
        let lines = splitlines(b"\n");
        let expected = 0u32
            .wrapping_mul(1_664_525)
            .wrapping_add(10)
            .wrapping_add(1_013_904_223);
        assert_eq!(lines[0].h, expected);
    }

    #[test]
    fn insert_into_empty() {
        let mut expected = header(0, 0, 5);
        expected.extend_from_slice(b"hello");
        assert_eq!(diff(b"", b"hello").unwrap(), expected);
    }

    #[test]
    fn identical_is_empty_patch() {
        assert!(diff(b"hello", b"hello").unwrap().is_empty());
        assert!(diff(b"", b"").unwrap().is_empty());
        assert!(diff(b"a\nb\nc\n", b"a\nb\nc\n").unwrap().is_empty());
    }

    #[test]
    fn self_diff_is_one_full_match() {
        let text = b"one\ntwo\nthree\n";
        let h = hunks(text, text);
        assert_eq!(
            h,
            vec![
                Hunk { a1: 0, a2: 3, b1: 0, b2: 3 },
                Hunk { a1: 3, a2: 3, b1: 3, b2: 3 },
            ]
        );
    }

    #[test]
    fn single_line_replaced() {
        let mut expected = header(0, 6, 12);
        expected.extend_from_slice(b"hello world\n");
        assert_eq!(diff(b"hello\n", b"hello world\n").unwrap(), expected);
    }

    #[test]
    fn delete_everything() {
        assert_eq!(diff(b"abc\ndef\n", b"").unwrap(), header(0, 8, 0));
    }

    #[test]
    fn middle_line_change() {
        let old = b"a\nb\nc\n";
        let new = b"a\nX\nc\n";
        let mut expected = header(2, 4, 2);
        expected.extend_from_slice(b"X\n");
        assert_eq!(diff(old, new).unwrap(), expected);
    }

    #[test]
    fn repeated_lines_shift_towards_end() {
        // Inserting one blank line into a run of blank lines: the insertion
        // point is pushed to the end of the run.
        let old = b"x\n\n\n\ny\n";
        let new = b"x\n\n\n\n\ny\n";
        let patch = diff(old, new).unwrap();
        let mut expected = header(5, 5, 1);
        expected.extend_from_slice(b"\n");
        assert_eq!(patch, expected);
    }

    #[test]
    fn popular_lines_threshold_path() {
        // More than 4000 lines in `new` activates the popularity cutoff.
        let mut old = Vec::new();
        let mut new = Vec::new();
        for i in 0..5000 {
            old.extend_from_slice(b"\n");
            new.extend_from_slice(b"\n");
            if i % 500 == 0 {
                new.extend_from_slice(format!("marker {i}\n").as_bytes());
            }
        }
        let patch = diff(&old, &new).unwrap();
        let rebuilt = crate::delta::mpatch::patch(&old, &[patch.as_slice()]).unwrap();
        assert_eq!(rebuilt, new);
    }

    #[test]
    fn hunks_are_ordered_and_disjoint() {
        let old = b"1\n2\n3\n4\n5\n6\n7\n8\n";
        let new = b"1\n3\n4\nnew\n6\n8\n9\n";
        let h = hunks(old, new);
        for w in h.windows(2) {
            assert!(w[0].a2 <= w[1].a1);
            assert!(w[0].b2 <= w[1].b1);
        }
        let last = h.last().unwrap();
        assert_eq!((last.a1, last.b1), (8, 7));
    }
}
