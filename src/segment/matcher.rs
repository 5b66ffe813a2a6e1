// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Walks an index block forward, one entry at a time, to satisfy Get /
//! Lower / Higher queries. Never rewinds; never buffers more than the
//! current and previous decoded entries.
//!
//! Results carry the matched record's *position* in the decoded index
//! (not its byte offset) so a caller can cache it and resume a later walk
//! from the same spot.

use crate::{entry::Entry, ordering::Ordering as KeyOrdering};
use std::cmp::Ordering as CmpOrdering;

use super::codec::DecodedRecord;

/// Walks `records[start..]` looking for an entry satisfying `Get(target)`.
///
/// `Get`: current entry's key equals target, or current is a Range
/// covering target, is a hit; once the current key passes target with
/// neither condition holding, the search is over.
#[must_use]
pub fn get<'a>(
    records: &'a [DecodedRecord],
    start: usize,
    target: &[u8],
    ordering: &KeyOrdering,
) -> Option<(usize, &'a DecodedRecord)> {
    for (i, record) in records.iter().enumerate().skip(start) {
        if record.entry.covers(target) {
            return Some((i, record));
        }
        if ordering.compare(record.entry.sort_key(), target) == CmpOrdering::Greater {
            return None;
        }
    }
    None
}

/// Walks forward looking for the entry immediately below `target`
/// (strictly less than, except that a Range spanning `target` or ending
/// exactly at `target` counts as its own lower bound).
#[must_use]
pub fn lower<'a>(
    records: &'a [DecodedRecord],
    start: usize,
    target: &[u8],
    ordering: &KeyOrdering,
) -> Option<(usize, &'a DecodedRecord)> {
    let mut best: Option<(usize, &DecodedRecord)> = None;

    for (i, record) in records.iter().enumerate().skip(start) {
        match &record.entry {
            Entry::Range { to_key, .. } => {
                if record.entry.covers(target) || &**to_key == target {
                    return Some((i, record));
                }
                if ordering.compare(record.entry.sort_key(), target) == CmpOrdering::Less {
                    best = Some((i, record));
                } else {
                    break;
                }
            }
            Entry::Fixed { .. } => {
                if ordering.compare(record.entry.sort_key(), target) == CmpOrdering::Less {
                    best = Some((i, record));
                } else {
                    break;
                }
            }
        }
    }

    best
}

/// Walks forward looking for the first entry strictly greater than
/// `target` (a Range spanning `target` counts as its own higher bound).
#[must_use]
pub fn higher<'a>(
    records: &'a [DecodedRecord],
    start: usize,
    target: &[u8],
    ordering: &KeyOrdering,
) -> Option<(usize, &'a DecodedRecord)> {
    for (i, record) in records.iter().enumerate().skip(start) {
        if record.entry.is_range() && record.entry.covers(target) {
            return Some((i, record));
        }
        if ordering.compare(record.entry.sort_key(), target) == CmpOrdering::Greater {
            return Some((i, record));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entry::Entry, ordering, slice::Slice};

    fn fixture() -> Vec<DecodedRecord> {
        let keys: [&[u8]; 3] = [b"a", b"c", b"e"];
        keys.iter()
            .enumerate()
            .map(|(i, k)| DecodedRecord {
                offset: i as u64,
                next_offset: i as u64 + 1,
                entry: Entry::put(Slice::from(*k), None, None),
            })
            .collect()
    }

    #[test]
    fn get_finds_exact_match() {
        let records = fixture();
        let ord = ordering::lexicographic();
        let (pos, r) = get(&records, 0, b"c", &ord).expect("expected a match");
        assert_eq!(pos, 1);
        assert_eq!(r.entry.sort_key(), b"c");
    }

    #[test]
    fn get_misses_absent_key() {
        let records = fixture();
        let ord = ordering::lexicographic();
        assert!(get(&records, 0, b"b", &ord).is_none());
    }

    #[test]
    fn lower_returns_strictly_smaller() {
        let records = fixture();
        let ord = ordering::lexicographic();
        let (pos, r) = lower(&records, 0, b"d", &ord).expect("expected a lower bound");
        assert_eq!(pos, 1);
        assert_eq!(r.entry.sort_key(), b"c");
    }

    #[test]
    fn higher_returns_strictly_greater() {
        let records = fixture();
        let ord = ordering::lexicographic();
        let (pos, r) = higher(&records, 0, b"c", &ord).expect("expected a higher bound");
        assert_eq!(pos, 2);
        assert_eq!(r.entry.sort_key(), b"e");
    }
}
