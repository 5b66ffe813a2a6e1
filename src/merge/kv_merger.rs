// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Resolves a collision between a *new* entry and an *old* entry that
//! share a key, and drives the two-cursor walk that decides, for every
//! key in either stream, whether the merger emits it untouched, resolved,
//! or not at all.

use crate::{
    deadline::{self, Deadline, HasTimeLeftAtLeast},
    entry::{Entry, FixedKind, FixedValue, ValueHandle},
    ordering::Ordering as KeyOrdering,
    slice::Slice,
};
use std::cmp::Ordering as CmpOrdering;

/// `v0 ?? v1`: prefer the new side's value if present, otherwise the old
/// side's.
fn pick_value(new: &ValueHandle, old: &ValueHandle) -> ValueHandle {
    if new.is_present() {
        new.clone()
    } else {
        old.clone()
    }
}

fn resolve_remove_over_value(
    dr0: Deadline,
    old: &FixedValue,
    has_time_left_at_least: HasTimeLeftAtLeast,
    now: u64,
) -> FixedValue {
    match dr0 {
        None => FixedValue::remove(None),
        Some(_) if !has_time_left_at_least(dr0, now) => FixedValue::remove(dr0),
        Some(_) => FixedValue {
            kind: FixedKind::Put,
            value: old.value.clone(),
            deadline: deadline::min_deadline(dr0, old.deadline),
        },
    }
}

/// Resolves a same-key collision between two Fixed values, independent of
/// whether either side originated from a Range's `rangeValue`/`fromValue`.
#[must_use]
pub fn resolve_fixed_collision(
    new: &FixedValue,
    old: &FixedValue,
    has_time_left_at_least: HasTimeLeftAtLeast,
    now: u64,
) -> FixedValue {
    match (new.kind, old.kind) {
        (FixedKind::Put, _) => FixedValue {
            kind: FixedKind::Put,
            value: new.value.clone(),
            deadline: new.deadline,
        },
        (FixedKind::Update, FixedKind::Put) => FixedValue {
            kind: FixedKind::Put,
            value: pick_value(&new.value, &old.value),
            deadline: new.deadline.or(old.deadline),
        },
        (FixedKind::Update, FixedKind::Update) => FixedValue {
            kind: FixedKind::Update,
            value: pick_value(&new.value, &old.value),
            deadline: deadline::min_deadline(new.deadline, old.deadline),
        },
        (FixedKind::Update, FixedKind::Remove) => old.clone(),
        (FixedKind::Remove, FixedKind::Put | FixedKind::Update) => {
            resolve_remove_over_value(new.deadline, old, has_time_left_at_least, now)
        }
        (FixedKind::Remove, FixedKind::Remove) => FixedValue {
            kind: FixedKind::Remove,
            value: ValueHandle::Memory(None),
            deadline: deadline::min_deadline(new.deadline, old.deadline),
        },
    }
}

/// Whether a Fixed value survives a last-level merge: a dangling `Update`
/// (no `Put` ever resolved under it) carries no meaning once nothing below
/// can supply a base value; a `Remove` with no future deadline has nothing
/// left to shadow; a `Put` already past its own deadline is just dead.
fn survives_last_level(fixed: &FixedValue, is_last_level: bool, now: u64) -> bool {
    if !is_last_level {
        return true;
    }
    match fixed.kind {
        FixedKind::Remove => fixed.deadline.is_some_and(|d| d > now),
        FixedKind::Update => false,
        FixedKind::Put => !deadline::is_expired(fixed.deadline, now),
    }
}

fn survives_last_level_entry(entry: &Entry, is_last_level: bool, now: u64) -> bool {
    match entry {
        Entry::Fixed { fixed, .. } => survives_last_level(fixed, is_last_level, now),
        Entry::Range { range_value, .. } => survives_last_level(range_value, is_last_level, now),
    }
}

fn push_if_survives(out: &mut Vec<Entry>, entry: Entry, is_last_level: bool, now: u64) {
    if survives_last_level_entry(&entry, is_last_level, now) {
        out.push(entry);
    }
}

enum DissolveStep {
    /// `other`'s key precedes the range's span entirely.
    Before,
    /// `other` falls within `[from_key, to_key)`; resolved per-key.
    Inside(Entry),
    /// `other`'s key is at or past the range's upper bound. The range has
    /// now been compared against every opposing entry that could fall in
    /// its span, so it is fully dissolved and is not re-emitted.
    After,
}

/// Advances a Range entry against a single Fixed entry from the other
/// stream. `range_is_new` picks which side of [`resolve_fixed_collision`]
/// the range's effective value plays.
#[allow(clippy::too_many_arguments)]
fn dissolve_step(
    other: &Entry,
    from_key: &Slice,
    to_key: &Slice,
    from_value: &Option<FixedValue>,
    range_value: &FixedValue,
    range_is_new: bool,
    has_time_left_at_least: HasTimeLeftAtLeast,
    now: u64,
    ordering: &KeyOrdering,
) -> DissolveStep {
    let key = other.sort_key();

    if ordering.compare(key, from_key) == CmpOrdering::Less {
        return DissolveStep::Before;
    }
    if ordering.compare(key, to_key) != CmpOrdering::Less {
        return DissolveStep::After;
    }

    let Entry::Fixed {
        key: fixed_key,
        fixed,
    } = other
    else {
        log::warn!("a range overlapped another range during merge; the incoming range wins");
        return DissolveStep::Inside(other.clone());
    };

    let effective_range_side = if ordering.compare(fixed_key, from_key) == CmpOrdering::Equal {
        from_value.as_ref().unwrap_or(range_value)
    } else {
        range_value
    };

    let resolved = if range_is_new {
        resolve_fixed_collision(effective_range_side, fixed, has_time_left_at_least, now)
    } else {
        resolve_fixed_collision(fixed, effective_range_side, has_time_left_at_least, now)
    };

    DissolveStep::Inside(Entry::Fixed {
        key: fixed_key.clone(),
        fixed: resolved,
    })
}

/// Walks `new_entries` and `old_entries` in lock-step by sort key and
/// returns the fully resolved, TTL- and last-level-filtered output stream.
///
/// Kept as a plain in-memory pass (both inputs are already materialized
/// `Vec<Entry>` by the time a merge is requested) rather than a true
/// streaming iterator, the same simplification the key matcher makes over
/// a segment's decoded index.
pub fn merge_streams(
    new_entries: &[Entry],
    old_entries: &[Entry],
    is_last_level: bool,
    has_time_left_at_least: HasTimeLeftAtLeast,
    now: u64,
    ordering: &KeyOrdering,
) -> Vec<Entry> {
    let mut out = Vec::new();
    let mut ni = 0usize;
    let mut oi = 0usize;

    while ni < new_entries.len() && oi < old_entries.len() {
        let new_entry = &new_entries[ni];
        let old_entry = &old_entries[oi];

        if let Entry::Range {
            from_key,
            to_key,
            from_value,
            range_value,
        } = new_entry
        {
            match dissolve_step(
                old_entry,
                from_key,
                to_key,
                from_value,
                range_value,
                true,
                has_time_left_at_least,
                now,
                ordering,
            ) {
                DissolveStep::Before => {
                    push_if_survives(&mut out, old_entry.clone(), is_last_level, now);
                    oi += 1;
                }
                DissolveStep::Inside(resolved) => {
                    push_if_survives(&mut out, resolved, is_last_level, now);
                    oi += 1;
                }
                DissolveStep::After => {
                    // Every old entry inside [from_key, to_key) has already been
                    // dissolved into a transformed Fixed entry above; the range
                    // itself carries nothing further to represent in this merge.
                    ni += 1;
                }
            }
            continue;
        }

        if let Entry::Range {
            from_key,
            to_key,
            from_value,
            range_value,
        } = old_entry
        {
            match dissolve_step(
                new_entry,
                from_key,
                to_key,
                from_value,
                range_value,
                false,
                has_time_left_at_least,
                now,
                ordering,
            ) {
                DissolveStep::Before => {
                    push_if_survives(&mut out, new_entry.clone(), is_last_level, now);
                    ni += 1;
                }
                DissolveStep::Inside(resolved) => {
                    push_if_survives(&mut out, resolved, is_last_level, now);
                    ni += 1;
                }
                DissolveStep::After => {
                    // Every new entry inside [from_key, to_key) has already been
                    // dissolved into a transformed Fixed entry above; the range
                    // itself carries nothing further to represent in this merge.
                    oi += 1;
                }
            }
            continue;
        }

        match ordering.compare(new_entry.sort_key(), old_entry.sort_key()) {
            CmpOrdering::Less => {
                push_if_survives(&mut out, new_entry.clone(), is_last_level, now);
                ni += 1;
            }
            CmpOrdering::Greater => {
                push_if_survives(&mut out, old_entry.clone(), is_last_level, now);
                oi += 1;
            }
            CmpOrdering::Equal => {
                let Entry::Fixed {
                    key,
                    fixed: new_fixed,
                } = new_entry
                else {
                    unreachable!("Range entries are consumed by the dissolve branches above");
                };
                let Entry::Fixed {
                    fixed: old_fixed, ..
                } = old_entry
                else {
                    unreachable!("Range entries are consumed by the dissolve branches above");
                };
                let resolved = resolve_fixed_collision(
                    new_fixed,
                    old_fixed,
                    has_time_left_at_least,
                    now,
                );
                push_if_survives(
                    &mut out,
                    Entry::Fixed {
                        key: key.clone(),
                        fixed: resolved,
                    },
                    is_last_level,
                    now,
                );
                ni += 1;
                oi += 1;
            }
        }
    }

    while ni < new_entries.len() {
        push_if_survives(&mut out, new_entries[ni].clone(), is_last_level, now);
        ni += 1;
    }
    while oi < old_entries.len() {
        push_if_survives(&mut out, old_entries[oi].clone(), is_last_level, now);
        oi += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering;

    fn lex() -> KeyOrdering {
        ordering::lexicographic()
    }

    #[test]
    fn update_over_put_keeps_old_value_when_new_has_none() {
        let new = Entry::update(Slice::from(b"1".as_slice()), Some(Slice::from(b"9".as_slice())), None);
        let old = Entry::put(Slice::from(b"1".as_slice()), Some(Slice::from(b"1".as_slice())), Some(100));

        let out = merge_streams(
            std::slice::from_ref(&new),
            std::slice::from_ref(&old),
            false,
            deadline::default_has_time_left_at_least,
            0,
            &lex(),
        );

        assert_eq!(out.len(), 1);
        let Entry::Fixed { fixed, .. } = &out[0] else {
            panic!("expected fixed");
        };
        assert_eq!(fixed.kind, FixedKind::Put);
        assert_eq!(fixed.deadline, Some(100));
    }

    #[test]
    fn remove_with_future_deadline_over_put_accelerates_expiry() {
        let new = Entry::remove(Slice::from(b"1".as_slice()), Some(1_005));
        let old = Entry::put(Slice::from(b"1".as_slice()), Some(Slice::from(b"1".as_slice())), Some(1_020));

        let out = merge_streams(
            std::slice::from_ref(&new),
            std::slice::from_ref(&old),
            false,
            deadline::default_has_time_left_at_least,
            1_000,
            &lex(),
        );

        assert_eq!(out.len(), 1);
        let Entry::Fixed { fixed, .. } = &out[0] else {
            panic!("expected fixed");
        };
        assert_eq!(fixed.kind, FixedKind::Put);
        assert_eq!(fixed.deadline, Some(1_005));
    }

    #[test]
    fn range_dominates_overlapping_fixed_entries() {
        // Keys are raw single bytes (5, 7, 10), not ASCII digit strings, so
        // byte-lexicographic order agrees with their numeric order.
        let range = Entry::Range {
            from_key: Slice::from(vec![5u8]),
            to_key: Slice::from(vec![10u8]),
            from_value: None,
            range_value: FixedValue::update(Some(Slice::from(b"7".as_slice())), None),
        };
        let old = vec![
            Entry::put(Slice::from(vec![5u8]), Some(Slice::from(b"1".as_slice())), None),
            Entry::put(Slice::from(vec![7u8]), Some(Slice::from(b"1".as_slice())), None),
            Entry::put(Slice::from(vec![10u8]), Some(Slice::from(b"1".as_slice())), None),
        ];

        let out = merge_streams(
            std::slice::from_ref(&range),
            &old,
            false,
            deadline::default_has_time_left_at_least,
            0,
            &lex(),
        );

        assert_eq!(out.len(), 3);
        for (entry, expected_key) in out.iter().zip([vec![5u8], vec![7u8], vec![10u8]]) {
            assert_eq!(entry.sort_key(), expected_key.as_slice());
        }

        let Entry::Fixed { fixed, .. } = &out[0] else {
            panic!("expected fixed")
        };
        assert_eq!(fixed.value.fetch().unwrap().as_deref(), Some(b"7".as_slice()));

        let Entry::Fixed { fixed, .. } = &out[2] else {
            panic!("expected fixed")
        };
        assert_eq!(fixed.value.fetch().unwrap().as_deref(), Some(b"1".as_slice()));
    }

    #[test]
    fn last_level_drops_expired_put_and_dangling_update() {
        let new: Vec<Entry> = vec![];
        let old = vec![
            Entry::put(Slice::from(b"1".as_slice()), Some(Slice::from(b"1".as_slice())), Some(1)),
            Entry::update(Slice::from(b"2".as_slice()), Some(Slice::from(b"2".as_slice())), None),
        ];

        let out = merge_streams(
            &new,
            &old,
            true,
            deadline::default_has_time_left_at_least,
            1_000,
            &lex(),
        );

        assert!(out.is_empty());
    }

    #[test]
    fn disjoint_keys_pass_through_untouched() {
        let new = vec![Entry::put(Slice::from(b"a".as_slice()), None, None)];
        let old = vec![Entry::put(Slice::from(b"b".as_slice()), None, None)];

        let out = merge_streams(
            &new,
            &old,
            false,
            deadline::default_has_time_left_at_least,
            0,
            &lex(),
        );

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sort_key(), b"a");
        assert_eq!(out[1].sort_key(), b"b");
    }
}
