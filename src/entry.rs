// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The entry sum type: Fixed (`Put`/`Update`/`Remove`) and Range variants,
//! each either materialized in memory or held as a lazy pointer into a
//! segment's values block.
//!
//! The original specification calls for "two parallel enums linked by a
//! trait, or a single tagged enum with a two-bit storage-kind subtag" — we
//! take the single-enum route: [`Entry`] carries a [`ValueHandle`] that is
//! either `Memory` (materialized) or `Persistent` (lazy, backed by a file
//! handle), so the same `Entry` type serves both representations.

use crate::{deadline::Deadline, error::Result, file::FileHandle, slice::Slice};
use std::sync::Arc;

/// Which of the three Fixed operations an entry represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixedKind {
    Put,
    Update,
    Remove,
}

/// A value that is either already in RAM or must be fetched from a
/// segment's values block on demand.
#[derive(Clone)]
pub enum ValueHandle {
    Memory(Option<Slice>),
    Persistent(Option<PersistentValueRef>),
}

impl std::fmt::Debug for ValueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(v) => write!(f, "Memory({})", v.is_some()),
            Self::Persistent(v) => write!(f, "Persistent({})", v.is_some()),
        }
    }
}

/// A lazy pointer `(valueOffset, valueLength)` into a segment's values
/// block, plus the file handle to fetch it from.
#[derive(Clone)]
pub struct PersistentValueRef {
    pub file: Arc<dyn FileHandle>,
    pub offset: u64,
    pub length: u32,
}

impl PersistentValueRef {
    pub fn fetch(&self) -> Result<Slice> {
        self.file.read(self.offset, self.length as usize)
    }
}

impl ValueHandle {
    /// Materializes the value, reading from disk if this is a lazy
    /// `Persistent` handle.
    pub fn fetch(&self) -> Result<Option<Slice>> {
        match self {
            Self::Memory(v) => Ok(v.clone()),
            Self::Persistent(None) => Ok(None),
            Self::Persistent(Some(r)) => r.fetch().map(Some),
        }
    }

    /// Best-effort size estimate without touching disk (0 for an
    /// unfetched persistent value beyond its length).
    #[must_use]
    pub fn approx_len(&self) -> usize {
        match self {
            Self::Memory(Some(v)) => v.len(),
            Self::Memory(None) => 0,
            Self::Persistent(Some(r)) => r.length as usize,
            Self::Persistent(None) => 0,
        }
    }

    /// Whether a value exists at all, without fetching it from disk. Used
    /// by the key-value merger's `v0 ?? v1` value-selection rule, which
    /// only needs presence, not content, to decide.
    #[must_use]
    pub fn is_present(&self) -> bool {
        match self {
            Self::Memory(v) => v.is_some(),
            Self::Persistent(v) => v.is_some(),
        }
    }
}

/// A Fixed operation's payload: kind, value, deadline. Shared between a
/// standalone Fixed entry (applies at one key) and a Range's
/// `from_value`/`range_value` (applies at/across a span).
#[derive(Clone, Debug)]
pub struct FixedValue {
    pub kind: FixedKind,
    pub value: ValueHandle,
    pub deadline: Deadline,
}

impl FixedValue {
    #[must_use]
    pub fn put(value: Option<Slice>, deadline: Deadline) -> Self {
        Self {
            kind: FixedKind::Put,
            value: ValueHandle::Memory(value),
            deadline,
        }
    }

    #[must_use]
    pub fn update(value: Option<Slice>, deadline: Deadline) -> Self {
        Self {
            kind: FixedKind::Update,
            value: ValueHandle::Memory(value),
            deadline,
        }
    }

    #[must_use]
    pub fn remove(deadline: Deadline) -> Self {
        Self {
            kind: FixedKind::Remove,
            value: ValueHandle::Memory(None),
            deadline,
        }
    }

    #[must_use]
    pub fn approx_size(&self) -> usize {
        1 + self.value.approx_len() + 9
    }
}

/// A single decoded entry: either covers one key (`Fixed`) or a half-open
/// span `[from_key, to_key)` (`Range`).
#[derive(Clone, Debug)]
pub enum Entry {
    Fixed {
        key: Slice,
        fixed: FixedValue,
    },
    Range {
        from_key: Slice,
        to_key: Slice,
        from_value: Option<FixedValue>,
        range_value: FixedValue,
    },
}

impl Entry {
    #[must_use]
    pub fn put(key: Slice, value: Option<Slice>, deadline: Deadline) -> Self {
        Self::Fixed {
            key,
            fixed: FixedValue::put(value, deadline),
        }
    }

    #[must_use]
    pub fn update(key: Slice, value: Option<Slice>, deadline: Deadline) -> Self {
        Self::Fixed {
            key,
            fixed: FixedValue::update(value, deadline),
        }
    }

    #[must_use]
    pub fn remove(key: Slice, deadline: Deadline) -> Self {
        Self::Fixed {
            key,
            fixed: FixedValue::remove(deadline),
        }
    }

    /// The key used to order this entry in a segment: `key` for Fixed,
    /// `from_key` for Range.
    #[must_use]
    pub fn sort_key(&self) -> &[u8] {
        match self {
            Self::Fixed { key, .. } => key,
            Self::Range { from_key, .. } => from_key,
        }
    }

    /// The entry's own deadline. For Range, the range_value's deadline
    /// governs the whole span (the nearest-expiry scan also inspects
    /// `from_value` separately).
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        match self {
            Self::Fixed { fixed, .. } => fixed.deadline,
            Self::Range {
                from_value,
                range_value,
                ..
            } => crate::deadline::min_deadline(
                range_value.deadline,
                from_value.as_ref().and_then(|f| f.deadline),
            ),
        }
    }

    #[must_use]
    pub fn is_range(&self) -> bool {
        matches!(self, Self::Range { .. })
    }

    /// `true` if `key` falls within this entry's domain: equal to the key
    /// for Fixed, or within `[from_key, to_key)` for Range.
    #[must_use]
    pub fn covers(&self, key: &[u8]) -> bool {
        match self {
            Self::Fixed { key: k, .. } => &**k == key,
            Self::Range {
                from_key, to_key, ..
            } => &**from_key <= key && key < &**to_key,
        }
    }

    /// Rough encoded-size estimate, used by the segment merger's `Stats`
    /// accumulator to decide when to roll a new output segment.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        match self {
            Self::Fixed { key, fixed } => key.len() + fixed.approx_size() + 8,
            Self::Range {
                from_key,
                to_key,
                from_value,
                range_value,
            } => {
                from_key.len()
                    + to_key.len()
                    + from_value.as_ref().map_or(0, FixedValue::approx_size)
                    + range_value.approx_size()
                    + 8
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_covers_half_open_span() {
        let e = Entry::Range {
            from_key: Slice::from(b"c".as_slice()),
            to_key: Slice::from(b"g".as_slice()),
            from_value: None,
            range_value: FixedValue::update(Some(Slice::from(b"v".as_slice())), None),
        };
        assert!(!e.covers(b"b"));
        assert!(e.covers(b"c"));
        assert!(e.covers(b"f"));
        assert!(!e.covers(b"g"));
    }

    #[test]
    fn fixed_sort_key_is_its_key() {
        let e = Entry::put(Slice::from(b"k".as_slice()), None, None);
        assert_eq!(e.sort_key(), b"k");
    }
}
