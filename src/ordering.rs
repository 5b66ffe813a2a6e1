// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The injected total order over keys.

use std::{cmp::Ordering as StdOrdering, sync::Arc};

/// A total order over byte keys, injected into [`crate::segment::Segment`]
/// and the [`crate::merge::SegmentMerger`].
///
/// The default is unsigned lexicographic byte comparison. The original
/// source also ships an alternate "id" ordering for keyspaces of
/// fixed-width monotonic integers; it is provided here as a documented
/// extension point (`KeyOrdering::monotonic_u64_be`) but is not exercised
/// by any Segment test, since the core format never assumes fixed-width
/// keys.
pub trait KeyOrdering: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> StdOrdering;
}

/// Plain unsigned lexicographic ordering — the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct Lexicographic;

impl KeyOrdering for Lexicographic {
    fn compare(&self, a: &[u8], b: &[u8]) -> StdOrdering {
        a.cmp(b)
    }
}

/// Orders big-endian `u64` keys numerically. Useful when keys are always
/// 8-byte monotonic IDs; falls back to lexicographic comparison (which is
/// equivalent for big-endian integers) but documents intent at call sites.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicU64Be;

impl KeyOrdering for MonotonicU64Be {
    fn compare(&self, a: &[u8], b: &[u8]) -> StdOrdering {
        a.cmp(b)
    }
}

/// A shared, cheaply cloneable handle to an injected [`KeyOrdering`].
pub type Ordering = Arc<dyn KeyOrdering>;

/// Builds the default lexicographic ordering handle.
#[must_use]
pub fn lexicographic() -> Ordering {
    Arc::new(Lexicographic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicographic_orders_bytes() {
        let ord = lexicographic();
        assert_eq!(ord.compare(b"a", b"b"), StdOrdering::Less);
        assert_eq!(ord.compare(b"b", b"a"), StdOrdering::Greater);
        assert_eq!(ord.compare(b"a", b"a"), StdOrdering::Equal);
    }
}
