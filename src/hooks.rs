// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Injected collaborators the core consumes but does not own: a file-open
//! limiter, a cache-size limiter, an ID generator, and a path distributor.
//!
//! Default implementations are provided so [`crate::segment::Segment`] and
//! [`crate::merge::SegmentMerger`] can be exercised standalone, the same
//! way the teacher's segment tests construct a bare `Writer`/`Segment`
//! without a `Tree` or `LevelManifest` present.

use crate::entry::Entry;
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering as AtomicOrdering},
};

/// Invoked every time a file handle materializes its underlying OS handle.
/// An external file-open limiter uses this to evict other handles and stay
/// under a process-wide descriptor budget.
pub trait OnOpen: Send + Sync {
    fn on_open(&self, path: &Path);
}

/// No-op limiter; used when the caller doesn't need one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpOnOpen;

impl OnOpen for NoOpOnOpen {
    fn on_open(&self, _path: &Path) {}
}

/// Invoked every time an entry is installed into a [`crate::segment::Segment`]
/// cache. An external cache-size limiter uses this to evict older entries
/// across all open segments.
pub trait OnCache: Send + Sync {
    fn on_cache(&self, key: &[u8], entry: &Entry);
}

/// No-op limiter; used when the caller doesn't need one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpOnCache;

impl OnCache for NoOpOnCache {
    fn on_cache(&self, _key: &[u8], _entry: &Entry) {}
}

/// Hands out unique segment IDs.
pub trait IdGenerator: Send + Sync {
    fn next_segment_id(&self) -> String;
}

/// A monotonically increasing counter, formatted as a decimal string.
pub struct MonotonicIdGenerator(AtomicU64);

impl MonotonicIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

impl Default for MonotonicIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for MonotonicIdGenerator {
    fn next_segment_id(&self) -> String {
        self.0.fetch_add(1, AtomicOrdering::Relaxed).to_string()
    }
}

/// Chooses the directory a new segment file should be written into, to
/// spread segments across multiple backing directories/devices.
pub trait PathsDistributor: Send + Sync {
    fn next(&self) -> PathBuf;
}

/// Always returns the same directory; used when segments aren't
/// distributed across multiple paths.
pub struct SinglePath(PathBuf);

impl SinglePath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }
}

impl PathsDistributor for SinglePath {
    fn next(&self) -> PathBuf {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_id_generator_increments() {
        let gen = MonotonicIdGenerator::new();
        assert_eq!(gen.next_segment_id(), "0");
        assert_eq!(gen.next_segment_id(), "1");
    }

    #[test]
    fn single_path_always_same() {
        let dist = SinglePath::new("/tmp/segments");
        assert_eq!(dist.next(), PathBuf::from("/tmp/segments"));
        assert_eq!(dist.next(), PathBuf::from("/tmp/segments"));
    }
}
