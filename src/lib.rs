// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The segment and segment-merger core of a log-structured merge tree.
//!
//! This crate covers the read path of one sorted run on disk (a
//! [`segment::Segment`]) and the write path that produces new runs from
//! old ones (the [`merge::SegmentMerger`]): the on-disk format
//! ([`segment::codec`], [`segment::Footer`]), the file-handle abstraction
//! over channel I/O and `mmap` ([`file`]), the deferred-unmap
//! [`cleaner::BufferCleaner`], the [`bloom::BlockedBloomFilter`] used for
//! negative lookups, and the forward-only [`segment::matcher`].
//!
//! Level orchestration, the write-ahead log, the memtable, and the public
//! database facade sit above this crate and are out of scope here; this
//! crate only needs an [`hooks::IdGenerator`] and [`hooks::PathsDistributor`]
//! to create new segments, and an [`hooks::OnCache`]/[`hooks::OnOpen`] pair
//! to report back to whatever resource limiter the caller runs.

#![deny(unsafe_code)]

pub mod bloom;
pub mod cleaner;
pub mod deadline;
pub mod entry;
pub mod error;
pub mod file;
pub mod hooks;
pub mod merge;
pub mod ordering;
pub mod segment;
pub mod slice;

pub use entry::Entry;
pub use error::{Error, Result};
pub use merge::SegmentMerger;
pub use segment::{OpenOptions, Segment};
pub use slice::Slice;
