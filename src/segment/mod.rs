// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The read-only, on-disk sorted run.
//!
//! A [`Segment`] wraps its mutable state in `Arc<Inner>` the same way the
//! upstream `Segment(Arc<Inner>)` does: cheap to clone, `Deref`s straight to
//! the fields callers need. Footer and index are loaded lazily behind
//! `OnceLock`s; a losing concurrent loader simply re-parses, since both are
//! content-identical regardless of who wins.

pub mod codec;
mod footer;
pub mod matcher;

pub use footer::Footer;

use crate::{
    bloom::BlockedBloomFilter,
    deadline::{self, Deadline},
    entry::Entry,
    error::{Error, IoErrorKind, Result},
    file::FileHandle,
    hooks::{IdGenerator, NoOpOnCache, OnCache, PathsDistributor},
    merge::SegmentMerger,
    ordering::{self, Ordering as KeyOrdering},
    slice::Slice,
};
use codec::{decode_record, DecodedRecord};
use crossbeam_skiplist::SkipMap;
use std::{
    cmp::Ordering as CmpOrdering,
    ops::Bound,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Arc, OnceLock,
    },
};

pub struct Inner {
    path: PathBuf,
    file: Arc<dyn FileHandle>,
    ordering: KeyOrdering,
    on_cache: Arc<dyn OnCache>,
    remove_deletes: bool,
    drop_corrupted_tail: bool,

    footer: OnceLock<Footer>,
    index: OnceLock<Vec<DecodedRecord>>,
    min_key: OnceLock<Slice>,
    max_key: OnceLock<Slice>,
    nearest_expiry: OnceLock<Deadline>,

    /// key -> position within the decoded index vec. A pure accelerator:
    /// removing entries never changes what `get`/`lower`/`higher` return,
    /// only how much of the index they have to walk.
    cache: SkipMap<Vec<u8>, usize>,

    /// Set once-false on close, per the concurrency model's `open → closed
    /// → open` transition. Every read path checks this before touching the
    /// file handle rather than letting a stale reference escape.
    open: AtomicBool,
}

/// A read-only, on-disk sorted run of key-value entries.
#[derive(Clone)]
pub struct Segment(Arc<Inner>);

impl std::ops::Deref for Segment {
    type Target = Inner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment({})", self.path.display())
    }
}

/// Options governing how a segment is opened; kept as a struct rather than
/// a long parameter list since most callers reuse the same settings across
/// many segments in a level.
#[derive(Clone)]
pub struct OpenOptions {
    pub ordering: KeyOrdering,
    pub on_cache: Arc<dyn OnCache>,
    pub remove_deletes: bool,
    pub drop_corrupted_tail: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            ordering: ordering::lexicographic(),
            on_cache: Arc::new(NoOpOnCache),
            remove_deletes: false,
            drop_corrupted_tail: false,
        }
    }
}

impl Segment {
    /// Wraps an already-written file as a segment. Footer and index are
    /// not read until first needed.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, file: Arc<dyn FileHandle>, opts: OpenOptions) -> Self {
        Self(Arc::new(Inner {
            path: path.into(),
            file,
            ordering: opts.ordering,
            on_cache: opts.on_cache,
            remove_deletes: opts.remove_deletes,
            drop_corrupted_tail: opts.drop_corrupted_tail,
            footer: OnceLock::new(),
            index: OnceLock::new(),
            min_key: OnceLock::new(),
            max_key: OnceLock::new(),
            nearest_expiry: OnceLock::new(),
            cache: SkipMap::new(),
            open: AtomicBool::new(true),
        }))
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.open.load(AtomicOrdering::Acquire) {
            return Err(Error::Io {
                kind: IoErrorKind::NotOpen,
                path: Some(self.path.clone()),
            });
        }
        Ok(())
    }

    fn load_footer(&self) -> Result<&Footer> {
        if let Some(footer) = self.footer.get() {
            return Ok(footer);
        }
        self.ensure_open()?;

        let file_size = self.file.file_size()?;
        let tail_len = file_size.min(64 * 1024);
        let tail = self.file.read(file_size - tail_len, tail_len as usize)?;
        let footer = Footer::read(&mut &tail[..])?;

        // A losing concurrent loader re-parses; both are content-identical.
        let _ = self.footer.set(footer);
        Ok(self.footer.get().expect("just set"))
    }

    fn load_index(&self) -> Result<&Vec<DecodedRecord>> {
        if let Some(index) = self.index.get() {
            return Ok(index);
        }

        let footer = self.load_footer()?;
        let bytes = self
            .file
            .read(footer.index_offset, footer.index_length as usize)?;

        let mut records = Vec::new();
        let mut prev_key: Vec<u8> = Vec::new();
        let mut cursor: &[u8] = &bytes;
        let mut pos = footer.index_offset;

        while !cursor.is_empty() {
            match decode_record(cursor, pos, &prev_key, &self.file) {
                Ok((record, consumed)) => {
                    prev_key = record.entry.sort_key().to_vec();
                    pos = record.next_offset;
                    cursor = &cursor[consumed..];
                    records.push(record);
                }
                Err(err) => {
                    if self.drop_corrupted_tail {
                        log::warn!(
                            "Dropping corrupted tail of {} starting at offset {pos}: {err}",
                            self.path.display()
                        );
                        break;
                    }
                    return Err(Error::CorruptedTailEntries {
                        path: self.path.clone(),
                        offset: pos,
                    });
                }
            }
        }

        let _ = self.index.set(records);
        Ok(self.index.get().expect("just set"))
    }

    fn min_key(&self) -> Result<&Slice> {
        if let Some(k) = self.min_key.get() {
            return Ok(k);
        }
        let index = self.load_index()?;
        let key = index
            .first()
            .map(|r| Slice::from(r.entry.sort_key()))
            .unwrap_or_else(Slice::empty);
        let _ = self.min_key.set(key);
        Ok(self.min_key.get().expect("just set"))
    }

    fn max_key(&self) -> Result<&Slice> {
        if let Some(k) = self.max_key.get() {
            return Ok(k);
        }
        let index = self.load_index()?;
        let key = index
            .last()
            .map(|r| match &r.entry {
                Entry::Fixed { key, .. } => key.clone(),
                Entry::Range { to_key, .. } => to_key.clone(),
            })
            .unwrap_or_else(Slice::empty);
        let _ = self.max_key.set(key);
        Ok(self.max_key.get().expect("just set"))
    }

    /// Minimum of every entry's deadline in this segment; `None` if nothing
    /// in the segment expires.
    pub fn nearest_expiry_deadline(&self) -> Result<Deadline> {
        if let Some(d) = self.nearest_expiry.get() {
            return Ok(*d);
        }
        let index = self.load_index()?;
        let nearest = index
            .iter()
            .fold(None, |acc, r| deadline::min_deadline(acc, r.entry.deadline()));
        let _ = self.nearest_expiry.set(nearest);
        Ok(*self.nearest_expiry.get().expect("just set"))
    }

    fn cache_floor_position(&self, key: &[u8]) -> usize {
        self.cache
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    /// `true` iff the segment has no bloom filter, or its bloom filter
    /// admits `key`.
    pub fn might_contain(&self, key: &[u8]) -> Result<bool> {
        let footer = self.load_footer()?;
        Ok(footer
            .bloom
            .as_ref()
            .is_none_or(|filter| filter.contains(key)))
    }

    /// Point lookup. `None` if no entry covers `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let max_key = self.max_key()?.clone();
        if self.ordering.compare(key, &max_key) == CmpOrdering::Greater {
            return Ok(None);
        }
        if !self.might_contain(key)? {
            return Ok(None);
        }

        let index = self.load_index()?;
        let start = self.cache_floor_position(key);

        match matcher::get(index, start, key, &self.ordering) {
            Some((pos, record)) => {
                self.cache.insert(record.entry.sort_key().to_vec(), pos);
                self.on_cache.on_cache(key, &record.entry);
                Ok(Some(record.entry.clone()))
            }
            None => Ok(None),
        }
    }

    /// The entry immediately preceding `key` in sort order.
    ///
    /// The cached floor position, if any, might land exactly on `key`
    /// itself (a prior `get` cached it) — the entry before that position is
    /// then the answer directly, since keys strictly increase (§3
    /// invariant 1). Otherwise the floor is already `< key`, and a forward
    /// walk from there finds the true immediate predecessor.
    pub fn lower(&self, key: &[u8]) -> Result<Option<Entry>> {
        let index = self.load_index()?;
        if index.is_empty() {
            return Ok(None);
        }
        let start = self.cache_floor_position(key);

        if let Some(record) = index.get(start) {
            if self.ordering.compare(record.entry.sort_key(), key) == CmpOrdering::Equal {
                return Ok(if start > 0 {
                    Some(index[start - 1].entry.clone())
                } else {
                    None
                });
            }
        }

        match matcher::lower(index, start, key, &self.ordering) {
            Some((_, record)) => Ok(Some(record.entry.clone())),
            None => Ok(None),
        }
    }

    /// The entry immediately following `key` in sort order.
    pub fn higher(&self, key: &[u8]) -> Result<Option<Entry>> {
        let index = self.load_index()?;
        if index.is_empty() {
            return Ok(None);
        }
        let start = self.cache_floor_position(key);

        match matcher::higher(index, start, key, &self.ordering) {
            Some((_, record)) => Ok(Some(record.entry.clone())),
            None => Ok(None),
        }
    }

    /// Streams and materializes every entry in the segment.
    pub fn get_all(&self) -> Result<Vec<Entry>> {
        Ok(self
            .load_index()?
            .iter()
            .map(|r| r.entry.clone())
            .collect())
    }

    /// Merges `new_key_values` into this segment, writing the result as a
    /// sequence of new segment files. On any failure the
    /// [`SegmentMerger`] deletes whatever partial outputs it had started.
    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &self,
        new_key_values: &[Entry],
        min_segment_size: usize,
        for_in_memory: bool,
        bloom_fpr: f32,
        has_time_left_at_least: deadline::HasTimeLeftAtLeast,
        target_paths: &dyn PathsDistributor,
        id_generator: &dyn IdGenerator,
    ) -> Result<Vec<Segment>> {
        let old_key_values = self.get_all()?;
        SegmentMerger::merge(
            new_key_values,
            &old_key_values,
            min_segment_size,
            for_in_memory,
            self.remove_deletes,
            bloom_fpr,
            has_time_left_at_least,
            &self.ordering,
            target_paths,
            id_generator,
        )
    }

    /// Re-compacts this segment against itself, e.g. after a TTL or format
    /// change.
    pub fn refresh(
        &self,
        min_segment_size: usize,
        for_in_memory: bool,
        bloom_fpr: f32,
        has_time_left_at_least: deadline::HasTimeLeftAtLeast,
        target_paths: &dyn PathsDistributor,
        id_generator: &dyn IdGenerator,
    ) -> Result<Vec<Segment>> {
        let key_values = self.get_all()?;
        SegmentMerger::split(
            &key_values,
            min_segment_size,
            for_in_memory,
            self.remove_deletes,
            bloom_fpr,
            &self.ordering,
            target_paths,
            id_generator,
        )
    }

    pub fn get_bloom_filter(&self) -> Result<Option<&BlockedBloomFilter>> {
        Ok(self.load_footer()?.bloom.as_ref())
    }

    pub fn get_key_value_count(&self) -> Result<u64> {
        Ok(self.load_footer()?.kv_count)
    }

    pub fn has_range(&self) -> Result<bool> {
        Ok(self.load_footer()?.has_range)
    }

    #[must_use]
    pub fn is_footer_defined(&self) -> bool {
        self.footer.get().is_some()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(AtomicOrdering::Acquire)
    }

    pub fn close(&self) -> Result<()> {
        self.open.store(false, AtomicOrdering::Release);
        self.file.close()
    }

    pub fn delete(&self) -> Result<()> {
        self.open.store(false, AtomicOrdering::Release);
        self.file.delete()
    }

    pub fn copy_to(&self, dest: &Path) -> Result<()> {
        self.file.copy_to(dest)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::ChannelFileHandle, segment::codec::ValuesBlockWriter};
    use test_log::test;

    fn write_segment(path: &Path, entries: &[Entry]) -> Result<()> {
        let file = ChannelFileHandle::open_write(path)?;
        let mut values = ValuesBlockWriter::new();
        let mut index_bytes = Vec::new();
        let mut prev_key: Vec<u8> = Vec::new();
        let mut offset = 0u64;

        for entry in entries {
            let record = codec::encode_record(entry, &prev_key, offset, &mut values)?;
            offset += record.len() as u64;
            prev_key = entry.sort_key().to_vec();
            index_bytes.extend_from_slice(&record);
        }

        let values_bytes = values.into_bytes();
        let index_offset = values_bytes.len() as u64;
        let index_length = index_bytes.len() as u64;

        let mut filter = BlockedBloomFilter::with_fp_rate(entries.len().max(1), 0.01);
        for entry in entries {
            filter.set_with_hash(BlockedBloomFilter::get_hash(entry.sort_key()));
        }

        file.append(&values_bytes)?;
        file.append(&index_bytes)?;

        let mut footer_bytes = Vec::new();
        Footer::write(
            &mut footer_bytes,
            entries.len() as u64,
            entries.iter().any(Entry::is_range),
            Some(&filter),
            index_offset,
            index_length,
        )?;
        file.append(&footer_bytes)?;
        file.close()
    }

    #[test]
    fn put_then_get() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("segment");

        let entry = Entry::put(
            Slice::from(b"\x01\x02\x03".as_slice()),
            Some(Slice::from(b"\x09".as_slice())),
            None,
        );
        write_segment(&path, std::slice::from_ref(&entry))?;

        let file: Arc<dyn FileHandle> = Arc::new(ChannelFileHandle::open_read(&path));
        let segment = Segment::open(&path, file, OpenOptions::default());

        let found = segment.get(b"\x01\x02\x03")?.expect("entry exists");
        let Entry::Fixed { fixed, .. } = found else {
            panic!("expected fixed");
        };
        assert_eq!(fixed.value.fetch()?.as_deref(), Some(b"\x09".as_slice()));

        assert!(segment.get(b"\x01\x02\x04")?.is_none());

        Ok(())
    }

    #[test]
    fn higher_and_lower_neighbor_queries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("segment");

        let entries = vec![
            Entry::put(Slice::from(b"a".as_slice()), None, None),
            Entry::put(Slice::from(b"c".as_slice()), None, None),
            Entry::put(Slice::from(b"e".as_slice()), None, None),
        ];
        write_segment(&path, &entries)?;

        let file: Arc<dyn FileHandle> = Arc::new(ChannelFileHandle::open_read(&path));
        let segment = Segment::open(&path, file, OpenOptions::default());

        let lower = segment.lower(b"d")?.expect("lower exists");
        assert_eq!(lower.sort_key(), b"c");

        let higher = segment.higher(b"c")?.expect("higher exists");
        assert_eq!(higher.sort_key(), b"e");

        Ok(())
    }
}
