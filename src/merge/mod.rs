// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Combines one or two sorted entry streams into a sequence of new,
//! size-bounded segment files.
//!
//! `addKeyValue`/`Stats` from the original design collapse here into
//! [`group_by_size`]: since both input streams are already materialized
//! `Vec<Entry>` by the time a merge runs (see [`kv_merger::merge_streams`]),
//! grouping by cumulative size and writing each group once is equivalent to
//! an incremental accumulator, without needing a half-written segment to be
//! patched up after the fact.

pub mod kv_merger;

use crate::{
    bloom::BlockedBloomFilter,
    deadline::{self, HasTimeLeftAtLeast},
    entry::Entry,
    error::Result,
    file::{ChannelFileHandle, FileHandle, MemoryFileHandle},
    hooks::{IdGenerator, PathsDistributor},
    ordering::Ordering as KeyOrdering,
    segment::{codec, codec::ValuesBlockWriter, Footer, OpenOptions, Segment},
};
use std::sync::Arc;

/// Coordinates a multi-way merge of entry streams into bounded-size output
/// segments. Carries no state of its own; every call is a fresh merge.
pub struct SegmentMerger;

impl SegmentMerger {
    /// Merges `new_key_values` against `old_key_values`, producing zero or
    /// more new segments.
    #[allow(clippy::too_many_arguments)]
    pub fn merge(
        new_key_values: &[Entry],
        old_key_values: &[Entry],
        min_segment_size: usize,
        for_in_memory: bool,
        is_last_level: bool,
        bloom_fpr: f32,
        has_time_left_at_least: HasTimeLeftAtLeast,
        ordering: &KeyOrdering,
        target_paths: &dyn PathsDistributor,
        id_generator: &dyn IdGenerator,
    ) -> Result<Vec<Segment>> {
        let now = deadline::now_millis();
        let resolved = kv_merger::merge_streams(
            new_key_values,
            old_key_values,
            is_last_level,
            has_time_left_at_least,
            now,
            ordering,
        );

        write_groups(
            &resolved,
            min_segment_size,
            for_in_memory,
            bloom_fpr,
            target_paths,
            id_generator,
        )
    }

    /// Re-buckets `key_values` against nothing — `merge` with an empty old
    /// cursor — used to re-compact a segment with itself.
    #[allow(clippy::too_many_arguments)]
    pub fn split(
        key_values: &[Entry],
        min_segment_size: usize,
        for_in_memory: bool,
        is_last_level: bool,
        bloom_fpr: f32,
        ordering: &KeyOrdering,
        target_paths: &dyn PathsDistributor,
        id_generator: &dyn IdGenerator,
    ) -> Result<Vec<Segment>> {
        let now = deadline::now_millis();
        let resolved = kv_merger::merge_streams(
            &[],
            key_values,
            is_last_level,
            deadline::default_has_time_left_at_least,
            now,
            ordering,
        );

        write_groups(
            &resolved,
            min_segment_size,
            for_in_memory,
            bloom_fpr,
            target_paths,
            id_generator,
        )
    }
}

/// Splits already-resolved entries into size-bounded groups: close a group
/// once its accumulated `approx_size` reaches `min_segment_size`, then fold
/// an undersized trailing group back into its predecessor
/// (`mergeSmallerSegmentWithPrevious`) so only a lone final group is ever
/// allowed to sit below the threshold.
fn group_by_size(entries: &[Entry], min_segment_size: usize) -> Vec<Vec<Entry>> {
    let mut groups: Vec<Vec<Entry>> = Vec::new();
    let mut current: Vec<Entry> = Vec::new();
    let mut running_size = 0usize;

    for entry in entries {
        running_size += entry.approx_size();
        current.push(entry.clone());

        if running_size >= min_segment_size {
            groups.push(std::mem::take(&mut current));
            running_size = 0;
        }
    }

    if !current.is_empty() {
        match groups.last_mut() {
            Some(previous) => previous.append(&mut current),
            None => groups.push(current),
        }
    }

    groups
}

fn write_groups(
    entries: &[Entry],
    min_segment_size: usize,
    for_in_memory: bool,
    bloom_fpr: f32,
    target_paths: &dyn PathsDistributor,
    id_generator: &dyn IdGenerator,
) -> Result<Vec<Segment>> {
    let groups = group_by_size(entries, min_segment_size.max(1));

    let mut written = Vec::new();
    for group in &groups {
        match write_one_segment(group, for_in_memory, bloom_fpr, target_paths, id_generator) {
            Ok(segment) => written.push(segment),
            Err(err) => {
                log::warn!("segment merge failed, cleaning up {} partial output(s): {err}", written.len());
                for segment in &written {
                    if let Err(cleanup_err) = segment.delete() {
                        log::warn!(
                            "failed to remove partially written segment {}: {cleanup_err}",
                            segment.path().display()
                        );
                    }
                }
                return Err(err);
            }
        }
    }

    log::debug!("segment merge produced {} output segment(s)", written.len());
    Ok(written)
}

fn write_one_segment(
    entries: &[Entry],
    for_in_memory: bool,
    bloom_fpr: f32,
    target_paths: &dyn PathsDistributor,
    id_generator: &dyn IdGenerator,
) -> Result<Segment> {
    let path = target_paths.next().join(id_generator.next_segment_id());

    let write_handle: Arc<dyn FileHandle> = if for_in_memory {
        Arc::new(MemoryFileHandle::empty())
    } else {
        Arc::new(ChannelFileHandle::open_write(&path)?)
    };

    let mut values = ValuesBlockWriter::new();
    let mut index_bytes = Vec::new();
    let mut prev_key: Vec<u8> = Vec::new();
    let mut offset = 0u64;
    let mut has_range = false;

    let mut filter =
        (!entries.is_empty()).then(|| BlockedBloomFilter::with_fp_rate(entries.len(), bloom_fpr));

    for entry in entries {
        let record = codec::encode_record(entry, &prev_key, offset, &mut values)?;
        offset += record.len() as u64;
        prev_key = entry.sort_key().to_vec();
        index_bytes.extend_from_slice(&record);
        has_range |= entry.is_range();

        if let Some(filter) = filter.as_mut() {
            filter.set_with_hash(BlockedBloomFilter::get_hash(entry.sort_key()));
        }
    }

    let values_bytes = values.into_bytes();
    let index_offset = values_bytes.len() as u64;
    let index_length = index_bytes.len() as u64;

    write_handle.append(&values_bytes)?;
    write_handle.append(&index_bytes)?;

    let mut footer_bytes = Vec::new();
    Footer::write(
        &mut footer_bytes,
        entries.len() as u64,
        has_range,
        filter.as_ref(),
        index_offset,
        index_length,
    )?;
    write_handle.append(&footer_bytes)?;

    let read_handle: Arc<dyn FileHandle> = if for_in_memory {
        write_handle
    } else {
        write_handle.close()?;
        Arc::new(ChannelFileHandle::open_read(&path))
    };

    log::trace!(
        "wrote segment {} with {} entries ({} bytes index, {} bytes values)",
        path.display(),
        entries.len(),
        index_length,
        index_offset
    );

    Ok(Segment::open(path, read_handle, OpenOptions::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hooks::{MonotonicIdGenerator, SinglePath}, ordering, slice::Slice};
    use test_log::test;

    #[test]
    fn merge_of_two_disjoint_streams_produces_one_segment() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ordering = ordering::lexicographic();
        let paths = SinglePath::new(dir.path());
        let ids = MonotonicIdGenerator::new();

        let new = vec![Entry::put(Slice::from(b"a".as_slice()), Some(Slice::from(b"1".as_slice())), None)];
        let old = vec![Entry::put(Slice::from(b"b".as_slice()), Some(Slice::from(b"2".as_slice())), None)];

        let segments = SegmentMerger::merge(
            &new,
            &old,
            1024,
            false,
            false,
            0.01,
            deadline::default_has_time_left_at_least,
            &ordering,
            &paths,
            &ids,
        )?;

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].get_key_value_count()?, 2);
        assert_eq!(segments[0].get(b"a")?.unwrap().sort_key(), b"a");
        assert_eq!(segments[0].get(b"b")?.unwrap().sort_key(), b"b");

        Ok(())
    }

    #[test]
    fn small_min_segment_size_rolls_one_segment_per_entry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ordering = ordering::lexicographic();
        let paths = SinglePath::new(dir.path());
        let ids = MonotonicIdGenerator::new();

        let entries: Vec<Entry> = (0u8..10)
            .map(|i| Entry::put(Slice::from(vec![i]), Some(Slice::from(vec![i])), None))
            .collect();

        let segments = SegmentMerger::split(
            &entries,
            1,
            false,
            false,
            0.01,
            &ordering,
            &paths,
            &ids,
        )?;

        assert_eq!(segments.len(), 10);
        for segment in &segments {
            assert_eq!(segment.get_key_value_count()?, 1);
        }

        Ok(())
    }

    #[test]
    fn large_min_segment_size_never_leaves_a_non_final_segment_undersized() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ordering = ordering::lexicographic();
        let paths = SinglePath::new(dir.path());
        let ids = MonotonicIdGenerator::new();

        let entries: Vec<Entry> = (0u16..50)
            .map(|i| Entry::put(Slice::from(i.to_be_bytes().to_vec()), Some(Slice::from(vec![0; 8])), None))
            .collect();
        let total_size: usize = entries.iter().map(Entry::approx_size).sum();
        let min_segment_size = total_size / 5;

        let segments = SegmentMerger::split(
            &entries,
            min_segment_size,
            false,
            false,
            0.01,
            &ordering,
            &paths,
            &ids,
        )?;

        assert!(!segments.is_empty());
        let (last, rest) = segments.split_last().expect("at least one segment");
        for segment in rest {
            let size: usize = segment
                .get_all()?
                .iter()
                .map(Entry::approx_size)
                .sum();
            assert!(size >= min_segment_size);
        }
        let _ = last;

        let total_kv: u64 = segments
            .iter()
            .map(Segment::get_key_value_count)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .sum();
        assert_eq!(total_kv, 50);

        Ok(())
    }

    #[test]
    fn ttl_expiry_at_last_level_yields_no_segments() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ordering = ordering::lexicographic();
        let paths = SinglePath::new(dir.path());
        let ids = MonotonicIdGenerator::new();

        let entries = vec![Entry::put(Slice::from(b"1".as_slice()), Some(Slice::from(b"1".as_slice())), Some(0))];

        let segments = SegmentMerger::split(
            &entries,
            1024,
            false,
            true,
            0.01,
            &ordering,
            &paths,
            &ids,
        )?;

        assert!(segments.is_empty());

        Ok(())
    }
}
