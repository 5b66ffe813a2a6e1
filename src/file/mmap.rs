// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Memory-mapped file handle.
//!
//! `memmap2`'s mapping calls are `unsafe` (the kernel can alias the mapped
//! region with a concurrent truncate from another process), so this module
//! carries a scoped `#[allow(unsafe_code)]` against the crate's default
//! `#![deny(unsafe_code)]`. Every unmap is deferred to [`crate::cleaner`]
//! rather than dropped in place, so a reader racing a remap never observes
//! a torn mapping.

#![allow(unsafe_code)]

use super::FileHandle;
use crate::{
    cleaner::BufferCleaner,
    error::{Error, IoErrorKind, Result},
    slice::Slice,
};
use memmap2::{Mmap, MmapMut};
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering},
        Mutex,
    },
};

/// Growth applied to the backing file when an append would overflow the
/// current mapping.
const GROWTH_FACTOR: u64 = 2;
const MIN_GROWTH: u64 = 64 * 1024;

enum MapKind {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl MapKind {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::ReadWrite(m) => &m[..],
            Self::ReadOnly(m) => &m[..],
        }
    }
}

/// A file handle backed by an OS memory mapping.
///
/// A read-write handle grows its mapping geometrically on overflow: it
/// flushes and releases the current map (handing it to the buffer cleaner
/// rather than dropping it inline, per the concurrency model), extends the
/// file with `set_len`, and remaps the larger region. A read-only handle
/// never appends; it rejects writes with `ReadOnlyMap`.
pub struct MappedFileHandle {
    path: PathBuf,
    file: Mutex<File>,
    map: Mutex<Option<MapKind>>,
    mapped_len: AtomicU64,
    position: AtomicU64,
    writable: bool,
    open: AtomicBool,
}

impl std::fmt::Debug for MappedFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFileHandle")
            .field("path", &self.path)
            .field("writable", &self.writable)
            .field("open", &self.open.load(AtomicOrdering::Acquire))
            .finish()
    }
}

impl MappedFileHandle {
    /// Opens `path` read-write, creating an empty mapping region of at
    /// least `MIN_GROWTH` bytes if the file doesn't exist yet.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let current_len = file.metadata()?.len();
        let mapped_len = current_len.max(MIN_GROWTH);
        file.set_len(mapped_len)?;

        // Safety: `file` is owned by this handle and not concurrently
        // truncated outside this module's own growth logic.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            path,
            file: Mutex::new(file),
            map: Mutex::new(Some(MapKind::ReadWrite(map))),
            mapped_len: AtomicU64::new(mapped_len),
            position: AtomicU64::new(current_len),
            writable: true,
            open: AtomicBool::new(true),
        })
    }

    /// Opens `path` read-only. Mapping is lazy: it materializes on first
    /// read.
    pub fn open_read(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(
                OpenOptions::new()
                    .read(true)
                    .open("/dev/null")
                    .expect("platform must provide a null device"),
            ),
            map: Mutex::new(None),
            mapped_len: AtomicU64::new(0),
            position: AtomicU64::new(0),
            writable: false,
            open: AtomicBool::new(false),
        }
    }

    fn ensure_mapped_for_read(&self) -> Result<()> {
        let mut guard = self.map.lock().expect("lock poisoned");
        if guard.is_none() {
            let file = File::open(&self.path)?;
            let len = file.metadata()?.len();
            // Safety: handle owns the only reference into this mapping; no
            // concurrent writer exists for a read-only handle.
            let map = unsafe { Mmap::map(&file)? };
            *self.file.lock().expect("lock poisoned") = file;
            self.mapped_len.store(len, AtomicOrdering::Release);
            self.position.store(len, AtomicOrdering::Release);
            *guard = Some(MapKind::ReadOnly(map));
            self.open.store(true, AtomicOrdering::Release);
        }
        Ok(())
    }

    fn grow_to(&self, required: u64) -> Result<()> {
        let mut map_guard = self.map.lock().expect("lock poisoned");
        let mut file_guard = self.file.lock().expect("lock poisoned");

        let old_len = self.mapped_len.load(AtomicOrdering::Acquire);
        let mut new_len = old_len.max(MIN_GROWTH);
        while new_len < required {
            new_len *= GROWTH_FACTOR;
        }

        if let Some(MapKind::ReadWrite(m)) = map_guard.take() {
            m.flush()?;
            BufferCleaner::global().retire(m, self.path.clone());
        }

        file_guard.set_len(new_len)?;
        // Safety: the previous mapping was retired above before the file
        // grew; no stale mapping can alias this remap.
        let map = unsafe { MmapMut::map_mut(&*file_guard)? };
        *map_guard = Some(MapKind::ReadWrite(map));
        self.mapped_len.store(new_len, AtomicOrdering::Release);

        Ok(())
    }
}

impl FileHandle for MappedFileHandle {
    fn append(&self, bytes: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::Io {
                kind: IoErrorKind::ReadOnlyMap,
                path: Some(self.path.clone()),
            });
        }
        if !self.open.load(AtomicOrdering::Acquire) {
            return Err(Error::Io {
                kind: IoErrorKind::NotOpen,
                path: Some(self.path.clone()),
            });
        }

        let position = self.position.load(AtomicOrdering::Acquire);
        let required = position + bytes.len() as u64;

        if required > self.mapped_len.load(AtomicOrdering::Acquire) {
            self.grow_to(required)?;
        }

        let mut guard = self.map.lock().expect("lock poisoned");
        match guard.as_mut() {
            Some(MapKind::ReadWrite(m)) => {
                let start = position as usize;
                m[start..start + bytes.len()].copy_from_slice(bytes);
            }
            _ => {
                return Err(Error::Io {
                    kind: IoErrorKind::BufferOverflow,
                    path: Some(self.path.clone()),
                })
            }
        }
        self.position
            .store(required, AtomicOrdering::Release);

        Ok(())
    }

    fn read(&self, position: u64, size: usize) -> Result<Slice> {
        self.ensure_mapped_for_read()?;
        let guard = self.map.lock().expect("lock poisoned");
        let map = guard.as_ref().ok_or_else(|| Error::Io {
            kind: IoErrorKind::NotOpen,
            path: Some(self.path.clone()),
        })?;

        let start = position as usize;
        let end = start + size;
        let data = map.as_slice();
        if end > data.len() {
            return Err(Error::Format(format!(
                "read past end of mapped region: {end} > {}",
                data.len()
            )));
        }

        Ok(Slice::from(&data[start..end]))
    }

    fn read_all(&self) -> Result<Slice> {
        let size = self.file_size()?;
        self.read(0, size as usize)
    }

    fn file_size(&self) -> Result<u64> {
        if self.writable {
            Ok(self.position.load(AtomicOrdering::Acquire))
        } else {
            self.ensure_mapped_for_read()?;
            Ok(self.mapped_len.load(AtomicOrdering::Acquire))
        }
    }

    fn close(&self) -> Result<()> {
        if self
            .open
            .compare_exchange(true, false, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let mut guard = self.map.lock().expect("lock poisoned");
        match guard.take() {
            Some(MapKind::ReadWrite(m)) => {
                m.flush()?;
                BufferCleaner::global().retire(m, self.path.clone());
                // Truncate the padding added by geometric growth so a later
                // read-only reopen sees exactly the logical content length.
                self.file
                    .lock()
                    .expect("lock poisoned")
                    .set_len(self.position.load(AtomicOrdering::Acquire))?;
            }
            Some(MapKind::ReadOnly(m)) => {
                BufferCleaner::global().retire(m, self.path.clone());
            }
            None => {}
        }

        Ok(())
    }

    fn delete(&self) -> Result<()> {
        self.close()?;
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    fn copy_to(&self, dest: &Path) -> Result<()> {
        std::fs::copy(&self.path, dest)?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(AtomicOrdering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn append_and_read_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mapped");

        let handle = MappedFileHandle::create(&path)?;
        handle.append(b"hello")?;
        handle.append(b" world")?;

        assert_eq!(&*handle.read(0, 5)?, b"hello");
        assert_eq!(&*handle.read(5, 6)?, b" world");
        assert_eq!(handle.file_size()?, 11);

        Ok(())
    }

    #[test]
    fn grows_past_initial_region() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mapped");
        let handle = MappedFileHandle::create(&path)?;

        let chunk = vec![7u8; MIN_GROWTH as usize];
        handle.append(&chunk)?;
        handle.append(&chunk)?;

        assert_eq!(handle.file_size()?, 2 * MIN_GROWTH);
        assert_eq!(handle.get(0)?, 7);

        Ok(())
    }

    #[test]
    fn read_only_rejects_append() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mapped");
        {
            let handle = MappedFileHandle::create(&path)?;
            handle.append(b"abc")?;
            handle.close()?;
        }

        let handle = MappedFileHandle::open_read(&path);
        assert!(handle.append(b"x").is_err());

        Ok(())
    }
}
