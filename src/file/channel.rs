// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::FileHandle;
use crate::{
    error::{Error, IoErrorKind, Result},
    hooks::{NoOpOnOpen, OnOpen},
    slice::Slice,
};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering},
        Arc, Mutex,
    },
};

/// Which direction a channel handle currently serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Write,
    Read,
}

/// A sequential-append or random-access-read file handle backed by a plain
/// OS file (no `mmap`).
///
/// Starts in [`Mode::Write`] (sequential append, rejects reads with
/// `NotReadable`) or [`Mode::Read`] (random-access read, rejects appends
/// with `NotWritable`, opens the OS handle lazily on first read). A
/// `Write` handle that is `close`d permanently becomes readable: the next
/// read lazily reopens the file read-only and flips the mode, matching the
/// `open → closed → open` transition described in the concurrency model.
pub struct ChannelFileHandle {
    path: PathBuf,
    mode: Mutex<Mode>,
    file: Mutex<Option<File>>,
    position: AtomicU64,
    open: AtomicBool,
    on_open: Arc<dyn OnOpen>,
}

impl std::fmt::Debug for ChannelFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelFileHandle")
            .field("path", &self.path)
            .field("mode", &*self.mode.lock().expect("lock poisoned"))
            .field("open", &self.open.load(AtomicOrdering::Acquire))
            .finish()
    }
}

impl ChannelFileHandle {
    /// Opens (creating if absent) `path` for sequential append.
    pub fn open_write(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_write_with(path, Arc::new(NoOpOnOpen))
    }

    pub fn open_write_with(path: impl Into<PathBuf>, on_open: Arc<dyn OnOpen>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        let position = file.metadata()?.len();
        on_open.on_open(&path);

        log::trace!("Opened {} for sequential append", path.display());

        Ok(Self {
            path,
            mode: Mutex::new(Mode::Write),
            file: Mutex::new(Some(file)),
            position: AtomicU64::new(position),
            open: AtomicBool::new(true),
            on_open,
        })
    }

    /// Constructs a handle for `path` that opens lazily on first read.
    pub fn open_read(path: impl Into<PathBuf>) -> Self {
        Self::open_read_with(path, Arc::new(NoOpOnOpen))
    }

    pub fn open_read_with(path: impl Into<PathBuf>, on_open: Arc<dyn OnOpen>) -> Self {
        Self {
            path: path.into(),
            mode: Mutex::new(Mode::Read),
            file: Mutex::new(None),
            position: AtomicU64::new(0),
            open: AtomicBool::new(false),
            on_open,
        }
    }

    fn ensure_open_for_read(&self) -> Result<()> {
        let mut guard = self.file.lock().expect("lock poisoned");
        if guard.is_none() {
            let file = File::open(&self.path)?;
            self.on_open.on_open(&self.path);
            log::trace!("Lazily opened {} for reading", self.path.display());
            *guard = Some(file);
            self.open.store(true, AtomicOrdering::Release);
        }
        Ok(())
    }
}

impl FileHandle for ChannelFileHandle {
    fn append(&self, bytes: &[u8]) -> Result<()> {
        let mode = *self.mode.lock().expect("lock poisoned");
        if mode != Mode::Write {
            return Err(Error::Io {
                kind: IoErrorKind::NotWritable,
                path: Some(self.path.clone()),
            });
        }
        if !self.open.load(AtomicOrdering::Acquire) {
            return Err(Error::Io {
                kind: IoErrorKind::NotOpen,
                path: Some(self.path.clone()),
            });
        }

        let mut guard = self.file.lock().expect("lock poisoned");
        let file = guard.as_mut().ok_or_else(|| Error::Io {
            kind: IoErrorKind::NotOpen,
            path: Some(self.path.clone()),
        })?;
        file.write_all(bytes)?;
        self.position
            .fetch_add(bytes.len() as u64, AtomicOrdering::AcqRel);

        Ok(())
    }

    fn read(&self, position: u64, size: usize) -> Result<Slice> {
        {
            let mode = *self.mode.lock().expect("lock poisoned");
            if mode == Mode::Write && self.open.load(AtomicOrdering::Acquire) {
                return Err(Error::Io {
                    kind: IoErrorKind::NotReadable,
                    path: Some(self.path.clone()),
                });
            }
        }

        // Either already in read mode, or a write handle that was closed:
        // flip to read mode and lazily (re)open read-only.
        *self.mode.lock().expect("lock poisoned") = Mode::Read;
        self.ensure_open_for_read()?;

        let mut guard = self.file.lock().expect("lock poisoned");
        let file = guard.as_mut().ok_or_else(|| Error::Io {
            kind: IoErrorKind::NotOpen,
            path: Some(self.path.clone()),
        })?;

        let mut buf = vec![0u8; size];
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(&mut buf)?;

        Ok(Slice::from(buf))
    }

    fn read_all(&self) -> Result<Slice> {
        let size = self.file_size()?;
        self.read(0, size as usize)
    }

    fn file_size(&self) -> Result<u64> {
        let guard = self.file.lock().expect("lock poisoned");
        if let Some(file) = guard.as_ref() {
            Ok(file.metadata()?.len())
        } else {
            Ok(std::fs::metadata(&self.path)?.len())
        }
    }

    fn close(&self) -> Result<()> {
        if self
            .open
            .compare_exchange(true, false, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_err()
        {
            // Already closed: idempotent no-op.
            return Ok(());
        }

        let mut guard = self.file.lock().expect("lock poisoned");
        if let Some(file) = guard.as_ref() {
            file.sync_all()?;
        }
        *guard = None;

        log::trace!("Closed {}", self.path.display());

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
    fn write_then_close_then_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chan");

        let handle = ChannelFileHandle::open_write(&path)?;
        handle.append(b"hello world")?;
        assert!(handle.read(0, 5).is_err(), "write mode rejects reads");
        handle.close()?;

        let data = handle.read(0, 5)?;
        assert_eq!(&*data, b"hello");
        assert_eq!(handle.get(6)?, b'w');

        Ok(())
    }

    #[test]
    fn read_handle_rejects_append() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chan");
        std::fs::write(&path, b"abc")?;

        let handle = ChannelFileHandle::open_read(&path);
        assert!(handle.append(b"x").is_err());
        assert_eq!(&*handle.read_all()?, b"abc");

        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chan");
        let handle = ChannelFileHandle::open_write(&path)?;
        handle.close()?;
        handle.close()?;
        Ok(())
    }
}
