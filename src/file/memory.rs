// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::FileHandle;
use crate::{
    error::{Error, Result},
    slice::Slice,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        RwLock,
    },
};

/// A file handle that never touches disk: content lives purely in RAM.
///
/// Used for ephemeral segments in tests and for small segments that are
/// never meant to be persisted. `append` is only legal up to construction
/// time — [`MemoryFileHandle::new`] takes the full content up front, and
/// any later `append` call fails with [`Error::Unsupported`], since there
/// is no external writer to linearize against. `copy_to` fails with
/// [`Error::CannotCopyInMemory`], there being no backing path to copy from.
pub struct MemoryFileHandle {
    content: RwLock<Vec<u8>>,
    open: AtomicBool,
}

impl std::fmt::Debug for MemoryFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFileHandle")
            .field("len", &self.content.read().expect("lock poisoned").len())
            .field("open", &self.open.load(AtomicOrdering::Acquire))
            .finish()
    }
}

impl MemoryFileHandle {
    #[must_use]
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content: RwLock::new(content),
            open: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl FileHandle for MemoryFileHandle {
    fn append(&self, _bytes: &[u8]) -> Result<()> {
        Err(Error::Unsupported(
            "MemoryFileHandle content is fixed at construction".to_string(),
        ))
    }

    fn read(&self, position: u64, size: usize) -> Result<Slice> {
        let guard = self.content.read().expect("lock poisoned");
        let start = position as usize;
        let end = start + size;
        if end > guard.len() {
            return Err(Error::Format(format!(
                "read past end of in-memory content: {end} > {}",
                guard.len()
            )));
        }
        Ok(Slice::from(&guard[start..end]))
    }

    fn read_all(&self) -> Result<Slice> {
        Ok(Slice::from(
            self.content.read().expect("lock poisoned").as_slice(),
        ))
    }

    fn file_size(&self) -> Result<u64> {
        Ok(self.content.read().expect("lock poisoned").len() as u64)
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, AtomicOrdering::Release);
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        self.content.write().expect("lock poisoned").clear();
        self.close()
    }

    fn copy_to(&self, path: &Path) -> Result<()> {
        Err(Error::CannotCopyInMemory {
            path: path.to_path_buf(),
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(AtomicOrdering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_constructed_content() {
        let handle = MemoryFileHandle::new(b"abcdef".to_vec());
        assert_eq!(&*handle.read(2, 3).unwrap(), b"cde");
        assert_eq!(handle.file_size().unwrap(), 6);
    }

    #[test]
    fn append_is_unsupported() {
        let handle = MemoryFileHandle::empty();
        assert!(matches!(
            handle.append(b"x"),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn copy_to_fails() {
        let handle = MemoryFileHandle::new(b"x".to_vec());
        assert!(matches!(
            handle.copy_to(Path::new("/tmp/whatever")),
            Err(Error::CannotCopyInMemory { .. })
        ));
    }
}
