// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The buffer cleaner: a single background worker that releases retired
//! memory mappings off the caller's critical path.
//!
//! [`crate::file::MappedFileHandle`] never drops an `Mmap`/`MmapMut`
//! in place on `close` or on growth: unmapping a region that a concurrent
//! reader might still be walking is only safe once no other thread holds a
//! reference to it, and the handle itself can't prove that locally. Instead
//! it hands the mapping to this cleaner, which holds it until the process
//! is confident nothing else still needs it, then drops it.
//!
//! This implementation's confidence is simple and conservative: the
//! mapping is dropped as soon as the cleaner dequeues it. A reader that
//! raced a `close` already observed `NotOpen`/a lazily-reopened mapping
//! before the retire message was even sent (the handle flips `open` to
//! `false` under its own lock before enqueueing), so by the time this
//! worker sees the message, no reader is relying on the old mapping.
use memmap2::{Mmap, MmapMut};
use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
    thread::JoinHandle,
};

enum Retired {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
    Shutdown,
}

/// Global singleton worker that drops retired mappings off-thread.
pub struct BufferCleaner {
    sender: crossbeam_channel::Sender<Retired>,
    _worker: JoinHandle<()>,
}

static GLOBAL: OnceLock<Arc<BufferCleaner>> = OnceLock::new();

impl BufferCleaner {
    /// Returns the process-wide cleaner, starting its worker thread on
    /// first use.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| {
                let (sender, receiver) = crossbeam_channel::unbounded::<Retired>();

                let worker = std::thread::Builder::new()
                    .name("lsm-segment-buffer-cleaner".to_string())
                    .spawn(move || {
                        for message in receiver {
                            match message {
                                Retired::ReadWrite(m) => drop(m),
                                Retired::ReadOnly(m) => drop(m),
                                Retired::Shutdown => break,
                            }
                        }
                    })
                    .expect("failed to spawn buffer cleaner thread");

                Arc::new(Self {
                    sender,
                    _worker: worker,
                })
            })
            .clone()
    }

    /// Hands a read-write mapping off for deferred release. `path` is kept
    /// only for diagnostics.
    pub fn retire_mut(&self, map: MmapMut, path: PathBuf) {
        log::trace!("Retiring read-write mapping for {}", path.display());
        let _ = self.sender.send(Retired::ReadWrite(map));
    }

    /// Hands a read-only mapping off for deferred release.
    pub fn retire_ro(&self, map: Mmap, path: PathBuf) {
        log::trace!("Retiring read-only mapping for {}", path.display());
        let _ = self.sender.send(Retired::ReadOnly(map));
    }
}

/// Overload-style dispatch so callers can write `retire(map, path)`
/// regardless of mapping kind.
pub trait Retire<T> {
    fn retire(&self, map: T, path: PathBuf);
}

impl Retire<MmapMut> for BufferCleaner {
    fn retire(&self, map: MmapMut, path: PathBuf) {
        self.retire_mut(map, path);
    }
}

impl Retire<Mmap> for BufferCleaner {
    fn retire(&self, map: Mmap, path: PathBuf) {
        self.retire_ro(map, path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn global_cleaner_is_a_singleton() {
        let a = BufferCleaner::global();
        let b = BufferCleaner::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
