// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Uniform read/append over memory-mapped or channel-backed files, with
//! lazy reopening and a deferred-cleanup discipline for unmapping.

mod channel;
mod mmap;
mod memory;

pub use channel::ChannelFileHandle;
pub use mmap::MappedFileHandle;
pub use memory::MemoryFileHandle;

use crate::{error::Result, slice::Slice};
use std::path::Path;

/// Uniform operations over a file-backed or in-memory byte store.
///
/// Implementations track an `open` flag internally (§5): a reader that
/// races a `close` observes either the pre-close or post-reopen state, but
/// never a torn read through a released mapping.
pub trait FileHandle: Send + Sync + std::fmt::Debug {
    /// Appends `bytes` to the end of the handle's content.
    fn append(&self, bytes: &[u8]) -> Result<()>;

    /// Reads `size` bytes starting at `position`.
    fn read(&self, position: u64, size: usize) -> Result<Slice>;

    /// Reads a single byte at `position`.
    fn get(&self, position: u64) -> Result<u8> {
        Ok(self.read(position, 1)?[0])
    }

    /// Reads the entire content.
    fn read_all(&self) -> Result<Slice>;

    /// Current logical size in bytes.
    fn file_size(&self) -> Result<u64>;

    /// Closes the handle. Idempotent: closing twice is a no-op, never an
    /// error, matching the buffer cleaner's at-least-once delivery
    /// discipline.
    fn close(&self) -> Result<()>;

    /// Deletes the underlying file. Closes first if still open.
    fn delete(&self) -> Result<()>;

    /// Copies the underlying file to `dest`.
    fn copy_to(&self, dest: &Path) -> Result<()>;

    /// Whether the handle currently has a materialized OS resource open.
    fn is_open(&self) -> bool;
}
