// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{fmt, path::PathBuf};

/// Coarse classification of an I/O failure, independent of the backing
/// implementation (channel file vs. memory-mapped file) that raised it.
#[derive(Debug)]
pub enum IoErrorKind {
    NotFound,
    AlreadyExists,
    NotReadable,
    NotWritable,
    ReadOnlyMap,
    BufferOverflow,
    NotOpen,
    Other(std::io::Error),
}

impl fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file"),
            Self::AlreadyExists => write!(f, "file already exists"),
            Self::NotReadable => write!(f, "handle is not readable"),
            Self::NotWritable => write!(f, "handle is not writable"),
            Self::ReadOnlyMap => write!(f, "map is read-only"),
            Self::BufferOverflow => write!(f, "mapped buffer overflowed"),
            Self::NotOpen => write!(f, "handle is closed"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

/// The single error type surfaced by this crate.
///
/// Every fallible operation returns a `Result<T, Error>`. Nothing in this
/// crate unwinds for control flow.
#[derive(Debug)]
pub enum Error {
    /// An underlying file operation failed.
    Io { kind: IoErrorKind, path: Option<PathBuf> },

    /// The on-disk format was violated: bad magic/version, an index walk ran
    /// past its bounds, a value offset pointed outside the values block, or
    /// an unknown entry tag was read.
    Format(String),

    /// A caller supplied a build [`crate::slice::Slice`] that was not fully
    /// written before being handed to a file handle append.
    FailedToWriteAllBytes {
        expected: usize,
        actual: usize,
        slice_size: usize,
    },

    /// `copy_to` was called on an in-memory-only file handle.
    CannotCopyInMemory { path: PathBuf },

    /// The tail of a segment file was corrupted and the caller did not opt
    /// into dropping it.
    CorruptedTailEntries { path: PathBuf, offset: u64 },

    /// The operation is not supported by this handle kind, e.g. `append` on
    /// a [`crate::file::MemoryFileHandle`] after construction.
    Unsupported(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { kind, path } => match path {
                Some(p) => write!(f, "io error at {}: {kind}", p.display()),
                None => write!(f, "io error: {kind}"),
            },
            Self::Format(detail) => write!(f, "segment format error: {detail}"),
            Self::FailedToWriteAllBytes {
                expected,
                actual,
                slice_size,
            } => write!(
                f,
                "failed to write all bytes: expected {expected}, wrote {actual} (slice capacity {slice_size})"
            ),
            Self::CannotCopyInMemory { path } => {
                write!(f, "cannot copy in-memory file handle at {}", path.display())
            }
            Self::CorruptedTailEntries { path, offset } => write!(
                f,
                "corrupted tail entries in {} starting at offset {offset}",
                path.display()
            ),
            Self::Unsupported(detail) => write!(f, "unsupported operation: {detail}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        let kind = match value.kind() {
            std::io::ErrorKind::NotFound => IoErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => IoErrorKind::AlreadyExists,
            _ => IoErrorKind::Other(value),
        };
        Self::Io { kind, path: None }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
