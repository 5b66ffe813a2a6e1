// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The byte-slice primitive: an owned or sub-sliced immutable byte window.

use crate::error::{Error, Result};
use byteview::ByteView;
use std::ops::Deref;

/// An immutable, cheaply cloneable view over bytes.
///
/// A `Slice` is either a **view** — fully written, `written_len == len() ==`
/// backing capacity used — or was produced by a [`Slice::with_capacity`]
/// **build** and grown with [`Slice::add`]/[`Slice::add_unsigned`], which
/// track `written_len` separately from capacity until the build is frozen
/// with [`Slice::freeze`].
///
/// Sub-slicing (`Slice::slice`) shares the backing storage without copying,
/// the same way `byteview::ByteView` does.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Slice(ByteView);

impl Deref for Slice {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Slice {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Slice {
    fn from(value: &[u8]) -> Self {
        Self(ByteView::from(value))
    }
}

impl From<Vec<u8>> for Slice {
    fn from(value: Vec<u8>) -> Self {
        Self(ByteView::from(value))
    }
}

impl<const N: usize> From<[u8; N]> for Slice {
    fn from(value: [u8; N]) -> Self {
        Self(ByteView::from(value.as_slice()))
    }
}

impl Slice {
    /// Returns an empty slice.
    #[must_use]
    pub fn empty() -> Self {
        Self(ByteView::new())
    }

    /// Logical length (equivalent to `written_len` for a frozen build).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shares the backing storage for `range`, without copying.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds, same as slicing a `&[u8]`.
    #[must_use]
    pub fn slice(&self, range: impl std::ops::RangeBounds<usize>) -> Self {
        Self(self.0.slice(range))
    }

    /// Reads a fixed-size chunk from a reader into an owned `Slice`.
    pub fn from_reader<R: std::io::Read>(reader: &mut R, len: usize) -> Result<Self> {
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        Ok(Self::from(buf))
    }

    /// Begins a build slice with the given capacity. `written_len` starts at
    /// zero; use [`Builder::add`]/[`Builder::add_unsigned`] to append, then
    /// [`Builder::freeze`] to obtain an immutable [`Slice`].
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Builder {
        Builder {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }
}

/// A growable, write-once builder for a [`Slice`].
///
/// Tracks `written_len` (`buf.len()`) separately from the declared
/// `capacity`; any append that would exceed `capacity` fails with
/// [`Error::FailedToWriteAllBytes`]-shaped bookkeeping at the call site that
/// freezes the builder into a file append (see [`crate::file`]).
pub struct Builder {
    buf: Vec<u8>,
    capacity: usize,
}

impl Builder {
    /// Appends `bytes`, failing if it would exceed the declared capacity.
    pub fn add(&mut self, bytes: &[u8]) -> Result<()> {
        if self.buf.len() + bytes.len() > self.capacity {
            return Err(Error::Format(format!(
                "InsufficientCapacity: {} + {} > {}",
                self.buf.len(),
                bytes.len(),
                self.capacity
            )));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Appends a single byte.
    pub fn add_unsigned(&mut self, byte: u8) -> Result<()> {
        self.add(&[byte])
    }

    /// How many bytes have been written so far.
    #[must_use]
    pub fn written_len(&self) -> usize {
        self.buf.len()
    }

    /// The declared capacity of this build.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether every declared byte has been written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.buf.len() == self.capacity
    }

    /// Freezes the build into an immutable [`Slice`], regardless of whether
    /// every declared byte was written. Callers that require full writes
    /// (file handle appends) check [`Builder::is_complete`] beforehand and
    /// raise [`Error::FailedToWriteAllBytes`] themselves.
    #[must_use]
    pub fn freeze(self) -> Slice {
        Slice::from(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_sub_slice_shares_backing() {
        let s = Slice::from(b"hello world".as_slice());
        let sub = s.slice(6..);
        assert_eq!(&*sub, b"world");
    }

    #[test]
    fn builder_tracks_written_len() {
        let mut b = Slice::with_capacity(5);
        b.add(b"hi").unwrap();
        assert_eq!(b.written_len(), 2);
        assert!(!b.is_complete());
        b.add(b"the").unwrap();
        assert!(b.is_complete());
        let s = b.freeze();
        assert_eq!(&*s, b"hithe");
    }

    #[test]
    fn builder_rejects_overflow() {
        let mut b = Slice::with_capacity(2);
        assert!(b.add(b"abc").is_err());
    }
}
