// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Encode/decode of the index block's per-entry records.
//!
//! Each record ends with a fixed-width `(nextIndexOffset: u64,
//! nextIndexSize: u32)` pair rather than two varints: a varint's own byte
//! width would depend on the very offsets it's meant to convey, which is
//! circular once the trailing pair is appended to a record of otherwise
//! variable length. `nextIndexSize` carries the just-written record's own
//! size (a reader can cross-check `offset + nextIndexSize == nextIndexOffset`)
//! rather than the next record's size, which isn't known until that record
//! is itself built.

use crate::{
    deadline::Deadline,
    entry::{Entry, FixedKind, FixedValue, PersistentValueRef, ValueHandle},
    error::{Error, Result},
    file::FileHandle,
    slice::Slice,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{io::Write, sync::Arc};
use varint_rs::{VarintReader, VarintWriter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    PutV = 1,
    PutNoV = 2,
    UpdateV = 3,
    UpdateNoV = 4,
    Remove = 5,
    Range = 6,
}

impl Tag {
    fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            1 => Self::PutV,
            2 => Self::PutNoV,
            3 => Self::UpdateV,
            4 => Self::UpdateNoV,
            5 => Self::Remove,
            6 => Self::Range,
            other => return Err(Error::Format(format!("unknown entry tag {other}"))),
        })
    }

    fn for_fixed(kind: FixedKind, has_value: bool) -> Self {
        match (kind, has_value) {
            (FixedKind::Put, true) => Self::PutV,
            (FixedKind::Put, false) => Self::PutNoV,
            (FixedKind::Update, true) => Self::UpdateV,
            (FixedKind::Update, false) => Self::UpdateNoV,
            (FixedKind::Remove, _) => Self::Remove,
        }
    }
}

/// Accumulates raw value bytes for the values block while index records are
/// built, handing back `(offset, length)` for each materialized value.
pub struct ValuesBlockWriter {
    buf: Vec<u8>,
}

impl ValuesBlockWriter {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Appends `value`, returning its `(offset, length)` in the final
    /// values block.
    pub fn push(&mut self, value: &[u8]) -> (u64, u32) {
        let offset = self.buf.len() as u64;
        self.buf.extend_from_slice(value);
        (offset, value.len() as u32)
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for ValuesBlockWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_fixed_value_block<W: Write>(
    writer: &mut W,
    fixed: &FixedValue,
    values: &mut ValuesBlockWriter,
) -> Result<()> {
    let materialized = match &fixed.value {
        ValueHandle::Memory(v) => v.clone(),
        ValueHandle::Persistent(r) => r.as_ref().map(PersistentValueRef::fetch).transpose()?,
    };

    let tag = Tag::for_fixed(fixed.kind, materialized.is_some());
    writer.write_u8(tag as u8)?;
    writer.write_u64_varint(fixed.deadline.unwrap_or(0))?;

    if let Some(value) = materialized {
        let (offset, length) = values.push(&value);
        writer.write_u64_varint(offset)?;
        writer.write_u32_varint(length)?;
    }

    Ok(())
}

fn write_key(writer: &mut Vec<u8>, key: &[u8], prev_key: &[u8]) -> Result<()> {
    let common = key
        .iter()
        .zip(prev_key.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let tail = &key[common..];

    writer.write_u64_varint(common as u64)?;
    writer.write_u64_varint(tail.len() as u64)?;
    writer.write_all(tail)?;

    Ok(())
}

/// Encodes one entry's index record, given the previous entry's sort key
/// for prefix compression. `offset` is this record's own absolute offset
/// within the index block, used to compute `nextIndexOffset`.
pub fn encode_record(
    entry: &Entry,
    prev_key: &[u8],
    offset: u64,
    values: &mut ValuesBlockWriter,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    match entry {
        Entry::Fixed { key, fixed } => {
            let materialized = match &fixed.value {
                ValueHandle::Memory(v) => v.clone(),
                ValueHandle::Persistent(r) => {
                    r.as_ref().map(PersistentValueRef::fetch).transpose()?
                }
            };
            let tag = Tag::for_fixed(fixed.kind, materialized.is_some());
            body.write_u8(tag as u8)?;
            write_key(&mut body, key, prev_key)?;
            body.write_u64_varint(fixed.deadline.unwrap_or(0))?;

            if let Some(value) = materialized {
                let (voffset, vlength) = values.push(&value);
                body.write_u64_varint(voffset)?;
                body.write_u32_varint(vlength)?;
            }
        }
        Entry::Range {
            from_key,
            to_key,
            from_value,
            range_value,
        } => {
            body.write_u8(Tag::Range as u8)?;
            write_key(&mut body, from_key, prev_key)?;
            body.write_u64_varint(to_key.len() as u64)?;
            body.write_all(to_key)?;

            body.write_u8(u8::from(from_value.is_some()))?;
            if let Some(fv) = from_value {
                write_fixed_value_block(&mut body, fv, values)?;
            }
            write_fixed_value_block(&mut body, range_value, values)?;
        }
    }

    let this_record_size = (body.len() + 12) as u32;
    let next_offset = offset + u64::from(this_record_size);

    body.write_u64::<LittleEndian>(next_offset)?;
    body.write_u32::<LittleEndian>(this_record_size)?;

    Ok(body)
}

/// A decoded index record plus the bookkeeping a matcher or cache needs:
/// its own offset, the entry, and where the next record begins.
pub struct DecodedRecord {
    pub offset: u64,
    pub next_offset: u64,
    pub entry: Entry,
}

/// Decodes one record starting at `bytes[0]`. `prev_key` is the previous
/// entry's sort key (for prefix decompression). `file` backs any
/// `Persistent` value handles the record contains.
pub fn decode_record(
    bytes: &[u8],
    offset: u64,
    prev_key: &[u8],
    file: &Arc<dyn FileHandle>,
) -> Result<(DecodedRecord, usize)> {
    let mut cursor = bytes;
    let tag = Tag::from_u8(cursor.read_u8()?)?;

    let entry = match tag {
        Tag::PutV | Tag::PutNoV | Tag::UpdateV | Tag::UpdateNoV | Tag::Remove => {
            let key = read_key(&mut cursor, prev_key)?;
            let deadline = read_deadline(&mut cursor)?;
            let value = read_optional_value(&mut cursor, tag_has_value(tag), file)?;

            let kind = match tag {
                Tag::PutV | Tag::PutNoV => FixedKind::Put,
                Tag::UpdateV | Tag::UpdateNoV => FixedKind::Update,
                Tag::Remove => FixedKind::Remove,
                Tag::Range => unreachable!(),
            };

            Entry::Fixed {
                key,
                fixed: FixedValue {
                    kind,
                    value,
                    deadline,
                },
            }
        }
        Tag::Range => {
            let from_key = read_key(&mut cursor, prev_key)?;
            let to_key_len = cursor.read_u64_varint()? as usize;
            let to_key = Slice::from_reader(&mut cursor, to_key_len)?;

            let has_from_value = cursor.read_u8()? != 0;
            let from_value = if has_from_value {
                Some(read_fixed_value_block(&mut cursor, file)?)
            } else {
                None
            };
            let range_value = read_fixed_value_block(&mut cursor, file)?;

            Entry::Range {
                from_key,
                to_key,
                from_value,
                range_value,
            }
        }
    };

    // Trailing fixed-width (next_offset, this_record_size) pair.
    let next_offset = cursor.read_u64::<LittleEndian>()?;
    let this_record_size = cursor.read_u32::<LittleEndian>()?;

    let consumed = bytes.len() - cursor.len();
    if offset + this_record_size as u64 != next_offset {
        return Err(Error::Format(format!(
            "index record at {offset} has inconsistent next_offset/size"
        )));
    }

    Ok((
        DecodedRecord {
            offset,
            next_offset,
            entry,
        },
        consumed,
    ))
}

fn tag_has_value(tag: Tag) -> bool {
    matches!(tag, Tag::PutV | Tag::UpdateV)
}

fn read_key(cursor: &mut &[u8], prev_key: &[u8]) -> Result<Slice> {
    let common = cursor.read_u64_varint()? as usize;
    let tail_len = cursor.read_u64_varint()? as usize;

    if common > prev_key.len() {
        return Err(Error::Format(format!(
            "key common-prefix length {common} exceeds previous key length {}",
            prev_key.len()
        )));
    }

    let mut key = Vec::with_capacity(common + tail_len);
    key.extend_from_slice(&prev_key[..common]);
    let tail = Slice::from_reader(cursor, tail_len)?;
    key.extend_from_slice(&tail);

    Ok(Slice::from(key))
}

fn read_deadline(cursor: &mut &[u8]) -> Result<Deadline> {
    let raw = cursor.read_u64_varint()?;
    Ok(if raw == 0 { None } else { Some(raw) })
}

fn read_optional_value(
    cursor: &mut &[u8],
    has_value: bool,
    file: &Arc<dyn FileHandle>,
) -> Result<ValueHandle> {
    if !has_value {
        return Ok(ValueHandle::Persistent(None));
    }
    let offset = cursor.read_u64_varint()?;
    let length = cursor.read_u32_varint()?;
    Ok(ValueHandle::Persistent(Some(PersistentValueRef {
        file: Arc::clone(file),
        offset,
        length,
    })))
}

fn read_fixed_value_block(cursor: &mut &[u8], file: &Arc<dyn FileHandle>) -> Result<FixedValue> {
    let tag = Tag::from_u8(cursor.read_u8()?)?;
    let deadline = read_deadline(cursor)?;
    let value = read_optional_value(cursor, tag_has_value(tag), file)?;

    let kind = match tag {
        Tag::PutV | Tag::PutNoV => FixedKind::Put,
        Tag::UpdateV | Tag::UpdateNoV => FixedKind::Update,
        Tag::Remove => FixedKind::Remove,
        Tag::Range => return Err(Error::Format("Range tag inside a fixed-value block".into())),
    };

    Ok(FixedValue {
        kind,
        value,
        deadline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFileHandle;

    #[test]
    fn fixed_put_round_trips() {
        let file: Arc<dyn FileHandle> = Arc::new(MemoryFileHandle::empty());
        let mut values = ValuesBlockWriter::new();

        let entry = Entry::put(
            Slice::from(b"abc".as_slice()),
            Some(Slice::from(b"hello".as_slice())),
            Some(100),
        );

        let bytes = encode_record(&entry, b"", 0, &mut values).unwrap();
        let (decoded, consumed) = decode_record(&bytes, 0, b"", &file).unwrap();

        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.next_offset, bytes.len() as u64);

        let Entry::Fixed { key, fixed } = decoded.entry else {
            panic!("expected fixed");
        };
        assert_eq!(&*key, b"abc");
        assert_eq!(fixed.deadline, Some(100));
        assert_eq!(fixed.value.approx_len(), 5);
    }

    #[test]
    fn key_prefix_compression_round_trips() {
        let file: Arc<dyn FileHandle> = Arc::new(MemoryFileHandle::empty());
        let mut values = ValuesBlockWriter::new();

        let e1 = Entry::put(Slice::from(b"abcdef".as_slice()), None, None);
        let e2 = Entry::put(Slice::from(b"abcxyz".as_slice()), None, None);

        let b1 = encode_record(&e1, b"", 0, &mut values).unwrap();
        let b2 = encode_record(&e2, b"abcdef", b1.len() as u64, &mut values).unwrap();

        let (d1, _) = decode_record(&b1, 0, b"", &file).unwrap();
        let (d2, _) = decode_record(&b2, b1.len() as u64, b"abcdef", &file).unwrap();

        assert_eq!(d1.entry.sort_key(), b"abcdef");
        assert_eq!(d2.entry.sort_key(), b"abcxyz");
    }

    #[test]
    fn range_round_trips() {
        let file: Arc<dyn FileHandle> = Arc::new(MemoryFileHandle::empty());
        let mut values = ValuesBlockWriter::new();

        let entry = Entry::Range {
            from_key: Slice::from(b"c".as_slice()),
            to_key: Slice::from(b"g".as_slice()),
            from_value: Some(FixedValue::put(Some(Slice::from(b"f".as_slice())), None)),
            range_value: FixedValue::update(Some(Slice::from(b"r".as_slice())), Some(5)),
        };

        let bytes = encode_record(&entry, b"", 0, &mut values).unwrap();
        let (decoded, _) = decode_record(&bytes, 0, b"", &file).unwrap();

        let Entry::Range {
            from_key,
            to_key,
            from_value,
            range_value,
        } = decoded.entry
        else {
            panic!("expected range");
        };
        assert_eq!(&*from_key, b"c");
        assert_eq!(&*to_key, b"g");
        assert!(from_value.is_some());
        assert_eq!(range_value.deadline, Some(5));
    }
}
