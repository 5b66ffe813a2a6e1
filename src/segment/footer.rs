// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The fixed-shape trailer written at the tail of every segment file.
//!
//! Checksum uses `xxh3_64` truncated to its low 32 bits rather than CRC32,
//! matching the `#hash_type`/`#checksum_type` = `xxh3` convention the
//! teacher's meta block advertises, instead of pulling in a separate CRC
//! crate for a single field.

use crate::{
    bloom::BlockedBloomFilter,
    error::{Error, Result},
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

pub const MAGIC: &[u8; 4] = b"LSG1";
pub const FORMAT_VERSION: u64 = 1;

/// The trailer parsed eagerly from a segment file's tail.
pub struct Footer {
    pub version: u64,
    pub kv_count: u64,
    pub has_range: bool,
    pub bloom: Option<BlockedBloomFilter>,
    pub index_offset: u64,
    pub index_length: u64,
}

impl Footer {
    pub fn write<W: Write>(
        writer: &mut W,
        kv_count: u64,
        has_range: bool,
        bloom: Option<&BlockedBloomFilter>,
        index_offset: u64,
        index_length: u64,
    ) -> Result<()> {
        let mut body = Vec::new();
        body.write_all(MAGIC)?;
        body.write_u64_varint(FORMAT_VERSION)?;
        body.write_u64_varint(kv_count)?;
        body.write_u8(u8::from(has_range))?;

        match bloom {
            Some(filter) => {
                let bytes = filter.to_bytes();
                body.write_u64_varint(bytes.len() as u64)?;
                body.write_all(&bytes)?;
            }
            None => body.write_u64_varint(0)?,
        }

        body.write_u64_varint(index_offset)?;
        body.write_u64_varint(index_length)?;

        let checksum = (xxhash_rust::xxh3::xxh3_64(&body) & 0xFFFF_FFFF) as u32;

        writer.write_all(&body)?;
        writer.write_u32::<LittleEndian>(checksum)?;

        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;

        if body.len() < 4 {
            return Err(Error::Format("footer shorter than checksum field".into()));
        }
        let (body, checksum_bytes) = body.split_at(body.len() - 4);
        let expected = u32::from_le_bytes(checksum_bytes.try_into().expect("4 bytes"));
        let actual = (xxhash_rust::xxh3::xxh3_64(body) & 0xFFFF_FFFF) as u32;
        if expected != actual {
            return Err(Error::Format(format!(
                "footer checksum mismatch: expected {expected}, got {actual}"
            )));
        }

        let mut cursor = body;

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::Format(format!("bad magic: {magic:?}")));
        }

        let version = cursor.read_u64_varint()?;
        if version != FORMAT_VERSION {
            return Err(Error::Format(format!(
                "unsupported format version: {version}"
            )));
        }

        let kv_count = cursor.read_u64_varint()?;
        let has_range = cursor.read_u8()? != 0;

        let bloom_len = cursor.read_u64_varint()? as usize;
        let bloom = if bloom_len > 0 {
            let mut bytes = vec![0u8; bloom_len];
            cursor.read_exact(&mut bytes)?;
            Some(BlockedBloomFilter::from_bytes(&bytes)?)
        } else {
            None
        };

        let index_offset = cursor.read_u64_varint()?;
        let index_length = cursor.read_u64_varint()?;

        Ok(Self {
            version,
            kv_count,
            has_range,
            bloom,
            index_offset,
            index_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BlockedBloomFilter;

    #[test]
    fn footer_round_trips_without_bloom() {
        let mut buf = Vec::new();
        Footer::write(&mut buf, 42, true, None, 10, 20).unwrap();

        let footer = Footer::read(&mut &buf[..]).unwrap();
        assert_eq!(footer.kv_count, 42);
        assert!(footer.has_range);
        assert!(footer.bloom.is_none());
        assert_eq!(footer.index_offset, 10);
        assert_eq!(footer.index_length, 20);
    }

    #[test]
    fn footer_round_trips_with_bloom() {
        let mut filter = BlockedBloomFilter::with_fp_rate(4, 0.01);
        filter.set_with_hash(BlockedBloomFilter::get_hash(b"a"));

        let mut buf = Vec::new();
        Footer::write(&mut buf, 1, false, Some(&filter), 0, 5).unwrap();

        let footer = Footer::read(&mut &buf[..]).unwrap();
        assert!(footer.bloom.unwrap().contains(b"a"));
    }

    #[test]
    fn footer_rejects_corrupted_checksum() {
        let mut buf = Vec::new();
        Footer::write(&mut buf, 1, false, None, 0, 0).unwrap();
        *buf.last_mut().unwrap() ^= 0xFF;

        assert!(Footer::read(&mut &buf[..]).is_err());
    }
}
