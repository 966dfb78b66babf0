//! Key/value array metadata.
//!
//! An array carries a small keyed metadata store persisted as one buffer per
//! write transaction. Each buffer is a concatenation of little-endian
//! entries:
//!
//! ```text
//! uint32 key_size
//! bytes[key_size] key
//! uint8  deleted        // 0 = live entry, 1 = tombstone
//! uint8  datatype_tag
//! uint32 value_count    // only if !deleted
//! bytes[value_count * datatype_size] value   // only if !deleted
//! ```
//!
//! [`ArrayMetadata::deserialize`] consumes the buffers oldest to newest: a
//! later live entry for a key shadows an earlier one, and a later tombstone
//! removes the key from the live view.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::datatype::{Datatype, UnknownDatatypeError};

/// A metadata deserialization or update error.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// A buffer ended in the middle of an entry.
    #[error("metadata buffer truncated at byte {offset}")]
    Truncated {
        /// The byte offset at which the entry could not be read.
        offset: usize,
    },
    /// An entry key is not valid UTF-8.
    #[error("metadata key is not valid UTF-8")]
    InvalidKey(#[from] std::string::FromUtf8Error),
    /// An entry carries an unknown datatype tag.
    #[error(transparent)]
    UnknownDatatype(#[from] UnknownDatatypeError),
    /// An entry's declared value extends past the end of its buffer.
    #[error("metadata value for key `{key}` overruns its buffer ({declared} declared bytes, {remaining} remaining)")]
    ValueOverrun {
        /// The entry key.
        key: String,
        /// The declared value size in bytes.
        declared: u64,
        /// The bytes remaining in the buffer.
        remaining: usize,
    },
    /// The value passed to [`ArrayMetadata::put`] does not match its
    /// declared count and datatype.
    #[error("metadata value for key `{key}` has {got} bytes, expected {expected}")]
    InvalidValueSize {
        /// The entry key.
        key: String,
        /// The expected value size in bytes.
        expected: u64,
        /// The provided value size in bytes.
        got: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct MetadataEntry {
    datatype: Datatype,
    value_num: u32,
    value: Vec<u8>,
    deleted: bool,
}

/// The key/value metadata of an array.
///
/// Entries are keyed by UTF-8 strings and hold `value_num` elements of one
/// datatype. Tombstones are retained so that [`serialize`](Self::serialize)
/// reproduces deletions for later transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArrayMetadata {
    entries: BTreeMap<String, MetadataEntry>,
}

impl ArrayMetadata {
    /// Create an empty metadata store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deserialize metadata from persisted buffers, ordered oldest to
    /// newest.
    ///
    /// # Errors
    /// Returns [`MetadataError`] on a truncated entry, an unknown datatype
    /// tag, or a value overrunning its buffer.
    pub fn deserialize<B: AsRef<[u8]>>(buffers: &[B]) -> Result<Self, MetadataError> {
        let mut metadata = Self::new();
        for buffer in buffers {
            let buffer = buffer.as_ref();
            let mut reader = Reader {
                bytes: buffer,
                offset: 0,
            };
            while !reader.exhausted() {
                let (key, entry) = read_entry(&mut reader)?;
                metadata.entries.insert(key, entry);
            }
        }
        Ok(metadata)
    }

    /// Serialize all entries, tombstones included, into one buffer.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        for (key, entry) in &self.entries {
            buffer.extend_from_slice(&(key.len() as u32).to_le_bytes());
            buffer.extend_from_slice(key.as_bytes());
            buffer.push(u8::from(entry.deleted));
            buffer.push(entry.datatype.tag());
            if !entry.deleted {
                buffer.extend_from_slice(&entry.value_num.to_le_bytes());
                buffer.extend_from_slice(&entry.value);
            }
        }
        buffer
    }

    /// Get the latest live entry for `key`.
    ///
    /// Returns the datatype, the number of values, and the value bytes, or
    /// [`None`] if the key is absent or deleted.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<(Datatype, u32, &[u8])> {
        let entry = self.entries.get(key)?;
        (!entry.deleted).then_some((entry.datatype, entry.value_num, entry.value.as_slice()))
    }

    /// Insert or replace an entry.
    ///
    /// # Errors
    /// Returns [`MetadataError::InvalidValueSize`] if `value` does not hold
    /// exactly `value_num` elements of `datatype`.
    pub fn put(
        &mut self,
        key: &str,
        datatype: Datatype,
        value_num: u32,
        value: &[u8],
    ) -> Result<(), MetadataError> {
        let expected = u64::from(value_num) * datatype.size();
        if value.len() as u64 != expected {
            return Err(MetadataError::InvalidValueSize {
                key: key.to_string(),
                expected,
                got: value.len(),
            });
        }
        self.entries.insert(
            key.to_string(),
            MetadataEntry {
                datatype,
                value_num,
                value: value.to_vec(),
                deleted: false,
            },
        );
        Ok(())
    }

    /// Delete `key` by inserting a tombstone.
    pub fn delete_key(&mut self, key: &str) {
        let datatype = self
            .entries
            .get(key)
            .map_or(Datatype::Any, |entry| entry.datatype);
        self.entries.insert(
            key.to_string(),
            MetadataEntry {
                datatype,
                value_num: 0,
                value: Vec::new(),
                deleted: true,
            },
        );
    }

    /// The number of live entries.
    #[must_use]
    pub fn num(&self) -> u64 {
        self.entries.values().filter(|entry| !entry.deleted).count() as u64
    }

    /// Returns true if there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num() == 0
    }

    /// Iterate over the live entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Datatype, u32, &[u8])> {
        self.entries.iter().filter_map(|(key, entry)| {
            (!entry.deleted).then_some((
                key.as_str(),
                entry.datatype,
                entry.value_num,
                entry.value.as_slice(),
            ))
        })
    }
}

fn read_entry(reader: &mut Reader<'_>) -> Result<(String, MetadataEntry), MetadataError> {
    let key_size = reader.read_u32()?;
    let key = String::from_utf8(reader.read_bytes(key_size as usize)?.to_vec())?;
    let deleted = reader.read_u8()? != 0;
    let datatype = Datatype::from_tag(reader.read_u8()?)?;

    if deleted {
        return Ok((
            key,
            MetadataEntry {
                datatype,
                value_num: 0,
                value: Vec::new(),
                deleted: true,
            },
        ));
    }

    let value_num = reader.read_u32()?;
    let declared = u64::from(value_num) * datatype.size();
    let remaining = reader.remaining();
    if declared > remaining as u64 {
        return Err(MetadataError::ValueOverrun {
            key,
            declared,
            remaining,
        });
    }
    let value = reader.read_bytes(declared as usize)?.to_vec();
    Ok((
        key,
        MetadataEntry {
            datatype,
            value_num,
            value,
            deleted: false,
        },
    ))
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn exhausted(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], MetadataError> {
        let bytes = self
            .bytes
            .get(self.offset..self.offset + len)
            .ok_or(MetadataError::Truncated {
                offset: self.offset,
            })?;
        self.offset += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, MetadataError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, MetadataError> {
        let bytes = self.read_bytes(size_of::<u32>())?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_bytes(key: &str, deleted: bool, datatype: Datatype, value: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
        bytes.extend_from_slice(key.as_bytes());
        bytes.push(u8::from(deleted));
        bytes.push(datatype.tag());
        if !deleted {
            let value_num = value.len() as u64 / datatype.size();
            bytes.extend_from_slice(&(value_num as u32).to_le_bytes());
            bytes.extend_from_slice(value);
        }
        bytes
    }

    #[test]
    fn deserialize_three_buffers() {
        let value1: Vec<u8> = [100_i32, 200]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buffers = vec![
            entry_bytes("key1", false, Datatype::Int32, &value1),
            entry_bytes("key2", false, Datatype::Float64, &1.0_f64.to_le_bytes()),
            entry_bytes("key3", false, Datatype::StringAscii, b"strmetadata"),
        ];
        let metadata = ArrayMetadata::deserialize(&buffers).unwrap();

        let (datatype, value_num, value) = metadata.get("key1").unwrap();
        assert_eq!(datatype, Datatype::Int32);
        assert_eq!(value_num, 2);
        assert_eq!(value, value1.as_slice());

        let (datatype, value_num, value) = metadata.get("key2").unwrap();
        assert_eq!(datatype, Datatype::Float64);
        assert_eq!(value_num, 1);
        assert_eq!(value, 1.0_f64.to_le_bytes());

        let (datatype, value_num, value) = metadata.get("key3").unwrap();
        assert_eq!(datatype, Datatype::StringAscii);
        assert_eq!(value_num, 11);
        assert_eq!(value, b"strmetadata");

        assert!(metadata.get("key4").is_none());
        assert_eq!(metadata.num(), 3);
    }

    #[test]
    fn later_entries_shadow_earlier() {
        let buffers = vec![
            entry_bytes("k", false, Datatype::Int32, &7_i32.to_le_bytes()),
            entry_bytes("k", false, Datatype::Int32, &9_i32.to_le_bytes()),
        ];
        let metadata = ArrayMetadata::deserialize(&buffers).unwrap();
        let (_, _, value) = metadata.get("k").unwrap();
        assert_eq!(value, 9_i32.to_le_bytes());
    }

    #[test]
    fn tombstone_removes_key() {
        let buffers = vec![
            entry_bytes("k", false, Datatype::Int32, &7_i32.to_le_bytes()),
            entry_bytes("k", true, Datatype::Int32, &[]),
        ];
        let metadata = ArrayMetadata::deserialize(&buffers).unwrap();
        assert!(metadata.get("k").is_none());
        assert!(metadata.is_empty());
    }

    #[test]
    fn round_trip_with_tombstone() {
        let mut metadata = ArrayMetadata::new();
        metadata
            .put("a", Datatype::UInt16, 2, &[1, 0, 2, 0])
            .unwrap();
        metadata.put("b", Datatype::Int64, 1, &5_i64.to_le_bytes()).unwrap();
        metadata.delete_key("b");
        metadata.put("c", Datatype::StringUtf8, 2, b"hi").unwrap();

        let deserialized = ArrayMetadata::deserialize(&[metadata.serialize()]).unwrap();
        assert_eq!(deserialized, metadata);
        assert_eq!(deserialized.num(), 2);
        assert!(deserialized.get("b").is_none());
    }

    #[test]
    fn multiple_entries_per_buffer() {
        let mut buffer = entry_bytes("x", false, Datatype::UInt8, &[3]);
        buffer.extend(entry_bytes("y", false, Datatype::UInt8, &[4]));
        let metadata = ArrayMetadata::deserialize(&[buffer]).unwrap();
        assert_eq!(metadata.num(), 2);
    }

    #[test]
    fn truncated_entry() {
        let mut buffer = entry_bytes("k", false, Datatype::Int32, &7_i32.to_le_bytes());
        buffer.truncate(buffer.len() - 2);
        assert!(matches!(
            ArrayMetadata::deserialize(&[buffer]),
            Err(MetadataError::ValueOverrun { .. })
        ));

        let short = vec![3_u8, 0, 0];
        assert!(matches!(
            ArrayMetadata::deserialize(&[short]),
            Err(MetadataError::Truncated { .. })
        ));
    }

    #[test]
    fn unknown_datatype_tag() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&1_u32.to_le_bytes());
        buffer.push(b'k');
        buffer.push(0);
        buffer.push(255);
        assert!(matches!(
            ArrayMetadata::deserialize(&[buffer]),
            Err(MetadataError::UnknownDatatype(_))
        ));
    }

    #[test]
    fn put_validates_value_size() {
        let mut metadata = ArrayMetadata::new();
        assert!(matches!(
            metadata.put("k", Datatype::Int32, 2, &[0; 7]),
            Err(MetadataError::InvalidValueSize { .. })
        ));
    }
}
