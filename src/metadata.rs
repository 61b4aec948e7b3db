//! Array-level key/value metadata.
//!
//! # Entry Layout
//!
//! ```text
//! u32 key_len | key | u8 del | [u8 datatype | u32 value_num | value bytes]
//! ```
//!
//! The bracketed part is present only when `del == 0`. A file is a plain
//! concatenation of entries. When several files are merged, later ones
//! override earlier ones and a `del == 1` entry removes the key.

use std::collections::BTreeMap;

use crate::datatype::Datatype;
use crate::error::{Result, StorageError};
use crate::range::FixedElement;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataValue {
    pub datatype: Datatype,
    /// Element count; byte length for strings.
    pub value_num: u32,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Value(MetadataValue),
    Deleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, Entry>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, datatype: Datatype, value_num: u32, value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::Metadata("key cannot be empty".to_string()));
        }
        if datatype == Datatype::Any {
            return Err(StorageError::Metadata(
                "value datatype cannot be ANY".to_string(),
            ));
        }
        if value_num == 0 {
            return Err(StorageError::Metadata(format!(
                "value for '{}' must have at least one element",
                key
            )));
        }
        let expected = value_num as usize * datatype.size();
        if value.len() != expected {
            return Err(StorageError::Metadata(format!(
                "value for '{}' has {} bytes, expected {}",
                key,
                value.len(),
                expected
            )));
        }
        self.entries.insert(
            key.to_string(),
            Entry::Value(MetadataValue {
                datatype,
                value_num,
                value: value.to_vec(),
            }),
        );
        Ok(())
    }

    pub fn put_values<T: FixedElement>(&mut self, key: &str, datatype: Datatype, values: &[T]) -> Result<()> {
        if datatype.is_string() || datatype.size() != T::SIZE {
            return Err(StorageError::Metadata(format!(
                "{} values cannot be stored as {}",
                std::any::type_name::<T>(),
                datatype
            )));
        }
        let mut bytes = Vec::with_capacity(values.len() * T::SIZE);
        for v in values {
            v.encode(&mut bytes);
        }
        self.put(key, datatype, values.len() as u32, &bytes)
    }

    pub fn put_str(&mut self, key: &str, value: &str) -> Result<()> {
        self.put(key, Datatype::StringUtf8, value.len() as u32, value.as_bytes())
    }

    /// Record a deletion; it removes the key from earlier files on merge.
    pub fn delete(&mut self, key: &str) {
        self.entries.insert(key.to_string(), Entry::Deleted);
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        match self.entries.get(key) {
            Some(Entry::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_as<T: FixedElement>(&self, key: &str) -> Result<Option<Vec<T>>> {
        let Some(v) = self.get(key) else {
            return Ok(None);
        };
        if v.datatype.is_string() || v.datatype.size() != T::SIZE {
            return Err(StorageError::Metadata(format!(
                "'{}' holds {} values",
                key, v.datatype
            )));
        }
        v.value
            .chunks_exact(T::SIZE)
            .map(|c| {
                T::decode(c).ok_or_else(|| StorageError::Metadata(format!("corrupt value for '{}'", key)))
            })
            .collect::<Result<Vec<T>>>()
            .map(Some)
    }

    pub fn has_key(&self, key: &str) -> Option<Datatype> {
        self.get(key).map(|v| v.datatype)
    }

    /// Number of live keys.
    pub fn num(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::Value(_)))
            .count()
    }

    /// Live entry at `index` in key order.
    pub fn get_by_index(&self, index: usize) -> Option<(&str, &MetadataValue)> {
        self.entries
            .iter()
            .filter_map(|(k, e)| match e {
                Entry::Value(v) => Some((k.as_str(), v)),
                Entry::Deleted => None,
            })
            .nth(index)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Encode every entry, deletions included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, entry) in &self.entries {
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            match entry {
                Entry::Deleted => out.push(1),
                Entry::Value(v) => {
                    out.push(0);
                    out.push(v.datatype.as_u8());
                    out.extend_from_slice(&v.value_num.to_le_bytes());
                    out.extend_from_slice(&v.value);
                }
            }
        }
        out
    }

    /// Merge `buffers` oldest first. The result holds live keys only.
    pub fn deserialize(buffers: &[Vec<u8>]) -> Result<Self> {
        Self::merge(buffers, false)
    }

    /// Merge `buffers` oldest first, keeping deletions so the result can
    /// replace them while still masking older files.
    pub fn consolidate(buffers: &[Vec<u8>]) -> Result<Self> {
        Self::merge(buffers, true)
    }

    fn merge(buffers: &[Vec<u8>], keep_deletions: bool) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for buf in buffers {
            let mut pos = 0usize;
            while pos < buf.len() {
                let key_len = read_u32(buf, &mut pos)? as usize;
                let key = String::from_utf8(read_bytes(buf, &mut pos, key_len)?.to_vec())
                    .map_err(|e| StorageError::InvalidFormat(format!("metadata key: {}", e)))?;
                let del = read_bytes(buf, &mut pos, 1)?[0];
                if del == 1 {
                    if keep_deletions {
                        entries.insert(key, Entry::Deleted);
                    } else {
                        entries.remove(&key);
                    }
                    continue;
                }
                let datatype = Datatype::from_u8(read_bytes(buf, &mut pos, 1)?[0])?;
                let value_num = read_u32(buf, &mut pos)?;
                let len = value_num as usize * datatype.size();
                let value = read_bytes(buf, &mut pos, len)?.to_vec();
                entries.insert(
                    key,
                    Entry::Value(MetadataValue {
                        datatype,
                        value_num,
                        value,
                    }),
                );
            }
        }
        Ok(Self { entries })
    }
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(n)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| StorageError::InvalidFormat(format!("metadata truncated at byte {}", pos)))?;
    let out = &buf[*pos..end];
    *pos = end;
    Ok(out)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = read_bytes(buf, pos, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
