//! Consolidated fragment metadata (`__fragment_meta/*.meta`).
//!
//! # Payload Layout
//!
//! ```text
//! u32 fragment_num
//! fragment_num * { u64 name_len, name, u64 offset }
//! blocks                 one per fragment, offsets relative to payload start
//! ```
//!
//! A reader holding this buffer resolves a fragment's metadata by name
//! without a per-fragment round trip.

use std::collections::HashMap;
use std::sync::Arc;

use crate::encryption::EncryptionKey;
use crate::error::{Result, StorageError};
use crate::fragment::metadata::FragmentMetadata;
use crate::tile;
use crate::uri::Uri;
use crate::vfs::Vfs;

#[derive(Debug, Clone)]
pub struct ConsolidatedFragmentMetadata {
    uri: Uri,
    payload: Vec<u8>,
    blocks: HashMap<String, (usize, usize)>,
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, n: usize, uri: &Uri) -> Result<&'a [u8]> {
    let end = pos.checked_add(n).filter(|&e| e <= buf.len()).ok_or_else(|| {
        StorageError::InvalidFormat(format!(
            "consolidated fragment metadata {} truncated at byte {}",
            uri, pos
        ))
    })?;
    let out = &buf[*pos..end];
    *pos = end;
    Ok(out)
}

impl ConsolidatedFragmentMetadata {
    /// Encode the payload for `fragments`.
    pub fn build(fragments: &[Arc<FragmentMetadata>]) -> Result<Vec<u8>> {
        let blocks = fragments
            .iter()
            .map(|f| f.serialize())
            .collect::<Result<Vec<_>>>()?;

        let index_len: usize = 4 + fragments
            .iter()
            .map(|f| 16 + f.name().len())
            .sum::<usize>();
        let mut out = Vec::with_capacity(index_len + blocks.iter().map(Vec::len).sum::<usize>());
        out.extend_from_slice(&(fragments.len() as u32).to_le_bytes());
        let mut offset = index_len as u64;
        for (f, block) in fragments.iter().zip(&blocks) {
            out.extend_from_slice(&(f.name().len() as u64).to_le_bytes());
            out.extend_from_slice(f.name().as_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            offset += block.len() as u64;
        }
        for block in blocks {
            out.extend_from_slice(&block);
        }
        Ok(out)
    }

    /// Parse and validate the offset table.
    pub fn parse(uri: Uri, payload: Vec<u8>) -> Result<Self> {
        let mut pos = 0usize;
        let count = u32::from_le_bytes(take(&payload, &mut pos, 4, &uri)?.try_into().unwrap());
        let mut entries: Vec<(String, usize)> = Vec::new();
        for _ in 0..count {
            let name_len =
                u64::from_le_bytes(take(&payload, &mut pos, 8, &uri)?.try_into().unwrap());
            let name_bytes = take(&payload, &mut pos, name_len as usize, &uri)?;
            let name = String::from_utf8(name_bytes.to_vec()).map_err(|e| {
                StorageError::InvalidFormat(format!("fragment name in {}: {}", uri, e))
            })?;
            let offset =
                u64::from_le_bytes(take(&payload, &mut pos, 8, &uri)?.try_into().unwrap());
            entries.push((name, offset as usize));
        }

        let index_end = pos;
        let mut blocks = HashMap::with_capacity(entries.len());
        for (i, (name, start)) in entries.iter().enumerate() {
            let end = entries
                .get(i + 1)
                .map(|(_, next)| *next)
                .unwrap_or(payload.len());
            if *start < index_end || *start > end || end > payload.len() {
                return Err(StorageError::InvalidFormat(format!(
                    "consolidated fragment metadata {}: bad offset {} for {}",
                    uri, start, name
                )));
            }
            blocks.insert(name.clone(), (*start, end));
        }
        Ok(Self {
            uri,
            payload,
            blocks,
        })
    }

    pub fn load(vfs: &dyn Vfs, uri: &Uri, key: &EncryptionKey) -> Result<Self> {
        let payload = tile::read_tile(vfs, uri, key)?;
        Self::parse(uri.clone(), payload)
    }

    pub fn store(
        vfs: &dyn Vfs,
        uri: &Uri,
        fragments: &[Arc<FragmentMetadata>],
        key: &EncryptionKey,
    ) -> Result<()> {
        tile::write_tile(vfs, uri, &Self::build(fragments)?, key)
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Encoded metadata block of fragment `name`, if consolidated here.
    pub fn block(&self, name: &str) -> Option<&[u8]> {
        self.blocks
            .get(name)
            .map(|&(start, end)| &self.payload[start..end])
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;
    use crate::fragment::metadata::FragmentMetadataRecord;
    use crate::names::{fragment_name, generate_uuid, TimestampedUri};
    use crate::range::Range;
    use crate::schema::{ArraySchema, ArrayType, Attribute, Dimension};
    use crate::vfs::MemVfs;

    fn fragments(n: u64) -> Vec<Arc<FragmentMetadata>> {
        let mut s = ArraySchema::new(
            ArrayType::Sparse,
            vec![Dimension::new("d", Datatype::UInt64, Range::from_values(0u64, 1000u64)).unwrap()],
            vec![Attribute::new("a", Datatype::Int32)],
        )
        .unwrap();
        s.generate_name(1);
        let s = Arc::new(s);
        (1..=n)
            .map(|t| {
                let name = fragment_name(t, t, &generate_uuid());
                let f = TimestampedUri::parse(Uri::new(format!("mem://a/__fragments/{}", name)))
                    .unwrap();
                Arc::new(
                    FragmentMetadata::new(&f, s.clone(), vec![Range::from_values(t, t * 10)], t)
                        .unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_blocks_resolve_by_name() {
        let frags = fragments(3);
        let vfs = MemVfs::new();
        let uri = Uri::new("mem://a/__fragment_meta/x.meta");
        ConsolidatedFragmentMetadata::store(&vfs, &uri, &frags, &EncryptionKey::none()).unwrap();
        let cons = ConsolidatedFragmentMetadata::load(&vfs, &uri, &EncryptionKey::none()).unwrap();
        assert_eq!(cons.len(), 3);
        for f in &frags {
            let block = cons.block(f.name()).unwrap();
            let rec = FragmentMetadataRecord::decode(block, f.name()).unwrap();
            assert_eq!(rec.cell_num, f.cell_num());
        }
        assert!(cons.block("__missing").is_none());
    }

    #[test]
    fn test_offsets_are_validated() {
        let frags = fragments(2);
        let mut payload = ConsolidatedFragmentMetadata::build(&frags).unwrap();
        // First entry's offset sits right after its name.
        let off_pos = 4 + 8 + frags[0].name().len();
        payload[off_pos..off_pos + 8].copy_from_slice(&u64::MAX.to_le_bytes());
        let res = ConsolidatedFragmentMetadata::parse(Uri::new("mem://m"), payload);
        assert!(matches!(res, Err(StorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_truncated_index() {
        let payload = 5u32.to_le_bytes().to_vec();
        assert!(ConsolidatedFragmentMetadata::parse(Uri::new("mem://m"), payload).is_err());
    }
}
