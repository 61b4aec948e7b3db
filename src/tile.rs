//! Generic envelope around every persisted payload.
//!
//! # File Layout
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic: b"ATGT"
//! 4       4     version: u32 = 1
//! 8       1     encryption_type: u8
//! 9       7     _reserved
//! 16      8     payload_len: u64
//! 24      8     checksum: blake3(payload)[..8] as u64
//! 32      N     payload
//! ```
//!
//! A torn or truncated write fails the length or checksum test and surfaces
//! as malformed data instead of a silently short payload.

use crate::encryption::{EncryptionKey, EncryptionType};
use crate::error::{Result, StorageError};
use crate::uri::Uri;
use crate::vfs::Vfs;

pub const TILE_MAGIC: [u8; 4] = *b"ATGT";
pub const TILE_VERSION: u32 = 1;
pub const TILE_HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericTileHeader {
    pub version: u32,
    pub encryption_type: EncryptionType,
    pub payload_len: u64,
    pub checksum: u64,
}

fn checksum(payload: &[u8]) -> u64 {
    let hash = blake3::hash(payload);
    let mut first = [0u8; 8];
    first.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(first)
}

impl GenericTileHeader {
    pub fn for_payload(payload: &[u8], encryption_type: EncryptionType) -> Self {
        Self {
            version: TILE_VERSION,
            encryption_type,
            payload_len: payload.len() as u64,
            checksum: checksum(payload),
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&TILE_MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.encryption_type as u8);
        out.extend_from_slice(&[0u8; 7]);
        out.extend_from_slice(&self.payload_len.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < TILE_HEADER_SIZE {
            return Err(StorageError::InvalidFormat(format!(
                "Tile header needs {} bytes, got {}",
                TILE_HEADER_SIZE,
                buf.len()
            )));
        }
        if buf[0..4] != TILE_MAGIC {
            return Err(StorageError::InvalidFormat(format!(
                "Not a tile: expected ATGT, got {:?}",
                &buf[0..4]
            )));
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != TILE_VERSION {
            return Err(StorageError::InvalidFormat(format!(
                "Unsupported tile version: {}",
                version
            )));
        }
        Ok(Self {
            version,
            encryption_type: EncryptionType::from_u8(buf[8])?,
            payload_len: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            checksum: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        })
    }
}

pub fn encode(payload: &[u8], key: &EncryptionKey) -> Vec<u8> {
    let header = GenericTileHeader::for_payload(payload, key.encryption_type());
    let mut out = Vec::with_capacity(TILE_HEADER_SIZE + payload.len());
    header.write_to(&mut out);
    out.extend_from_slice(payload);
    out
}

/// Validate the envelope and return the payload. `what` names the object in
/// error messages.
pub fn decode(buf: &[u8], key: &EncryptionKey, what: &str) -> Result<Vec<u8>> {
    let header = GenericTileHeader::from_bytes(buf)?;
    if header.encryption_type != key.encryption_type() {
        return Err(StorageError::Encryption(format!(
            "{} was written with {:?} but opened with {:?}",
            what,
            header.encryption_type,
            key.encryption_type()
        )));
    }
    let payload = &buf[TILE_HEADER_SIZE..];
    if payload.len() as u64 != header.payload_len {
        return Err(StorageError::InvalidFormat(format!(
            "{}: payload length {} does not match header {}",
            what,
            payload.len(),
            header.payload_len
        )));
    }
    if checksum(payload) != header.checksum {
        return Err(StorageError::ChecksumMismatch(what.to_string()));
    }
    Ok(payload.to_vec())
}

pub fn write_tile(vfs: &dyn Vfs, uri: &Uri, payload: &[u8], key: &EncryptionKey) -> Result<()> {
    vfs.write(uri, &encode(payload, key))
}

pub fn read_tile(vfs: &dyn Vfs, uri: &Uri, key: &EncryptionKey) -> Result<Vec<u8>> {
    let buf = vfs.read_all(uri)?;
    decode(&buf, key, uri.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_32_bytes() {
        let mut out = Vec::new();
        GenericTileHeader::for_payload(b"abc", EncryptionType::NoEncryption).write_to(&mut out);
        assert_eq!(out.len(), TILE_HEADER_SIZE);
    }

    #[test]
    fn test_decode_checks() {
        let key = EncryptionKey::none();
        let buf = encode(b"payload", &key);
        assert_eq!(decode(&buf, &key, "t").unwrap(), b"payload");

        let mut bad_magic = buf.clone();
        bad_magic[0] ^= 0xFF;
        assert!(matches!(decode(&bad_magic, &key, "t"), Err(StorageError::InvalidFormat(_))));

        let truncated = &buf[..buf.len() - 1];
        assert!(matches!(decode(truncated, &key, "t"), Err(StorageError::InvalidFormat(_))));

        let mut flipped = buf.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0x01;
        assert!(matches!(decode(&flipped, &key, "t"), Err(StorageError::ChecksumMismatch(_))));
    }

    #[test]
    fn test_encryption_type_mismatch() {
        let aes = EncryptionKey::new(EncryptionType::Aes256Gcm, &[1u8; 32]).unwrap();
        let buf = encode(b"secret", &aes);
        assert!(matches!(
            decode(&buf, &EncryptionKey::none(), "t"),
            Err(StorageError::Encryption(_))
        ));
        assert_eq!(decode(&buf, &aes, "t").unwrap(), b"secret");
    }
}
