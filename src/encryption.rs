//! Encryption key passed through to persisted objects.
//!
//! Key bytes are opaque to the core; only the encryption *type* is recorded
//! in each file envelope and checked on load.

use std::fmt;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionType {
    #[default]
    NoEncryption = 0,
    Aes256Gcm = 1,
}

impl EncryptionType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(EncryptionType::NoEncryption),
            1 => Ok(EncryptionType::Aes256Gcm),
            other => Err(StorageError::InvalidFormat(format!(
                "Unknown encryption type {}",
                other
            ))),
        }
    }
}

const AES256GCM_KEY_LEN: usize = 32;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct EncryptionKey {
    encryption_type: EncryptionType,
    key: Vec<u8>,
}

impl EncryptionKey {
    pub fn new(encryption_type: EncryptionType, key: &[u8]) -> Result<Self> {
        match encryption_type {
            EncryptionType::NoEncryption if !key.is_empty() => Err(StorageError::Encryption(
                "key given without an encryption type".to_string(),
            )),
            EncryptionType::Aes256Gcm if key.len() != AES256GCM_KEY_LEN => {
                Err(StorageError::Encryption(format!(
                    "AES-256-GCM requires a {}-byte key, got {}",
                    AES256GCM_KEY_LEN,
                    key.len()
                )))
            }
            _ => Ok(Self {
                encryption_type,
                key: key.to_vec(),
            }),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("encryption_type", &self.encryption_type)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_checked() {
        assert!(EncryptionKey::new(EncryptionType::Aes256Gcm, &[0u8; 16]).is_err());
        assert!(EncryptionKey::new(EncryptionType::Aes256Gcm, &[7u8; 32]).is_ok());
        assert!(EncryptionKey::new(EncryptionType::NoEncryption, b"k").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = EncryptionKey::new(EncryptionType::Aes256Gcm, &[0xAB; 32]).unwrap();
        let shown = format!("{:?}", key);
        assert!(shown.contains("redacted"));
        assert!(!shown.contains("171"));
    }
}
