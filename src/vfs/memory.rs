use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use crate::error::{Result, StorageError};
use crate::uri::Uri;
use crate::vfs::Vfs;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

/// In-memory backend. Directories exist explicitly or implicitly (as the
/// prefix of another object).
#[derive(Debug, Default)]
pub struct MemVfs {
    objects: RwLock<BTreeMap<String, Node>>,
}

impl MemVfs {
    pub fn new() -> Self {
        Self::default()
    }

    fn prefix(uri: &Uri) -> String {
        format!("{}/", uri.as_str())
    }

    fn create_parents(objects: &mut BTreeMap<String, Node>, uri: &Uri) {
        let mut cur = uri.parent();
        while let Some(p) = cur {
            objects.entry(p.as_str().to_string()).or_insert(Node::Dir);
            cur = p.parent();
        }
    }
}

impl Vfs for MemVfs {
    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>> {
        let objects = self.objects.read().unwrap();
        let prefix = Self::prefix(uri);
        let mut out = BTreeSet::new();
        for key in objects.range(prefix.clone()..).map(|(k, _)| k) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            let child = rest.split('/').next().unwrap_or(rest);
            if child.is_empty() {
                continue;
            }
            out.insert(uri.join_path(child));
        }
        Ok(out.into_iter().collect())
    }

    fn read(&self, uri: &Uri, offset: u64, nbytes: u64) -> Result<Vec<u8>> {
        let objects = self.objects.read().unwrap();
        match objects.get(uri.as_str()) {
            Some(Node::File(bytes)) => {
                let end = offset.saturating_add(nbytes);
                if end > bytes.len() as u64 {
                    return Err(StorageError::InvalidFormat(format!(
                        "Read of {} bytes at offset {} exceeds size {} of {}",
                        nbytes,
                        offset,
                        bytes.len(),
                        uri
                    )));
                }
                Ok(bytes[offset as usize..end as usize].to_vec())
            }
            _ => Err(StorageError::ObjectNotFound(uri.to_string())),
        }
    }

    fn file_size(&self, uri: &Uri) -> Result<u64> {
        let objects = self.objects.read().unwrap();
        match objects.get(uri.as_str()) {
            Some(Node::File(bytes)) => Ok(bytes.len() as u64),
            _ => Err(StorageError::ObjectNotFound(uri.to_string())),
        }
    }

    fn write(&self, uri: &Uri, bytes: &[u8]) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        Self::create_parents(&mut objects, uri);
        objects.insert(uri.as_str().to_string(), Node::File(bytes.to_vec()));
        Ok(())
    }

    fn create_dir(&self, uri: &Uri) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        Self::create_parents(&mut objects, uri);
        objects
            .entry(uri.as_str().to_string())
            .or_insert(Node::Dir);
        Ok(())
    }

    fn remove_file(&self, uri: &Uri) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        match objects.get(uri.as_str()) {
            Some(Node::File(_)) => {
                objects.remove(uri.as_str());
                Ok(())
            }
            _ => Err(StorageError::ObjectNotFound(uri.to_string())),
        }
    }

    fn remove_dir(&self, uri: &Uri) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        let prefix = Self::prefix(uri);
        let before = objects.len();
        objects.retain(|k, _| k != uri.as_str() && !k.starts_with(&prefix));
        if objects.len() == before {
            return Err(StorageError::ObjectNotFound(uri.to_string()));
        }
        Ok(())
    }

    fn is_dir(&self, uri: &Uri) -> Result<bool> {
        let objects = self.objects.read().unwrap();
        if let Some(node) = objects.get(uri.as_str()) {
            return Ok(matches!(node, Node::Dir));
        }
        let prefix = Self::prefix(uri);
        Ok(objects
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix)))
    }

    fn is_file(&self, uri: &Uri) -> Result<bool> {
        let objects = self.objects.read().unwrap();
        Ok(matches!(objects.get(uri.as_str()), Some(Node::File(_))))
    }
}
