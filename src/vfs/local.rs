use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::error::{Result, StorageError};
use crate::uri::Uri;
use crate::vfs::Vfs;

/// `std::fs` backend. Accepts plain paths and `file://` URIs.
#[derive(Debug, Default, Clone)]
pub struct LocalVfs;

impl LocalVfs {
    pub fn new() -> Self {
        LocalVfs
    }
}

fn not_found(uri: &Uri, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::ObjectNotFound(uri.to_string())
    } else {
        StorageError::Io(e)
    }
}

impl Vfs for LocalVfs {
    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>> {
        let path = uri.to_path();
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            out.push(uri.join_path(&entry.file_name().to_string_lossy()));
        }
        out.sort();
        Ok(out)
    }

    fn read(&self, uri: &Uri, offset: u64, nbytes: u64) -> Result<Vec<u8>> {
        let mut file = fs::File::open(uri.to_path()).map_err(|e| not_found(uri, e))?;
        let len = file.metadata()?.len();
        if offset.saturating_add(nbytes) > len {
            return Err(StorageError::InvalidFormat(format!(
                "Read of {} bytes at offset {} exceeds size {} of {}",
                nbytes, offset, len, uri
            )));
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; nbytes as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn file_size(&self, uri: &Uri) -> Result<u64> {
        let meta = fs::metadata(uri.to_path()).map_err(|e| not_found(uri, e))?;
        Ok(meta.len())
    }

    fn write(&self, uri: &Uri, bytes: &[u8]) -> Result<()> {
        let path = uri.to_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(())
    }

    fn create_dir(&self, uri: &Uri) -> Result<()> {
        fs::create_dir_all(uri.to_path())?;
        Ok(())
    }

    fn remove_file(&self, uri: &Uri) -> Result<()> {
        fs::remove_file(uri.to_path()).map_err(|e| not_found(uri, e))
    }

    fn remove_dir(&self, uri: &Uri) -> Result<()> {
        fs::remove_dir_all(uri.to_path()).map_err(|e| not_found(uri, e))
    }

    fn is_dir(&self, uri: &Uri) -> Result<bool> {
        Ok(uri.to_path().is_dir())
    }

    fn is_file(&self, uri: &Uri) -> Result<bool> {
        Ok(uri.to_path().is_file())
    }
}
