//! Object storage collaborator.
//!
//! The core never touches a filesystem directly; every listing, read, write
//! and delete goes through a [`Vfs`]. Two backends ship with the crate:
//! [`LocalVfs`] over `std::fs` and [`MemVfs`], an in-process map used by
//! tests and embedders.

mod local;
mod memory;

pub use local::LocalVfs;
pub use memory::MemVfs;

use crate::error::Result;
use crate::uri::Uri;

pub trait Vfs: Send + Sync {
    /// Immediate children of `uri`, sorted by URI. Missing directories list
    /// as empty.
    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>>;

    /// Read `nbytes` starting at `offset`.
    fn read(&self, uri: &Uri, offset: u64, nbytes: u64) -> Result<Vec<u8>>;

    fn file_size(&self, uri: &Uri) -> Result<u64>;

    /// Create or replace an object, creating parent directories as needed.
    fn write(&self, uri: &Uri, bytes: &[u8]) -> Result<()>;

    fn create_dir(&self, uri: &Uri) -> Result<()>;

    fn remove_file(&self, uri: &Uri) -> Result<()>;

    /// Remove a directory and everything below it.
    fn remove_dir(&self, uri: &Uri) -> Result<()>;

    fn is_dir(&self, uri: &Uri) -> Result<bool>;

    fn is_file(&self, uri: &Uri) -> Result<bool>;

    fn read_all(&self, uri: &Uri) -> Result<Vec<u8>> {
        let size = self.file_size(uri)?;
        self.read(uri, 0, size)
    }
}
