//! On-disk layout of an array.
//!
//! ```text
//! <array>/
//! +-- __array_schema.tdb                       legacy single schema
//! +-- __schema/__<t1>_<t2>_<uuid>              schema versions
//! +-- __fragments/<fragment>/__fragment_metadata.tdb
//! +-- __commits/<fragment>.wrt                 commit markers
//! +-- __commits/<fragment>.vac                 fragment consolidation manifests
//! +-- __fragment_meta/<...>.meta               consolidated fragment metadata
//! +-- __meta/__<t1>_<t2>_<uuid>[.vac]          array metadata and manifests
//! ```
//!
//! A fragment is visible only once its commit marker exists.

use std::collections::HashSet;

use crate::error::Result;
use crate::names::{
    TimestampedUri, LEGACY_SCHEMA_FILENAME, META_FILE_SUFFIX, VACUUM_FILE_SUFFIX,
    WRITE_FILE_SUFFIX,
};
use crate::uri::Uri;
use crate::vfs::Vfs;

pub const SCHEMA_DIR: &str = "__schema";
pub const FRAGMENTS_DIR: &str = "__fragments";
pub const COMMITS_DIR: &str = "__commits";
pub const FRAGMENT_META_DIR: &str = "__fragment_meta";
pub const METADATA_DIR: &str = "__meta";

pub struct ArrayDirectory<'a> {
    vfs: &'a dyn Vfs,
    uri: Uri,
}

impl<'a> ArrayDirectory<'a> {
    pub fn new(vfs: &'a dyn Vfs, uri: Uri) -> Self {
        Self { vfs, uri }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn schema_dir(&self) -> Uri {
        self.uri.join_path(SCHEMA_DIR)
    }

    pub fn fragments_dir(&self) -> Uri {
        self.uri.join_path(FRAGMENTS_DIR)
    }

    pub fn commits_dir(&self) -> Uri {
        self.uri.join_path(COMMITS_DIR)
    }

    pub fn fragment_meta_dir(&self) -> Uri {
        self.uri.join_path(FRAGMENT_META_DIR)
    }

    pub fn metadata_dir(&self) -> Uri {
        self.uri.join_path(METADATA_DIR)
    }

    pub fn legacy_schema_uri(&self) -> Uri {
        self.uri.join_path(LEGACY_SCHEMA_FILENAME)
    }

    pub fn commit_uri(&self, fragment_name: &str) -> Uri {
        self.commits_dir()
            .join_path(&format!("{}{}", fragment_name, WRITE_FILE_SUFFIX))
    }

    pub fn fragment_vac_uri(&self, fragment_name: &str) -> Uri {
        self.commits_dir()
            .join_path(&format!("{}{}", fragment_name, VACUUM_FILE_SUFFIX))
    }

    pub fn metadata_vac_uri(&self, name: &str) -> Uri {
        self.metadata_dir()
            .join_path(&format!("{}{}", name, VACUUM_FILE_SUFFIX))
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.vfs.is_dir(&self.schema_dir())? || self.vfs.is_file(&self.legacy_schema_uri())?)
    }

    pub fn create(&self) -> Result<()> {
        for dir in [
            self.schema_dir(),
            self.fragments_dir(),
            self.commits_dir(),
            self.fragment_meta_dir(),
            self.metadata_dir(),
        ] {
            self.vfs.create_dir(&dir)?;
        }
        Ok(())
    }

    /// Schema version files, the legacy file included.
    pub fn list_schema_uris(&self) -> Result<Vec<Uri>> {
        let mut uris = self.vfs.ls(&self.schema_dir())?;
        let legacy = self.legacy_schema_uri();
        if self.vfs.is_file(&legacy)? {
            uris.push(legacy);
        }
        Ok(uris)
    }

    /// Every fragment directory, committed or not.
    pub fn list_fragment_dirs(&self) -> Result<Vec<Uri>> {
        self.vfs.ls(&self.fragments_dir())
    }

    fn commit_files(&self, suffix: &str) -> Result<Vec<Uri>> {
        Ok(self
            .vfs
            .ls(&self.commits_dir())?
            .into_iter()
            .filter(|u| u.as_str().ends_with(suffix))
            .collect())
    }

    /// Names of fragments that have a commit marker.
    pub fn committed_names(&self) -> Result<HashSet<String>> {
        Ok(self
            .commit_files(WRITE_FILE_SUFFIX)?
            .iter()
            .filter_map(|u| u.last_path_part().strip_suffix(WRITE_FILE_SUFFIX))
            .map(str::to_string)
            .collect())
    }

    pub fn list_committed_fragments(&self) -> Result<Vec<Uri>> {
        let committed = self.committed_names()?;
        Ok(self
            .list_fragment_dirs()?
            .into_iter()
            .filter(|u| committed.contains(u.last_path_part()))
            .collect())
    }

    /// Fragment consolidation manifests whose new fragment is committed.
    pub fn list_fragment_vac_uris(&self) -> Result<Vec<Uri>> {
        let committed = self.committed_names()?;
        Ok(self
            .commit_files(VACUUM_FILE_SUFFIX)?
            .into_iter()
            .filter(|u| {
                u.last_path_part()
                    .strip_suffix(VACUUM_FILE_SUFFIX)
                    .is_some_and(|n| committed.contains(n))
            })
            .collect())
    }

    pub fn list_fragment_meta_uris(&self) -> Result<Vec<Uri>> {
        Ok(self
            .vfs
            .ls(&self.fragment_meta_dir())?
            .into_iter()
            .filter(|u| u.as_str().ends_with(META_FILE_SUFFIX))
            .collect())
    }

    /// Newest consolidated fragment metadata file by `(t2, uuid)`.
    pub fn latest_consolidated_fragment_meta(&self) -> Result<Option<Uri>> {
        let mut latest: Option<TimestampedUri> = None;
        for uri in self.list_fragment_meta_uris()? {
            let t = TimestampedUri::parse(uri)?;
            let newer = latest.as_ref().map_or(true, |l| {
                (t.timestamp_end(), &t.uuid) > (l.timestamp_end(), &l.uuid)
            });
            if newer {
                latest = Some(t);
            }
        }
        Ok(latest.map(|t| t.uri))
    }

    /// `(metadata files, manifests)` under `__meta/`.
    pub fn list_metadata_uris(&self) -> Result<(Vec<Uri>, Vec<Uri>)> {
        Ok(self
            .vfs
            .ls(&self.metadata_dir())?
            .into_iter()
            .partition(|u| !u.as_str().ends_with(VACUUM_FILE_SUFFIX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{fragment_name, generate_uuid};
    use crate::vfs::MemVfs;

    #[test]
    fn test_uncommitted_fragments_hidden() {
        let vfs = MemVfs::new();
        let dir = ArrayDirectory::new(&vfs, Uri::new("mem://arr"));
        dir.create().unwrap();
        assert!(dir.exists().unwrap());

        let a = fragment_name(1, 1, &generate_uuid());
        let b = fragment_name(2, 2, &generate_uuid());
        for n in [&a, &b] {
            vfs.write(&dir.fragments_dir().join_path(n).join_path("x"), b"").unwrap();
        }
        vfs.write(&dir.commit_uri(&a), b"").unwrap();

        let committed = dir.list_committed_fragments().unwrap();
        assert_eq!(committed, vec![dir.fragments_dir().join_path(&a)]);
        assert_eq!(dir.list_fragment_dirs().unwrap().len(), 2);
    }

    #[test]
    fn test_latest_meta_file() {
        let vfs = MemVfs::new();
        let dir = ArrayDirectory::new(&vfs, Uri::new("mem://arr"));
        let old = dir
            .fragment_meta_dir()
            .join_path(&format!("{}.meta", fragment_name(1, 5, &generate_uuid())));
        let new = dir
            .fragment_meta_dir()
            .join_path(&format!("{}.meta", fragment_name(1, 9, &generate_uuid())));
        vfs.write(&new, b"").unwrap();
        vfs.write(&old, b"").unwrap();
        assert_eq!(dir.latest_consolidated_fragment_meta().unwrap(), Some(new));
    }

    #[test]
    fn test_missing_array() {
        let vfs = MemVfs::new();
        let dir = ArrayDirectory::new(&vfs, Uri::new("mem://nothing"));
        assert!(!dir.exists().unwrap());
        assert!(dir.list_schema_uris().unwrap().is_empty());
    }
}
