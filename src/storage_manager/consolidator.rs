//! Consolidation and vacuum.
//!
//! Both run under the array's exclusive lock and share one shape: list a
//! URI class, resolve it for a timestamp window, then write (consolidate)
//! or remove (vacuum). Consolidation writes its result before the `.vac`
//! manifest that hides the inputs, and vacuum removes a fragment's commit
//! marker before its directory, so readers never see a half-removed
//! fragment.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::array::ArrayDirectory;
use crate::config::{ConsolidationConfig, ConsolidationMode, VacuumConfig, VacuumMode};
use crate::encryption::EncryptionKey;
use crate::error::{Result, StorageError};
use crate::fragment::metadata::union_domains;
use crate::fragment::{ConsolidatedFragmentMetadata, FragmentMetadata};
use crate::metadata::Metadata;
use crate::names::{fragment_name, generate_uuid, timestamped_name, TimestampedUri, META_FILE_SUFFIX};
use crate::range::Range;
use crate::resolution::{
    filter_consolidated, get_sorted_uris, get_uris_to_vacuum, superseded_uris, write_vac_file,
};
use crate::storage_manager::{resolve_end, StorageManager};
use crate::tile;
use crate::uri::Uri;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationResult {
    pub mode: ConsolidationMode,
    /// Input objects merged.
    pub consolidated: usize,
    /// Objects written.
    pub new_uris: Vec<Uri>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacuumResult {
    pub mode: VacuumMode,
    pub uris_removed: Vec<Uri>,
    pub vac_files_removed: usize,
}

/// Split `items` into runs of consecutive members that satisfy `keep`;
/// `same_run` decides whether neighbours may share a run.
fn runs<T: Clone>(
    items: &[T],
    keep: impl Fn(&T) -> bool,
    same_run: impl Fn(&T, &T) -> bool,
) -> Vec<Vec<T>> {
    let mut out = Vec::new();
    let mut current: Vec<T> = Vec::new();
    for item in items {
        let breaks = !keep(item) || current.last().is_some_and(|last| !same_run(last, item));
        if breaks && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if keep(item) {
            current.push(item.clone());
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn window_of(ranges: impl Iterator<Item = (u64, u64)>) -> (u64, u64) {
    ranges.fold((u64::MAX, 0), |(lo, hi), (t1, t2)| (lo.min(t1), hi.max(t2)))
}

impl StorageManager {
    pub fn array_consolidate(
        &self,
        uri: &Uri,
        key: &EncryptionKey,
        config: &ConsolidationConfig,
    ) -> Result<ConsolidationResult> {
        let started = Instant::now();
        let dir = self.dir(uri);
        if !dir.exists()? {
            return Err(StorageError::ArrayNotFound(uri.to_string()));
        }
        let _lock = self.open_arrays.xlock(uri);
        let start = config.timestamp_start;
        let end = resolve_end(config.timestamp_end);

        let (consolidated, new_uris) = match config.mode {
            ConsolidationMode::Fragments => self.consolidate_fragments(&dir, key, config, start, end)?,
            ConsolidationMode::FragmentMeta => self.consolidate_fragment_meta(&dir, key, start, end)?,
            ConsolidationMode::ArrayMeta => self.consolidate_array_meta(&dir, key, start, end)?,
        };
        if !new_uris.is_empty() {
            self.stats.record_consolidation();
        }
        let result = ConsolidationResult {
            mode: config.mode,
            consolidated,
            new_uris,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            "Consolidated {:?} of {}: {} inputs into {} objects in {}ms",
            result.mode,
            uri,
            result.consolidated,
            result.new_uris.len(),
            result.duration_ms
        );
        Ok(result)
    }

    fn consolidate_fragments(
        &self,
        dir: &ArrayDirectory<'_>,
        key: &EncryptionKey,
        config: &ConsolidationConfig,
        start: u64,
        end: u64,
    ) -> Result<(usize, Vec<Uri>)> {
        let mut schemas = self.load_array_schemas(dir, key, start, end)?.all;
        let fragments = self.load_fragments(dir, key, start, end, &mut schemas)?;
        // Inputs of a merge that overlaps the window stay visible but are
        // never merged a second time.
        let superseded = superseded_uris(self.vfs(), &self.io_tp, &dir.list_fragment_vac_uris()?)?;

        let min_frags = config.min_frags.max(2);
        let max_frags = config.max_frags.max(min_frags);
        let mut consolidated = 0;
        let mut new_uris = Vec::new();
        let groups = runs(
            &fragments,
            |f| {
                let (t1, t2) = f.timestamp_range();
                t1 >= start && t2 <= end && !superseded.contains(f.fragment_uri().as_str())
            },
            |a, b| a.array_schema_name() == b.array_schema_name(),
        );
        for group in groups {
            for chunk in group.chunks(max_frags) {
                if chunk.len() < min_frags {
                    continue;
                }
                new_uris.push(self.merge_fragments(dir, key, chunk)?);
                consolidated += chunk.len();
            }
        }
        Ok((consolidated, new_uris))
    }

    fn merge_fragments(
        &self,
        dir: &ArrayDirectory<'_>,
        key: &EncryptionKey,
        chunk: &[Arc<FragmentMetadata>],
    ) -> Result<Uri> {
        let (t1, t2) = window_of(chunk.iter().map(|f| f.timestamp_range()));
        let name = fragment_name(t1, t2, &generate_uuid());
        let fragment = TimestampedUri::parse(dir.fragments_dir().join_path(&name))?;
        let schema = chunk[0].array_schema().clone();
        let domains: Vec<&[Range]> = chunk.iter().map(|f| f.non_empty_domain()).collect();
        let merged = FragmentMetadata::new(
            &fragment,
            schema.clone(),
            union_domains(&schema, &domains)?,
            chunk.iter().map(|f| f.cell_num()).sum(),
        )?;
        merged.store(self.vfs(), key)?;
        self.vfs.write(&dir.commit_uri(&name), b"")?;
        let inputs: Vec<Uri> = chunk.iter().map(|f| f.fragment_uri().clone()).collect();
        write_vac_file(self.vfs(), &dir.fragment_vac_uri(&name), &inputs)?;
        tracing::debug!("Merged {} fragments into {}", chunk.len(), fragment.uri);
        Ok(fragment.uri)
    }

    fn consolidate_fragment_meta(
        &self,
        dir: &ArrayDirectory<'_>,
        key: &EncryptionKey,
        start: u64,
        end: u64,
    ) -> Result<(usize, Vec<Uri>)> {
        let mut schemas = self.load_array_schemas(dir, key, start, end)?.all;
        let fragments = self.load_fragments(dir, key, start, end, &mut schemas)?;
        if fragments.is_empty() {
            return Ok((0, Vec::new()));
        }
        let (t1, t2) = window_of(fragments.iter().map(|f| f.timestamp_range()));
        let name = format!("{}{}", fragment_name(t1, t2, &generate_uuid()), META_FILE_SUFFIX);
        let uri = dir.fragment_meta_dir().join_path(&name);
        ConsolidatedFragmentMetadata::store(self.vfs(), &uri, &fragments, key)?;
        Ok((fragments.len(), vec![uri]))
    }

    fn consolidate_array_meta(
        &self,
        dir: &ArrayDirectory<'_>,
        key: &EncryptionKey,
        start: u64,
        end: u64,
    ) -> Result<(usize, Vec<Uri>)> {
        let (files, vacs) = dir.list_metadata_uris()?;
        let sorted = get_sorted_uris(&files, start, end)?;
        let visible = filter_consolidated(self.vfs(), &self.io_tp, sorted, &vacs, start, end)?;
        let superseded = superseded_uris(self.vfs(), &self.io_tp, &vacs)?;
        let groups = runs(
            &visible,
            |t| t.contained_in(start, end) && !superseded.contains(t.uri.as_str()),
            |_, _| true,
        );

        let mut consolidated = 0;
        let mut new_uris = Vec::new();
        for group in groups.into_iter().filter(|g| g.len() >= 2) {
            let buffers = self.read_tiles(&group, key)?;
            let merged = Metadata::consolidate(&buffers)?;
            let (t1, t2) = window_of(group.iter().map(|t| t.timestamp_range));
            let name = timestamped_name(t1, t2, &generate_uuid());
            let uri = dir.metadata_dir().join_path(&name);
            tile::write_tile(self.vfs(), &uri, &merged.serialize(), key)?;
            let inputs: Vec<Uri> = group.iter().map(|t| t.uri.clone()).collect();
            write_vac_file(self.vfs(), &dir.metadata_vac_uri(&name), &inputs)?;
            consolidated += group.len();
            new_uris.push(uri);
        }
        Ok((consolidated, new_uris))
    }

    pub fn array_vacuum(&self, uri: &Uri, config: &VacuumConfig) -> Result<VacuumResult> {
        let dir = self.dir(uri);
        if !dir.exists()? {
            return Err(StorageError::ArrayNotFound(uri.to_string()));
        }
        let _lock = self.open_arrays.xlock(uri);
        let start = config.timestamp_start;
        let end = resolve_end(config.timestamp_end);

        let (uris_removed, vac_files_removed) = match config.mode {
            VacuumMode::Fragments => self.vacuum_fragments(&dir, start, end)?,
            VacuumMode::FragmentMeta => (self.vacuum_fragment_meta(&dir, start, end)?, 0),
            VacuumMode::ArrayMeta => self.vacuum_array_meta(&dir, start, end)?,
        };
        self.stats.record_vacuumed(uris_removed.len() as u64);
        tracing::info!(
            "Vacuumed {:?} of {}: removed {} objects and {} manifests",
            config.mode,
            uri,
            uris_removed.len(),
            vac_files_removed
        );
        Ok(VacuumResult {
            mode: config.mode,
            uris_removed,
            vac_files_removed,
        })
    }

    fn vacuum_fragments(&self, dir: &ArrayDirectory<'_>, start: u64, end: u64) -> Result<(Vec<Uri>, usize)> {
        let mut uris = dir.list_fragment_dirs()?;
        uris.extend(dir.list_fragment_vac_uris()?);
        let plan = get_uris_to_vacuum(self.vfs(), &self.io_tp, &uris, start, end, false)?;

        let vfs = self.vfs();
        let removed: Vec<Result<()>> = self.io_tp.install(|| {
            plan.to_vacuum
                .par_iter()
                .map(|fragment| {
                    let marker = dir.commit_uri(fragment.last_path_part());
                    if vfs.is_file(&marker)? {
                        vfs.remove_file(&marker)?;
                    }
                    vfs.remove_dir(fragment)
                })
                .collect()
        });
        removed.into_iter().collect::<Result<Vec<_>>>()?;
        for vac in &plan.vac_uris {
            self.vfs.remove_file(vac)?;
        }
        Ok((plan.to_vacuum, plan.vac_uris.len()))
    }

    /// Remove consolidated fragment metadata files in the window other than
    /// the latest one.
    fn vacuum_fragment_meta(&self, dir: &ArrayDirectory<'_>, start: u64, end: u64) -> Result<Vec<Uri>> {
        let latest = dir.latest_consolidated_fragment_meta()?;
        let mut removed = Vec::new();
        for uri in dir.list_fragment_meta_uris()? {
            if Some(&uri) == latest.as_ref() {
                continue;
            }
            if TimestampedUri::parse(uri.clone())?.contained_in(start, end) {
                self.vfs.remove_file(&uri)?;
                removed.push(uri);
            }
        }
        Ok(removed)
    }

    fn vacuum_array_meta(&self, dir: &ArrayDirectory<'_>, start: u64, end: u64) -> Result<(Vec<Uri>, usize)> {
        let (mut uris, vacs) = dir.list_metadata_uris()?;
        uris.extend(vacs);
        let plan = get_uris_to_vacuum(self.vfs(), &self.io_tp, &uris, start, end, false)?;
        for uri in plan.to_vacuum.iter().chain(&plan.vac_uris) {
            self.vfs.remove_file(uri)?;
        }
        Ok((plan.to_vacuum, plan.vac_uris.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_split_on_excluded_and_boundary() {
        let items = [1, 2, 3, 10, 4, 5, 20, 21, 6];
        let got = runs(&items, |&x| x < 10 || x > 20, |a, b| (a < &10) == (b < &10));
        assert_eq!(got, vec![vec![1, 2, 3], vec![4, 5], vec![21], vec![6]]);
    }

    #[test]
    fn test_window_of() {
        assert_eq!(window_of([(5, 7), (2, 3), (6, 9)].into_iter()), (2, 9));
    }
}
