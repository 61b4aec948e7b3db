//! Timestamp-window resolution over object listings.
//!
//! Fragments, schemas and array-metadata files all go through the same two
//! primitives: [`get_sorted_uris`] picks what a time-travel read sees and
//! [`get_uris_to_vacuum`] picks what consolidation has made removable.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::{Result, StorageError};
use crate::names::{TimestampedUri, VACUUM_FILE_SUFFIX};
use crate::uri::Uri;
use crate::vfs::Vfs;

/// Result of [`get_uris_to_vacuum`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UrisToVacuum {
    /// Superseded objects, in input order.
    pub to_vacuum: Vec<Uri>,
    /// Manifests whose every listed object is gone or being removed.
    pub vac_uris: Vec<Uri>,
}

/// Ascending by `(t1, uuid)`; `(t2, uri)` only separate exact duplicates.
pub fn sort_timestamped(uris: &mut [TimestampedUri]) {
    uris.sort_by(|a, b| {
        (a.timestamp_range.0, &a.uuid, a.timestamp_range.1, &a.uri).cmp(&(
            b.timestamp_range.0,
            &b.uuid,
            b.timestamp_range.1,
            &b.uri,
        ))
    });
}

/// Parse `uris`, keep those whose window intersects
/// `[timestamp_start, timestamp_end]` and return them in resolution order.
pub fn get_sorted_uris(
    uris: &[Uri],
    timestamp_start: u64,
    timestamp_end: u64,
) -> Result<Vec<TimestampedUri>> {
    let mut sorted = Vec::with_capacity(uris.len());
    for uri in uris {
        let parsed = TimestampedUri::parse(uri.clone())?;
        if parsed.intersects(timestamp_start, timestamp_end) {
            sorted.push(parsed);
        }
    }
    sort_timestamped(&mut sorted);
    Ok(sorted)
}

/// Compute which of `uris` consolidation has superseded.
///
/// The `.vac` manifests among `uris` that qualify for the window (intersect
/// if `allow_partial`, contained otherwise) are read on `io_tp`. A URI they
/// list is removable if it is present in `uris` and, unless `allow_partial`,
/// its own window is inside `[timestamp_start, timestamp_end]`.
pub fn get_uris_to_vacuum(
    vfs: &dyn Vfs,
    io_tp: &ThreadPool,
    uris: &[Uri],
    timestamp_start: u64,
    timestamp_end: u64,
    allow_partial: bool,
) -> Result<UrisToVacuum> {
    let qualifies = |t: &TimestampedUri| {
        if allow_partial {
            t.intersects(timestamp_start, timestamp_end)
        } else {
            t.contained_in(timestamp_start, timestamp_end)
        }
    };

    let mut vac_files = Vec::new();
    let mut candidates: HashMap<&str, usize> = HashMap::new();
    for (idx, uri) in uris.iter().enumerate() {
        if uri.as_str().ends_with(VACUUM_FILE_SUFFIX) {
            let parsed = TimestampedUri::parse(uri.clone())?;
            if qualifies(&parsed) {
                vac_files.push(parsed);
            }
        } else {
            candidates.insert(uri.as_str(), idx);
        }
    }

    let listings: Vec<Result<Vec<Uri>>> = io_tp.install(|| {
        vac_files
            .par_iter()
            .map(|vac| read_vac_file(vfs, &vac.uri))
            .collect()
    });

    let mut marked = vec![false; uris.len()];
    let mut vac_uris = Vec::new();
    for (vac, listing) in vac_files.iter().zip(listings) {
        let mut exhausted = true;
        for listed in listing? {
            let Some(&idx) = candidates.get(listed.as_str()) else {
                continue;
            };
            let eligible = allow_partial
                || TimestampedUri::parse(listed)
                    .map(|t| qualifies(&t))
                    .unwrap_or(false);
            if eligible {
                marked[idx] = true;
            } else {
                exhausted = false;
            }
        }
        if exhausted {
            vac_uris.push(vac.uri.clone());
        }
    }

    let to_vacuum = uris
        .iter()
        .zip(marked)
        .filter_map(|(uri, m)| m.then(|| uri.clone()))
        .collect();
    Ok(UrisToVacuum {
        to_vacuum,
        vac_uris,
    })
}

/// Drop entries of `sorted` that a visible consolidated object supersedes.
///
/// `vac_uris` are manifests named after the object they describe
/// (`<name>.vac`); only manifests whose object is itself in `sorted` apply.
/// A consolidated object whose window lies inside
/// `[timestamp_start, timestamp_end]` hides the objects it lists. One that
/// only overlaps the window is dropped instead and its inputs stay visible,
/// so a read between two merged inputs sees what it saw before the merge.
pub fn filter_consolidated(
    vfs: &dyn Vfs,
    io_tp: &ThreadPool,
    sorted: Vec<TimestampedUri>,
    vac_uris: &[Uri],
    timestamp_start: u64,
    timestamp_end: u64,
) -> Result<Vec<TimestampedUri>> {
    let by_name: HashMap<&str, &TimestampedUri> =
        sorted.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut applied: Vec<&Uri> = Vec::new();
    let mut hidden: HashSet<String> = HashSet::new();
    for vac in vac_uris {
        let Some(object) = vac
            .last_path_part()
            .strip_suffix(VACUUM_FILE_SUFFIX)
            .and_then(|name| by_name.get(name))
        else {
            continue;
        };
        if object.contained_in(timestamp_start, timestamp_end) {
            applied.push(vac);
        } else {
            hidden.insert(object.uri.as_str().to_string());
        }
    }
    if applied.is_empty() && hidden.is_empty() {
        return Ok(sorted);
    }

    for listing in read_vac_files(vfs, io_tp, &applied)? {
        hidden.extend(listing.into_iter().map(|u| u.as_str().to_string()));
    }
    Ok(sorted
        .into_iter()
        .filter(|t| !hidden.contains(t.uri.as_str()))
        .collect())
}

/// Every URI listed by any of `vac_uris`, whatever its window.
pub fn superseded_uris(vfs: &dyn Vfs, io_tp: &ThreadPool, vac_uris: &[Uri]) -> Result<HashSet<String>> {
    let all: Vec<&Uri> = vac_uris.iter().collect();
    Ok(read_vac_files(vfs, io_tp, &all)?
        .into_iter()
        .flatten()
        .map(|u| u.as_str().to_string())
        .collect())
}

fn read_vac_files(vfs: &dyn Vfs, io_tp: &ThreadPool, vac_uris: &[&Uri]) -> Result<Vec<Vec<Uri>>> {
    if vac_uris.is_empty() {
        return Ok(Vec::new());
    }
    io_tp.install(|| {
        vac_uris
            .par_iter()
            .map(|uri| read_vac_file(vfs, uri))
            .collect()
    })
}

/// One URI per line.
pub fn read_vac_file(vfs: &dyn Vfs, uri: &Uri) -> Result<Vec<Uri>> {
    let bytes = vfs.read_all(uri)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| StorageError::InvalidFormat(format!("Vacuum file {}: {}", uri, e)))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(Uri::new)
        .collect())
}

pub fn write_vac_file(vfs: &dyn Vfs, uri: &Uri, listed: &[Uri]) -> Result<()> {
    let mut text = String::new();
    for u in listed {
        text.push_str(u.as_str());
        text.push('\n');
    }
    vfs.write(uri, text.as_bytes())
}
