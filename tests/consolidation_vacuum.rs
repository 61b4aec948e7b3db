//! Integration test: consolidation and vacuum over a local directory.
//!
//! Validates that:
//! - Merged fragments hide their inputs until vacuum removes them
//! - Time travel between merged inputs works before vacuum
//! - Windows, schema boundaries and min/max fragment counts shape the merge
//! - Consolidated fragment metadata replaces per-fragment loads
//! - Consolidated array metadata keeps deletions

use std::sync::Arc;

use arraystore::tile;
use arraystore::{
    Array, ArraySchema, ArraySchemaEvolution, ArrayState, ArrayType, Attribute,
    ConsolidationConfig, ConsolidationMode, Datatype, Dimension, EncryptionKey, LocalVfs, Range,
    StorageConfig, StorageError, StorageManager, Uri, VacuumConfig, VacuumMode, Vfs,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn session() -> StorageManager {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = StorageConfig {
        compute_concurrency: Some(2),
        io_concurrency: Some(4),
        ..Default::default()
    };
    StorageManager::new(Arc::new(LocalVfs::new()), config).unwrap()
}

fn create_array(sm: &StorageManager, dir: &TempDir) -> Uri {
    let uri = Uri::from(dir.path().join("arr").as_path());
    let schema = ArraySchema::new(
        ArrayType::Sparse,
        vec![Dimension::new("x", Datatype::Int32, Range::from_values(-500i32, 500i32)).unwrap()],
        vec![Attribute::new("v", Datatype::UInt64)],
    )
    .unwrap();
    sm.array_create_at(&uri, schema, &EncryptionKey::none(), 1).unwrap();
    uri
}

fn write_fragment(sm: &StorageManager, uri: &Uri, t: u64, lo: i32, hi: i32) -> Uri {
    let mut array = Array::new(uri.clone());
    array.set_timestamp_end(t);
    sm.array_open_for_writes(&mut array).unwrap();
    let fragment = sm
        .array_commit_fragment(&array, vec![Range::from_values(lo, hi)], (hi - lo + 1) as u64)
        .unwrap();
    sm.array_close_for_writes(&mut array).unwrap();
    fragment
}

fn write_metadata(sm: &StorageManager, uri: &Uri, t: u64, edit: impl FnOnce(&mut Array)) {
    let mut array = Array::new(uri.clone());
    array.set_timestamp_end(t);
    sm.array_open_for_writes(&mut array).unwrap();
    edit(&mut array);
    sm.array_close_for_writes(&mut array).unwrap();
}

fn open(sm: &StorageManager, uri: &Uri) -> Array {
    let mut array = Array::new(uri.clone());
    sm.array_open_for_reads(&mut array).unwrap();
    array
}

fn ranges(array: &Array) -> Vec<(u64, u64)> {
    array
        .fragment_metadata()
        .iter()
        .map(|f| f.timestamp_range())
        .collect()
}

fn consolidation(mode: ConsolidationMode) -> ConsolidationConfig {
    ConsolidationConfig {
        mode,
        ..Default::default()
    }
}

fn vacuum(mode: VacuumMode) -> VacuumConfig {
    VacuumConfig {
        mode,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Tests: Fragments
// ---------------------------------------------------------------------------

#[test]
fn consolidated_fragment_hides_inputs_until_vacuum() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    write_fragment(&sm, &uri, 10, 0, 9);
    write_fragment(&sm, &uri, 20, -20, -10);
    write_fragment(&sm, &uri, 30, 100, 110);

    let key = EncryptionKey::none();
    let result = sm
        .array_consolidate(&uri, &key, &consolidation(ConsolidationMode::Fragments))
        .unwrap();
    assert_eq!(result.consolidated, 3);
    assert_eq!(result.new_uris.len(), 1);

    let array = open(&sm, &uri);
    assert_eq!(ranges(&array), vec![(10, 30)]);
    let merged = &array.fragment_metadata()[0];
    assert_eq!(merged.cell_num(), 10 + 11 + 11);
    assert_eq!(merged.non_empty_domain(), &[Range::from_values(-20i32, 110i32)]);
    assert_eq!(merged.fragment_uri(), &result.new_uris[0]);

    // Inputs are still on disk until vacuumed.
    assert_eq!(sm.vfs().ls(&uri.join_path("__fragments")).unwrap().len(), 4);

    let vacuumed = sm.array_vacuum(&uri, &vacuum(VacuumMode::Fragments)).unwrap();
    assert_eq!(vacuumed.uris_removed.len(), 3);
    assert_eq!(vacuumed.vac_files_removed, 1);
    assert_eq!(sm.vfs().ls(&uri.join_path("__fragments")).unwrap(), result.new_uris);
    let commits = sm.vfs().ls(&uri.join_path("__commits")).unwrap();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].as_str().ends_with(".wrt"));

    assert_eq!(ranges(&open(&sm, &uri)), vec![(10, 30)]);
    let stats = sm.stats().snapshot();
    assert_eq!(stats.consolidations, 1);
    assert_eq!(stats.uris_vacuumed, 3);
}

#[test]
fn time_travel_between_merged_inputs_before_vacuum() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    write_fragment(&sm, &uri, 10, 0, 9);
    write_fragment(&sm, &uri, 20, 200, 300);
    let key = EncryptionKey::none();
    sm.array_consolidate(&uri, &key, &consolidation(ConsolidationMode::Fragments))
        .unwrap();

    let at = |start: u64, end: u64| {
        let mut array = Array::new(uri.clone());
        array.set_timestamp_start(start);
        array.set_timestamp_end(end);
        sm.array_open_for_reads(&mut array).unwrap();
        array
    };

    let early = at(0, 15);
    assert_eq!(ranges(&early), vec![(10, 10)]);
    assert_eq!(
        early.non_empty_domain().unwrap().unwrap(),
        vec![Range::from_values(0i32, 9i32)]
    );
    assert_eq!(ranges(&at(15, u64::MAX)), vec![(20, 20)]);
    assert_eq!(ranges(&at(0, u64::MAX)), vec![(10, 20)]);

    // A second merge over a window holding only the merged object is a no-op.
    let partial = ConsolidationConfig {
        timestamp_start: 15,
        timestamp_end: 40,
        ..consolidation(ConsolidationMode::Fragments)
    };
    write_fragment(&sm, &uri, 30, 400, 401);
    assert_eq!(sm.array_consolidate(&uri, &key, &partial).unwrap().consolidated, 0);
    assert_eq!(ranges(&at(15, u64::MAX)), vec![(20, 20), (30, 30)]);

    // Vacuum coarsens time travel: with the inputs gone, the merged
    // fragment answers reads that overlap it.
    sm.array_vacuum(&uri, &vacuum(VacuumMode::Fragments)).unwrap();
    assert_eq!(ranges(&at(0, 15)), vec![(10, 20)]);
    assert_eq!(ranges(&at(0, u64::MAX)), vec![(10, 20), (30, 30)]);
}

#[test]
fn consolidation_window_and_min_frags() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    for (i, t) in [10u64, 20, 30, 40].into_iter().enumerate() {
        write_fragment(&sm, &uri, t, i as i32 * 10, i as i32 * 10 + 5);
    }
    let key = EncryptionKey::none();

    let strict = ConsolidationConfig {
        timestamp_start: 15,
        timestamp_end: 35,
        min_frags: 3,
        ..consolidation(ConsolidationMode::Fragments)
    };
    let none = sm.array_consolidate(&uri, &key, &strict).unwrap();
    assert_eq!(none.consolidated, 0);
    assert!(none.new_uris.is_empty());

    let window = ConsolidationConfig {
        min_frags: 2,
        ..strict
    };
    sm.array_consolidate(&uri, &key, &window).unwrap();
    assert_eq!(ranges(&open(&sm, &uri)), vec![(10, 10), (20, 30), (40, 40)]);

    // The manifest's window leaves [0, 25], so nothing qualifies.
    let narrow = VacuumConfig {
        timestamp_start: 0,
        timestamp_end: 25,
        ..vacuum(VacuumMode::Fragments)
    };
    assert!(sm.array_vacuum(&uri, &narrow).unwrap().uris_removed.is_empty());

    let all = sm.array_vacuum(&uri, &vacuum(VacuumMode::Fragments)).unwrap();
    assert_eq!(all.uris_removed.len(), 2);
    assert_eq!(ranges(&open(&sm, &uri)), vec![(10, 10), (20, 30), (40, 40)]);
}

#[test]
fn max_frags_splits_groups() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    for t in [10u64, 20, 30, 40, 50] {
        write_fragment(&sm, &uri, t, 0, 1);
    }
    let config = ConsolidationConfig {
        max_frags: 2,
        ..consolidation(ConsolidationMode::Fragments)
    };
    let result = sm
        .array_consolidate(&uri, &EncryptionKey::none(), &config)
        .unwrap();
    assert_eq!(result.new_uris.len(), 2);
    assert_eq!(result.consolidated, 4);
    assert_eq!(ranges(&open(&sm, &uri)), vec![(10, 20), (30, 40), (50, 50)]);
}

#[test]
fn consolidation_stops_at_schema_change() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    let key = EncryptionKey::none();
    write_fragment(&sm, &uri, 5, 0, 1);
    let mut evolution = ArraySchemaEvolution::new();
    evolution.add_attribute(Attribute::new("w", Datatype::Int16)).unwrap();
    evolution.set_timestamp(10);
    sm.array_evolve_schema(&uri, &evolution, &key).unwrap();
    write_fragment(&sm, &uri, 15, 2, 3);
    write_fragment(&sm, &uri, 20, 4, 5);

    let result = sm
        .array_consolidate(&uri, &key, &consolidation(ConsolidationMode::Fragments))
        .unwrap();
    assert_eq!(result.consolidated, 2);
    let array = open(&sm, &uri);
    assert_eq!(ranges(&array), vec![(5, 5), (15, 20)]);
    assert!(array.fragment_metadata()[1].array_schema().attribute("w").is_some());
}

#[test]
fn consolidate_missing_array() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = Uri::from(dir.path().join("nothing").as_path());
    assert!(matches!(
        sm.array_consolidate(&uri, &EncryptionKey::none(), &ConsolidationConfig::default()),
        Err(StorageError::ArrayNotFound(_))
    ));
    assert!(matches!(
        sm.array_vacuum(&uri, &VacuumConfig::default()),
        Err(StorageError::ArrayNotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Tests: Fragment Metadata
// ---------------------------------------------------------------------------

#[test]
fn consolidated_fragment_metadata_used_on_open() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    let key = EncryptionKey::none();
    for t in [10u64, 20, 30] {
        write_fragment(&sm, &uri, t, 0, 1);
    }
    let result = sm
        .array_consolidate(&uri, &key, &consolidation(ConsolidationMode::FragmentMeta))
        .unwrap();
    assert_eq!(result.consolidated, 3);
    assert!(result.new_uris[0].as_str().ends_with(".meta"));

    let before = sm.stats().snapshot();
    open(&sm, &uri);
    let after = sm.stats().snapshot();
    assert_eq!(after.fragment_metadata_consolidated - before.fragment_metadata_consolidated, 3);
    assert_eq!(after.fragment_metadata_loaded, before.fragment_metadata_loaded);

    write_fragment(&sm, &uri, 40, 0, 1);
    let before = sm.stats().snapshot();
    assert_eq!(open(&sm, &uri).fragment_num(), 4);
    let after = sm.stats().snapshot();
    assert_eq!(after.fragment_metadata_consolidated - before.fragment_metadata_consolidated, 3);
    assert_eq!(after.fragment_metadata_loaded - before.fragment_metadata_loaded, 1);

    sm.array_consolidate(&uri, &key, &consolidation(ConsolidationMode::FragmentMeta))
        .unwrap();
    let removed = sm
        .array_vacuum(&uri, &vacuum(VacuumMode::FragmentMeta))
        .unwrap()
        .uris_removed;
    assert_eq!(removed, result.new_uris);
    assert_eq!(sm.vfs().ls(&uri.join_path("__fragment_meta")).unwrap().len(), 1);
}

#[test]
fn corrupt_consolidated_offsets_fail_open() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    let key = EncryptionKey::none();
    let fragment = write_fragment(&sm, &uri, 10, 0, 1);
    let meta = sm
        .array_consolidate(&uri, &key, &consolidation(ConsolidationMode::FragmentMeta))
        .unwrap()
        .new_uris
        .remove(0);

    let name = fragment.last_path_part();
    let mut payload = Vec::new();
    payload.extend_from_slice(&1u32.to_le_bytes());
    payload.extend_from_slice(&(name.len() as u64).to_le_bytes());
    payload.extend_from_slice(name.as_bytes());
    payload.extend_from_slice(&9999u64.to_le_bytes());
    tile::write_tile(sm.vfs(), &meta, &payload, &key).unwrap();

    let mut array = Array::new(uri);
    assert!(matches!(
        sm.array_open_for_reads(&mut array),
        Err(StorageError::InvalidFormat(_))
    ));
    assert_eq!(array.state(), ArrayState::Closed);
}

// ---------------------------------------------------------------------------
// Tests: Array Metadata
// ---------------------------------------------------------------------------

#[test]
fn array_metadata_consolidation_keeps_deletions() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    let key = EncryptionKey::none();
    write_metadata(&sm, &uri, 10, |a| {
        a.put_metadata_values("a", Datatype::Int32, &[1i32]).unwrap();
    });
    write_metadata(&sm, &uri, 20, |a| {
        a.delete_metadata("a").unwrap();
        a.put_metadata_values("b", Datatype::Int32, &[2i32]).unwrap();
    });
    write_metadata(&sm, &uri, 30, |a| {
        a.put_metadata_values("c", Datatype::Int32, &[3i32]).unwrap();
    });

    let config = ConsolidationConfig {
        timestamp_start: 20,
        timestamp_end: 30,
        ..consolidation(ConsolidationMode::ArrayMeta)
    };
    let result = sm.array_consolidate(&uri, &key, &config).unwrap();
    assert_eq!(result.consolidated, 2);

    let vacuumed = sm.array_vacuum(&uri, &vacuum(VacuumMode::ArrayMeta)).unwrap();
    assert_eq!(vacuumed.uris_removed.len(), 2);
    assert_eq!(vacuumed.vac_files_removed, 1);
    assert_eq!(sm.vfs().ls(&uri.join_path("__meta")).unwrap().len(), 2);

    let mut array = open(&sm, &uri);
    let md = sm.array_metadata(&mut array).unwrap();
    assert!(md.get("a").is_none());
    assert_eq!(md.get_as::<i32>("b").unwrap().unwrap(), vec![2]);
    assert_eq!(md.get_as::<i32>("c").unwrap().unwrap(), vec![3]);
}

#[test]
fn metadata_time_travel_between_merged_inputs() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    let key = EncryptionKey::none();
    write_metadata(&sm, &uri, 10, |a| {
        a.put_metadata_values("k", Datatype::Int32, &[1i32]).unwrap();
    });
    write_metadata(&sm, &uri, 20, |a| {
        a.put_metadata_values("k", Datatype::Int32, &[2i32]).unwrap();
    });
    let result = sm
        .array_consolidate(&uri, &key, &consolidation(ConsolidationMode::ArrayMeta))
        .unwrap();
    assert_eq!(result.consolidated, 2);

    let value_at = |end: u64| {
        let mut array = Array::new(uri.clone());
        array.set_timestamp_end(end);
        sm.array_open_for_reads(&mut array).unwrap();
        let md = sm.array_metadata(&mut array).unwrap();
        let value = md.get_as::<i32>("k").unwrap().unwrap();
        value
    };
    assert_eq!(value_at(15), vec![1]);
    assert_eq!(value_at(u64::MAX), vec![2]);
}

#[test]
fn single_metadata_file_is_not_consolidated() {
    let dir = TempDir::new().unwrap();
    let sm = session();
    let uri = create_array(&sm, &dir);
    write_metadata(&sm, &uri, 10, |a| {
        a.put_metadata("s", Datatype::StringUtf8, 2, b"hi").unwrap();
    });
    let result = sm
        .array_consolidate(&uri, &EncryptionKey::none(), &consolidation(ConsolidationMode::ArrayMeta))
        .unwrap();
    assert_eq!(result.consolidated, 0);
    assert_eq!(sm.stats().snapshot().consolidations, 0);
}
