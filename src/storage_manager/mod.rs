//! Storage session: array lifecycle, time-travel resolution, queries and
//! maintenance.
//!
//! A [`StorageManager`] owns the two worker pools, the open-array registry,
//! the in-progress query counter, the cancellation token and the session
//! stats. Nothing in the crate is global; every operation goes through a
//! session.

pub mod cancel;
pub mod consolidator;
pub mod in_progress;
pub mod open_arrays;

pub use cancel::{CancelableTasks, CancellationToken, TaskHandle};
pub use consolidator::{ConsolidationResult, VacuumResult};
pub use in_progress::InProgressCounter;
pub use open_arrays::{ExclusiveLock, OpenArrayRegistry, QueryInProgress, ResolutionInProgress};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::array::{Array, ArrayDirectory, ArrayId, ArraySnapshot, ArrayState, QueryType, Resolved};
use crate::config::StorageConfig;
use crate::encryption::EncryptionKey;
use crate::error::{Result, StorageError};
use crate::fragment::metadata::FragmentMetadataRecord;
use crate::fragment::{ConsolidatedFragmentMetadata, FragmentMetadata};
use crate::metadata::Metadata;
use crate::names::{
    fragment_name, generate_uuid, now_ms, timestamped_name, TimestampedUri, LEGACY_SCHEMA_FILENAME,
};
use crate::range::Range;
use crate::resolution::{filter_consolidated, get_sorted_uris};
use crate::schema::{ArraySchema, ArraySchemaEvolution};
use crate::stats::Stats;
use crate::tile;
use crate::uri::Uri;
use crate::vfs::Vfs;

/// Schemas resolved for one window.
pub(crate) struct ResolvedSchemas {
    pub latest: Arc<ArraySchema>,
    pub all: HashMap<String, Arc<ArraySchema>>,
}

/// `u64::MAX` as an end timestamp means "now".
pub(crate) fn resolve_end(timestamp: u64) -> u64 {
    if timestamp == u64::MAX {
        now_ms()
    } else {
        timestamp
    }
}

pub struct StorageManager {
    vfs: Arc<dyn Vfs>,
    config: StorageConfig,
    compute_tp: ThreadPool,
    io_tp: ThreadPool,
    open_arrays: Arc<OpenArrayRegistry>,
    in_progress: Arc<InProgressCounter>,
    cancellation: CancellationToken,
    tasks: CancelableTasks,
    stats: Arc<Stats>,
}

impl StorageManager {
    pub fn new(vfs: Arc<dyn Vfs>, config: StorageConfig) -> Result<Self> {
        let (compute_threads, io_threads) = config.thread_counts();
        let compute_tp = ThreadPoolBuilder::new()
            .num_threads(compute_threads)
            .thread_name(|i| format!("compute-{}", i))
            .build()
            .map_err(|e| StorageError::ThreadPool(e.to_string()))?;
        let io_tp = ThreadPoolBuilder::new()
            .num_threads(io_threads)
            .thread_name(|i| format!("io-{}", i))
            .build()
            .map_err(|e| StorageError::ThreadPool(e.to_string()))?;
        tracing::info!(
            "Storage session started: {} compute threads, {} io threads",
            compute_threads,
            io_threads
        );
        let stats = Arc::new(Stats::new());
        Ok(Self {
            vfs,
            config,
            compute_tp,
            io_tp,
            open_arrays: Arc::new(OpenArrayRegistry::new()),
            in_progress: Arc::new(InProgressCounter::new()),
            cancellation: CancellationToken::new(),
            tasks: CancelableTasks::new(stats.clone()),
            stats,
        })
    }

    pub fn vfs(&self) -> &dyn Vfs {
        self.vfs.as_ref()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn compute_tp(&self) -> &ThreadPool {
        &self.compute_tp
    }

    pub fn io_tp(&self) -> &ThreadPool {
        &self.io_tp
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn open_arrays(&self) -> &Arc<OpenArrayRegistry> {
        &self.open_arrays
    }

    pub fn queries_in_progress(&self) -> u64 {
        self.in_progress.count()
    }

    fn dir(&self, uri: &Uri) -> ArrayDirectory<'_> {
        ArrayDirectory::new(self.vfs.as_ref(), uri.clone())
    }

    // ── Creation and schema evolution ──────────────────────────────────

    pub fn array_create(&self, uri: &Uri, schema: ArraySchema, key: &EncryptionKey) -> Result<()> {
        self.array_create_at(uri, schema, key, now_ms())
    }

    /// Create an array whose first schema version is stamped `timestamp`.
    pub fn array_create_at(
        &self,
        uri: &Uri,
        mut schema: ArraySchema,
        key: &EncryptionKey,
        timestamp: u64,
    ) -> Result<()> {
        let dir = self.dir(uri);
        if dir.exists()? {
            return Err(StorageError::ArrayExists(uri.to_string()));
        }
        schema.check()?;
        dir.create()?;
        schema.generate_name(timestamp);
        let schema_uri = dir.schema_dir().join_path(schema.name());
        tile::write_tile(self.vfs(), &schema_uri, &schema.serialize()?, key)?;
        tracing::info!("Created array {} with schema {}", uri, schema.name());
        Ok(())
    }

    /// Store the next schema version. Its timestamp may not precede the
    /// current latest version.
    pub fn array_evolve_schema(
        &self,
        uri: &Uri,
        evolution: &ArraySchemaEvolution,
        key: &EncryptionKey,
    ) -> Result<()> {
        let dir = self.dir(uri);
        if !dir.exists()? {
            return Err(StorageError::ArrayNotFound(uri.to_string()));
        }
        let timestamp = evolution.timestamp().unwrap_or_else(now_ms);
        let current = self.load_array_schemas(&dir, key, u64::MAX, u64::MAX)?.latest;
        if timestamp < current.timestamp_range().0 {
            return Err(StorageError::SchemaEvolution(format!(
                "timestamp {} precedes latest schema {}",
                timestamp,
                current.name()
            )));
        }
        let mut evolved = evolution.evolve_schema(&current)?;
        evolved.generate_name(timestamp);
        let schema_uri = dir.schema_dir().join_path(evolved.name());
        tile::write_tile(self.vfs(), &schema_uri, &evolved.serialize()?, key)?;
        tracing::info!("Evolved schema of {} to {}", uri, evolved.name());
        Ok(())
    }

    // ── Open / reopen / close ──────────────────────────────────────────

    pub fn array_open_for_reads(&self, array: &mut Array) -> Result<()> {
        self.open(array, QueryType::Read, true)
    }

    /// Resolve schemas only.
    pub fn array_open_for_reads_without_fragments(&self, array: &mut Array) -> Result<()> {
        self.open(array, QueryType::Read, false)
    }

    /// Resolve the schema current at the write timestamp.
    pub fn array_open_for_writes(&self, array: &mut Array) -> Result<()> {
        self.open(array, QueryType::Write, false)
    }

    fn open(&self, array: &mut Array, query_type: QueryType, with_fragments: bool) -> Result<()> {
        if array.id().is_some() {
            return Err(StorageError::ArrayAlreadyOpen(array.uri().to_string()));
        }
        if !self.dir(array.uri()).exists()? {
            return Err(StorageError::ArrayNotFound(array.uri().to_string()));
        }
        let opened_at = resolve_end(array.timestamp_end());
        if query_type == QueryType::Read && array.timestamp_start() > opened_at {
            return Err(StorageError::InvalidRange(format!(
                "timestamp window [{}, {}] is reversed",
                array.timestamp_start(),
                opened_at
            )));
        }

        let id = self.open_arrays.register(array.uri(), query_type);
        array.begin_open(id, query_type, opened_at);
        let resolved = self.resolve_guarded(array, id, query_type, with_fragments);
        match resolved {
            Ok(resolved) => {
                array.install(resolved);
                self.stats.record_open();
                tracing::info!(
                    "Opened {} for {} at [{}, {}] with {} fragments",
                    array.uri(),
                    query_type,
                    array.timestamp_start(),
                    opened_at,
                    array.fragment_num()
                );
                Ok(())
            }
            Err(e) => {
                self.abort_open(array, id);
                tracing::warn!("Failed to open {}: {}", array.uri(), e);
                Err(e)
            }
        }
    }

    /// Re-resolve an open read handle for its current window, keeping its
    /// registry identity.
    pub fn array_reopen(&self, array: &mut Array) -> Result<()> {
        let id = self.open_id(array)?;
        if array.query_type() != Some(QueryType::Read) {
            return Err(StorageError::WrongQueryType {
                uri: array.uri().to_string(),
                expected: QueryType::Read.as_str(),
            });
        }
        let opened_at = resolve_end(array.timestamp_end());
        array.set_timestamp_end_opened_at(opened_at);
        array.set_state(ArrayState::ResolvingFragments);
        let resolved = self.resolve_guarded(array, id, QueryType::Read, true);
        match resolved {
            Ok(resolved) => {
                array.install(resolved);
                tracing::debug!(
                    "Reopened {} at [{}, {}]",
                    array.uri(),
                    array.timestamp_start(),
                    opened_at
                );
                Ok(())
            }
            Err(e) => {
                self.abort_open(array, id);
                tracing::warn!("Failed to reopen {}: {}", array.uri(), e);
                Err(e)
            }
        }
    }

    fn abort_open(&self, array: &mut Array, id: ArrayId) {
        if let Err(e) = self.open_arrays.unregister(id) {
            tracing::warn!("Failed to unregister handle {}: {}", id, e);
        }
        array.reset();
    }

    /// The guard drops before any `abort_open`, which waits on the registry.
    fn resolve_guarded(
        &self,
        array: &mut Array,
        id: ArrayId,
        query_type: QueryType,
        with_fragments: bool,
    ) -> Result<Resolved> {
        let _resolution = ResolutionInProgress::enter(self.open_arrays.clone(), id)?;
        self.resolve(array, query_type, with_fragments)
    }

    fn resolve(&self, array: &mut Array, query_type: QueryType, with_fragments: bool) -> Result<Resolved> {
        let dir = self.dir(array.uri());
        let key = array.encryption_key().clone();
        let end = array.timestamp_end_opened_at();
        let start = match query_type {
            QueryType::Read => array.timestamp_start(),
            QueryType::Write => end,
        };
        let ResolvedSchemas { latest, mut all } = self.load_array_schemas(&dir, &key, start, end)?;

        let fragments = if with_fragments {
            array.set_state(ArrayState::ResolvingFragments);
            self.load_fragments(&dir, &key, start, end, &mut all)?
        } else {
            Vec::new()
        };
        Ok(Resolved {
            latest,
            all,
            fragments,
        })
    }

    /// Attach `fragments` to an open read handle. Names already loaded are
    /// skipped.
    pub fn array_load_fragments(&self, array: &mut Array, fragments: &[TimestampedUri]) -> Result<()> {
        let id = self.open_id(array)?;
        if array.query_type() != Some(QueryType::Read) {
            return Err(StorageError::WrongQueryType {
                uri: array.uri().to_string(),
                expected: QueryType::Read.as_str(),
            });
        }
        let loaded: HashSet<&str> = array.fragment_metadata().iter().map(|f| f.name()).collect();
        let mut wanted: Vec<TimestampedUri> = Vec::new();
        for f in fragments {
            if !loaded.contains(f.name.as_str()) && !wanted.iter().any(|w| w.name == f.name) {
                wanted.push(f.clone());
            }
        }
        if wanted.is_empty() {
            return Ok(());
        }

        let _resolution = ResolutionInProgress::enter(self.open_arrays.clone(), id)?;
        let dir = self.dir(array.uri());
        let key = array.encryption_key().clone();
        let consolidated = self.load_latest_consolidated(&dir, &key)?;
        let mut schemas = array.array_schemas_all().clone();
        let loaded = self.load_fragment_metadata(&dir, &key, &wanted, consolidated.as_ref(), &mut schemas)?;
        tracing::debug!("Attached {} fragments to {}", loaded.len(), array.uri());
        array.attach_fragments(loaded, schemas);
        Ok(())
    }

    pub fn array_close_for_reads(&self, array: &mut Array) -> Result<()> {
        self.close(array, QueryType::Read)
    }

    /// Persist buffered metadata changes, then close.
    pub fn array_close_for_writes(&self, array: &mut Array) -> Result<()> {
        self.close(array, QueryType::Write)
    }

    fn close(&self, array: &mut Array, query_type: QueryType) -> Result<()> {
        let id = array
            .id()
            .ok_or_else(|| StorageError::ArrayNotOpen(array.uri().to_string()))?;
        if array.query_type() != Some(query_type) {
            return Err(StorageError::WrongQueryType {
                uri: array.uri().to_string(),
                expected: query_type.as_str(),
            });
        }
        if query_type == QueryType::Write {
            let (metadata, _, modified) = array.metadata_state();
            if modified {
                self.store_array_metadata(array, metadata)?;
            }
        }
        self.open_arrays.unregister(id)?;
        array.reset();
        self.stats.record_close();
        tracing::debug!("Closed {} for {}", array.uri(), query_type);
        Ok(())
    }

    fn store_array_metadata(&self, array: &Array, metadata: &Metadata) -> Result<()> {
        let t = array.timestamp_end_opened_at();
        let name = timestamped_name(t, t, &generate_uuid());
        let uri = self.dir(array.uri()).metadata_dir().join_path(&name);
        tile::write_tile(self.vfs(), &uri, &metadata.serialize(), array.encryption_key())?;
        tracing::debug!("Stored array metadata {}", uri);
        Ok(())
    }

    fn open_id(&self, array: &Array) -> Result<ArrayId> {
        array
            .id()
            .filter(|_| array.is_open())
            .ok_or_else(|| StorageError::ArrayNotOpen(array.uri().to_string()))
    }

    // ── Writes and array metadata ──────────────────────────────────────

    /// Store the metadata of a new fragment and commit it. Returns the
    /// fragment URI.
    pub fn array_commit_fragment(
        &self,
        array: &Array,
        non_empty_domain: Vec<Range>,
        cell_num: u64,
    ) -> Result<Uri> {
        let id = self.open_id(array)?;
        if array.query_type() != Some(QueryType::Write) {
            return Err(StorageError::WrongQueryType {
                uri: array.uri().to_string(),
                expected: QueryType::Write.as_str(),
            });
        }
        let _query = QueryInProgress::enter(self.open_arrays.clone(), self.in_progress.clone(), id)?;
        let schema = array.array_schema_latest()?;
        if non_empty_domain.len() != schema.dim_num() {
            return Err(StorageError::InvalidRange(format!(
                "{} domain ranges for {} dimensions",
                non_empty_domain.len(),
                schema.dim_num()
            )));
        }
        for (range, dim) in non_empty_domain.iter().zip(schema.dimensions()) {
            let kind = dim.datatype.element_kind();
            range.check_kind(kind)?;
            if range.empty() || !range.is_ordered(kind) {
                return Err(StorageError::InvalidRange(format!(
                    "domain of '{}' is empty or reversed",
                    dim.name
                )));
            }
            if !dim.var_size() && !range.within(&dim.domain, kind) {
                return Err(StorageError::RangeOutOfBounds(format!(
                    "fragment domain exceeds dimension '{}'",
                    dim.name
                )));
            }
        }

        let dir = self.dir(array.uri());
        let t = array.timestamp_end_opened_at();
        let name = fragment_name(t, t, &generate_uuid());
        let fragment = TimestampedUri::parse(dir.fragments_dir().join_path(&name))?;
        let metadata = FragmentMetadata::new(&fragment, schema.clone(), non_empty_domain, cell_num)?;
        metadata.store(self.vfs(), array.encryption_key())?;
        self.vfs.write(&dir.commit_uri(&name), b"")?;
        tracing::debug!("Committed fragment {} ({} cells)", fragment.uri, cell_num);
        Ok(fragment.uri)
    }

    /// Array metadata visible in the handle's window, loaded on first use.
    /// Write handles see their own buffered changes.
    pub fn array_metadata<'a>(&self, array: &'a mut Array) -> Result<&'a Metadata> {
        let id = self.open_id(array)?;
        let (_, loaded, _) = array.metadata_state();
        if array.query_type() == Some(QueryType::Read) && !loaded {
            let metadata = {
                let _resolution = ResolutionInProgress::enter(self.open_arrays.clone(), id)?;
                self.load_array_metadata(array)?
            };
            array.set_loaded_metadata(metadata);
        }
        Ok(array.metadata())
    }

    fn load_array_metadata(&self, array: &Array) -> Result<Metadata> {
        let dir = self.dir(array.uri());
        let (files, vacs) = dir.list_metadata_uris()?;
        let (start, end) = (array.timestamp_start(), array.timestamp_end_opened_at());
        let sorted = get_sorted_uris(&files, start, end)?;
        let visible = filter_consolidated(self.vfs(), &self.io_tp, sorted, &vacs, start, end)?;
        let buffers = self.read_tiles(&visible, array.encryption_key())?;
        Metadata::deserialize(&buffers)
    }

    /// Payloads of `objects`, read on the IO pool, in input order.
    pub(crate) fn read_tiles(&self, objects: &[TimestampedUri], key: &EncryptionKey) -> Result<Vec<Vec<u8>>> {
        let vfs = self.vfs();
        let token = &self.cancellation;
        self.io_tp.install(|| {
            objects
                .par_iter()
                .map(|t| {
                    token.check()?;
                    tile::read_tile(vfs, &t.uri, key)
                })
                .collect()
        })
    }

    // ── Queries and cancellation ───────────────────────────────────────

    /// Run `f` against an open handle, counted as one query in progress.
    pub fn query_submit<T, F>(&self, array: &Array, f: F) -> Result<T>
    where
        F: FnOnce(&Array) -> Result<T>,
    {
        self.cancellation.check()?;
        let id = self.open_id(array)?;
        let _query = QueryInProgress::enter(self.open_arrays.clone(), self.in_progress.clone(), id)?;
        self.stats.record_query();
        f(array)
    }

    /// Schedule `f` on the compute pool over a snapshot of the handle. The
    /// query counts as in progress from submission until the task ends.
    pub fn query_submit_async<T, F>(&self, array: &Array, f: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(ArraySnapshot, CancellationToken) -> Result<T> + Send + 'static,
    {
        self.cancellation.check()?;
        let id = self.open_id(array)?;
        let snapshot = array.snapshot()?;
        let query = QueryInProgress::enter(self.open_arrays.clone(), self.in_progress.clone(), id)?;
        self.stats.record_query();
        let token = self.cancellation.clone();
        Ok(self.tasks.execute(&self.compute_tp, &self.cancellation, move || {
            let _query = query;
            f(snapshot, token)
        }))
    }

    /// Cancel pending tasks and wait until no task or query is running.
    pub fn cancel_all_tasks(&self) {
        self.cancellation.set(true);
        tracing::info!("Cancelling {} outstanding tasks", self.tasks.outstanding());
        self.tasks.wait_all();
        self.in_progress.wait_for_zero();
        self.cancellation.set(false);
        tracing::info!("Cancellation complete");
    }

    pub fn cancellation_in_progress(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn wait_for_zero_in_progress(&self) {
        self.in_progress.wait_for_zero();
    }

    // ── Resolution ─────────────────────────────────────────────────────

    /// Latest schema at `end` plus every version valid somewhere in
    /// `[start, end]`. Version `i` is valid on `[t1_i, t1_{i+1} - 1]`.
    pub(crate) fn load_array_schemas(
        &self,
        dir: &ArrayDirectory<'_>,
        key: &EncryptionKey,
        start: u64,
        end: u64,
    ) -> Result<ResolvedSchemas> {
        let sorted = get_sorted_uris(&dir.list_schema_uris()?, 0, u64::MAX)?;
        let latest_idx = sorted
            .iter()
            .rposition(|s| s.timestamp_start() <= end)
            .ok_or_else(|| StorageError::SchemaNotFound(format!("{} at {}", dir.uri(), end)))?;

        let wanted: Vec<&TimestampedUri> = sorted
            .iter()
            .enumerate()
            .filter(|&(i, s)| {
                let valid_end = sorted
                    .get(i + 1)
                    .map_or(u64::MAX, |next| next.timestamp_start().saturating_sub(1));
                i == latest_idx
                    || (i < latest_idx
                        && s.timestamp_start() <= valid_end
                        && valid_end >= start
                        && s.timestamp_start() <= end)
            })
            .map(|(_, s)| s)
            .collect();

        let vfs = self.vfs();
        let token = &self.cancellation;
        let loaded: Vec<Result<ArraySchema>> = self.io_tp.install(|| {
            wanted
                .par_iter()
                .map(|s| {
                    token.check()?;
                    load_schema(vfs, s, key)
                })
                .collect()
        });

        let latest_name = sorted[latest_idx].name.as_str();
        let mut all = HashMap::with_capacity(loaded.len());
        let mut latest = None;
        for schema in loaded {
            let schema = Arc::new(schema?);
            if schema.name() == latest_name {
                latest = Some(schema.clone());
            }
            all.insert(schema.name().to_string(), schema);
        }
        self.stats.record_schemas_loaded(all.len() as u64);
        let latest = latest.ok_or_else(|| StorageError::SchemaNotFound(latest_name.to_string()))?;
        tracing::debug!(
            "Resolved {} schema versions for {}, latest {}",
            all.len(),
            dir.uri(),
            latest.name()
        );
        Ok(ResolvedSchemas { latest, all })
    }

    /// Committed, visible fragments in `[start, end]`, metadata loaded.
    pub(crate) fn load_fragments(
        &self,
        dir: &ArrayDirectory<'_>,
        key: &EncryptionKey,
        start: u64,
        end: u64,
        schemas: &mut HashMap<String, Arc<ArraySchema>>,
    ) -> Result<Vec<Arc<FragmentMetadata>>> {
        let sorted = get_sorted_uris(&dir.list_committed_fragments()?, start, end)?;
        let vacs = dir.list_fragment_vac_uris()?;
        let visible = filter_consolidated(self.vfs(), &self.io_tp, sorted, &vacs, start, end)?;
        let consolidated = self.load_latest_consolidated(dir, key)?;
        self.load_fragment_metadata(dir, key, &visible, consolidated.as_ref(), schemas)
    }

    fn load_latest_consolidated(
        &self,
        dir: &ArrayDirectory<'_>,
        key: &EncryptionKey,
    ) -> Result<Option<ConsolidatedFragmentMetadata>> {
        dir.latest_consolidated_fragment_meta()?
            .map(|uri| ConsolidatedFragmentMetadata::load(self.vfs(), &uri, key))
            .transpose()
    }

    /// Load metadata for `fragments`, preferring blocks in `consolidated`.
    /// Schemas referenced but missing from `schemas` are loaded once each.
    pub(crate) fn load_fragment_metadata(
        &self,
        dir: &ArrayDirectory<'_>,
        key: &EncryptionKey,
        fragments: &[TimestampedUri],
        consolidated: Option<&ConsolidatedFragmentMetadata>,
        schemas: &mut HashMap<String, Arc<ArraySchema>>,
    ) -> Result<Vec<Arc<FragmentMetadata>>> {
        let vfs = self.vfs();
        let token = &self.cancellation;
        let records: Vec<Result<(FragmentMetadataRecord, bool)>> = self.io_tp.install(|| {
            fragments
                .par_iter()
                .map(|f| {
                    token.check()?;
                    match consolidated.and_then(|c| c.block(&f.name)) {
                        Some(block) => Ok((FragmentMetadataRecord::decode(block, f.uri.as_str())?, true)),
                        None => Ok((FragmentMetadataRecord::load(vfs, &f.uri, key)?, false)),
                    }
                })
                .collect()
        });
        let records = records.into_iter().collect::<Result<Vec<_>>>()?;

        let from_consolidated = records.iter().filter(|(_, c)| *c).count() as u64;
        self.stats
            .record_fragment_metadata(records.len() as u64 - from_consolidated, from_consolidated);

        let mut missing: Vec<&str> = records
            .iter()
            .map(|(r, _)| r.array_schema_name.as_str())
            .filter(|name| !schemas.contains_key(*name))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        for name in missing {
            let schema_uri = if name == LEGACY_SCHEMA_FILENAME {
                dir.legacy_schema_uri()
            } else {
                dir.schema_dir().join_path(name)
            };
            let schema = load_schema(vfs, &TimestampedUri::parse(schema_uri)?, key)?;
            self.stats.record_schemas_loaded(1);
            schemas.insert(name.to_string(), Arc::new(schema));
        }

        fragments
            .iter()
            .zip(records)
            .map(|(f, (record, _))| {
                let schema = schemas
                    .get(&record.array_schema_name)
                    .cloned()
                    .ok_or_else(|| StorageError::SchemaNotFound(record.array_schema_name.clone()))?;
                FragmentMetadata::from_record(f, record, schema).map(Arc::new)
            })
            .collect()
    }
}

fn load_schema(vfs: &dyn Vfs, schema: &TimestampedUri, key: &EncryptionKey) -> Result<ArraySchema> {
    let payload = tile::read_tile(vfs, &schema.uri, key).map_err(|e| match e {
        StorageError::ObjectNotFound(_) => StorageError::SchemaNotFound(schema.uri.to_string()),
        other => other,
    })?;
    ArraySchema::deserialize(&payload, &schema.name, schema.uri.clone())
}
