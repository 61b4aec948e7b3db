//! Registry of open array handles and per-URI exclusive locks.
//!
//! One mutex guards the whole registry and one condvar announces every
//! change to it. Waiters re-check their predicate after each wake-up.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::debug;

use crate::array::{ArrayId, QueryType};
use crate::error::{Result, StorageError};
use crate::storage_manager::in_progress::InProgressCounter;
use crate::uri::Uri;

#[derive(Debug)]
struct OpenEntry {
    uri: String,
    query_type: QueryType,
    queries: u64,
    resolving: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: ArrayId,
    open: HashMap<ArrayId, OpenEntry>,
    xlocked: HashSet<String>,
}

impl RegistryState {
    fn in_flight(&self, uri: &str) -> u64 {
        self.open
            .values()
            .filter(|e| e.uri == uri)
            .map(|e| e.queries)
            .sum()
    }

    /// Queries plus directory resolutions running on `uri`.
    fn busy(&self, uri: &str) -> u64 {
        self.open
            .values()
            .filter(|e| e.uri == uri)
            .map(|e| e.queries + e.resolving)
            .sum()
    }

    fn wait_unlocked(&self, id: ArrayId) -> Result<bool> {
        let entry = self
            .open
            .get(&id)
            .ok_or_else(|| StorageError::ArrayNotOpen(format!("handle {}", id)))?;
        Ok(!self.xlocked.contains(&entry.uri))
    }
}

#[derive(Debug, Default)]
pub struct OpenArrayRegistry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

impl OpenArrayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, RegistryState>) -> MutexGuard<'a, RegistryState> {
        self.changed.wait(guard).unwrap()
    }

    /// Add a handle for `uri`, waiting out any exclusive lock on it.
    pub fn register(&self, uri: &Uri, query_type: QueryType) -> ArrayId {
        let mut state = self.state.lock().unwrap();
        while state.xlocked.contains(uri.as_str()) {
            state = self.wait(state);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.open.insert(
            id,
            OpenEntry {
                uri: uri.as_str().to_string(),
                query_type,
                queries: 0,
                resolving: 0,
            },
        );
        debug!("Registered array {} for {} as handle {}", uri, query_type, id);
        id
    }

    /// Remove handle `id` once its in-flight queries have finished.
    pub fn unregister(&self, id: ArrayId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            let queries = state
                .open
                .get(&id)
                .map(|e| e.queries)
                .ok_or_else(|| StorageError::ArrayNotOpen(format!("handle {}", id)))?;
            if queries == 0 {
                break;
            }
            state = self.wait(state);
        }
        state.open.remove(&id);
        self.changed.notify_all();
        Ok(())
    }

    /// Count a query against `id`, waiting while its URI is exclusively
    /// locked.
    pub fn begin_query(&self, id: ArrayId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while !state.wait_unlocked(id)? {
            state = self.wait(state);
        }
        if let Some(entry) = state.open.get_mut(&id) {
            entry.queries += 1;
        }
        Ok(())
    }

    /// Mark `id` as reading the array directory, waiting while its URI is
    /// exclusively locked.
    pub fn begin_resolve(&self, id: ArrayId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while !state.wait_unlocked(id)? {
            state = self.wait(state);
        }
        if let Some(entry) = state.open.get_mut(&id) {
            entry.resolving += 1;
        }
        Ok(())
    }

    pub fn end_resolve(&self, id: ArrayId) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.open.get_mut(&id) {
            entry.resolving = entry.resolving.saturating_sub(1);
        }
        self.changed.notify_all();
    }

    pub fn end_query(&self, id: ArrayId) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.open.get_mut(&id) {
            entry.queries = entry.queries.saturating_sub(1);
        }
        self.changed.notify_all();
    }

    /// Take the exclusive lock on `uri`: new opens, resolutions and queries
    /// block, then this waits for those already running on the URI to drain.
    pub fn xlock(self: &Arc<Self>, uri: &Uri) -> ExclusiveLock {
        let key = uri.as_str().to_string();
        let mut state = self.state.lock().unwrap();
        while state.xlocked.contains(&key) {
            state = self.wait(state);
        }
        state.xlocked.insert(key.clone());
        while state.busy(&key) > 0 {
            state = self.wait(state);
        }
        debug!("Exclusive lock taken on {}", uri);
        ExclusiveLock {
            registry: Arc::clone(self),
            uri: key,
        }
    }

    fn xunlock(&self, uri: &str) {
        let mut state = self.state.lock().unwrap();
        state.xlocked.remove(uri);
        self.changed.notify_all();
        debug!("Exclusive lock released on {}", uri);
    }

    pub fn is_open(&self, id: ArrayId) -> bool {
        self.state.lock().unwrap().open.contains_key(&id)
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    pub fn query_type(&self, id: ArrayId) -> Option<QueryType> {
        self.state.lock().unwrap().open.get(&id).map(|e| e.query_type)
    }

    /// Queries in flight across every handle on `uri`.
    pub fn queries_in_flight(&self, uri: &Uri) -> u64 {
        self.state.lock().unwrap().in_flight(uri.as_str())
    }

    pub fn is_xlocked(&self, uri: &Uri) -> bool {
        self.state.lock().unwrap().xlocked.contains(uri.as_str())
    }

    pub fn resolutions_in_flight(&self, uri: &Uri) -> u64 {
        let state = self.state.lock().unwrap();
        state.busy(uri.as_str()) - state.in_flight(uri.as_str())
    }
}

/// Held for the duration of consolidation or vacuum.
#[must_use]
#[derive(Debug)]
pub struct ExclusiveLock {
    registry: Arc<OpenArrayRegistry>,
    uri: String,
}

impl ExclusiveLock {
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        self.registry.xunlock(&self.uri);
    }
}

/// Counts one query against both its handle and the session. Both counts
/// drop when the guard does, on success, error or unwind.
#[must_use]
pub struct QueryInProgress {
    registry: Arc<OpenArrayRegistry>,
    counter: Arc<InProgressCounter>,
    id: ArrayId,
}

impl QueryInProgress {
    pub fn enter(
        registry: Arc<OpenArrayRegistry>,
        counter: Arc<InProgressCounter>,
        id: ArrayId,
    ) -> Result<Self> {
        registry.begin_query(id)?;
        counter.increment();
        Ok(Self {
            registry,
            counter,
            id,
        })
    }
}

impl Drop for QueryInProgress {
    fn drop(&mut self) {
        self.registry.end_query(self.id);
        self.counter.decrement();
    }
}

/// Held while a handle lists and reads the array directory, so an
/// exclusive lock never interleaves with a resolution.
#[must_use]
pub struct ResolutionInProgress {
    registry: Arc<OpenArrayRegistry>,
    id: ArrayId,
}

impl ResolutionInProgress {
    pub fn enter(registry: Arc<OpenArrayRegistry>, id: ArrayId) -> Result<Self> {
        registry.begin_resolve(id)?;
        Ok(Self { registry, id })
    }
}

impl Drop for ResolutionInProgress {
    fn drop(&mut self) {
        self.registry.end_resolve(self.id);
    }
}
