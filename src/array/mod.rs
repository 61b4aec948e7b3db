//! Open array handles.
//!
//! An [`Array`] is created closed. The storage manager drives it through
//! `ResolvingSchemas -> ResolvingFragments -> Open` and installs the
//! resolved schemas and fragment metadata in one step, so a handle is
//! either fully open or closed with nothing resolved.

pub mod directory;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::datatype::Datatype;
use crate::encryption::EncryptionKey;
use crate::error::{Result, StorageError};
use crate::fragment::metadata::union_domains;
use crate::fragment::FragmentMetadata;
use crate::metadata::Metadata;
use crate::range::{FixedElement, Range};
use crate::schema::ArraySchema;
use crate::uri::Uri;

pub use directory::ArrayDirectory;

/// Registry identity of an open handle.
pub type ArrayId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Read,
    Write,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Read => "reads",
            QueryType::Write => "writes",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayState {
    Closed,
    ResolvingSchemas,
    ResolvingFragments,
    Open,
}

/// Everything an open resolves, installed atomically.
pub(crate) struct Resolved {
    pub latest: Arc<ArraySchema>,
    pub all: HashMap<String, Arc<ArraySchema>>,
    pub fragments: Vec<Arc<FragmentMetadata>>,
}

#[derive(Debug)]
pub struct Array {
    uri: Uri,
    id: Option<ArrayId>,
    state: ArrayState,
    query_type: Option<QueryType>,
    timestamp_start: u64,
    timestamp_end: u64,
    timestamp_end_opened_at: u64,
    encryption_key: EncryptionKey,
    array_schema_latest: Option<Arc<ArraySchema>>,
    array_schemas_all: HashMap<String, Arc<ArraySchema>>,
    fragment_metadata: Vec<Arc<FragmentMetadata>>,
    metadata: Metadata,
    metadata_loaded: bool,
    metadata_modified: bool,
}

impl Array {
    pub fn new(uri: impl Into<Uri>) -> Self {
        Self {
            uri: uri.into(),
            id: None,
            state: ArrayState::Closed,
            query_type: None,
            timestamp_start: 0,
            timestamp_end: u64::MAX,
            timestamp_end_opened_at: u64::MAX,
            encryption_key: EncryptionKey::none(),
            array_schema_latest: None,
            array_schemas_all: HashMap::new(),
            fragment_metadata: Vec::new(),
            metadata: Metadata::new(),
            metadata_loaded: false,
            metadata_modified: false,
        }
    }

    pub fn with_encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = key;
        self
    }

    /// Takes effect at the next open or reopen.
    pub fn set_timestamp_start(&mut self, timestamp: u64) {
        self.timestamp_start = timestamp;
    }

    /// Takes effect at the next open or reopen. `u64::MAX` means "now".
    pub fn set_timestamp_end(&mut self, timestamp: u64) {
        self.timestamp_end = timestamp;
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn id(&self) -> Option<ArrayId> {
        self.id
    }

    pub fn state(&self) -> ArrayState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ArrayState::Open
    }

    pub fn query_type(&self) -> Option<QueryType> {
        self.query_type
    }

    pub fn timestamp_start(&self) -> u64 {
        self.timestamp_start
    }

    pub fn timestamp_end(&self) -> u64 {
        self.timestamp_end
    }

    /// Effective end of the window resolved at the last open.
    pub fn timestamp_end_opened_at(&self) -> u64 {
        self.timestamp_end_opened_at
    }

    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption_key
    }

    pub fn array_schema_latest(&self) -> Result<&Arc<ArraySchema>> {
        self.array_schema_latest
            .as_ref()
            .ok_or_else(|| StorageError::ArrayNotOpen(self.uri.to_string()))
    }

    pub fn array_schemas_all(&self) -> &HashMap<String, Arc<ArraySchema>> {
        &self.array_schemas_all
    }

    /// Resolved fragments ordered by `(t1, uuid)`.
    pub fn fragment_metadata(&self) -> &[Arc<FragmentMetadata>] {
        &self.fragment_metadata
    }

    pub fn fragment_num(&self) -> usize {
        self.fragment_metadata.len()
    }

    /// Union of the fragments' non-empty domains, `None` without fragments.
    pub fn non_empty_domain(&self) -> Result<Option<Vec<Range>>> {
        let schema = self.array_schema_latest()?;
        if self.fragment_metadata.is_empty() {
            return Ok(None);
        }
        let domains: Vec<&[Range]> = self
            .fragment_metadata
            .iter()
            .map(|f| f.non_empty_domain())
            .collect();
        union_domains(schema, &domains).map(Some)
    }

    pub fn put_metadata(&mut self, key: &str, datatype: Datatype, value_num: u32, value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.metadata.put(key, datatype, value_num, value)?;
        self.metadata_modified = true;
        Ok(())
    }

    pub fn put_metadata_values<T: FixedElement>(&mut self, key: &str, datatype: Datatype, values: &[T]) -> Result<()> {
        self.ensure_writable()?;
        self.metadata.put_values(key, datatype, values)?;
        self.metadata_modified = true;
        Ok(())
    }

    pub fn delete_metadata(&mut self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        self.metadata.delete(key);
        self.metadata_modified = true;
        Ok(())
    }

    /// Cheap owned view of the resolved state for work off the caller's
    /// thread.
    pub fn snapshot(&self) -> Result<ArraySnapshot> {
        Ok(ArraySnapshot {
            uri: self.uri.clone(),
            query_type: self.query_type,
            timestamp_range: (self.timestamp_start, self.timestamp_end_opened_at),
            array_schema_latest: self.array_schema_latest()?.clone(),
            array_schemas_all: self.array_schemas_all.clone(),
            fragment_metadata: self.fragment_metadata.clone(),
        })
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.query_type != Some(QueryType::Write) || !self.is_open() {
            return Err(StorageError::WrongQueryType {
                uri: self.uri.to_string(),
                expected: QueryType::Write.as_str(),
            });
        }
        Ok(())
    }

    // ── Storage manager hooks ──────────────────────────────────────────

    pub(crate) fn begin_open(&mut self, id: ArrayId, query_type: QueryType, opened_at: u64) {
        self.id = Some(id);
        self.query_type = Some(query_type);
        self.timestamp_end_opened_at = opened_at;
        self.state = ArrayState::ResolvingSchemas;
    }

    pub(crate) fn set_state(&mut self, state: ArrayState) {
        self.state = state;
    }

    pub(crate) fn set_timestamp_end_opened_at(&mut self, timestamp: u64) {
        self.timestamp_end_opened_at = timestamp;
    }

    pub(crate) fn install(&mut self, resolved: Resolved) {
        self.array_schema_latest = Some(resolved.latest);
        self.array_schemas_all = resolved.all;
        self.fragment_metadata = resolved.fragments;
        self.metadata.clear();
        self.metadata_loaded = false;
        self.metadata_modified = false;
        self.state = ArrayState::Open;
    }

    /// Merge `fragments` into the resolved set, keeping `(t1, uuid)` order.
    pub(crate) fn attach_fragments(
        &mut self,
        fragments: Vec<Arc<FragmentMetadata>>,
        schemas: HashMap<String, Arc<ArraySchema>>,
    ) {
        self.array_schemas_all.extend(schemas);
        self.fragment_metadata.extend(fragments);
        self.fragment_metadata.sort_by(|a, b| {
            (a.timestamp_range().0, a.uuid(), a.timestamp_range().1)
                .cmp(&(b.timestamp_range().0, b.uuid(), b.timestamp_range().1))
        });
    }

    pub(crate) fn reset(&mut self) {
        self.id = None;
        self.state = ArrayState::Closed;
        self.query_type = None;
        self.timestamp_end_opened_at = self.timestamp_end;
        self.array_schema_latest = None;
        self.array_schemas_all.clear();
        self.fragment_metadata.clear();
        self.metadata.clear();
        self.metadata_loaded = false;
        self.metadata_modified = false;
    }

    pub(crate) fn metadata_state(&self) -> (&Metadata, bool, bool) {
        (&self.metadata, self.metadata_loaded, self.metadata_modified)
    }

    pub(crate) fn set_loaded_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
        self.metadata_loaded = true;
    }

    pub(crate) fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Owned, thread-safe copy of an open handle's resolved state.
#[derive(Debug, Clone)]
pub struct ArraySnapshot {
    uri: Uri,
    query_type: Option<QueryType>,
    timestamp_range: (u64, u64),
    array_schema_latest: Arc<ArraySchema>,
    array_schemas_all: HashMap<String, Arc<ArraySchema>>,
    fragment_metadata: Vec<Arc<FragmentMetadata>>,
}

impl ArraySnapshot {
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn query_type(&self) -> Option<QueryType> {
        self.query_type
    }

    pub fn timestamp_range(&self) -> (u64, u64) {
        self.timestamp_range
    }

    pub fn array_schema_latest(&self) -> &Arc<ArraySchema> {
        &self.array_schema_latest
    }

    pub fn array_schema(&self, name: &str) -> Option<&Arc<ArraySchema>> {
        self.array_schemas_all.get(name)
    }

    pub fn fragment_metadata(&self) -> &[Arc<FragmentMetadata>] {
        &self.fragment_metadata
    }

    pub fn cell_num(&self) -> u64 {
        self.fragment_metadata.iter().map(|f| f.cell_num()).sum()
    }
}
