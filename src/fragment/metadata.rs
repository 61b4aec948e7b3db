//! Per-fragment metadata: timestamps, schema reference, non-empty domain
//! and cell count. Stored as `<fragment>/__fragment_metadata.tdb`.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionKey;
use crate::error::{Result, StorageError};
use crate::names::TimestampedUri;
use crate::range::value::compare_values;
use crate::range::Range;
use crate::schema::ArraySchema;
use crate::tile;
use crate::uri::Uri;
use crate::vfs::Vfs;

pub const FRAGMENT_METADATA_FILENAME: &str = "__fragment_metadata.tdb";

/// Persisted part of a fragment's metadata, before its schema is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FragmentMetadataRecord {
    pub format_version: u32,
    pub timestamp_range: (u64, u64),
    pub array_schema_name: String,
    pub non_empty_domain: Vec<Range>,
    pub cell_num: u64,
}

impl FragmentMetadataRecord {
    pub fn decode(block: &[u8], what: &str) -> Result<Self> {
        let record: Self = bincode::deserialize(block).map_err(|e| {
            StorageError::InvalidFormat(format!("fragment metadata {}: {}", what, e))
        })?;
        if record.timestamp_range.0 > record.timestamp_range.1 {
            return Err(StorageError::InvalidFormat(format!(
                "fragment metadata {} has reversed timestamps",
                what
            )));
        }
        Ok(record)
    }

    pub fn load(vfs: &dyn Vfs, fragment_uri: &Uri, key: &EncryptionKey) -> Result<Self> {
        let uri = fragment_uri.join_path(FRAGMENT_METADATA_FILENAME);
        let payload = tile::read_tile(vfs, &uri, key).map_err(|e| match e {
            StorageError::ObjectNotFound(_) => {
                StorageError::FragmentNotFound(fragment_uri.to_string())
            }
            other => other,
        })?;
        Self::decode(&payload, fragment_uri.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FragmentMetadata {
    fragment_uri: Uri,
    name: String,
    uuid: String,
    record: FragmentMetadataRecord,
    array_schema: Arc<ArraySchema>,
}

impl FragmentMetadata {
    pub fn new(
        fragment: &TimestampedUri,
        array_schema: Arc<ArraySchema>,
        non_empty_domain: Vec<Range>,
        cell_num: u64,
    ) -> Result<Self> {
        let record = FragmentMetadataRecord {
            format_version: fragment.format_version.unwrap_or(crate::names::FORMAT_VERSION),
            timestamp_range: fragment.timestamp_range,
            array_schema_name: array_schema.name().to_string(),
            non_empty_domain,
            cell_num,
        };
        Self::from_record(fragment, record, array_schema)
    }

    /// Attach `array_schema` to a decoded record, checking they agree.
    pub(crate) fn from_record(
        fragment: &TimestampedUri,
        record: FragmentMetadataRecord,
        array_schema: Arc<ArraySchema>,
    ) -> Result<Self> {
        if record.timestamp_range != fragment.timestamp_range {
            return Err(StorageError::InvalidFormat(format!(
                "fragment {} records timestamps {:?}",
                fragment.uri, record.timestamp_range
            )));
        }
        if record.non_empty_domain.len() != array_schema.dim_num() {
            return Err(StorageError::InvalidFormat(format!(
                "fragment {} has {} domain ranges for {} dimensions",
                fragment.uri,
                record.non_empty_domain.len(),
                array_schema.dim_num()
            )));
        }
        for (range, dim) in record.non_empty_domain.iter().zip(array_schema.dimensions()) {
            range.check_kind(dim.datatype.element_kind())?;
        }
        Ok(Self {
            fragment_uri: fragment.uri.clone(),
            name: fragment.name.clone(),
            uuid: fragment.uuid.clone(),
            record,
            array_schema,
        })
    }

    /// Encoded block, as stored in both the fragment file and the
    /// consolidated metadata file.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.record)?)
    }

    pub fn store(&self, vfs: &dyn Vfs, key: &EncryptionKey) -> Result<()> {
        let uri = self.fragment_uri.join_path(FRAGMENT_METADATA_FILENAME);
        tile::write_tile(vfs, &uri, &self.serialize()?, key)
    }

    pub fn fragment_uri(&self) -> &Uri {
        &self.fragment_uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn timestamp_range(&self) -> (u64, u64) {
        self.record.timestamp_range
    }

    pub fn format_version(&self) -> u32 {
        self.record.format_version
    }

    pub fn array_schema_name(&self) -> &str {
        &self.record.array_schema_name
    }

    pub fn array_schema(&self) -> &Arc<ArraySchema> {
        &self.array_schema
    }

    pub fn non_empty_domain(&self) -> &[Range] {
        &self.record.non_empty_domain
    }

    pub fn cell_num(&self) -> u64 {
        self.record.cell_num
    }
}

/// Per-dimension union of non-empty domains.
pub(crate) fn union_domains(schema: &ArraySchema, domains: &[&[Range]]) -> Result<Vec<Range>> {
    let mut out: Vec<Range> = Vec::with_capacity(schema.dim_num());
    for (d, dim) in schema.dimensions().iter().enumerate() {
        let kind = dim.datatype.element_kind();
        let mut iter = domains.iter().map(|ned| &ned[d]);
        let Some(first) = iter.next() else {
            break;
        };
        let (mut lo, mut hi) = (first.start().to_vec(), first.end().to_vec());
        for r in iter {
            if compare_values(kind, r.start(), &lo) == Ordering::Less {
                lo = r.start().to_vec();
            }
            if compare_values(kind, r.end(), &hi) == Ordering::Greater {
                hi = r.end().to_vec();
            }
        }
        let merged = if dim.var_size() {
            Range::from_str_range(lo, hi)
        } else {
            let size = lo.len();
            lo.extend_from_slice(&hi);
            Range::from_bytes(&lo, size)?
        };
        out.push(merged);
    }
    Ok(out)
}
