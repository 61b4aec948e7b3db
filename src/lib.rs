//! arraystore: storage and versioning core for a multi-dimensional array
//! engine.
//!
//! Two parts:
//! - a typed range algebra ([`range`], [`subarray`]) that builds, coalesces
//!   and sorts per-dimension selections;
//! - the array lifecycle ([`storage_manager`], [`array`]): time-travel
//!   resolution of schemas and fragments, consolidation, vacuum and query
//!   accounting with cancellation.

pub mod array;
pub mod config;
pub mod datatype;
pub mod encryption;
pub mod error;
pub mod fragment;
pub mod metadata;
pub mod names;
pub mod range;
pub mod resolution;
pub mod resource;
pub mod schema;
pub mod stats;
pub mod storage_manager;
pub mod subarray;
pub mod tile;
pub mod uri;
pub mod vfs;

pub use array::{Array, ArrayId, ArraySnapshot, ArrayState, QueryType};
pub use config::{ConsolidationConfig, ConsolidationMode, StorageConfig, VacuumConfig, VacuumMode};
pub use datatype::{Datatype, ElementKind};
pub use encryption::{EncryptionKey, EncryptionType};
pub use error::{ErrorKind, Result, StorageError};
pub use fragment::{ConsolidatedFragmentMetadata, FragmentMetadata};
pub use metadata::{Metadata, MetadataValue};
pub use names::TimestampedUri;
pub use range::{
    create_default_range_manager, create_range_manager, create_range_subset, Range, RangeData,
    RangeSubset,
};
pub use resolution::{get_sorted_uris, get_uris_to_vacuum, UrisToVacuum};
pub use schema::{ArraySchema, ArraySchemaEvolution, ArrayType, Attribute, Dimension};
pub use stats::{Stats, StatsSnapshot};
pub use storage_manager::{
    CancellationToken, ConsolidationResult, QueryInProgress, ResolutionInProgress, StorageManager,
    TaskHandle, VacuumResult,
};
pub use subarray::Subarray;
pub use uri::Uri;
pub use vfs::{LocalVfs, MemVfs, Vfs};
