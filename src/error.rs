//! Error types for the storage core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Coarse classification used by callers to decide whether a failure is
/// worth retrying, reporting, or treating as a usage bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Array, schema, fragment or object is absent.
    NotFound,
    /// Persisted bytes could not be decoded.
    MalformedData,
    /// Request is not valid for the datatype, state or configuration.
    Unsupported,
    /// Work was cancelled or a worker failed.
    Interrupted,
    /// Underlying storage failure.
    Io,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Array not found: {0}")]
    ArrayNotFound(String),

    #[error("Array schema not found: {0}")]
    SchemaNotFound(String),

    #[error("Fragment not found: {0}")]
    FragmentNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Checksum mismatch in {0}")]
    ChecksumMismatch(String),

    #[error("Invalid datatype {0} for sorting.")]
    NotSortable(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Range out of bounds: {0}")]
    RangeOutOfBounds(String),

    #[error("Multiple ranges not allowed on dimension '{0}'")]
    MultipleRangesNotAllowed(String),

    #[error("Invalid datatype: {0}")]
    InvalidDatatype(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Schema evolution error: {0}")]
    SchemaEvolution(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Array '{0}' already exists")]
    ArrayExists(String),

    #[error("Array is already open: {0}")]
    ArrayAlreadyOpen(String),

    #[error("Array is not open: {0}")]
    ArrayNotOpen(String),

    #[error("Array '{uri}' must be opened for {expected}")]
    WrongQueryType { uri: String, expected: &'static str },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// Stable error code for callers that surface errors across a boundary.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::ArrayNotFound(_) => "ARRAY_NOT_FOUND",
            StorageError::SchemaNotFound(_) => "SCHEMA_NOT_FOUND",
            StorageError::FragmentNotFound(_) => "FRAGMENT_NOT_FOUND",
            StorageError::ObjectNotFound(_) => "OBJECT_NOT_FOUND",
            StorageError::InvalidFormat(_) => "INVALID_FORMAT",
            StorageError::InvalidUri(_) => "INVALID_URI",
            StorageError::ChecksumMismatch(_) => "CHECKSUM_MISMATCH",
            StorageError::NotSortable(_) => "NOT_SORTABLE",
            StorageError::InvalidRange(_) => "INVALID_RANGE",
            StorageError::RangeOutOfBounds(_) => "RANGE_OUT_OF_BOUNDS",
            StorageError::MultipleRangesNotAllowed(_) => "MULTIPLE_RANGES_NOT_ALLOWED",
            StorageError::InvalidDatatype(_) => "INVALID_DATATYPE",
            StorageError::Encryption(_) => "ENCRYPTION_MISMATCH",
            StorageError::SchemaEvolution(_) => "SCHEMA_EVOLUTION",
            StorageError::Metadata(_) => "INVALID_METADATA",
            StorageError::ArrayExists(_) => "ARRAY_EXISTS",
            StorageError::ArrayAlreadyOpen(_) => "ARRAY_ALREADY_OPEN",
            StorageError::ArrayNotOpen(_) => "ARRAY_NOT_OPEN",
            StorageError::WrongQueryType { .. } => "WRONG_QUERY_TYPE",
            StorageError::Cancelled => "CANCELLED",
            StorageError::TaskFailed(_) => "TASK_FAILED",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::ArrayNotFound(_)
            | StorageError::SchemaNotFound(_)
            | StorageError::FragmentNotFound(_)
            | StorageError::ObjectNotFound(_) => ErrorKind::NotFound,
            StorageError::InvalidFormat(_)
            | StorageError::InvalidUri(_)
            | StorageError::ChecksumMismatch(_)
            | StorageError::Serialization(_)
            | StorageError::Json(_) => ErrorKind::MalformedData,
            StorageError::Cancelled
            | StorageError::TaskFailed(_)
            | StorageError::ThreadPool(_) => ErrorKind::Interrupted,
            StorageError::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Unsupported,
        }
    }
}
