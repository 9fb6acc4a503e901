//! Error taxonomy for record operations and storage backends.

use thiserror::Error;

use crate::identity::DocumentId;

/// Storage backend failures.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Backend internal error
    #[error("Database error: {0}")]
    Database(String),
    /// Stored value could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Stored value could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    /// Partition name not known to the backend
    #[error("Unknown partition: {0}")]
    UnknownPartition(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Outcome of a failed record operation.
///
/// Only `Transport` is worth retrying; the rest describe a caller mistake or a
/// state the caller has to resolve first.
#[derive(Debug, Clone, Error)]
pub enum RecordError {
    /// Bad slug format, or a patch that tries to touch id/slug
    #[error("Validation error: {0}")]
    Validation(String),

    /// Slug already held by another record (archived or not)
    #[error("Slug already in use: {0}")]
    Conflict(String),

    /// Unknown id or slug
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Hard delete attempted on a record that is not archived
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Storage failure, propagated untouched
    #[error("Transport error: {0}")]
    Transport(#[from] StorageError),
}

impl RecordError {
    pub(crate) fn id_not_found(id: &DocumentId) -> Self {
        RecordError::NotFound(format!("id {id}"))
    }

    pub(crate) fn slug_not_found(slug: &str) -> Self {
        RecordError::NotFound(format!("slug {slug:?}"))
    }
}

pub type Result<T> = std::result::Result<T, RecordError>;
