use quire_core::{DocumentId, RecordError, StorageError};
use thiserror::Error;

/// Collaboration session errors.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Connection or engine failure; the session must be requested again
    #[error("Transport error: {0}")]
    Transport(String),

    /// The document handle was torn down by its session manager
    #[error("Document for room {0} has been destroyed")]
    Destroyed(DocumentId),

    /// The session reached its terminal error state
    #[error("Session for room {room} failed: {reason}")]
    Failed { room: DocumentId, reason: String },

    /// The session was superseded or closed before it synced
    #[error("Session for room {0} was closed")]
    Closed(DocumentId),

    /// Update or state vector could not be decoded/applied
    #[error("CRDT error: {0}")]
    Crdt(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Mirroring region text into the record failed
    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
