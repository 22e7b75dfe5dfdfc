//! Datastore error taxonomy.

use lattice_storage::StorageError;

/// Errors surfaced by datastore operations.
#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    /// A tuple referenced a namespace with no live definition.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// A tuple referenced a relation its namespace does not declare.
    #[error("relation not found: {relation} under namespace {namespace}")]
    RelationNotFound { namespace: String, relation: String },

    /// A required precondition tuple was not live, or a concurrent
    /// transaction won a write race on overlapping tuples. Retryable.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A CREATE targeted an identity that already has a live tuple.
    #[error("tuple already exists: {0}")]
    AlreadyExists(String),

    /// A named namespace or caveat does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored row failed to encode or decode.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DatastoreError {
    /// Whether the failure is an optimistic-concurrency collision, so that
    /// retrying the whole transaction from the top after re-reading state
    /// may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PreconditionFailed(_)
                | Self::AlreadyExists(_)
                | Self::Storage(StorageError::Conflict)
        )
    }

    pub(crate) fn serialization(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type DatastoreResult<T> = Result<T, DatastoreError>;
