use leanflow_storage::StorageError;

/// Errors surfaced by the synthesis core to its callers.
///
/// `Validation` and `NotFound` are raised before anything is written.
/// `Conflict` means another writer got there first and the caller must refetch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SynthesisError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The generation capability failed or returned output that does not
    /// match its schema.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Storage(StorageError),
}

impl SynthesisError {
    /// Taxonomy name used in HTTP and CLI error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SynthesisError::Validation(_) => "validation",
            SynthesisError::NotFound(_) => "not_found",
            SynthesisError::Conflict(_) => "conflict",
            SynthesisError::Upstream(_) => "upstream",
            SynthesisError::RateLimited { .. } => "rate_limited",
            SynthesisError::Storage(_) => "storage",
        }
    }
}

impl From<StorageError> for SynthesisError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SessionNotFound { .. }
            | StorageError::FutureStateNotFound { .. }
            | StorageError::NodeNotFound { .. }
            | StorageError::EdgeNotFound { .. }
            | StorageError::ItemNotFound { .. } => SynthesisError::NotFound(err.to_string()),
            StorageError::RevisionConflict { .. }
            | StorageError::DuplicateEdge { .. }
            | StorageError::DuplicateVersion { .. } => SynthesisError::Conflict(err.to_string()),
            StorageError::SelfLoop { .. } => SynthesisError::Validation(err.to_string()),
            StorageError::AlreadyExists { .. } | StorageError::Backend(_) => {
                SynthesisError::Storage(err)
            }
        }
    }
}
