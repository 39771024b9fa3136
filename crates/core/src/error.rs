use thiserror::Error;

/// Failures surfaced by the raw document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document '{id}' not found")]
    NotFound { id: String },

    /// The supplied revision is stale; the document moved underneath us.
    #[error("revision conflict on '{id}': expected {expected:?}, stored {stored:?}")]
    Conflict {
        id: String,
        expected: Option<u64>,
        stored: Option<u64>,
    },

    #[error("document store unavailable")]
    Unavailable,

    #[error("storage backend error")]
    Backend(#[from] rusqlite::Error),

    #[error("document body could not be encoded or decoded")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Failures surfaced by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The store never became reachable within the polling ceiling.
    /// Callers degrade to an empty working set rather than crash.
    #[error("document store unavailable after {attempts} attempts")]
    StoreUnavailable { attempts: u32 },

    /// A write conflicted and the automatic single retry conflicted too.
    #[error("revision conflict persisting '{id}' after retry")]
    RevisionConflict { id: String },

    /// The operation would risk data loss and was refused; in-memory
    /// state is left untouched.
    #[error("validation failed in {operation}: {reason}")]
    Validation {
        operation: &'static str,
        reason: String,
    },

    /// The in-memory mutation succeeded but persistence failed; the
    /// operation has already rolled back or restored its in-memory state.
    #[error("persistence failed in {operation} for '{id}'")]
    Persistence {
        operation: &'static str,
        id: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub(crate) fn from_store(operation: &'static str, id: &str, source: StoreError) -> Self {
        match source {
            StoreError::Conflict { .. } => EngineError::RevisionConflict { id: id.to_string() },
            other => EngineError::Persistence {
                operation,
                id: id.to_string(),
                source: other,
            },
        }
    }
}
