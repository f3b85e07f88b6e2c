use lg_core::{IngestError, LifecycleError};

/// Store operation errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Whether the same call may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Lifecycle(_) | StoreError::Corrupt { .. } => false,
            StoreError::Unavailable(_) => true,
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
        }
    }

    /// Convert into a pipeline error. Lifecycle violations stay business failures,
    /// everything else becomes an infrastructure failure of `operation`.
    pub fn into_ingest(self, operation: &str) -> IngestError {
        match self {
            StoreError::Lifecycle(err) => IngestError::Lifecycle(err),
            other => IngestError::infrastructure(operation, other),
        }
    }
}
