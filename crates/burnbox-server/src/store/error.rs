use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Rejected creation input (past expiry, empty or oversized payload).
    #[error("{0}")]
    Validation(String),

    /// No record with the requested id.
    #[error("shared secret not found")]
    NotFound,

    /// Row store failure. Never retried by the store.
    #[error("storage error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
