use thiserror::Error;

/// Errors surfaced by a key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient failure: connectivity, failover, timeout. Callers retry
    /// these with a bounded backoff; exhaustion becomes a domain-level
    /// error outcome.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A watch token was replayed against a different store instance.
    #[error("watch token does not belong to this store")]
    ForeignToken,
}

impl StoreError {
    /// True for the retryable class of failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
