use thiserror::Error;

/// Errors surfaced by the order service.
#[derive(Debug, Error)]
pub enum OrderServiceError {
    #[error("store error: {0}")]
    Store(#[from] kv_store::StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] common::CodecError),

    #[error("bus error: {0}")]
    Bus(#[from] bus::BusError),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// The consumer could not commit an order mutation within its conflict
    /// budget; the event will be redelivered.
    #[error("conflict budget exhausted for order {0}")]
    ConflictBudgetExhausted(String),
}

/// Result type for order service operations.
pub type Result<T> = std::result::Result<T, OrderServiceError>;
