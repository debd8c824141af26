use thiserror::Error;

/// Errors surfaced by the stock service's library operations.
///
/// The event handler itself never leaks these to the transport for domain
/// failures; they become typed outcome events instead.
#[derive(Debug, Error)]
pub enum StockServiceError {
    #[error("store error: {0}")]
    Store(#[from] kv_store::StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] common::CodecError),

    #[error("bus error: {0}")]
    Bus(#[from] bus::BusError),

    #[error("item not found: {0}")]
    ItemNotFound(String),
}

/// Result type for stock service operations.
pub type Result<T> = std::result::Result<T, StockServiceError>;
