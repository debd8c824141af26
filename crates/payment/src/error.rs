use thiserror::Error;

/// Errors surfaced by the payment service's library operations.
#[derive(Debug, Error)]
pub enum PaymentServiceError {
    #[error("store error: {0}")]
    Store(#[from] kv_store::StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] common::CodecError),

    #[error("bus error: {0}")]
    Bus(#[from] bus::BusError),

    #[error("user not found: {0}")]
    UserNotFound(String),
}

/// Result type for payment service operations.
pub type Result<T> = std::result::Result<T, PaymentServiceError>;
