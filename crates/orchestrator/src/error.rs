use common::CorrelationId;
use thiserror::Error;

/// Errors that can occur while driving a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A command or terminal event could not be published.
    #[error("bus error: {0}")]
    Bus(#[from] bus::BusError),

    /// `start` was called for a correlation id that was never built.
    #[error("no saga registered for correlation id {0}")]
    UnknownSaga(CorrelationId),

    /// `build` was called twice for the same correlation id.
    #[error("saga already registered for correlation id {0}")]
    AlreadyRegistered(CorrelationId),
}

/// Result type for saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;
