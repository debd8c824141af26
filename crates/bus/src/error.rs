use thiserror::Error;

/// Opaque failure returned by an event handler. A failing handler is not
/// acknowledged; the message is redelivered.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the transport itself.
#[derive(Debug, Error)]
pub enum BusError {
    /// The event could not be (de)serialized for the wire.
    #[error("wire codec error: {0}")]
    Codec(#[from] common::CodecError),

    /// The bus is shut down; no consumer will ever see this message.
    #[error("bus closed")]
    Closed,
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, BusError>;
