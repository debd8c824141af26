//! Shared building blocks for the checkout saga services.
//!
//! Every service speaks the same wire language: JSON events on the bus
//! (tagged by `type` and carrying a `correlation_id`) and MsgPack blobs in
//! the key-value stores. This crate owns that language plus the topic names
//! and the bounded retry policy used against the stores.

pub mod codec;
pub mod event;
pub mod ids;
pub mod retry;
pub mod topics;

pub use codec::CodecError;
pub use event::{Event, ItemLine};
pub use ids::CorrelationId;
pub use retry::RetryPolicy;
