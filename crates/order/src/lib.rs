//! Order service.
//!
//! Owns the order records and bridges synchronous callers to the
//! asynchronous saga machinery: a request publishes a command carrying a
//! fresh correlation id, then blocks on the per-correlation response
//! stream until the response consumer (which may run in any replica)
//! lands the outcome there. The consumer applies the derived order
//! mutation atomically with the idempotency record and the stream write,
//! so redelivery can never double-apply.

pub mod bridge;
pub mod consumer;
pub mod error;
pub mod model;
pub mod repository;

pub use bridge::{AddItemOutcome, BridgeConfig, CheckoutOutcome, RequestBridge};
pub use consumer::ResponseConsumer;
pub use error::{OrderServiceError, Result};
pub use model::OrderValue;
pub use repository::OrderRepository;

/// Response stream key for one transaction.
pub(crate) fn response_stream_key(correlation_id: common::CorrelationId) -> String {
    format!("order_response:{correlation_id}")
}
