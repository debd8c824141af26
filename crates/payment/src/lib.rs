//! Payment participant service.
//!
//! Consumes `Pay` / `Refund` commands and publishes correlated outcomes.
//! Same discipline as the stock participant: recorded outcomes replay on
//! redelivery, credit mutations commit atomically with their idempotency
//! record under optimistic concurrency, and transient store failures retry
//! on a bounded budget before converging to a recorded `"DB error"`
//! outcome.

pub mod error;
pub mod model;
pub mod service;

pub use error::{PaymentServiceError, Result};
pub use model::User;
pub use service::PaymentService;
