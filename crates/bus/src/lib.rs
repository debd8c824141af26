//! Event transport for the checkout services.
//!
//! The contract the services rely on, independent of broker identity:
//! messages with the same key are delivered in publish order, delivery is
//! at-least-once, and a message is acknowledged only after its handler
//! returns success. Publishers key every event of a saga by its
//! correlation id, which is what serialises success/error/compensation
//! events per transaction.

pub mod error;
pub mod memory;
pub mod rebalance;
pub mod transport;

pub use error::{BusError, HandlerError, Result};
pub use memory::{InMemoryEventBus, Subscription};
pub use rebalance::RebalanceBarrier;
pub use transport::{EventBus, EventHandler};
