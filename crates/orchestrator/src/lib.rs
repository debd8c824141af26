//! Orchestrator service: the saga engine and the checkout saga.
//!
//! A saga is an ordered list of step specifications, each pairing a forward
//! command with a compensation and naming the success and error event types
//! it expects back. The engine is strictly outcome-driven: a step boundary
//! is crossed only when the success event for the current step is consumed
//! off the bus, never when the command's publication completes. On any
//! error outcome the engine emits compensations for the completed steps in
//! reverse order, best-effort, then a terminal abort event.
//!
//! Saga instances live in memory only. An orchestrator crash abandons them;
//! the caller sees a timeout and may retry, relying on participant
//! idempotency to absorb duplicates.

pub mod checkout;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod state;

pub use checkout::CheckoutContext;
pub use consumer::Orchestrator;
pub use engine::{SagaManager, SagaStep, TerminalAction};
pub use error::{Result, SagaError};
pub use state::SagaState;
