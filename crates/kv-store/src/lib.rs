//! Key-value store abstraction for the checkout services.
//!
//! The participants' whole concurrency story rests on four capabilities:
//! plain GET/SET with TTL, bulk MSET, an optimistic WATCH/MULTI/EXEC
//! transaction, and append-to-stream with a blocking timed read. The trait
//! here captures exactly those; [`InMemoryKvStore`] implements them for
//! tests and single-process composition.

pub mod error;
pub mod memory;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryKvStore;
pub use store::{ExecOutcome, KeyValueStore, WatchToken, WriteOp};
