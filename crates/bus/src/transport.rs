use std::sync::Arc;

use async_trait::async_trait;
use common::Event;

use crate::error::{HandlerError, Result};

/// Consumer-side callback. Returning `Err` withholds the acknowledgement;
/// the transport will redeliver the event.
///
/// Participants convert every failure into a typed outcome event instead of
/// erroring here, so the transport can always make progress. A handler
/// error therefore signals an infrastructure problem, not a business
/// rejection.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError>;
}

/// The transport operations the services use.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes `event` on `topic` with the given message key. Events of
    /// one saga must always use the correlation id as key.
    async fn publish(&self, topic: &str, key: &str, event: &Event) -> Result<()>;

    /// Subscribes `handler` to `topics` as consumer group `group_id`.
    /// Events are dispatched sequentially per subscription; a message is
    /// acknowledged only after the handler returns `Ok`.
    async fn subscribe(
        &self,
        topics: &[&str],
        group_id: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()>;
}
