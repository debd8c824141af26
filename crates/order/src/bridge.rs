//! The synchronous request bridge.
//!
//! Publishes the triggering command keyed by a fresh correlation id, then
//! blocks on the durable response stream for that id. Whichever Order
//! replica consumes the outcome writes the stream; whichever replica holds
//! the HTTP request reads it, deletes it, and maps the event to a result.

use std::time::Duration;

use bus::EventBus;
use common::{CorrelationId, Event, RetryPolicy, codec, topics};
use kv_store::KeyValueStore;

use crate::error::Result;
use crate::repository::OrderRepository;
use crate::response_stream_key;

/// Bridge tunables.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Blocking-read timeout for item lookups.
    pub find_item_timeout: Duration,
    /// Blocking-read timeout for checkouts. Generous: a checkout spans the
    /// whole saga round trip.
    pub checkout_timeout: Duration,
    /// Retry budget for transient store failures on the blocking read.
    pub retry: RetryPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            find_item_timeout: Duration::from_secs(30),
            checkout_timeout: Duration::from_secs(500),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of an add-item request.
#[derive(Debug, Clone, PartialEq)]
pub enum AddItemOutcome {
    /// Item merged into the order; `total_cost` is the order's new total.
    Added { total_cost: u64 },
    /// The item does not exist.
    NotFound,
    /// No response arrived within the timeout. No local state was touched.
    TimedOut,
}

/// Result of a checkout request.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    /// The saga committed; the order is paid.
    Success,
    /// The saga aborted with a business rejection.
    Failed { error: Option<String> },
    /// No decision within the timeout. The caller must not assume
    /// rollback; an idempotent retry is the recommended recovery.
    TimedOut,
}

/// Order-side bridge between synchronous callers and the saga machinery.
pub struct RequestBridge<S, B> {
    repo: OrderRepository<S>,
    store: S,
    bus: B,
    config: BridgeConfig,
}

impl<S, B> RequestBridge<S, B>
where
    S: KeyValueStore + Clone,
    B: EventBus,
{
    pub fn new(store: S, bus: B, config: BridgeConfig) -> Self {
        Self {
            repo: OrderRepository::with_retry(store.clone(), config.retry),
            store,
            bus,
            config,
        }
    }

    /// Adds an item to an order by asking Stock for the item's details and
    /// waiting for the response consumer to land the enriched outcome.
    #[tracing::instrument(skip(self), fields(%order_id, %item_id))]
    pub async fn add_item(
        &self,
        order_id: &str,
        item_id: &str,
        quantity: u32,
    ) -> Result<AddItemOutcome> {
        metrics::counter!("bridge_requests_total").increment(1);
        // Fail fast on unknown orders before involving Stock.
        self.repo.get(order_id).await?;

        let correlation_id = CorrelationId::new();
        let command = Event::FindItem {
            correlation_id,
            item_id: item_id.to_string(),
            quantity,
            order_id: order_id.to_string(),
        };
        self.bus
            .publish(
                topics::STOCK_OPERATIONS,
                &correlation_id.to_string(),
                &command,
            )
            .await?;

        let Some(event) = self
            .await_response(correlation_id, self.config.find_item_timeout)
            .await?
        else {
            metrics::counter!("bridge_timeouts_total").increment(1);
            tracing::warn!(%correlation_id, "add-item response timed out");
            return Ok(AddItemOutcome::TimedOut);
        };

        match event {
            Event::ItemFound {
                total_cost: Some(total_cost),
                ..
            } => Ok(AddItemOutcome::Added { total_cost }),
            Event::ItemFound { total_cost: None, .. } => {
                // The consumer could not apply the mutation (order vanished
                // between request and response).
                tracing::error!(%correlation_id, "item found but order mutation was not applied");
                Ok(AddItemOutcome::NotFound)
            }
            Event::ItemNotFound { .. } => Ok(AddItemOutcome::NotFound),
            other => {
                tracing::error!(%correlation_id, event_type = other.event_type(), "unexpected response event");
                Ok(AddItemOutcome::NotFound)
            }
        }
    }

    /// Runs a checkout: publishes `CheckoutRequested` for the order and
    /// waits for the saga's terminal event.
    #[tracing::instrument(skip(self), fields(%order_id))]
    pub async fn checkout(&self, order_id: &str) -> Result<CheckoutOutcome> {
        metrics::counter!("bridge_requests_total").increment(1);
        let order = self.repo.get(order_id).await?;

        let correlation_id = CorrelationId::new();
        let command = Event::CheckoutRequested {
            correlation_id,
            order_id: order_id.to_string(),
            user_id: order.user_id.clone(),
            items: order.items.clone(),
            amount: order.total_cost,
        };
        self.bus
            .publish(
                topics::ORDER_OPERATIONS,
                &correlation_id.to_string(),
                &command,
            )
            .await?;
        tracing::debug!(%correlation_id, "waiting for checkout decision");

        let Some(event) = self
            .await_response(correlation_id, self.config.checkout_timeout)
            .await?
        else {
            metrics::counter!("bridge_timeouts_total").increment(1);
            tracing::warn!(%correlation_id, "checkout response timed out");
            return Ok(CheckoutOutcome::TimedOut);
        };

        match event {
            Event::CheckoutSuccess { .. } => Ok(CheckoutOutcome::Success),
            Event::CheckoutFailed { error, .. } => Ok(CheckoutOutcome::Failed { error }),
            other => {
                tracing::error!(%correlation_id, event_type = other.event_type(), "unexpected response event");
                Ok(CheckoutOutcome::Failed { error: None })
            }
        }
    }

    /// Blocks on the response stream, retrying transient store failures,
    /// and deletes the stream once the first entry has been read.
    async fn await_response(
        &self,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> Result<Option<Event>> {
        let stream = response_stream_key(correlation_id);
        let mut attempt: u32 = 0;
        let bytes = loop {
            match self.store.read_blocking(&stream, timeout).await {
                Ok(Some(bytes)) => break bytes,
                Ok(None) => return Ok(None),
                Err(error) if error.is_transient() && !self.config.retry.exhausted(attempt) => {
                    attempt += 1;
                    tokio::time::sleep(self.config.retry.backoff).await;
                }
                Err(error) => return Err(error.into()),
            }
        };
        self.store.delete_stream(&stream).await?;
        Ok(Some(codec::decode(&bytes)?))
    }
}
