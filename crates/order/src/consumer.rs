//! The Order-side response consumer.
//!
//! Consumes the terminal events of both request flavours and, for each,
//! commits three things in one optimistic transaction: the idempotency
//! record, the response-stream entry the bridge is blocked on, and the
//! derived order mutation. The visible order state therefore changes
//! exactly once, atomically with the stream write, however many times the
//! event is redelivered.

use std::time::Duration;

use async_trait::async_trait;
use bus::{EventHandler, HandlerError};
use common::{Event, RetryPolicy, codec};
use kv_store::{ExecOutcome, KeyValueStore, WriteOp};

use crate::error::{OrderServiceError, Result};
use crate::model::OrderValue;
use crate::response_stream_key;

const IDEMPOTENCY_TTL: Duration = Duration::from_secs(3600);

/// Consumer for `ItemFound` / `ItemNotFound` / `CheckoutSuccess` /
/// `CheckoutFailed`. Subscribe it to the stock responses and orchestrator
/// responses topics.
pub struct ResponseConsumer<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> ResponseConsumer<S>
where
    S: KeyValueStore,
{
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    #[tracing::instrument(skip(self, event), fields(correlation_id = %event.correlation_id(), event_type = event.event_type()))]
    async fn process(&self, event: &Event) -> Result<()> {
        metrics::counter!("order_responses_total").increment(1);
        let idem_key = event.idempotency_key();
        if self.recorded(&idem_key).await? {
            // The bridge has already seen this outcome (or will never wait
            // for a duplicate); do not mutate, do not re-append.
            metrics::counter!("order_idempotent_skips_total").increment(1);
            tracing::debug!("response already processed, skipping");
            return Ok(());
        }

        let stream = response_stream_key(event.correlation_id());
        let mut attempt: u32 = 0;
        loop {
            match self.try_apply(&idem_key, &stream, event).await {
                Ok(ExecOutcome::Committed) => return Ok(()),
                Ok(ExecOutcome::Conflict) => {
                    metrics::counter!("order_cas_conflicts_total").increment(1);
                    tracing::warn!("order update conflicted, retrying");
                    if self.retry.exhausted(attempt) {
                        return Err(OrderServiceError::ConflictBudgetExhausted(
                            event.correlation_id().to_string(),
                        ));
                    }
                    attempt += 1;
                }
                Err(OrderServiceError::Store(error)) if error.is_transient() => {
                    tracing::warn!(%error, attempt, "transient store failure");
                    if self.retry.exhausted(attempt) {
                        return Err(error.into());
                    }
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn try_apply(&self, idem_key: &str, stream: &str, event: &Event) -> Result<ExecOutcome> {
        match event {
            Event::ItemFound {
                correlation_id,
                item_id,
                stock,
                price,
                quantity,
                order_id,
                ..
            } => {
                let token = self.store.watch(std::slice::from_ref(order_id)).await?;
                let Some(bytes) = self.store.get(order_id).await? else {
                    tracing::error!(%order_id, "order missing, response stored without mutation");
                    return self.commit_unchanged(token, idem_key, stream, event).await;
                };
                let mut order: OrderValue = codec::decode(&bytes)?;
                order.merge_item(item_id, *quantity);
                order.total_cost += u64::from(*quantity) * price;

                let enriched = Event::ItemFound {
                    correlation_id: *correlation_id,
                    item_id: item_id.clone(),
                    stock: *stock,
                    price: *price,
                    quantity: *quantity,
                    order_id: order_id.clone(),
                    total_cost: Some(order.total_cost),
                };
                let writes = vec![
                    WriteOp::set(order_id.clone(), codec::encode(&order)?),
                    WriteOp::set_ex(idem_key, codec::encode(&enriched)?, IDEMPOTENCY_TTL),
                    WriteOp::append(stream, codec::encode(&enriched)?),
                ];
                Ok(self.store.exec(token, writes).await?)
            }
            Event::CheckoutSuccess { order_id, .. } => {
                let token = self.store.watch(std::slice::from_ref(order_id)).await?;
                let Some(bytes) = self.store.get(order_id).await? else {
                    tracing::error!(%order_id, "order missing, response stored without mutation");
                    return self.commit_unchanged(token, idem_key, stream, event).await;
                };
                let mut order: OrderValue = codec::decode(&bytes)?;
                order.paid = true;
                let writes = vec![
                    WriteOp::set(order_id.clone(), codec::encode(&order)?),
                    WriteOp::set_ex(idem_key, codec::encode(event)?, IDEMPOTENCY_TTL),
                    WriteOp::append(stream, codec::encode(event)?),
                ];
                Ok(self.store.exec(token, writes).await?)
            }
            Event::ItemNotFound { .. } | Event::CheckoutFailed { .. } => {
                let token = self.store.watch(&[]).await?;
                self.commit_unchanged(token, idem_key, stream, event).await
            }
            other => {
                tracing::debug!(event_type = other.event_type(), "event ignored");
                Ok(ExecOutcome::Committed)
            }
        }
    }

    async fn commit_unchanged(
        &self,
        token: kv_store::WatchToken,
        idem_key: &str,
        stream: &str,
        event: &Event,
    ) -> Result<ExecOutcome> {
        let writes = vec![
            WriteOp::set_ex(idem_key, codec::encode(event)?, IDEMPOTENCY_TTL),
            WriteOp::append(stream, codec::encode(event)?),
        ];
        Ok(self.store.exec(token, writes).await?)
    }

    async fn recorded(&self, idem_key: &str) -> Result<bool> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.get(idem_key).await {
                Ok(found) => return Ok(found.is_some()),
                Err(error) if error.is_transient() && !self.retry.exhausted(attempt) => {
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

#[async_trait]
impl<S> EventHandler for ResponseConsumer<S>
where
    S: KeyValueStore,
{
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
        match &event {
            Event::ItemFound { .. }
            | Event::ItemNotFound { .. }
            | Event::CheckoutSuccess { .. }
            | Event::CheckoutFailed { .. } => self.process(&event).await.map_err(Into::into),
            other => {
                tracing::debug!(event_type = other.event_type(), "event ignored");
                Ok(())
            }
        }
    }
}
