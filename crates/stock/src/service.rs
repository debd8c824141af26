use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bus::{EventBus, EventHandler, HandlerError};
use common::event::names;
use common::{CorrelationId, Event, ItemLine, RetryPolicy, codec, topics};
use kv_store::{ExecOutcome, KeyValueStore, WriteOp};
use uuid::Uuid;

use crate::error::{Result, StockServiceError};
use crate::model::StockItem;

const DB_ERROR: &str = "DB error";
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(3600);

/// Outcome of one optimistic attempt at a stock mutation.
enum Attempt {
    /// Domain writes and idempotency record committed together.
    Committed { outcome: Event },
    /// Business predicate failed; nothing was written.
    Rejected { reason: String },
    /// A watched key changed under us; retry from the reads.
    Conflict,
}

/// The stock participant.
///
/// Library operations (`create_item`, `batch_init`, `item`) seed and
/// inspect the store; the [`EventHandler`] impl is the consumer side.
pub struct StockService<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
}

impl<S, B> StockService<S, B>
where
    S: KeyValueStore,
    B: EventBus,
{
    pub fn new(store: S, bus: B) -> Self {
        Self::with_retry(store, bus, RetryPolicy::default())
    }

    pub fn with_retry(store: S, bus: B, retry: RetryPolicy) -> Self {
        Self { store, bus, retry }
    }

    /// Creates a new item with zero stock, returning its id.
    pub async fn create_item(&self, price: u64) -> Result<String> {
        let item_id = Uuid::new_v4().to_string();
        let value = codec::encode(&StockItem::new(0, price))?;
        self.store.set(&item_id, value, None).await?;
        tracing::debug!(%item_id, price, "item created");
        Ok(item_id)
    }

    /// Seeds items `"0" .. "n-1"` with the same starting stock and price.
    pub async fn batch_init(&self, n: u32, starting_stock: u32, price: u64) -> Result<()> {
        let value = codec::encode(&StockItem::new(starting_stock, price))?;
        let pairs = (0..n).map(|i| (i.to_string(), value.clone())).collect();
        self.store.mset(pairs).await?;
        Ok(())
    }

    /// Loads an item.
    pub async fn item(&self, item_id: &str) -> Result<StockItem> {
        let bytes = self
            .store
            .get(item_id)
            .await?
            .ok_or_else(|| StockServiceError::ItemNotFound(item_id.to_string()))?;
        Ok(codec::decode(&bytes)?)
    }

    #[tracing::instrument(skip(self, items), fields(%correlation_id, %order_id))]
    async fn handle_subtract(
        &self,
        correlation_id: CorrelationId,
        order_id: String,
        items: Vec<ItemLine>,
    ) -> Result<()> {
        metrics::counter!("stock_commands_total").increment(1);
        let idem_key = format!("{}:{correlation_id}", names::SUBTRACT_STOCK);
        if let Some(recorded) = self.recorded_outcome(&idem_key).await? {
            metrics::counter!("stock_idempotent_replays_total").increment(1);
            tracing::info!("command already applied, republishing recorded outcome");
            return self.publish_response(&recorded).await;
        }

        let success = Event::StockSubtracted {
            correlation_id,
            order_id: order_id.clone(),
            items: items.clone(),
        };
        let on_reject = |reason: String| Event::StockError {
            correlation_id,
            order_id: order_id.clone(),
            items: items.clone(),
            error: reason,
        };

        let outcome = self
            .run_mutation(&idem_key, &items, true, success, &on_reject)
            .await?;
        self.publish_response(&outcome).await
    }

    #[tracing::instrument(skip(self, items), fields(%correlation_id, %order_id))]
    async fn handle_add(
        &self,
        correlation_id: CorrelationId,
        order_id: String,
        items: Vec<ItemLine>,
    ) -> Result<()> {
        metrics::counter!("stock_commands_total").increment(1);
        let idem_key = format!("{}:{correlation_id}", names::ADD_STOCK);
        if let Some(recorded) = self.recorded_outcome(&idem_key).await? {
            metrics::counter!("stock_idempotent_replays_total").increment(1);
            tracing::info!("compensation already applied, republishing recorded outcome");
            return self.publish_response(&recorded).await;
        }

        let success = Event::StockCompensated {
            correlation_id,
            order_id: order_id.clone(),
            items: items.clone(),
        };
        let on_reject = |reason: String| Event::StockCompensationFailed {
            correlation_id,
            order_id: order_id.clone(),
            items: items.clone(),
            error: reason,
        };

        let outcome = self
            .run_mutation(&idem_key, &items, false, success, &on_reject)
            .await?;
        self.publish_response(&outcome).await
    }

    /// Read-only, safe to repeat, exempt from idempotency recording.
    #[tracing::instrument(skip(self), fields(%correlation_id))]
    async fn handle_find(
        &self,
        correlation_id: CorrelationId,
        item_id: String,
        quantity: u32,
        order_id: String,
    ) -> Result<()> {
        metrics::counter!("stock_commands_total").increment(1);
        let mut attempt: u32 = 0;
        let outcome = loop {
            match self.store.get(&item_id).await {
                Ok(Some(bytes)) => match codec::decode::<StockItem>(&bytes) {
                    Ok(item) => {
                        break Event::ItemFound {
                            correlation_id,
                            item_id,
                            stock: item.stock,
                            price: item.price,
                            quantity,
                            order_id,
                            total_cost: None,
                        };
                    }
                    Err(error) => {
                        tracing::error!(%item_id, %error, "undecodable stock entry");
                        break Event::ItemNotFound {
                            correlation_id,
                            item_id,
                        };
                    }
                },
                Ok(None) => {
                    break Event::ItemNotFound {
                        correlation_id,
                        item_id,
                    };
                }
                Err(error) if error.is_transient() && !self.retry.exhausted(attempt) => {
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(error) => {
                    tracing::error!(%item_id, %error, "item lookup failed");
                    break Event::ItemNotFound {
                        correlation_id,
                        item_id,
                    };
                }
            }
        };
        self.publish_response(&outcome).await
    }

    /// The CAS loop shared by subtract and compensation: bounded retries
    /// for both watch conflicts and transient store failures, converging
    /// on a recorded `"DB error"` outcome at exhaustion.
    async fn run_mutation(
        &self,
        idem_key: &str,
        items: &[ItemLine],
        subtract: bool,
        success: Event,
        on_reject: &(dyn Fn(String) -> Event + Sync),
    ) -> Result<Event> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_mutation(idem_key, items, subtract, &success).await {
                Ok(Attempt::Committed { outcome }) => return Ok(outcome),
                Ok(Attempt::Rejected { reason }) => {
                    let outcome = on_reject(reason);
                    self.record_outcome(idem_key, &outcome).await?;
                    return Ok(outcome);
                }
                Ok(Attempt::Conflict) => {
                    metrics::counter!("stock_cas_conflicts_total").increment(1);
                    tracing::warn!("concurrency conflict, retrying transaction");
                    if self.retry.exhausted(attempt) {
                        let outcome = on_reject(DB_ERROR.to_string());
                        self.record_outcome(idem_key, &outcome).await?;
                        return Ok(outcome);
                    }
                    attempt += 1;
                }
                Err(StockServiceError::Store(error)) if error.is_transient() => {
                    tracing::warn!(%error, attempt, "transient store failure");
                    if self.retry.exhausted(attempt) {
                        let outcome = on_reject(format!("{DB_ERROR}: {error}"));
                        self.record_outcome(idem_key, &outcome).await?;
                        return Ok(outcome);
                    }
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(error) => {
                    let outcome = on_reject(error.to_string());
                    self.record_outcome(idem_key, &outcome).await?;
                    return Ok(outcome);
                }
            }
        }
    }

    async fn try_mutation(
        &self,
        idem_key: &str,
        items: &[ItemLine],
        subtract: bool,
        success: &Event,
    ) -> Result<Attempt> {
        // Merge duplicate lines so each key is read and written once.
        let mut wanted: BTreeMap<&str, u64> = BTreeMap::new();
        for (item_id, quantity) in items {
            *wanted.entry(item_id.as_str()).or_insert(0) += u64::from(*quantity);
        }

        // Watch every touched key before the first read.
        let keys: Vec<String> = wanted.keys().map(|k| k.to_string()).collect();
        let token = self.store.watch(&keys).await?;

        let mut writes = Vec::with_capacity(wanted.len() + 1);
        for (item_id, quantity) in &wanted {
            let Some(bytes) = self.store.get(item_id).await? else {
                return Ok(Attempt::Rejected {
                    reason: format!("Item not found: {item_id}"),
                });
            };
            let mut item: StockItem = codec::decode(&bytes)?;
            let Ok(delta) = u32::try_from(*quantity) else {
                return Ok(Attempt::Rejected {
                    reason: format!("Quantity overflow for item: {item_id}"),
                });
            };
            if subtract {
                match item.stock.checked_sub(delta) {
                    Some(remaining) => item.stock = remaining,
                    None => {
                        return Ok(Attempt::Rejected {
                            reason: format!("Insufficient stock for item: {item_id}"),
                        });
                    }
                }
            } else {
                item.stock = item.stock.saturating_add(delta);
            }
            tracing::debug!(%item_id, stock = item.stock, "stock update staged");
            writes.push(WriteOp::set(item_id.to_string(), codec::encode(&item)?));
        }
        writes.push(WriteOp::set_ex(
            idem_key,
            codec::encode(success)?,
            IDEMPOTENCY_TTL,
        ));

        match self.store.exec(token, writes).await? {
            ExecOutcome::Committed => Ok(Attempt::Committed {
                outcome: success.clone(),
            }),
            ExecOutcome::Conflict => Ok(Attempt::Conflict),
        }
    }

    async fn recorded_outcome(&self, idem_key: &str) -> Result<Option<Event>> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.get(idem_key).await {
                Ok(Some(bytes)) => return Ok(Some(codec::decode(&bytes)?)),
                Ok(None) => return Ok(None),
                Err(error) if error.is_transient() && !self.retry.exhausted(attempt) => {
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn record_outcome(&self, idem_key: &str, outcome: &Event) -> Result<()> {
        let bytes = codec::encode(outcome)?;
        let mut attempt: u32 = 0;
        loop {
            match self
                .store
                .set(idem_key, bytes.clone(), Some(IDEMPOTENCY_TTL))
                .await
            {
                Ok(()) => return Ok(()),
                Err(error) if error.is_transient() && !self.retry.exhausted(attempt) => {
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn publish_response(&self, outcome: &Event) -> Result<()> {
        self.bus
            .publish(
                topics::STOCK_RESPONSES,
                &outcome.correlation_id().to_string(),
                outcome,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<S, B> EventHandler for StockService<S, B>
where
    S: KeyValueStore,
    B: EventBus,
{
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
        match event {
            Event::SubtractStock {
                correlation_id,
                order_id,
                items,
            } => self
                .handle_subtract(correlation_id, order_id, items)
                .await
                .map_err(Into::into),
            Event::AddStock {
                correlation_id,
                order_id,
                items,
            } => self
                .handle_add(correlation_id, order_id, items)
                .await
                .map_err(Into::into),
            Event::FindItem {
                correlation_id,
                item_id,
                quantity,
                order_id,
            } => self
                .handle_find(correlation_id, item_id, quantity, order_id)
                .await
                .map_err(Into::into),
            other => {
                tracing::debug!(event_type = other.event_type(), "event ignored");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::InMemoryEventBus;
    use kv_store::InMemoryKvStore;

    fn service(
        store: InMemoryKvStore,
        bus: InMemoryEventBus,
    ) -> StockService<InMemoryKvStore, InMemoryEventBus> {
        // Millisecond backoff keeps the exhaustion tests fast.
        StockService::with_retry(store, bus, RetryPolicy::new(3, Duration::from_millis(1)))
    }

    async fn seed(store: &InMemoryKvStore, item_id: &str, stock: u32, price: u64) {
        let bytes = codec::encode(&StockItem::new(stock, price)).unwrap();
        store.set(item_id, bytes, None).await.unwrap();
    }

    fn subtract(corr: CorrelationId, items: Vec<ItemLine>) -> Event {
        Event::SubtractStock {
            correlation_id: corr,
            order_id: "o1".into(),
            items,
        }
    }

    #[tokio::test]
    async fn subtract_reduces_stock_and_publishes_success() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store.clone(), bus.clone());
        seed(&store, "i1", 10, 5).await;

        let corr = CorrelationId::new();
        svc.handle(subtract(corr, vec![("i1".into(), 2)]))
            .await
            .unwrap();

        assert_eq!(svc.item("i1").await.unwrap().stock, 8);
        let responses = bus.published_on(topics::STOCK_RESPONSES);
        assert!(matches!(responses[0], Event::StockSubtracted { .. }));

        // The outcome is recorded with a TTL for idempotent replay.
        let idem = store
            .get(&format!("SubtractStock:{corr}"))
            .await
            .unwrap()
            .expect("idempotency record");
        let recorded: Event = codec::decode(&idem).unwrap();
        assert_eq!(recorded, responses[0]);
        assert!(store.ttl(&format!("SubtractStock:{corr}")).await.is_some());
    }

    #[tokio::test]
    async fn insufficient_stock_rejects_without_mutation() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store.clone(), bus.clone());
        seed(&store, "i1", 1, 5).await;

        let corr = CorrelationId::new();
        svc.handle(subtract(corr, vec![("i1".into(), 2)]))
            .await
            .unwrap();

        assert_eq!(svc.item("i1").await.unwrap().stock, 1);
        match &bus.published_on(topics::STOCK_RESPONSES)[0] {
            Event::StockError { error, .. } => assert!(error.contains("Insufficient stock")),
            other => panic!("expected StockError, got {other:?}"),
        }
        // The rejection is recorded too, so a replay converges.
        assert!(
            store
                .get(&format!("SubtractStock:{corr}"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn missing_item_rejects() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store, bus.clone());

        svc.handle(subtract(CorrelationId::new(), vec![("ghost".into(), 1)]))
            .await
            .unwrap();

        match &bus.published_on(topics::STOCK_RESPONSES)[0] {
            Event::StockError { error, .. } => assert!(error.contains("not found")),
            other => panic!("expected StockError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn multi_item_failure_applies_nothing() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store.clone(), bus.clone());
        seed(&store, "a", 10, 5).await;
        seed(&store, "b", 1, 5).await;

        svc.handle(subtract(
            CorrelationId::new(),
            vec![("a".into(), 2), ("b".into(), 5)],
        ))
        .await
        .unwrap();

        assert_eq!(svc.item("a").await.unwrap().stock, 10);
        assert_eq!(svc.item("b").await.unwrap().stock, 1);
        assert!(matches!(
            bus.published_on(topics::STOCK_RESPONSES)[0],
            Event::StockError { .. }
        ));
    }

    #[tokio::test]
    async fn duplicate_lines_for_one_item_are_merged() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store.clone(), bus.clone());
        seed(&store, "i1", 10, 5).await;

        svc.handle(subtract(
            CorrelationId::new(),
            vec![("i1".into(), 2), ("i1".into(), 3)],
        ))
        .await
        .unwrap();

        assert_eq!(svc.item("i1").await.unwrap().stock, 5);
    }

    #[tokio::test]
    async fn redelivered_command_replays_without_reapplying() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store.clone(), bus.clone());
        seed(&store, "i1", 10, 5).await;

        let corr = CorrelationId::new();
        let command = subtract(corr, vec![("i1".into(), 2)]);
        svc.handle(command.clone()).await.unwrap();
        svc.handle(command).await.unwrap();

        // One decrement, two identical outcome publications.
        assert_eq!(svc.item("i1").await.unwrap().stock, 8);
        let responses = bus.published_on(topics::STOCK_RESPONSES);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0], responses[1]);
    }

    #[tokio::test]
    async fn add_stock_compensates() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store.clone(), bus.clone());
        seed(&store, "i1", 8, 5).await;

        svc.handle(Event::AddStock {
            correlation_id: CorrelationId::new(),
            order_id: "o1".into(),
            items: vec![("i1".into(), 2)],
        })
        .await
        .unwrap();

        assert_eq!(svc.item("i1").await.unwrap().stock, 10);
        assert!(matches!(
            bus.published_on(topics::STOCK_RESPONSES)[0],
            Event::StockCompensated { .. }
        ));
    }

    #[tokio::test]
    async fn subtract_then_add_restores_stock() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store.clone(), bus.clone());
        seed(&store, "i1", 10, 5).await;

        svc.handle(subtract(CorrelationId::new(), vec![("i1".into(), 4)]))
            .await
            .unwrap();
        svc.handle(Event::AddStock {
            correlation_id: CorrelationId::new(),
            order_id: "o1".into(),
            items: vec![("i1".into(), 4)],
        })
        .await
        .unwrap();

        assert_eq!(svc.item("i1").await.unwrap().stock, 10);
    }

    #[tokio::test]
    async fn create_item_starts_empty() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store, bus);

        let item_id = svc.create_item(7).await.unwrap();
        let item = svc.item(&item_id).await.unwrap();
        assert_eq!(item.stock, 0);
        assert_eq!(item.price, 7);
    }

    #[tokio::test]
    async fn add_stock_missing_item_reports_compensation_failure() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store, bus.clone());

        svc.handle(Event::AddStock {
            correlation_id: CorrelationId::new(),
            order_id: "o1".into(),
            items: vec![("ghost".into(), 2)],
        })
        .await
        .unwrap();

        assert!(matches!(
            bus.published_on(topics::STOCK_RESPONSES)[0],
            Event::StockCompensationFailed { .. }
        ));
    }

    #[tokio::test]
    async fn find_item_reports_stock_and_price() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store.clone(), bus.clone());
        seed(&store, "i1", 7, 3).await;

        let corr = CorrelationId::new();
        svc.handle(Event::FindItem {
            correlation_id: corr,
            item_id: "i1".into(),
            quantity: 2,
            order_id: "o1".into(),
        })
        .await
        .unwrap();

        match &bus.published_on(topics::STOCK_RESPONSES)[0] {
            Event::ItemFound {
                stock,
                price,
                total_cost,
                ..
            } => {
                assert_eq!((*stock, *price), (7, 3));
                assert!(total_cost.is_none());
            }
            other => panic!("expected ItemFound, got {other:?}"),
        }
        // Read-only commands leave no idempotency record.
        assert!(
            store
                .get(&format!("FindItem:{corr}"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn find_item_missing_reports_not_found() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store, bus.clone());

        svc.handle(Event::FindItem {
            correlation_id: CorrelationId::new(),
            item_id: "ghost".into(),
            quantity: 1,
            order_id: "o1".into(),
        })
        .await
        .unwrap();

        assert!(matches!(
            bus.published_on(topics::STOCK_RESPONSES)[0],
            Event::ItemNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn transient_exhaustion_converges_to_db_error_outcome() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        let svc = service(store.clone(), bus.clone());
        seed(&store, "i1", 10, 5).await;

        let corr = CorrelationId::new();
        // Idempotency lookup succeeds, then every attempt's watch fails
        // until the retry budget (3) is spent.
        store.fail_after(1, 3).await;
        svc.handle(subtract(corr, vec![("i1".into(), 2)]))
            .await
            .unwrap();

        match &bus.published_on(topics::STOCK_RESPONSES)[0] {
            Event::StockError { error, .. } => assert!(error.contains(DB_ERROR)),
            other => panic!("expected StockError, got {other:?}"),
        }
        assert_eq!(svc.item("i1").await.unwrap().stock, 10);

        // Redelivery now replays the recorded DB-error outcome verbatim.
        svc.handle(subtract(corr, vec![("i1".into(), 2)]))
            .await
            .unwrap();
        let responses = bus.published_on(topics::STOCK_RESPONSES);
        assert_eq!(responses[0], responses[1]);
    }

    #[tokio::test]
    async fn concurrent_subtracts_serialize_via_cas() {
        let store = InMemoryKvStore::new();
        let bus = InMemoryEventBus::new();
        // Generous conflict budget: ten writers hammering one key.
        let svc = std::sync::Arc::new(StockService::with_retry(
            store.clone(),
            bus.clone(),
            RetryPolicy::new(50, Duration::from_millis(1)),
        ));
        seed(&store, "i1", 100, 5).await;

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let svc = svc.clone();
            tasks.push(tokio::spawn(async move {
                svc.handle(subtract(CorrelationId::new(), vec![("i1".into(), 3)]))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(svc.item("i1").await.unwrap().stock, 70);
        let responses = bus.published_on(topics::STOCK_RESPONSES);
        assert!(
            responses
                .iter()
                .all(|e| matches!(e, Event::StockSubtracted { .. }))
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Replaying a command K times leaves the same state and the
            /// same outcome as applying it once.
            #[test]
            fn replay_is_idempotent(initial in 0u32..50, qty in 1u32..10, replays in 1usize..5) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async move {
                    let store = InMemoryKvStore::new();
                    let bus = InMemoryEventBus::new();
                    let svc = StockService::new(store.clone(), bus.clone());
                    seed(&store, "i1", initial, 5).await;

                    let command = subtract(CorrelationId::new(), vec![("i1".into(), qty)]);
                    for _ in 0..replays {
                        svc.handle(command.clone()).await.unwrap();
                    }

                    let expected = if qty <= initial { initial - qty } else { initial };
                    prop_assert_eq!(svc.item("i1").await.unwrap().stock, expected);

                    let responses = bus.published_on(topics::STOCK_RESPONSES);
                    prop_assert_eq!(responses.len(), replays);
                    for outcome in &responses[1..] {
                        prop_assert_eq!(outcome, &responses[0]);
                    }
                    Ok(())
                })?;
            }

            /// Stock never goes observable-negative, whatever the quantity.
            #[test]
            fn stock_never_negative(initial in 0u32..20, quantities in prop::collection::vec(1u32..15, 1..6)) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async move {
                    let store = InMemoryKvStore::new();
                    let bus = InMemoryEventBus::new();
                    let svc = StockService::new(store.clone(), bus.clone());
                    seed(&store, "i1", initial, 5).await;

                    for qty in quantities {
                        svc.handle(subtract(CorrelationId::new(), vec![("i1".into(), qty)]))
                            .await
                            .unwrap();
                        let item = svc.item("i1").await.unwrap();
                        prop_assert!(item.stock <= initial);
                    }
                    Ok(())
                })?;
            }
        }
    }
}
