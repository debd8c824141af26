use common::{RetryPolicy, codec};
use kv_store::KeyValueStore;
use uuid::Uuid;

use crate::error::{OrderServiceError, Result};
use crate::model::OrderValue;

/// Order records over the key-value store.
#[derive(Clone)]
pub struct OrderRepository<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> OrderRepository<S>
where
    S: KeyValueStore,
{
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Creates an unpaid empty order for the user, returning its id.
    pub async fn create_order(&self, user_id: &str) -> Result<String> {
        let order_id = Uuid::new_v4().to_string();
        let value = codec::encode(&OrderValue::new(user_id))?;
        self.store.set(&order_id, value, None).await?;
        tracing::debug!(%order_id, %user_id, "order created");
        Ok(order_id)
    }

    /// Loads an order, retrying transient store failures.
    pub async fn get(&self, order_id: &str) -> Result<OrderValue> {
        let mut attempt: u32 = 0;
        let bytes = loop {
            match self.store.get(order_id).await {
                Ok(Some(bytes)) => break bytes,
                Ok(None) => return Err(OrderServiceError::OrderNotFound(order_id.to_string())),
                Err(error) if error.is_transient() && !self.retry.exhausted(attempt) => {
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(error) => return Err(error.into()),
            }
        };
        Ok(codec::decode(&bytes)?)
    }

    /// Seeds `n` orders over `n_users` users and `n_items` items, two item
    /// lines each, ids `"0" .. "n-1"`.
    pub async fn batch_init(
        &self,
        n: u32,
        n_items: u32,
        n_users: u32,
        item_price: u64,
    ) -> Result<()> {
        let mut pairs = Vec::with_capacity(n as usize);
        for i in 0..n {
            let order = OrderValue {
                paid: false,
                items: vec![
                    ((i % n_items).to_string(), 1),
                    (((i + 1) % n_items).to_string(), 1),
                ],
                user_id: (i % n_users).to_string(),
                total_cost: 2 * item_price,
            };
            pairs.push((i.to_string(), codec::encode(&order)?));
        }
        self.store.mset(pairs).await?;
        Ok(())
    }
}
