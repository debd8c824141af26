use std::time::Duration;

use async_trait::async_trait;
use bus::{EventBus, EventHandler, HandlerError};
use common::event::names;
use common::{CorrelationId, Event, RetryPolicy, codec, topics};
use kv_store::{ExecOutcome, KeyValueStore, WriteOp};
use uuid::Uuid;

use crate::error::{PaymentServiceError, Result};
use crate::model::User;

const DB_ERROR: &str = "DB error";
const USER_NOT_FOUND: &str = "USER NOT FOUND";
const INSUFFICIENT_FUNDS: &str = "INSUFFICIENT FUNDS";
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(3600);

enum Attempt {
    Committed { outcome: Event },
    Rejected { reason: String },
    Conflict,
}

/// The payment participant.
pub struct PaymentService<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
}

impl<S, B> PaymentService<S, B>
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

    /// Creates a user with zero credit, returning the user id.
    pub async fn create_user(&self) -> Result<String> {
        let user_id = Uuid::new_v4().to_string();
        let value = codec::encode(&User::new(0))?;
        self.store.set(&user_id, value, None).await?;
        tracing::debug!(%user_id, "user created");
        Ok(user_id)
    }

    /// Seeds users `"0" .. "n-1"` with the same starting credit.
    pub async fn batch_init(&self, n: u32, starting_credit: u64) -> Result<()> {
        let value = codec::encode(&User::new(starting_credit))?;
        let pairs = (0..n).map(|i| (i.to_string(), value.clone())).collect();
        self.store.mset(pairs).await?;
        Ok(())
    }

    /// Adds credit to a user, returning the new balance.
    pub async fn add_credit(&self, user_id: &str, amount: u64) -> Result<u64> {
        let mut user = self.user(user_id).await?;
        user.credit = user.credit.saturating_add(amount);
        self.store
            .set(user_id, codec::encode(&user)?, None)
            .await?;
        Ok(user.credit)
    }

    /// Loads a user.
    pub async fn user(&self, user_id: &str) -> Result<User> {
        let bytes = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| PaymentServiceError::UserNotFound(user_id.to_string()))?;
        Ok(codec::decode(&bytes)?)
    }

    #[tracing::instrument(skip(self), fields(%correlation_id, %user_id, amount))]
    async fn handle_pay(
        &self,
        correlation_id: CorrelationId,
        user_id: String,
        amount: u64,
        order_id: String,
    ) -> Result<()> {
        metrics::counter!("payment_commands_total").increment(1);
        let idem_key = format!("{}:{correlation_id}", names::PAY);
        if let Some(recorded) = self.recorded_outcome(&idem_key).await? {
            metrics::counter!("payment_idempotent_replays_total").increment(1);
            tracing::info!("command already applied, republishing recorded outcome");
            return self.publish_response(&recorded).await;
        }

        let outcome = self
            .run_mutation(&idem_key, &user_id, amount, true, &|credit| {
                Event::PaymentProcessed {
                    correlation_id,
                    user_id: user_id.clone(),
                    amount,
                    order_id: order_id.clone(),
                    credit,
                }
            }, &|reason| Event::PaymentError {
                correlation_id,
                user_id: user_id.clone(),
                amount,
                order_id: order_id.clone(),
                error: reason,
            })
            .await?;
        self.publish_response(&outcome).await
    }

    #[tracing::instrument(skip(self), fields(%correlation_id, %user_id, amount))]
    async fn handle_refund(
        &self,
        correlation_id: CorrelationId,
        user_id: String,
        amount: u64,
        order_id: String,
    ) -> Result<()> {
        metrics::counter!("payment_commands_total").increment(1);
        let idem_key = format!("{}:{correlation_id}", names::REFUND);
        if let Some(recorded) = self.recorded_outcome(&idem_key).await? {
            metrics::counter!("payment_idempotent_replays_total").increment(1);
            tracing::info!("compensation already applied, republishing recorded outcome");
            return self.publish_response(&recorded).await;
        }

        let outcome = self
            .run_mutation(&idem_key, &user_id, amount, false, &|credit| {
                Event::RefundProcessed {
                    correlation_id,
                    user_id: user_id.clone(),
                    amount,
                    order_id: order_id.clone(),
                    credit,
                }
            }, &|reason| Event::RefundError {
                correlation_id,
                user_id: user_id.clone(),
                amount,
                order_id: order_id.clone(),
                error: reason,
            })
            .await?;
        self.publish_response(&outcome).await
    }

    /// Bounded CAS loop for a single-user credit mutation. `withdraw`
    /// selects the direction; the predicate `credit - amount ≥ 0` only
    /// applies when withdrawing.
    async fn run_mutation(
        &self,
        idem_key: &str,
        user_id: &str,
        amount: u64,
        withdraw: bool,
        on_success: &(dyn Fn(u64) -> Event + Sync),
        on_reject: &(dyn Fn(String) -> Event + Sync),
    ) -> Result<Event> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .try_mutation(idem_key, user_id, amount, withdraw, on_success)
                .await
            {
                Ok(Attempt::Committed { outcome }) => return Ok(outcome),
                Ok(Attempt::Rejected { reason }) => {
                    let outcome = on_reject(reason);
                    self.record_outcome(idem_key, &outcome).await?;
                    return Ok(outcome);
                }
                Ok(Attempt::Conflict) => {
                    metrics::counter!("payment_cas_conflicts_total").increment(1);
                    tracing::warn!("concurrency conflict, retrying transaction");
                    if self.retry.exhausted(attempt) {
                        let outcome = on_reject(DB_ERROR.to_string());
                        self.record_outcome(idem_key, &outcome).await?;
                        return Ok(outcome);
                    }
                    attempt += 1;
                }
                Err(PaymentServiceError::Store(error)) if error.is_transient() => {
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
        user_id: &str,
        amount: u64,
        withdraw: bool,
        on_success: &(dyn Fn(u64) -> Event + Sync),
    ) -> Result<Attempt> {
        let keys = [user_id.to_string()];
        let token = self.store.watch(&keys).await?;

        let Some(bytes) = self.store.get(user_id).await? else {
            return Ok(Attempt::Rejected {
                reason: USER_NOT_FOUND.to_string(),
            });
        };
        let mut user: User = codec::decode(&bytes)?;

        if withdraw {
            match user.credit.checked_sub(amount) {
                Some(remaining) => user.credit = remaining,
                None => {
                    return Ok(Attempt::Rejected {
                        reason: INSUFFICIENT_FUNDS.to_string(),
                    });
                }
            }
        } else {
            user.credit = user.credit.saturating_add(amount);
        }
        tracing::debug!(%user_id, credit = user.credit, "credit update staged");

        let outcome = on_success(user.credit);
        let writes = vec![
            WriteOp::set(user_id.to_string(), codec::encode(&user)?),
            WriteOp::set_ex(idem_key, codec::encode(&outcome)?, IDEMPOTENCY_TTL),
        ];
        match self.store.exec(token, writes).await? {
            ExecOutcome::Committed => Ok(Attempt::Committed { outcome }),
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
                topics::PAYMENT_RESPONSES,
                &outcome.correlation_id().to_string(),
                outcome,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<S, B> EventHandler for PaymentService<S, B>
where
    S: KeyValueStore,
    B: EventBus,
{
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
        match event {
            Event::Pay {
                correlation_id,
                user_id,
                amount,
                order_id,
            } => self
                .handle_pay(correlation_id, user_id, amount, order_id)
                .await
                .map_err(Into::into),
            Event::Refund {
                correlation_id,
                user_id,
                amount,
                order_id,
            } => self
                .handle_refund(correlation_id, user_id, amount, order_id)
                .await
                .map_err(Into::into),
            other => {
                tracing::debug!(event_type = other.event_type(), "event ignored");
                Ok(())
            }
        }
    }
}
