use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{CorrelationId, Event};
use tokio::sync::Mutex;

use crate::error::{Result, SagaError};
use crate::state::SagaState;

/// One step of a saga: a forward command, its compensation, and the
/// outcome event types that gate progression.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Step name, for logs.
    fn name(&self) -> &'static str;

    /// Event type that advances the saga past this step.
    fn success_event(&self) -> &'static str;

    /// Event type that aborts the saga while this step is awaited.
    fn error_event(&self) -> &'static str;

    /// Emits the forward command. `trigger` is the event whose consumption
    /// caused this step to run (the initial event for step 0, the previous
    /// step's success outcome otherwise).
    async fn command(&self, trigger: &Event) -> Result<()>;

    /// Emits the reversal command for this step.
    async fn compensate(&self, trigger: &Event) -> Result<()>;
}

/// Terminal action run exactly once when a saga commits or aborts.
#[async_trait]
pub trait TerminalAction: Send + Sync {
    async fn run(&self, trigger: &Event) -> Result<()>;
}

struct SagaInstance {
    correlation_id: CorrelationId,
    step_index: usize,
    steps: Vec<Arc<dyn SagaStep>>,
    commit: Arc<dyn TerminalAction>,
    abort: Arc<dyn TerminalAction>,
    state: SagaState,
    started_at: Instant,
}

impl SagaInstance {
    fn expected_success(&self) -> Option<&'static str> {
        self.steps.get(self.step_index).map(|s| s.success_event())
    }

    fn knows_success(&self, event_type: &str) -> bool {
        self.steps.iter().any(|s| s.success_event() == event_type)
    }

    fn knows_error(&self, event_type: &str) -> bool {
        self.steps.iter().any(|s| s.error_event() == event_type)
    }
}

/// In-memory registry of live sagas, keyed by correlation id.
///
/// All event handling for a saga happens inside one critical section, so
/// two events of the same transaction can never interleave. The per-key
/// ordering of the transport already guarantees this upstream, as long as
/// nothing here spawns concurrent handlers.
#[derive(Default)]
pub struct SagaManager {
    sagas: Mutex<HashMap<CorrelationId, SagaInstance>>,
}

impl SagaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates and registers a saga. `step_index` starts at 0; nothing is
    /// emitted until [`start`](Self::start).
    pub async fn build(
        &self,
        correlation_id: CorrelationId,
        steps: Vec<Arc<dyn SagaStep>>,
        commit: Arc<dyn TerminalAction>,
        abort: Arc<dyn TerminalAction>,
    ) -> Result<()> {
        let mut sagas = self.sagas.lock().await;
        if sagas.contains_key(&correlation_id) {
            return Err(SagaError::AlreadyRegistered(correlation_id));
        }
        sagas.insert(
            correlation_id,
            SagaInstance {
                correlation_id,
                step_index: 0,
                steps,
                commit,
                abort,
                state: SagaState::NotStarted,
                started_at: Instant::now(),
            },
        );
        tracing::info!(%correlation_id, "saga registered");
        Ok(())
    }

    /// Emits the first step's command. Does not advance `step_index`:
    /// advancement is driven purely by outcome events.
    pub async fn start(&self, correlation_id: CorrelationId, initial: &Event) -> Result<()> {
        let mut sagas = self.sagas.lock().await;
        let saga = sagas
            .get_mut(&correlation_id)
            .ok_or(SagaError::UnknownSaga(correlation_id))?;
        saga.state = SagaState::Running;
        let first = saga.steps[0].clone();
        tracing::info!(%correlation_id, step = first.name(), "saga started");
        metrics::counter!("saga_started_total").increment(1);

        if let Err(error) = first.command(initial).await {
            // The command never reached the bus, so there is nothing to
            // compensate; abort straight away.
            tracing::error!(%correlation_id, step = first.name(), %error, "first command emission failed");
            if let Some(saga) = sagas.remove(&correlation_id) {
                finish_aborted(saga, initial).await;
            }
        }
        Ok(())
    }

    /// Routes an outcome event to its saga, per the classification rules:
    /// expected success advances (or commits), a known error aborts with
    /// reverse compensation, an out-of-order success is a protocol
    /// violation and aborts, anything else is ignored. Events for unknown
    /// sagas are logged and dropped.
    pub async fn handle_event(&self, event: &Event) -> Result<()> {
        let correlation_id = event.correlation_id();
        let event_type = event.event_type();

        let mut sagas = self.sagas.lock().await;
        let Some(saga) = sagas.get_mut(&correlation_id) else {
            metrics::counter!("saga_orphan_events_total").increment(1);
            tracing::warn!(%correlation_id, event_type, "event for unknown saga dropped");
            return Ok(());
        };

        if saga.expected_success() == Some(event_type) {
            saga.step_index += 1;
            tracing::info!(
                %correlation_id,
                step_index = saga.step_index,
                of = saga.steps.len(),
                "step committed"
            );

            if saga.step_index == saga.steps.len() {
                if let Some(mut saga) = sagas.remove(&correlation_id) {
                    saga.state = SagaState::Committed;
                    if let Err(error) = saga.commit.run(event).await {
                        tracing::error!(%correlation_id, %error, "commit event emission failed");
                    }
                    metrics::counter!("saga_committed_total").increment(1);
                    metrics::histogram!("saga_duration_seconds")
                        .record(saga.started_at.elapsed().as_secs_f64());
                    tracing::info!(%correlation_id, state = %saga.state, "saga terminal");
                }
            } else {
                let next = saga.steps[saga.step_index].clone();
                tracing::info!(%correlation_id, step = next.name(), "issuing next command");
                if let Err(error) = next.command(event).await {
                    tracing::error!(%correlation_id, step = next.name(), %error, "command emission failed");
                    if let Some(saga) = sagas.remove(&correlation_id) {
                        finish_aborted(saga, event).await;
                    }
                }
            }
        } else if saga.knows_error(event_type) {
            tracing::warn!(
                %correlation_id,
                event_type,
                step_index = saga.step_index,
                "error outcome received, aborting saga"
            );
            if let Some(saga) = sagas.remove(&correlation_id) {
                finish_aborted(saga, event).await;
            }
        } else if saga.knows_success(event_type) {
            // Success event for a different step than the one awaited.
            tracing::warn!(
                %correlation_id,
                event_type,
                expected = ?saga.expected_success(),
                "out-of-order success event, treating as protocol violation"
            );
            if let Some(saga) = sagas.remove(&correlation_id) {
                finish_aborted(saga, event).await;
            }
        } else {
            tracing::debug!(%correlation_id, event_type, "event unrelated to saga ignored");
        }
        Ok(())
    }

    /// Number of sagas currently in flight.
    pub async fn active_count(&self) -> usize {
        self.sagas.lock().await.len()
    }
}

/// Runs compensations for every completed step in reverse order, then the
/// abort action. Compensation emission failures are logged and do not halt
/// the sweep; the recipients are idempotent and the sweep is best-effort.
async fn finish_aborted(mut saga: SagaInstance, trigger: &Event) {
    saga.state = SagaState::Compensating;
    for index in (0..saga.step_index).rev() {
        let step = &saga.steps[index];
        tracing::info!(
            correlation_id = %saga.correlation_id,
            step = step.name(),
            "emitting compensation"
        );
        if let Err(error) = step.compensate(trigger).await {
            tracing::error!(
                correlation_id = %saga.correlation_id,
                step = step.name(),
                %error,
                "compensation emission failed"
            );
        }
    }
    saga.state = SagaState::Aborted;
    if let Err(error) = saga.abort.run(trigger).await {
        tracing::error!(correlation_id = %saga.correlation_id, %error, "abort event emission failed");
    }
    metrics::counter!("saga_aborted_total").increment(1);
    metrics::histogram!("saga_duration_seconds").record(saga.started_at.elapsed().as_secs_f64());
    tracing::info!(correlation_id = %saga.correlation_id, state = %saga.state, "saga terminal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Records every command, compensation and terminal invocation in one
    /// shared journal so tests can assert exact ordering.
    #[derive(Default)]
    struct Journal {
        entries: StdMutex<Vec<String>>,
    }

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.entries.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.entries.lock().unwrap().clone()
        }
    }

    struct TestStep {
        name: &'static str,
        success: &'static str,
        error: &'static str,
        journal: Arc<Journal>,
        fail_command: bool,
    }

    #[async_trait]
    impl SagaStep for TestStep {
        fn name(&self) -> &'static str {
            self.name
        }
        fn success_event(&self) -> &'static str {
            self.success
        }
        fn error_event(&self) -> &'static str {
            self.error
        }
        async fn command(&self, _trigger: &Event) -> Result<()> {
            self.journal.push(format!("cmd:{}", self.name));
            if self.fail_command {
                return Err(SagaError::Bus(bus::BusError::Closed));
            }
            Ok(())
        }
        async fn compensate(&self, _trigger: &Event) -> Result<()> {
            self.journal.push(format!("comp:{}", self.name));
            Ok(())
        }
    }

    struct TestTerminal {
        label: &'static str,
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl TerminalAction for TestTerminal {
        async fn run(&self, _trigger: &Event) -> Result<()> {
            self.journal.push(self.label);
            Ok(())
        }
    }

    fn checkout_requested(corr: CorrelationId) -> Event {
        Event::CheckoutRequested {
            correlation_id: corr,
            order_id: "o1".into(),
            user_id: "u1".into(),
            items: vec![("i1".into(), 2)],
            amount: 10,
        }
    }

    fn stock_subtracted(corr: CorrelationId) -> Event {
        Event::StockSubtracted {
            correlation_id: corr,
            order_id: "o1".into(),
            items: vec![("i1".into(), 2)],
        }
    }

    fn payment_processed(corr: CorrelationId) -> Event {
        Event::PaymentProcessed {
            correlation_id: corr,
            user_id: "u1".into(),
            amount: 10,
            order_id: "o1".into(),
            credit: 90,
        }
    }

    fn payment_error(corr: CorrelationId) -> Event {
        Event::PaymentError {
            correlation_id: corr,
            user_id: "u1".into(),
            amount: 10,
            order_id: "o1".into(),
            error: "INSUFFICIENT FUNDS".into(),
        }
    }

    fn stock_error(corr: CorrelationId) -> Event {
        Event::StockError {
            correlation_id: corr,
            order_id: "o1".into(),
            items: vec![("i1".into(), 2)],
            error: "Insufficient stock for item: i1".into(),
        }
    }

    async fn build_two_step(
        manager: &SagaManager,
        corr: CorrelationId,
        journal: &Arc<Journal>,
        fail_second_command: bool,
    ) {
        let steps: Vec<Arc<dyn SagaStep>> = vec![
            Arc::new(TestStep {
                name: "subtract_stock",
                success: "StockSubtracted",
                error: "StockError",
                journal: journal.clone(),
                fail_command: false,
            }),
            Arc::new(TestStep {
                name: "pay",
                success: "PaymentProcessed",
                error: "PaymentError",
                journal: journal.clone(),
                fail_command: fail_second_command,
            }),
        ];
        manager
            .build(
                corr,
                steps,
                Arc::new(TestTerminal {
                    label: "commit",
                    journal: journal.clone(),
                }),
                Arc::new(TestTerminal {
                    label: "abort",
                    journal: journal.clone(),
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn happy_path_commits_after_all_successes() {
        let manager = SagaManager::new();
        let journal = Arc::new(Journal::default());
        let corr = CorrelationId::new();
        build_two_step(&manager, corr, &journal, false).await;

        manager.start(corr, &checkout_requested(corr)).await.unwrap();
        manager.handle_event(&stock_subtracted(corr)).await.unwrap();
        manager.handle_event(&payment_processed(corr)).await.unwrap();

        assert_eq!(
            journal.entries(),
            vec!["cmd:subtract_stock", "cmd:pay", "commit"]
        );
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn error_after_first_step_compensates_it() {
        let manager = SagaManager::new();
        let journal = Arc::new(Journal::default());
        let corr = CorrelationId::new();
        build_two_step(&manager, corr, &journal, false).await;

        manager.start(corr, &checkout_requested(corr)).await.unwrap();
        manager.handle_event(&stock_subtracted(corr)).await.unwrap();
        manager.handle_event(&payment_error(corr)).await.unwrap();

        assert_eq!(
            journal.entries(),
            vec!["cmd:subtract_stock", "cmd:pay", "comp:subtract_stock", "abort"]
        );
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn error_at_first_step_aborts_without_compensation() {
        let manager = SagaManager::new();
        let journal = Arc::new(Journal::default());
        let corr = CorrelationId::new();
        build_two_step(&manager, corr, &journal, false).await;

        manager.start(corr, &checkout_requested(corr)).await.unwrap();
        manager.handle_event(&stock_error(corr)).await.unwrap();

        assert_eq!(journal.entries(), vec!["cmd:subtract_stock", "abort"]);
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn out_of_order_success_is_a_protocol_violation() {
        let manager = SagaManager::new();
        let journal = Arc::new(Journal::default());
        let corr = CorrelationId::new();
        build_two_step(&manager, corr, &journal, false).await;

        manager.start(corr, &checkout_requested(corr)).await.unwrap();
        // PaymentProcessed while StockSubtracted is the awaited success.
        manager.handle_event(&payment_processed(corr)).await.unwrap();

        assert_eq!(journal.entries(), vec!["cmd:subtract_stock", "abort"]);
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_saga_events_are_dropped() {
        let manager = SagaManager::new();
        let corr = CorrelationId::new();
        manager.handle_event(&stock_subtracted(corr)).await.unwrap();
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn unrelated_event_type_is_ignored() {
        let manager = SagaManager::new();
        let journal = Arc::new(Journal::default());
        let corr = CorrelationId::new();
        build_two_step(&manager, corr, &journal, false).await;
        manager.start(corr, &checkout_requested(corr)).await.unwrap();

        // A terminal event of some other saga family with our id.
        manager
            .handle_event(&Event::ItemNotFound {
                correlation_id: corr,
                item_id: "i1".into(),
            })
            .await
            .unwrap();

        assert_eq!(journal.entries(), vec!["cmd:subtract_stock"]);
        assert_eq!(manager.active_count().await, 1);
    }

    #[tokio::test]
    async fn command_emission_failure_aborts_with_compensation() {
        let manager = SagaManager::new();
        let journal = Arc::new(Journal::default());
        let corr = CorrelationId::new();
        build_two_step(&manager, corr, &journal, true).await;

        manager.start(corr, &checkout_requested(corr)).await.unwrap();
        manager.handle_event(&stock_subtracted(corr)).await.unwrap();

        // Pay's emission failed after stock completed: stock compensates.
        assert_eq!(
            journal.entries(),
            vec!["cmd:subtract_stock", "cmd:pay", "comp:subtract_stock", "abort"]
        );
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_build_is_rejected() {
        let manager = SagaManager::new();
        let journal = Arc::new(Journal::default());
        let corr = CorrelationId::new();
        build_two_step(&manager, corr, &journal, false).await;

        let steps: Vec<Arc<dyn SagaStep>> = vec![];
        let result = manager
            .build(
                corr,
                steps,
                Arc::new(TestTerminal {
                    label: "commit",
                    journal: journal.clone(),
                }),
                Arc::new(TestTerminal {
                    label: "abort",
                    journal: journal.clone(),
                }),
            )
            .await;
        assert!(matches!(result, Err(SagaError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn compensations_run_in_strictly_decreasing_order() {
        let manager = SagaManager::new();
        let journal = Arc::new(Journal::default());
        let corr = CorrelationId::new();

        let steps: Vec<Arc<dyn SagaStep>> = (0..3)
            .map(|i| {
                Arc::new(TestStep {
                    name: ["one", "two", "three"][i],
                    success: ["S1", "S2", "S3"][i],
                    error: ["E1", "E2", "E3"][i],
                    journal: journal.clone(),
                    fail_command: false,
                }) as Arc<dyn SagaStep>
            })
            .collect();
        manager
            .build(
                corr,
                steps,
                Arc::new(TestTerminal {
                    label: "commit",
                    journal: journal.clone(),
                }),
                Arc::new(TestTerminal {
                    label: "abort",
                    journal: journal.clone(),
                }),
            )
            .await
            .unwrap();

        manager.start(corr, &checkout_requested(corr)).await.unwrap();

        // Two of three steps completed when the abort hits.
        let saga = {
            let mut sagas = manager.sagas.lock().await;
            let saga = sagas.get_mut(&corr).unwrap();
            saga.step_index = 2; // steps one and two completed
            sagas.remove(&corr).unwrap()
        };
        finish_aborted(saga, &checkout_requested(corr)).await;

        assert_eq!(
            journal.entries(),
            vec!["cmd:one", "comp:two", "comp:one", "abort"]
        );
    }
}
