//! The orchestrator's consumer: builds a saga per `CheckoutRequested` and
//! routes every other event to the engine.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{EventBus, EventHandler, HandlerError};
use common::Event;

use crate::checkout::{CheckoutContext, build_checkout_saga};
use crate::engine::SagaManager;
use crate::error::Result;

/// Orchestrator service. Subscribe it to the order operations topic and
/// both participant response topics.
pub struct Orchestrator<B> {
    manager: SagaManager,
    bus: Arc<B>,
}

impl<B> Orchestrator<B>
where
    B: EventBus + 'static,
{
    pub fn new(bus: Arc<B>) -> Self {
        Self {
            manager: SagaManager::new(),
            bus,
        }
    }

    /// Sagas currently in flight (for health/introspection).
    pub async fn active_sagas(&self) -> usize {
        self.manager.active_count().await
    }

    #[tracing::instrument(skip(self, context, initial), fields(correlation_id = %context.correlation_id, order_id = %context.order_id))]
    async fn start_checkout(&self, context: CheckoutContext, initial: &Event) -> Result<()> {
        let correlation_id = context.correlation_id;
        let (steps, commit, abort) = build_checkout_saga(self.bus.clone(), context);
        self.manager
            .build(correlation_id, steps, commit, abort)
            .await?;
        self.manager.start(correlation_id, initial).await
    }
}

#[async_trait]
impl<B> EventHandler for Orchestrator<B>
where
    B: EventBus + 'static,
{
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
        match &event {
            Event::CheckoutRequested {
                correlation_id,
                order_id,
                user_id,
                items,
                amount,
            } => {
                let context = CheckoutContext {
                    correlation_id: *correlation_id,
                    order_id: order_id.clone(),
                    user_id: user_id.clone(),
                    items: items.clone(),
                    amount: *amount,
                };
                self.start_checkout(context, &event).await.map_err(Into::into)
            }
            // Compensation acknowledgements arrive after their saga was
            // destroyed; keep them away from the engine's orphan warning.
            Event::StockCompensated { correlation_id, .. }
            | Event::RefundProcessed { correlation_id, .. } => {
                tracing::info!(%correlation_id, event_type = event.event_type(), "compensation acknowledged");
                Ok(())
            }
            Event::StockCompensationFailed {
                correlation_id,
                error,
                ..
            }
            | Event::RefundError {
                correlation_id,
                error,
                ..
            } => {
                // Alertable: a forward step is un-reversed and nothing will
                // retry it.
                metrics::counter!("compensation_failures_total").increment(1);
                tracing::error!(%correlation_id, event_type = event.event_type(), %error, "compensation failed");
                Ok(())
            }
            _ => self.manager.handle_event(&event).await.map_err(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::InMemoryEventBus;
    use common::{CorrelationId, topics};

    fn checkout_requested(corr: CorrelationId) -> Event {
        Event::CheckoutRequested {
            correlation_id: corr,
            order_id: "o1".into(),
            user_id: "u1".into(),
            items: vec![("i1".into(), 2)],
            amount: 10,
        }
    }

    #[tokio::test]
    async fn checkout_request_emits_first_command() {
        let bus = Arc::new(InMemoryEventBus::new());
        let orchestrator = Orchestrator::new(bus.clone());
        let corr = CorrelationId::new();

        orchestrator.handle(checkout_requested(corr)).await.unwrap();

        assert_eq!(orchestrator.active_sagas().await, 1);
        let commands = bus.published_on(topics::STOCK_OPERATIONS);
        match &commands[0] {
            Event::SubtractStock { order_id, items, .. } => {
                assert_eq!(order_id, "o1");
                assert_eq!(items, &vec![("i1".to_string(), 2)]);
            }
            other => panic!("expected SubtractStock, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_success_flow_commits() {
        let bus = Arc::new(InMemoryEventBus::new());
        let orchestrator = Orchestrator::new(bus.clone());
        let corr = CorrelationId::new();

        orchestrator.handle(checkout_requested(corr)).await.unwrap();
        orchestrator
            .handle(Event::StockSubtracted {
                correlation_id: corr,
                order_id: "o1".into(),
                items: vec![("i1".into(), 2)],
            })
            .await
            .unwrap();
        orchestrator
            .handle(Event::PaymentProcessed {
                correlation_id: corr,
                user_id: "u1".into(),
                amount: 10,
                order_id: "o1".into(),
                credit: 90,
            })
            .await
            .unwrap();

        assert_eq!(orchestrator.active_sagas().await, 0);
        let responses = bus.published_on(topics::ORCHESTRATOR_RESPONSES);
        assert!(matches!(responses[0], Event::CheckoutSuccess { .. }));
        // Pay was issued on the payment topic in between.
        assert!(matches!(
            bus.published_on(topics::PAYMENT_OPERATIONS)[0],
            Event::Pay { .. }
        ));
    }

    #[tokio::test]
    async fn payment_failure_compensates_stock_and_fails_checkout() {
        let bus = Arc::new(InMemoryEventBus::new());
        let orchestrator = Orchestrator::new(bus.clone());
        let corr = CorrelationId::new();

        orchestrator.handle(checkout_requested(corr)).await.unwrap();
        orchestrator
            .handle(Event::StockSubtracted {
                correlation_id: corr,
                order_id: "o1".into(),
                items: vec![("i1".into(), 2)],
            })
            .await
            .unwrap();
        orchestrator
            .handle(Event::PaymentError {
                correlation_id: corr,
                user_id: "u1".into(),
                amount: 10,
                order_id: "o1".into(),
                error: "INSUFFICIENT FUNDS".into(),
            })
            .await
            .unwrap();

        assert_eq!(orchestrator.active_sagas().await, 0);

        let stock_commands = bus.published_on(topics::STOCK_OPERATIONS);
        assert!(matches!(stock_commands[1], Event::AddStock { .. }));

        match &bus.published_on(topics::ORCHESTRATOR_RESPONSES)[0] {
            Event::CheckoutFailed { error, .. } => {
                assert_eq!(error.as_deref(), Some("INSUFFICIENT FUNDS"));
            }
            other => panic!("expected CheckoutFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stock_failure_fails_checkout_without_payment() {
        let bus = Arc::new(InMemoryEventBus::new());
        let orchestrator = Orchestrator::new(bus.clone());
        let corr = CorrelationId::new();

        orchestrator.handle(checkout_requested(corr)).await.unwrap();
        orchestrator
            .handle(Event::StockError {
                correlation_id: corr,
                order_id: "o1".into(),
                items: vec![("i1".into(), 2)],
                error: "Insufficient stock for item: i1".into(),
            })
            .await
            .unwrap();

        assert_eq!(orchestrator.active_sagas().await, 0);
        assert!(bus.published_on(topics::PAYMENT_OPERATIONS).is_empty());
        // No completed step, so no compensation either.
        assert_eq!(bus.published_on(topics::STOCK_OPERATIONS).len(), 1);
        assert!(matches!(
            bus.published_on(topics::ORCHESTRATOR_RESPONSES)[0],
            Event::CheckoutFailed { .. }
        ));
    }

    #[tokio::test]
    async fn compensation_acknowledgements_do_not_reach_the_engine() {
        let bus = Arc::new(InMemoryEventBus::new());
        let orchestrator = Orchestrator::new(bus.clone());
        let corr = CorrelationId::new();

        // No saga registered; these must not trip the orphan path nor fail.
        orchestrator
            .handle(Event::StockCompensated {
                correlation_id: corr,
                order_id: "o1".into(),
                items: vec![("i1".into(), 2)],
            })
            .await
            .unwrap();
        orchestrator
            .handle(Event::RefundError {
                correlation_id: corr,
                user_id: "u1".into(),
                amount: 10,
                order_id: "o1".into(),
                error: "USER NOT FOUND".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn late_outcome_for_finished_saga_is_dropped() {
        let bus = Arc::new(InMemoryEventBus::new());
        let orchestrator = Orchestrator::new(bus.clone());
        let corr = CorrelationId::new();

        orchestrator.handle(checkout_requested(corr)).await.unwrap();
        orchestrator
            .handle(Event::StockError {
                correlation_id: corr,
                order_id: "o1".into(),
                items: vec![("i1".into(), 2)],
                error: "Insufficient stock for item: i1".into(),
            })
            .await
            .unwrap();

        // The saga is gone; a duplicate error outcome must be absorbed.
        orchestrator
            .handle(Event::StockError {
                correlation_id: corr,
                order_id: "o1".into(),
                items: vec![("i1".into(), 2)],
                error: "Insufficient stock for item: i1".into(),
            })
            .await
            .unwrap();

        assert_eq!(bus.published_on(topics::ORCHESTRATOR_RESPONSES).len(), 1);
    }
}
