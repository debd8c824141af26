//! The checkout saga: subtract stock, then withdraw payment.
//!
//! Forward and compensation commands are built from the retained
//! `CheckoutRequested` payload rather than from the triggering event: the
//! intermediate outcomes do not carry the user id or amount, and a command
//! must be self-contained on the wire.

use std::sync::Arc;

use async_trait::async_trait;
use bus::EventBus;
use common::event::names;
use common::{CorrelationId, Event, ItemLine, topics};

use crate::engine::{SagaStep, TerminalAction};
use crate::error::Result;

/// The originating checkout request, retained for the saga's lifetime.
#[derive(Debug, Clone)]
pub struct CheckoutContext {
    pub correlation_id: CorrelationId,
    pub order_id: String,
    pub user_id: String,
    pub items: Vec<ItemLine>,
    pub amount: u64,
}

/// Builds the step list and terminal actions for one checkout saga.
pub fn build_checkout_saga<B>(
    bus: Arc<B>,
    context: CheckoutContext,
) -> (
    Vec<Arc<dyn SagaStep>>,
    Arc<dyn TerminalAction>,
    Arc<dyn TerminalAction>,
)
where
    B: EventBus + 'static,
{
    let context = Arc::new(context);
    let steps: Vec<Arc<dyn SagaStep>> = vec![
        Arc::new(SubtractStockStep {
            bus: bus.clone(),
            context: context.clone(),
        }),
        Arc::new(PayStep {
            bus: bus.clone(),
            context: context.clone(),
        }),
    ];
    let commit = Arc::new(CommitCheckout {
        bus: bus.clone(),
        context: context.clone(),
    });
    let abort = Arc::new(AbortCheckout { bus, context });
    (steps, commit, abort)
}

struct SubtractStockStep<B> {
    bus: Arc<B>,
    context: Arc<CheckoutContext>,
}

#[async_trait]
impl<B: EventBus> SagaStep for SubtractStockStep<B> {
    fn name(&self) -> &'static str {
        "subtract_stock"
    }

    fn success_event(&self) -> &'static str {
        names::STOCK_SUBTRACTED
    }

    fn error_event(&self) -> &'static str {
        names::STOCK_ERROR
    }

    async fn command(&self, _trigger: &Event) -> Result<()> {
        let ctx = &self.context;
        let command = Event::SubtractStock {
            correlation_id: ctx.correlation_id,
            order_id: ctx.order_id.clone(),
            items: ctx.items.clone(),
        };
        self.bus
            .publish(
                topics::STOCK_OPERATIONS,
                &ctx.correlation_id.to_string(),
                &command,
            )
            .await?;
        Ok(())
    }

    async fn compensate(&self, _trigger: &Event) -> Result<()> {
        let ctx = &self.context;
        let command = Event::AddStock {
            correlation_id: ctx.correlation_id,
            order_id: ctx.order_id.clone(),
            items: ctx.items.clone(),
        };
        self.bus
            .publish(
                topics::STOCK_OPERATIONS,
                &ctx.correlation_id.to_string(),
                &command,
            )
            .await?;
        Ok(())
    }
}

struct PayStep<B> {
    bus: Arc<B>,
    context: Arc<CheckoutContext>,
}

#[async_trait]
impl<B: EventBus> SagaStep for PayStep<B> {
    fn name(&self) -> &'static str {
        "pay"
    }

    fn success_event(&self) -> &'static str {
        names::PAYMENT_PROCESSED
    }

    fn error_event(&self) -> &'static str {
        names::PAYMENT_ERROR
    }

    async fn command(&self, _trigger: &Event) -> Result<()> {
        let ctx = &self.context;
        let command = Event::Pay {
            correlation_id: ctx.correlation_id,
            user_id: ctx.user_id.clone(),
            amount: ctx.amount,
            order_id: ctx.order_id.clone(),
        };
        self.bus
            .publish(
                topics::PAYMENT_OPERATIONS,
                &ctx.correlation_id.to_string(),
                &command,
            )
            .await?;
        Ok(())
    }

    async fn compensate(&self, _trigger: &Event) -> Result<()> {
        let ctx = &self.context;
        let command = Event::Refund {
            correlation_id: ctx.correlation_id,
            user_id: ctx.user_id.clone(),
            amount: ctx.amount,
            order_id: ctx.order_id.clone(),
        };
        self.bus
            .publish(
                topics::PAYMENT_OPERATIONS,
                &ctx.correlation_id.to_string(),
                &command,
            )
            .await?;
        Ok(())
    }
}

struct CommitCheckout<B> {
    bus: Arc<B>,
    context: Arc<CheckoutContext>,
}

#[async_trait]
impl<B: EventBus> TerminalAction for CommitCheckout<B> {
    async fn run(&self, _trigger: &Event) -> Result<()> {
        let ctx = &self.context;
        let event = Event::CheckoutSuccess {
            correlation_id: ctx.correlation_id,
            order_id: ctx.order_id.clone(),
        };
        self.bus
            .publish(
                topics::ORCHESTRATOR_RESPONSES,
                &ctx.correlation_id.to_string(),
                &event,
            )
            .await?;
        Ok(())
    }
}

struct AbortCheckout<B> {
    bus: Arc<B>,
    context: Arc<CheckoutContext>,
}

#[async_trait]
impl<B: EventBus> TerminalAction for AbortCheckout<B> {
    async fn run(&self, trigger: &Event) -> Result<()> {
        let ctx = &self.context;
        let event = Event::CheckoutFailed {
            correlation_id: ctx.correlation_id,
            order_id: ctx.order_id.clone(),
            error: failure_reason(trigger),
        };
        self.bus
            .publish(
                topics::ORCHESTRATOR_RESPONSES,
                &ctx.correlation_id.to_string(),
                &event,
            )
            .await?;
        Ok(())
    }
}

/// Pulls the participant's error message out of an error outcome, if any.
fn failure_reason(event: &Event) -> Option<String> {
    match event {
        Event::StockError { error, .. }
        | Event::StockCompensationFailed { error, .. }
        | Event::PaymentError { error, .. }
        | Event::RefundError { error, .. } => Some(error.clone()),
        _ => None,
    }
}
