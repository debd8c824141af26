//! The wire event model.
//!
//! Bus payloads are UTF-8 JSON objects with mandatory `type` and
//! `correlation_id` fields; the remaining fields are per-type payload.
//! The enum is internally tagged so the serialized form matches that
//! contract exactly.

use serde::{Deserialize, Serialize};

use crate::ids::CorrelationId;

/// One order line: `(item_id, quantity)`. Serializes as a two-element array.
pub type ItemLine = (String, u32);

/// Every event that can cross the bus, commands and outcomes alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Starts the checkout distributed transaction (Order → Orchestrator).
    CheckoutRequested {
        correlation_id: CorrelationId,
        order_id: String,
        user_id: String,
        items: Vec<ItemLine>,
        amount: u64,
    },

    /// Command: subtract the given quantities from stock.
    SubtractStock {
        correlation_id: CorrelationId,
        order_id: String,
        items: Vec<ItemLine>,
    },

    /// Compensation command: add the given quantities back to stock.
    AddStock {
        correlation_id: CorrelationId,
        order_id: String,
        items: Vec<ItemLine>,
    },

    /// Stock confirms the subtraction was applied.
    StockSubtracted {
        correlation_id: CorrelationId,
        order_id: String,
        items: Vec<ItemLine>,
    },

    /// Stock rejects the subtraction (missing item, insufficient stock, DB error).
    StockError {
        correlation_id: CorrelationId,
        order_id: String,
        items: Vec<ItemLine>,
        error: String,
    },

    /// Stock confirms the compensation was applied.
    StockCompensated {
        correlation_id: CorrelationId,
        order_id: String,
        items: Vec<ItemLine>,
    },

    /// Stock could not apply the compensation. Alertable; no retry.
    StockCompensationFailed {
        correlation_id: CorrelationId,
        order_id: String,
        items: Vec<ItemLine>,
        error: String,
    },

    /// Command: look up an item's stock and price.
    FindItem {
        correlation_id: CorrelationId,
        item_id: String,
        quantity: u32,
        order_id: String,
    },

    /// Item lookup succeeded. `total_cost` is absent as published by Stock
    /// and filled in by the Order response consumer once the order has been
    /// updated.
    ItemFound {
        correlation_id: CorrelationId,
        item_id: String,
        stock: u32,
        price: u64,
        quantity: u32,
        order_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_cost: Option<u64>,
    },

    /// Item lookup failed.
    ItemNotFound {
        correlation_id: CorrelationId,
        item_id: String,
    },

    /// Command: withdraw `amount` from the user's credit.
    Pay {
        correlation_id: CorrelationId,
        user_id: String,
        amount: u64,
        order_id: String,
    },

    /// Compensation command: return `amount` to the user's credit.
    Refund {
        correlation_id: CorrelationId,
        user_id: String,
        amount: u64,
        order_id: String,
    },

    /// Payment confirms the withdrawal; `credit` is the balance after it.
    PaymentProcessed {
        correlation_id: CorrelationId,
        user_id: String,
        amount: u64,
        order_id: String,
        credit: u64,
    },

    /// Payment rejects the withdrawal.
    PaymentError {
        correlation_id: CorrelationId,
        user_id: String,
        amount: u64,
        order_id: String,
        error: String,
    },

    /// Payment confirms the refund; `credit` is the balance after it.
    RefundProcessed {
        correlation_id: CorrelationId,
        user_id: String,
        amount: u64,
        order_id: String,
        credit: u64,
    },

    /// Payment could not apply the refund. Alertable; no retry.
    RefundError {
        correlation_id: CorrelationId,
        user_id: String,
        amount: u64,
        order_id: String,
        error: String,
    },

    /// Terminal: the checkout saga committed (Orchestrator → Order).
    CheckoutSuccess {
        correlation_id: CorrelationId,
        order_id: String,
    },

    /// Terminal: the checkout saga aborted (Orchestrator → Order).
    CheckoutFailed {
        correlation_id: CorrelationId,
        order_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Event {
    /// The wire `type` tag of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::CheckoutRequested { .. } => names::CHECKOUT_REQUESTED,
            Event::SubtractStock { .. } => names::SUBTRACT_STOCK,
            Event::AddStock { .. } => names::ADD_STOCK,
            Event::StockSubtracted { .. } => names::STOCK_SUBTRACTED,
            Event::StockError { .. } => names::STOCK_ERROR,
            Event::StockCompensated { .. } => names::STOCK_COMPENSATED,
            Event::StockCompensationFailed { .. } => names::STOCK_COMPENSATION_FAILED,
            Event::FindItem { .. } => names::FIND_ITEM,
            Event::ItemFound { .. } => names::ITEM_FOUND,
            Event::ItemNotFound { .. } => names::ITEM_NOT_FOUND,
            Event::Pay { .. } => names::PAY,
            Event::Refund { .. } => names::REFUND,
            Event::PaymentProcessed { .. } => names::PAYMENT_PROCESSED,
            Event::PaymentError { .. } => names::PAYMENT_ERROR,
            Event::RefundProcessed { .. } => names::REFUND_PROCESSED,
            Event::RefundError { .. } => names::REFUND_ERROR,
            Event::CheckoutSuccess { .. } => names::CHECKOUT_SUCCESS,
            Event::CheckoutFailed { .. } => names::CHECKOUT_FAILED,
        }
    }

    /// The transaction this event belongs to.
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Event::CheckoutRequested { correlation_id, .. }
            | Event::SubtractStock { correlation_id, .. }
            | Event::AddStock { correlation_id, .. }
            | Event::StockSubtracted { correlation_id, .. }
            | Event::StockError { correlation_id, .. }
            | Event::StockCompensated { correlation_id, .. }
            | Event::StockCompensationFailed { correlation_id, .. }
            | Event::FindItem { correlation_id, .. }
            | Event::ItemFound { correlation_id, .. }
            | Event::ItemNotFound { correlation_id, .. }
            | Event::Pay { correlation_id, .. }
            | Event::Refund { correlation_id, .. }
            | Event::PaymentProcessed { correlation_id, .. }
            | Event::PaymentError { correlation_id, .. }
            | Event::RefundProcessed { correlation_id, .. }
            | Event::RefundError { correlation_id, .. }
            | Event::CheckoutSuccess { correlation_id, .. }
            | Event::CheckoutFailed { correlation_id, .. } => *correlation_id,
        }
    }

    /// Key under which a participant records the outcome it produced for
    /// this command, so a redelivery replays the same outcome.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.event_type(), self.correlation_id())
    }
}

/// Wire names of every event type.
pub mod names {
    // Commands
    pub const CHECKOUT_REQUESTED: &str = "CheckoutRequested";
    pub const SUBTRACT_STOCK: &str = "SubtractStock";
    pub const ADD_STOCK: &str = "AddStock";
    pub const FIND_ITEM: &str = "FindItem";
    pub const PAY: &str = "Pay";
    pub const REFUND: &str = "Refund";

    // Outcomes
    pub const STOCK_SUBTRACTED: &str = "StockSubtracted";
    pub const STOCK_ERROR: &str = "StockError";
    pub const STOCK_COMPENSATED: &str = "StockCompensated";
    pub const STOCK_COMPENSATION_FAILED: &str = "StockCompensationFailed";
    pub const ITEM_FOUND: &str = "ItemFound";
    pub const ITEM_NOT_FOUND: &str = "ItemNotFound";
    pub const PAYMENT_PROCESSED: &str = "PaymentProcessed";
    pub const PAYMENT_ERROR: &str = "PaymentError";
    pub const REFUND_PROCESSED: &str = "RefundProcessed";
    pub const REFUND_ERROR: &str = "RefundError";

    // Terminal
    pub const CHECKOUT_SUCCESS: &str = "CheckoutSuccess";
    pub const CHECKOUT_FAILED: &str = "CheckoutFailed";
}
