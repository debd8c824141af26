//! Topic names. These are part of the external contract between services;
//! every event inside a saga is published with the correlation id as the
//! message key.

/// Order → Orchestrator, carries `CheckoutRequested`.
pub const ORDER_OPERATIONS: &str = "order-operations";

/// Orchestrator → Order, carries `CheckoutSuccess` / `CheckoutFailed`.
pub const ORCHESTRATOR_RESPONSES: &str = "orchestrator-responses";

/// Orchestrator or Order → Stock.
pub const STOCK_OPERATIONS: &str = "stock-operations";

/// Stock → Orchestrator or Order.
pub const STOCK_RESPONSES: &str = "stock-responses";

/// Orchestrator → Payment.
pub const PAYMENT_OPERATIONS: &str = "payment-operations";

/// Payment → Orchestrator.
pub const PAYMENT_RESPONSES: &str = "payment-responses";
