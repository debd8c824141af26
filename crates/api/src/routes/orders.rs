//! Order endpoints: creation, lookup, and the two saga-triggering routes.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use bus::InMemoryEventBus;
use common::ItemLine;
use kv_store::InMemoryKvStore;
use order::{AddItemOutcome, CheckoutOutcome, OrderRepository, RequestBridge};
use serde::Serialize;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub bridge: RequestBridge<InMemoryKvStore, InMemoryEventBus>,
    pub repo: OrderRepository<InMemoryKvStore>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub paid: bool,
    pub items: Vec<ItemLine>,
    pub user_id: String,
    pub total_cost: u64,
}

#[derive(Serialize)]
pub struct ItemAddedResponse {
    pub order_id: String,
    pub item_id: String,
    pub total_cost: u64,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub status: &'static str,
}

// -- Handlers --

/// POST /orders/create/{user_id} — create a new empty, unpaid order.
#[tracing::instrument(skip(state))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let order_id = state.repo.create_order(&user_id).await?;
    Ok((StatusCode::OK, Json(OrderCreatedResponse { order_id })))
}

/// GET /orders/find/{order_id} — load an order.
#[tracing::instrument(skip(state))]
pub async fn find(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.repo.get(&order_id).await?;
    Ok(Json(OrderResponse {
        order_id,
        paid: order.paid,
        items: order.items,
        user_id: order.user_id,
        total_cost: order.total_cost,
    }))
}

/// POST /orders/addItem/{order_id}/{item_id}/{quantity} — add an item via
/// the stock lookup round trip. 200 with the new total, 400 when the item
/// or order does not exist, 408 on timeout.
#[tracing::instrument(skip(state))]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Path((order_id, item_id, quantity)): Path<(String, String, u32)>,
) -> Result<Json<ItemAddedResponse>, ApiError> {
    match state.bridge.add_item(&order_id, &item_id, quantity).await? {
        AddItemOutcome::Added { total_cost } => Ok(Json(ItemAddedResponse {
            order_id,
            item_id,
            total_cost,
        })),
        AddItemOutcome::NotFound => Err(ApiError::BadRequest(format!(
            "Item: {item_id} does not exist!"
        ))),
        AddItemOutcome::TimedOut => Err(ApiError::Timeout("Timeout error".to_string())),
    }
}

/// POST /orders/checkout/{order_id} — run the checkout saga. 200 when it
/// commits, 400 when it aborts with a business rejection, 408 when no
/// decision arrived in time (the caller must not assume rollback).
#[tracing::instrument(skip(state))]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    match state.bridge.checkout(&order_id).await? {
        CheckoutOutcome::Success => Ok(Json(CheckoutResponse {
            order_id,
            status: "success",
        })),
        CheckoutOutcome::Failed { error } => Err(ApiError::BadRequest(match error {
            Some(reason) => format!("Checkout failed: {reason}"),
            None => "Checkout failed".to_string(),
        })),
        CheckoutOutcome::TimedOut => Err(ApiError::Timeout("Timeout error".to_string())),
    }
}
