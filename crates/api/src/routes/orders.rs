//! Order creation, lookup and decision endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use checkpoint_store::CheckpointStore;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Money, Order, ProductId};
use saga::{Delivery, InMemoryOrderActivities, SagaOrchestrator, SignalKind};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Orchestrator over a runtime-selected checkpoint store.
pub type Orchestrator = SagaOrchestrator<Arc<dyn CheckpointStore>, InMemoryOrderActivities>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub activities: InMemoryOrderActivities,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub amount: f64,
    pub products: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub amount: f64,
    pub products: Vec<String>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            status: order.status().to_string(),
            created_at: order.created_at(),
            amount: order.amount().as_decimal(),
            products: order
                .products()
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusResponse {
    pub message: String,
    pub order_id: String,
    pub status: String,
}

// -- Handlers --

/// POST /order: create an order and start its saga.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let amount = Money::from_decimal(req.amount)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid amount: {}", req.amount)))?;
    let products = req.products.into_iter().map(ProductId::from).collect();
    let order = Order::new(amount, products)?;
    let response = OrderResponse::from(&order);

    let handle = state.orchestrator.start(order).await?;
    tracing::info!(order_id = %handle.order_id(), %amount, "order created");

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /order/{id}: the order with the status projected from its saga.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let saga = state
        .orchestrator
        .get_saga(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    let order = saga
        .order()
        .ok_or_else(|| ApiError::Internal(format!("Saga {id} has no order")))?;

    Ok(Json(OrderResponse::from(order)))
}

/// PUT /order/{id}/status: deliver a `complete` or `cancel` decision.
#[tracing::instrument(skip(state, req))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<UpdateStatusResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let kind: SignalKind = req.status.parse()?;

    match state.orchestrator.signal(order_id, kind).await? {
        Delivery::Accepted => Ok(Json(UpdateStatusResponse {
            message: format!("Order status updated to {kind} successfully"),
            order_id: order_id.to_string(),
            status: kind.to_string(),
        })),
        Delivery::Dropped => Err(ApiError::Conflict(format!(
            "A decision is already pending for order {order_id}"
        ))),
    }
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
