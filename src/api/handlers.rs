use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::api::AppState;
use crate::error::{PaymentError, PaymentResult};
use crate::gateways::{CallbackData, InitiatedPayment};
use crate::orders::PaymentStatus;
use crate::store::{NewOrder, Order, OrderStatus, PaymentLog};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order: Order,
    pub payment: InitiatedPayment,
}

#[derive(Serialize)]
pub struct CallbackResponse {
    pub order_ref: String,
    pub status: OrderStatus,
    pub duplicate: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.environment.clone(),
    })
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(spec): Json<NewOrder>,
) -> PaymentResult<(StatusCode, Json<Order>)> {
    let order = state.orders.create_order(spec).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(State(state): State<AppState>) -> PaymentResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list_orders().await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_ref): Path<String>,
) -> PaymentResult<Json<Order>> {
    Ok(Json(state.orders.get_order(&order_ref).await?))
}

pub async fn checkout(
    State(state): State<AppState>,
    Path((order_ref, method)): Path<(String, String)>,
) -> PaymentResult<Json<CheckoutResponse>> {
    let payment = state.orders.initiate_checkout(&order_ref, &method).await?;
    let order = state.orders.get_order(&order_ref).await?;
    Ok(Json(CheckoutResponse { order, payment }))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(order_ref): Path<String>,
) -> PaymentResult<Json<PaymentStatus>> {
    Ok(Json(state.orders.payment_status(&order_ref).await?))
}

pub async fn payment_logs(
    State(state): State<AppState>,
    Path(order_ref): Path<String>,
) -> PaymentResult<Json<Vec<PaymentLog>>> {
    Ok(Json(state.orders.payment_logs(&order_ref).await?))
}

/// Redirect-style success callback: `?oid=...&amt=...&refId=...`.
pub async fn esewa_success(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> PaymentResult<Json<CallbackResponse>> {
    let callback = CallbackData {
        order_ref: params.get("oid").cloned(),
        amount: params.get("amt").cloned(),
        reference_id: params.get("refId").cloned(),
        token: None,
        raw: json!(params),
    };
    reconcile(&state, "esewa", callback).await
}

pub async fn esewa_failure(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> PaymentResult<Json<CallbackResponse>> {
    cancel(&state, "esewa", params.get("oid")).await
}

/// Token-style success callback: Khalti redirects back with the `pidx` it
/// issued at initiation, plus the order reference it was given.
pub async fn khalti_success(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> PaymentResult<Json<CallbackResponse>> {
    let callback = CallbackData {
        order_ref: params.get("purchase_order_id").cloned(),
        amount: None,
        reference_id: None,
        token: params.get("pidx").cloned(),
        raw: json!(params),
    };
    reconcile(&state, "khalti", callback).await
}

pub async fn khalti_failure(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> PaymentResult<Json<CallbackResponse>> {
    cancel(&state, "khalti", params.get("purchase_order_id")).await
}

/// Server-to-server variant of the success callback; drives the same lookup
/// path as the redirect.
pub async fn khalti_webhook(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> PaymentResult<Json<CallbackResponse>> {
    let callback = CallbackData {
        order_ref: body
            .get("purchase_order_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        amount: None,
        reference_id: None,
        token: body.get("pidx").and_then(Value::as_str).map(str::to_string),
        raw: body,
    };
    reconcile(&state, "khalti", callback).await
}

async fn reconcile(
    state: &AppState,
    method: &str,
    callback: CallbackData,
) -> PaymentResult<Json<CallbackResponse>> {
    let reconciliation = state.engine.handle_callback(method, callback).await?;
    Ok(Json(CallbackResponse {
        order_ref: reconciliation.order.order_ref.clone(),
        status: reconciliation.order.status,
        duplicate: reconciliation.duplicate,
    }))
}

async fn cancel(
    state: &AppState,
    method: &str,
    order_ref: Option<&String>,
) -> PaymentResult<Json<CallbackResponse>> {
    let order_ref = order_ref.ok_or_else(|| PaymentError::missing_param("order reference"))?;
    let order = state.engine.handle_cancellation(method, order_ref).await?;
    Ok(Json(CallbackResponse {
        order_ref: order.order_ref.clone(),
        status: order.status,
        duplicate: false,
    }))
}
