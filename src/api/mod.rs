//! Thin HTTP boundary over the reconciliation core.
//!
//! Handlers adapt transport shapes (query parameters, JSON bodies) to the
//! core contracts and nothing else; no payment decision lives here.

pub mod handlers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::engine::ReconciliationEngine;
use crate::error::PaymentError;
use crate::orders::OrderService;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub engine: Arc<ReconciliationEngine>,
    pub environment: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/orders", post(handlers::create_order).get(handlers::list_orders))
        .route("/orders/:order_ref", get(handlers::get_order))
        .route(
            "/orders/:order_ref/checkout/:method",
            post(handlers::checkout),
        )
        .route("/orders/:order_ref/status", get(handlers::payment_status))
        .route("/orders/:order_ref/logs", get(handlers::payment_logs))
        .route("/callbacks/esewa/success", get(handlers::esewa_success))
        .route("/callbacks/esewa/failure", get(handlers::esewa_failure))
        .route("/callbacks/khalti/success", get(handlers::khalti_success))
        .route("/callbacks/khalti/failure", get(handlers::khalti_failure))
        .route("/callbacks/khalti/webhook", post(handlers::khalti_webhook))
        .with_state(state)
}

impl PaymentError {
    fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::UnknownMethod { .. } => StatusCode::BAD_REQUEST,
            Self::OrderNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidState { .. } => StatusCode::CONFLICT,
            Self::AmountMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Remote { .. } | Self::MalformedResponse { .. } => StatusCode::BAD_GATEWAY,
            Self::Store(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
