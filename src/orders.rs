//! Order lifecycle operations: creation, checkout initiation and queries.
//!
//! Together with the reconciliation engine this is the only code that
//! transitions `Order.status`.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::AuditLogger;
use crate::error::{PaymentError, PaymentResult};
use crate::gateways::{GatewayRegistry, InitiatedPayment};
use crate::store::{LedgerStore, NewOrder, Order, OrderMutation, OrderStatus, PaymentLog};

/// Read-only payment state of an order, as exposed to the boundary.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatus {
    pub order_ref: String,
    pub is_paid: bool,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
}

pub struct OrderService {
    store: Arc<dyn LedgerStore>,
    audit: AuditLogger,
    gateways: GatewayRegistry,
}

impl OrderService {
    pub fn new(store: Arc<dyn LedgerStore>, gateways: GatewayRegistry) -> Self {
        let audit = AuditLogger::new(store.clone());
        Self {
            store,
            audit,
            gateways,
        }
    }

    pub async fn create_order(&self, spec: NewOrder) -> PaymentResult<Order> {
        spec.validate().map_err(PaymentError::validation)?;
        let order = self.store.create_order(spec).await?;
        info!(order_ref = %order.order_ref, total_price = order.total_price, "order created");
        Ok(order)
    }

    /// Start the external payment flow for an order.
    ///
    /// Allowed while the order is `pending` (moving it to `processing`) or
    /// already `processing` (a user retrying an abandoned flow). Terminal
    /// orders reject the attempt with a logged failure.
    pub async fn initiate_checkout(
        &self,
        order_ref: &str,
        method: &str,
    ) -> PaymentResult<InitiatedPayment> {
        let gateway = self.gateways.resolve(method)?;
        let method = gateway.method();

        let order = self
            .store
            .get_order(order_ref)
            .await
            .map_err(|e| PaymentError::from_store(order_ref, e))?;

        if !order.status.accepts_payment_events() {
            let err = PaymentError::InvalidState {
                order_ref: order_ref.to_string(),
                event: "checkout initiation",
                status: order.status.to_string(),
            };
            self.audit
                .failure(order_ref, method, &err, json!({"requested": "initiate"}))
                .await;
            return Err(err);
        }

        match gateway.initiate_payment(&order).await {
            Ok(initiated) => {
                self.audit
                    .initiated(
                        &order,
                        method,
                        initiated.transaction_id.clone(),
                        initiated.raw_response.clone(),
                    )
                    .await;

                if order.status == OrderStatus::Pending {
                    if let Err(err) = self
                        .store
                        .update_order(order_ref, OrderMutation::MarkProcessing)
                        .await
                    {
                        // A verification can land while the customer is still
                        // on the checkout page; losing this race is harmless.
                        warn!(order_ref, %method, "order moved during initiation: {}", err);
                    }
                }

                info!(order_ref, %method, "checkout initiated");
                Ok(initiated)
            }
            Err(err) => {
                self.audit
                    .failure(order_ref, method, &err, json!({"requested": "initiate"}))
                    .await;
                Err(err)
            }
        }
    }

    pub async fn payment_status(&self, order_ref: &str) -> PaymentResult<PaymentStatus> {
        let order = self
            .store
            .get_order(order_ref)
            .await
            .map_err(|e| PaymentError::from_store(order_ref, e))?;
        Ok(PaymentStatus {
            order_ref: order.order_ref,
            is_paid: order.is_paid,
            payment_method: order.payment_method,
            transaction_id: order.transaction_id,
        })
    }

    pub async fn get_order(&self, order_ref: &str) -> PaymentResult<Order> {
        self.store
            .get_order(order_ref)
            .await
            .map_err(|e| PaymentError::from_store(order_ref, e))
    }

    pub async fn list_orders(&self) -> PaymentResult<Vec<Order>> {
        Ok(self.store.list_orders().await?)
    }

    pub async fn payment_logs(&self, order_ref: &str) -> PaymentResult<Vec<PaymentLog>> {
        // Surface a 404 for unknown orders instead of an empty history.
        self.get_order(order_ref).await?;
        Ok(self.store.payment_logs(order_ref).await?)
    }
}
