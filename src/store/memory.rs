//! In-memory ledger for tests and local runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::error::{StoreError, StoreResult};
use crate::store::order::{generate_order_ref, NewOrder, Order, OrderMutation, OrderStatus};
use crate::store::payment_log::{NewPaymentLog, PaymentLog};
use crate::store::LedgerStore;

/// Thread-safe in-memory ledger keyed by `order_ref`.
///
/// The write lock makes each `update_order` check-and-apply atomic, giving
/// the same compare-and-set semantics as the Postgres conditional UPDATE.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    logs: Arc<RwLock<Vec<PaymentLog>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_order(&self, spec: NewOrder) -> StoreResult<Order> {
        let mut orders = self.orders.write().await;

        let mut order_ref = generate_order_ref();
        while orders.contains_key(&order_ref) {
            order_ref = generate_order_ref();
        }

        let now = Utc::now();
        let currency = spec.currency();
        let order = Order {
            id: Uuid::new_v4(),
            order_ref: order_ref.clone(),
            name: spec.name,
            email: spec.email,
            phone: spec.phone,
            address: spec.address,
            total_price: spec.total_price,
            currency,
            status: OrderStatus::Pending,
            is_paid: false,
            paid_amount: None,
            payment_method: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        };
        orders.insert(order_ref, order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_ref: &str) -> StoreResult<Order> {
        let orders = self.orders.read().await;
        orders
            .get(order_ref)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", order_ref))
    }

    async fn update_order(&self, order_ref: &str, mutation: OrderMutation) -> StoreResult<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_ref)
            .ok_or_else(|| StoreError::not_found("order", order_ref))?;

        if !mutation.allowed_from().contains(&order.status) {
            return Err(StoreError::conflict(order_ref, order.status));
        }

        mutation.apply(order, Utc::now());
        Ok(order.clone())
    }

    async fn append_payment_log(&self, entry: NewPaymentLog) -> StoreResult<Uuid> {
        // Mirror the foreign-key constraint of the Postgres schema.
        {
            let orders = self.orders.read().await;
            if !orders.contains_key(&entry.order_ref) {
                return Err(StoreError::not_found("order", entry.order_ref));
            }
        }

        let log = PaymentLog {
            id: Uuid::new_v4(),
            order_ref: entry.order_ref,
            payment_method: entry.payment_method,
            transaction_id: entry.transaction_id,
            amount: entry.amount,
            currency: entry.currency,
            status: entry.status,
            gateway_response: entry.gateway_response,
            created_at: Utc::now(),
        };
        let id = log.id;
        self.logs.write().await.push(log);
        Ok(id)
    }

    async fn payment_logs(&self, order_ref: &str) -> StoreResult<Vec<PaymentLog>> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .rev()
            .filter(|log| log.order_ref == order_ref)
            .cloned()
            .collect())
    }

    async fn list_orders(&self) -> StoreResult<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut all: Vec<Order> = orders.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}
