//! Postgres ledger implementation.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE orders (
//!     id UUID PRIMARY KEY,
//!     order_ref TEXT NOT NULL UNIQUE,
//!     name TEXT NOT NULL,
//!     email TEXT,
//!     phone TEXT,
//!     address TEXT,
//!     total_price BIGINT NOT NULL,
//!     currency TEXT NOT NULL,
//!     status TEXT NOT NULL,
//!     is_paid BOOLEAN NOT NULL DEFAULT FALSE,
//!     paid_amount BIGINT,
//!     payment_method TEXT,
//!     transaction_id TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE payment_logs (
//!     id UUID PRIMARY KEY,
//!     order_ref TEXT NOT NULL REFERENCES orders (order_ref) ON DELETE CASCADE,
//!     payment_method TEXT NOT NULL,
//!     transaction_id TEXT,
//!     amount BIGINT NOT NULL,
//!     currency TEXT NOT NULL,
//!     status TEXT NOT NULL,
//!     gateway_response JSONB NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! Status transitions rely on a conditional UPDATE (`status = ANY(...)`) so
//! that concurrent writers racing on the same order resolve to one winner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::store::error::{StoreError, StoreResult};
use crate::store::order::{generate_order_ref, NewOrder, Order, OrderMutation, OrderStatus};
use crate::store::payment_log::{NewPaymentLog, PaymentLog, PaymentLogStatus};
use crate::store::LedgerStore;

const ORDER_COLUMNS: &str = "id, order_ref, name, email, phone, address, total_price, currency, \
     status, is_paid, paid_amount, payment_method, transaction_id, created_at, updated_at";

const LOG_COLUMNS: &str =
    "id, order_ref, payment_method, transaction_id, amount, currency, status, gateway_response, created_at";

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    order_ref: String,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    total_price: i64,
    currency: String,
    status: String,
    is_paid: bool,
    paid_amount: Option<i64>,
    payment_method: Option<String>,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::parse(&row.status)
            .ok_or_else(|| StoreError::query(format!("unknown order status: {}", row.status)))?;
        Ok(Order {
            id: row.id,
            order_ref: row.order_ref,
            name: row.name,
            email: row.email,
            phone: row.phone,
            address: row.address,
            total_price: row.total_price,
            currency: row.currency,
            status,
            is_paid: row.is_paid,
            paid_amount: row.paid_amount,
            payment_method: row.payment_method,
            transaction_id: row.transaction_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentLogRow {
    id: Uuid,
    order_ref: String,
    payment_method: String,
    transaction_id: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    gateway_response: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentLogRow> for PaymentLog {
    type Error = StoreError;

    fn try_from(row: PaymentLogRow) -> Result<Self, Self::Error> {
        let status = PaymentLogStatus::parse(&row.status)
            .ok_or_else(|| StoreError::query(format!("unknown log status: {}", row.status)))?;
        Ok(PaymentLog {
            id: row.id,
            order_ref: row.order_ref,
            payment_method: row.payment_method,
            transaction_id: row.transaction_id,
            amount: row.amount,
            currency: row.currency,
            status,
            gateway_response: row.gateway_response,
            created_at: row.created_at,
        })
    }
}

fn allowed_as_strings(mutation: &OrderMutation) -> Vec<String> {
    mutation
        .allowed_from()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn create_order(&self, spec: NewOrder) -> StoreResult<Order> {
        let currency = spec.currency();
        let order_ref = generate_order_ref();

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (id, order_ref, name, email, phone, address, total_price, currency, status, is_paid) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&order_ref)
        .bind(&spec.name)
        .bind(&spec.email)
        .bind(&spec.phone)
        .bind(&spec.address)
        .bind(spec.total_price)
        .bind(&currency)
        .bind(OrderStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        row.try_into()
    }

    async fn get_order(&self, order_ref: &str) -> StoreResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_ref = $1"
        ))
        .bind(order_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::not_found("order", order_ref)),
        }
    }

    async fn update_order(&self, order_ref: &str, mutation: OrderMutation) -> StoreResult<Order> {
        let allowed = allowed_as_strings(&mutation);

        let row = match &mutation {
            OrderMutation::MarkPaid {
                amount,
                payment_method,
                transaction_id,
            } => {
                sqlx::query_as::<_, OrderRow>(&format!(
                    "UPDATE orders \
                     SET status = 'paid', is_paid = TRUE, paid_amount = $2, \
                         payment_method = $3, transaction_id = $4, updated_at = NOW() \
                     WHERE order_ref = $1 AND status = ANY($5) \
                     RETURNING {ORDER_COLUMNS}"
                ))
                .bind(order_ref)
                .bind(amount)
                .bind(payment_method)
                .bind(transaction_id)
                .bind(&allowed)
                .fetch_optional(&self.pool)
                .await
            }
            other => {
                sqlx::query_as::<_, OrderRow>(&format!(
                    "UPDATE orders SET status = $2, updated_at = NOW() \
                     WHERE order_ref = $1 AND status = ANY($3) \
                     RETURNING {ORDER_COLUMNS}"
                ))
                .bind(order_ref)
                .bind(other.target().as_str())
                .bind(&allowed)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => row.try_into(),
            // Zero rows touched: either the order is gone or another writer
            // already moved it. Re-read to tell the two apart.
            None => {
                let current = self.get_order(order_ref).await?;
                Err(StoreError::conflict(order_ref, current.status))
            }
        }
    }

    async fn append_payment_log(&self, entry: NewPaymentLog) -> StoreResult<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO payment_logs \
             (id, order_ref, payment_method, transaction_id, amount, currency, status, gateway_response) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&entry.order_ref)
        .bind(&entry.payment_method)
        .bind(&entry.transaction_id)
        .bind(entry.amount)
        .bind(&entry.currency)
        .bind(entry.status.as_str())
        .bind(&entry.gateway_response)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(id)
    }

    async fn payment_logs(&self, order_ref: &str) -> StoreResult<Vec<PaymentLog>> {
        let rows = sqlx::query_as::<_, PaymentLogRow>(&format!(
            "SELECT {LOG_COLUMNS} FROM payment_logs WHERE order_ref = $1 ORDER BY created_at DESC"
        ))
        .bind(order_ref)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_orders(&self) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
