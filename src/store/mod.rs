//! Ledger storage for orders and their payment audit trail.
//!
//! The [`LedgerStore`] trait is the only persistence contract the engine
//! knows about. Two implementations ship: [`postgres::PgLedger`] for
//! production and [`memory::InMemoryLedger`] for tests and local runs.

pub mod error;
pub mod memory;
pub mod order;
pub mod payment_log;
pub mod postgres;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error as log_error, info};
use uuid::Uuid;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryLedger;
pub use order::{NewOrder, Order, OrderMutation, OrderStatus, DEFAULT_CURRENCY};
pub use payment_log::{NewPaymentLog, PaymentLog, PaymentLogStatus};
pub use postgres::PgLedger;

/// Durable storage contract for Order and PaymentLog records.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create an order in `pending` status with a freshly generated
    /// `order_ref`. Fails with [`StoreError::DuplicateRef`] on a reference
    /// collision.
    async fn create_order(&self, spec: NewOrder) -> StoreResult<Order>;

    async fn get_order(&self, order_ref: &str) -> StoreResult<Order>;

    /// Apply a status transition atomically. The mutation's allowed source
    /// statuses act as the compare-and-set guard: if the order is not in one
    /// of them the call fails with [`StoreError::Conflict`] and nothing is
    /// written. Refreshes `updated_at` on success.
    async fn update_order(&self, order_ref: &str, mutation: OrderMutation) -> StoreResult<Order>;

    /// Append one audit row. Rows are immutable once written. Fails with
    /// [`StoreError::NotFound`] when the order reference is unknown.
    async fn append_payment_log(&self, entry: NewPaymentLog) -> StoreResult<Uuid>;

    /// Full audit history for an order, newest first.
    async fn payment_logs(&self, order_ref: &str) -> StoreResult<Vec<PaymentLog>>;

    /// All orders, newest first.
    async fn list_orders(&self) -> StoreResult<Vec<Order>>;
}

/// Connection pool settings for the Postgres ledger.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Initialize the database connection pool.
pub async fn init_pool(database_url: &str, config: Option<PoolConfig>) -> StoreResult<PgPool> {
    let config = config.unwrap_or_default();

    info!(
        "Initializing database pool: max_connections={}, connection_timeout={:?}",
        config.max_connections, config.connection_timeout
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!("Failed to initialize database pool: {}", e);
            StoreError::from_sqlx(e)
        })?;

    info!("Database pool initialized");
    Ok(pool)
}
