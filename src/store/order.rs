//! Order entity and its payment lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const DEFAULT_CURRENCY: &str = "NPR";

/// Payment lifecycle status of an order.
///
/// `Pending` is initial. `Paid`, `Cancelled` and `Refunded` are terminal for
/// the automatic reconciliation path; `Failed` has no outgoing transition
/// either. Only `Pending` and `Processing` accept gateway events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether gateway events (initiation, verification, cancellation) may
    /// still act on an order in this status.
    pub fn accepts_payment_events(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchasable unit with a total price and payment status.
///
/// The internal `id` never crosses the service boundary; `order_ref` is the
/// external key.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    #[serde(skip_serializing)]
    pub id: Uuid,
    pub order_ref: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub total_price: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub is_paid: bool,
    pub paid_amount: Option<i64>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Specification for a new order. Customer info is optional except `name`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub total_price: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

impl NewOrder {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.total_price <= 0 {
            return Err(format!(
                "total_price must be positive, got {}",
                self.total_price
            ));
        }
        if let Some(currency) = &self.currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(format!("currency must be a 3-letter code, got {:?}", currency));
            }
        }
        Ok(())
    }

    pub fn currency(&self) -> String {
        self.currency
            .clone()
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
    }
}

/// Generate an external order reference: 16 chars, unique for all practical
/// purposes. The store still enforces uniqueness on insert.
pub fn generate_order_ref() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", hex[..12].to_uppercase())
}

/// The closed set of legal status transitions.
///
/// Each mutation carries the statuses it may be applied from; the store
/// compares-and-sets against the current status so concurrent writers racing
/// on the same order resolve to exactly one winner.
#[derive(Debug, Clone)]
pub enum OrderMutation {
    /// Initiation succeeded; the external flow is underway. Applying this to
    /// an order already `Processing` refreshes it without regressing.
    MarkProcessing,
    /// First successful verification. Sets the paid fields atomically.
    MarkPaid {
        amount: i64,
        payment_method: String,
        transaction_id: String,
    },
    MarkFailed,
    MarkCancelled,
    /// Administrative correction only; never taken by the automatic path.
    MarkRefunded,
}

impl OrderMutation {
    pub fn target(&self) -> OrderStatus {
        match self {
            Self::MarkProcessing => OrderStatus::Processing,
            Self::MarkPaid { .. } => OrderStatus::Paid,
            Self::MarkFailed => OrderStatus::Failed,
            Self::MarkCancelled => OrderStatus::Cancelled,
            Self::MarkRefunded => OrderStatus::Refunded,
        }
    }

    pub fn allowed_from(&self) -> &'static [OrderStatus] {
        match self {
            Self::MarkProcessing | Self::MarkPaid { .. } | Self::MarkFailed | Self::MarkCancelled => {
                &[OrderStatus::Pending, OrderStatus::Processing]
            }
            Self::MarkRefunded => &[OrderStatus::Paid],
        }
    }

    /// Apply the transition to an in-memory order. Callers must have checked
    /// `allowed_from` against the current status first.
    pub fn apply(&self, order: &mut Order, now: DateTime<Utc>) {
        order.status = self.target();
        order.updated_at = now;
        if let Self::MarkPaid {
            amount,
            payment_method,
            transaction_id,
        } = self
        {
            order.is_paid = true;
            order.paid_amount = Some(*amount);
            order.payment_method = Some(payment_method.clone());
            order.transaction_id = Some(transaction_id.clone());
        }
    }
}
