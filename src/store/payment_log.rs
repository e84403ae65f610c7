//! Append-only audit records of gateway interactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome recorded for a single gateway interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentLogStatus {
    Initiated,
    Processing,
    Success,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(Self::Initiated),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable row per gateway attempt. Rows are never updated or deleted
/// individually; the history is what makes reconciliation disputes decidable.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentLog {
    pub id: Uuid,
    pub order_ref: String,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentLogStatus,
    /// Gateway payload captured verbatim, plus any error detail.
    pub gateway_response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`PaymentLog`]; `id` and `created_at` are store-assigned.
#[derive(Debug, Clone)]
pub struct NewPaymentLog {
    pub order_ref: String,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentLogStatus,
    pub gateway_response: serde_json::Value,
}
