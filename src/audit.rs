//! Append-only audit logging for gateway interactions.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::error::PaymentError;
use crate::gateways::PaymentMethod;
use crate::store::{LedgerStore, NewPaymentLog, Order, PaymentLogStatus, DEFAULT_CURRENCY};

/// Writer for PaymentLog rows. Every gateway interaction, successful or
/// not, goes through here exactly once before its caller observes a result.
///
/// Appends are best-effort in one narrow sense: a failure to persist the row
/// (orphan reference, storage outage) is reported at `warn` and never masks
/// the payment result itself. Existing rows are never touched.
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn LedgerStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, entry: NewPaymentLog) {
        let order_ref = entry.order_ref.clone();
        let status = entry.status;
        if let Err(err) = self.store.append_payment_log(entry).await {
            warn!(
                %order_ref,
                %status,
                "failed to append payment log: {}",
                err
            );
        }
    }

    /// Row recording a successful initiation.
    pub async fn initiated(
        &self,
        order: &Order,
        method: PaymentMethod,
        transaction_id: Option<String>,
        gateway_response: Value,
    ) {
        self.append(NewPaymentLog {
            order_ref: order.order_ref.clone(),
            payment_method: method.as_str().to_string(),
            transaction_id,
            amount: order.total_price,
            currency: order.currency.clone(),
            status: PaymentLogStatus::Initiated,
            gateway_response,
        })
        .await;
    }

    /// Row recording a verification attempt with a known outcome.
    #[allow(clippy::too_many_arguments)]
    pub async fn verification(
        &self,
        order_ref: &str,
        method: PaymentMethod,
        status: PaymentLogStatus,
        transaction_id: Option<String>,
        amount: i64,
        currency: &str,
        gateway_response: Value,
    ) {
        self.append(NewPaymentLog {
            order_ref: order_ref.to_string(),
            payment_method: method.as_str().to_string(),
            transaction_id,
            amount,
            currency: currency.to_string(),
            status,
            gateway_response,
        })
        .await;
    }

    /// Failure row for an interaction that died in the adapter or engine.
    /// The error detail is captured alongside whatever payload context the
    /// caller still has.
    pub async fn failure(
        &self,
        order_ref: &str,
        method: PaymentMethod,
        error: &PaymentError,
        context: Value,
    ) {
        self.append(NewPaymentLog {
            order_ref: order_ref.to_string(),
            payment_method: method.as_str().to_string(),
            transaction_id: None,
            amount: 0,
            currency: DEFAULT_CURRENCY.to_string(),
            status: PaymentLogStatus::Failed,
            gateway_response: json!({
                "error": error.to_string(),
                "context": context,
            }),
        })
        .await;
    }
}
