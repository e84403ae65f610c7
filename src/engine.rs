//! Reconciliation of gateway callbacks against the ledger.
//!
//! Callback handling is request-scoped and safe to replay: the ledger's
//! compare-and-set update makes "first successful verification wins" hold
//! under concurrent callbacks, and every attempt (winner, loser, duplicate
//! or failure) leaves exactly one PaymentLog row behind.

use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::AuditLogger;
use crate::error::{PaymentError, PaymentResult};
use crate::gateways::{
    CallbackData, GatewayRegistry, PaymentMethod, Verification, VerificationOutcome,
};
use crate::store::{LedgerStore, Order, OrderMutation, OrderStatus, PaymentLogStatus};

/// Result of reconciling one callback.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub order: Order,
    pub outcome: VerificationOutcome,
    /// True when the order was already paid and this callback was absorbed
    /// as an idempotent replay.
    pub duplicate: bool,
}

pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    audit: AuditLogger,
    gateways: GatewayRegistry,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn LedgerStore>, gateways: GatewayRegistry) -> Self {
        let audit = AuditLogger::new(store.clone());
        Self {
            store,
            audit,
            gateways,
        }
    }

    /// Reconcile a success-style callback for the given payment method.
    ///
    /// Replays are safe: the order mutation happens at most once, while each
    /// attempt appends its own audit row.
    pub async fn handle_callback(
        &self,
        method: &str,
        callback: CallbackData,
    ) -> PaymentResult<Reconciliation> {
        let gateway = self.gateways.resolve(method)?;
        let method = gateway.method();

        let verification = match gateway.verify_payment(&callback).await {
            Ok(v) => v,
            Err(err) => {
                // Best-effort: without a resolved order reference the row may
                // be refused, but the attempt must not vanish silently.
                let order_ref = callback.order_ref.as_deref().unwrap_or("unknown");
                self.audit
                    .failure(order_ref, method, &err, callback.raw.clone())
                    .await;
                return Err(err);
            }
        };

        match verification.outcome {
            VerificationOutcome::Success => self.reconcile_success(method, verification).await,
            _ => self.reconcile_non_success(method, verification).await,
        }
    }

    /// Service a gateway failure callback: the customer backed out or the
    /// gateway reported an aborted flow. Idempotent when already cancelled.
    pub async fn handle_cancellation(
        &self,
        method: &str,
        order_ref: &str,
    ) -> PaymentResult<Order> {
        let gateway = self.gateways.resolve(method)?;
        let method = gateway.method();

        let order = self
            .store
            .get_order(order_ref)
            .await
            .map_err(|e| PaymentError::from_store(order_ref, e))?;

        match self
            .store
            .update_order(order_ref, OrderMutation::MarkCancelled)
            .await
        {
            Ok(cancelled) => {
                info!(order_ref, %method, "order cancelled by gateway callback");
                self.log_cancelled(&cancelled, method).await;
                Ok(cancelled)
            }
            Err(err) if err.is_conflict() => {
                let current = self
                    .store
                    .get_order(order_ref)
                    .await
                    .map_err(|e| PaymentError::from_store(order_ref, e))?;
                if current.status == OrderStatus::Cancelled {
                    self.log_cancelled(&current, method).await;
                    return Ok(current);
                }
                let err = PaymentError::InvalidState {
                    order_ref: order_ref.to_string(),
                    event: "cancellation",
                    status: current.status.to_string(),
                };
                self.audit
                    .failure(order_ref, method, &err, json!({"requested": "cancel"}))
                    .await;
                Err(err)
            }
            Err(err) => Err(PaymentError::from_store(&order.order_ref, err)),
        }
    }

    async fn log_cancelled(&self, order: &Order, method: PaymentMethod) {
        self.audit
            .verification(
                &order.order_ref,
                method,
                PaymentLogStatus::Cancelled,
                None,
                order.total_price,
                &order.currency,
                json!({"signal": "cancelled"}),
            )
            .await;
    }

    async fn reconcile_success(
        &self,
        method: PaymentMethod,
        verification: Verification,
    ) -> PaymentResult<Reconciliation> {
        let order_ref = verification.order_ref.clone();

        let order = match self.store.get_order(&order_ref).await {
            Ok(order) => order,
            Err(err) if err.is_not_found() => {
                warn!(order_ref, %method, "verification callback for unknown order");
                // Orphan attempt; the append will be refused without an
                // order row, which is as much as can be recorded.
                let err = PaymentError::OrderNotFound {
                    order_ref: order_ref.clone(),
                };
                self.audit
                    .failure(&order_ref, method, &err, verification.raw_response.clone())
                    .await;
                return Err(err);
            }
            Err(err) => return Err(PaymentError::from_store(&order_ref, err)),
        };

        // Amount integrity: a mismatch never touches the order, so a
        // legitimate retry stays possible, but the attempt is on record.
        if verification.amount != order.total_price {
            let err = PaymentError::AmountMismatch {
                order_ref: order_ref.clone(),
                expected: order.total_price,
                reported: verification.amount,
            };
            warn!(order_ref, %method, expected = order.total_price, reported = verification.amount,
                "rejecting verification with mismatched amount");
            self.audit
                .verification(
                    &order_ref,
                    method,
                    PaymentLogStatus::Failed,
                    verification.transaction_id.clone(),
                    verification.amount,
                    &order.currency,
                    json!({
                        "error": err.to_string(),
                        "gateway_response": verification.raw_response,
                    }),
                )
                .await;
            return Err(err);
        }

        // Idempotency: a confirmation for an already-paid order is audit
        // material, never a second mutation.
        if order.status == OrderStatus::Paid {
            return Ok(self.record_duplicate(order, method, verification).await);
        }

        let mutation = OrderMutation::MarkPaid {
            amount: verification.amount,
            payment_method: method.as_str().to_string(),
            transaction_id: verification
                .transaction_id
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        };

        match self.store.update_order(&order_ref, mutation).await {
            Ok(updated) => {
                info!(
                    order_ref,
                    %method,
                    transaction_id = verification.transaction_id.as_deref().unwrap_or(""),
                    amount = verification.amount,
                    "payment verified, order marked paid"
                );
                self.audit
                    .verification(
                        &order_ref,
                        method,
                        PaymentLogStatus::Success,
                        verification.transaction_id.clone(),
                        verification.amount,
                        &updated.currency,
                        verification.raw_response.clone(),
                    )
                    .await;
                Ok(Reconciliation {
                    order: updated,
                    outcome: VerificationOutcome::Success,
                    duplicate: false,
                })
            }
            Err(err) if err.is_conflict() => {
                // Lost the first-winner race. If the winner paid the order,
                // absorb this attempt as a duplicate; otherwise the order
                // left the eligible states underneath us.
                let current = self
                    .store
                    .get_order(&order_ref)
                    .await
                    .map_err(|e| PaymentError::from_store(&order_ref, e))?;
                if current.status == OrderStatus::Paid {
                    return Ok(self.record_duplicate(current, method, verification).await);
                }
                let err = PaymentError::InvalidState {
                    order_ref: order_ref.clone(),
                    event: "payment verification",
                    status: current.status.to_string(),
                };
                self.audit
                    .verification(
                        &order_ref,
                        method,
                        PaymentLogStatus::Failed,
                        verification.transaction_id.clone(),
                        verification.amount,
                        &current.currency,
                        json!({
                            "error": err.to_string(),
                            "gateway_response": verification.raw_response,
                        }),
                    )
                    .await;
                Err(err)
            }
            Err(err) => Err(PaymentError::from_store(&order_ref, err)),
        }
    }

    async fn reconcile_non_success(
        &self,
        method: PaymentMethod,
        verification: Verification,
    ) -> PaymentResult<Reconciliation> {
        let order_ref = verification.order_ref.clone();

        let order = match self.store.get_order(&order_ref).await {
            Ok(order) => order,
            Err(err) if err.is_not_found() => {
                warn!(order_ref, %method, "non-success callback for unknown order");
                return Err(PaymentError::OrderNotFound { order_ref });
            }
            Err(err) => return Err(PaymentError::from_store(&order_ref, err)),
        };

        let (log_status, mutation) = match verification.outcome {
            // Incomplete: stays with the order until a later callback or an
            // operator steps in.
            VerificationOutcome::Pending => (PaymentLogStatus::Processing, None),
            VerificationOutcome::Cancelled => {
                (PaymentLogStatus::Cancelled, Some(OrderMutation::MarkCancelled))
            }
            _ => (PaymentLogStatus::Failed, Some(OrderMutation::MarkFailed)),
        };

        let order = match mutation {
            Some(mutation) => match self.store.update_order(&order_ref, mutation).await {
                Ok(updated) => updated,
                // Already terminal (e.g. a straggling failure callback after
                // payment): keep the status, keep the audit row.
                Err(err) if err.is_conflict() => {
                    warn!(order_ref, %method, status = %order.status,
                        "ignoring gateway outcome for order outside pending/processing");
                    order
                }
                Err(err) => return Err(PaymentError::from_store(&order_ref, err)),
            },
            None => order,
        };

        info!(order_ref, %method, outcome = ?verification.outcome, "recorded non-success verification");
        self.audit
            .verification(
                &order_ref,
                method,
                log_status,
                verification.transaction_id.clone(),
                verification.amount,
                &order.currency,
                verification.raw_response.clone(),
            )
            .await;

        Ok(Reconciliation {
            order,
            outcome: verification.outcome,
            duplicate: false,
        })
    }

    /// Append the audit row for a replayed confirmation. A replay carrying a
    /// different transaction id than the one that won is flagged in the row
    /// as an anomaly for manual review.
    async fn record_duplicate(
        &self,
        order: Order,
        method: PaymentMethod,
        verification: Verification,
    ) -> Reconciliation {
        let mismatched = order.transaction_id.is_some()
            && verification.transaction_id.is_some()
            && order.transaction_id != verification.transaction_id;

        let gateway_response = if mismatched {
            warn!(
                order_ref = %order.order_ref,
                %method,
                persisted = order.transaction_id.as_deref().unwrap_or(""),
                reported = verification.transaction_id.as_deref().unwrap_or(""),
                "duplicate confirmation carries a different transaction id"
            );
            json!({
                "anomaly": "duplicate_transaction_id",
                "persisted_transaction_id": order.transaction_id,
                "gateway_response": verification.raw_response,
            })
        } else {
            json!({
                "duplicate": true,
                "gateway_response": verification.raw_response,
            })
        };

        self.audit
            .verification(
                &order.order_ref,
                method,
                PaymentLogStatus::Success,
                verification.transaction_id.clone(),
                verification.amount,
                &order.currency,
                gateway_response,
            )
            .await;

        Reconciliation {
            order,
            outcome: VerificationOutcome::Success,
            duplicate: true,
        }
    }
}
