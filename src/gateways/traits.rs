//! Gateway adapter contract.

use async_trait::async_trait;

use crate::error::PaymentResult;
use crate::gateways::types::{CallbackData, InitiatedPayment, PaymentMethod, Verification};
use crate::store::Order;

/// Capability set every gateway adapter provides.
///
/// Adapters normalize two structurally different protocols into this one
/// contract: the redirect flow confirms via query parameters on the return
/// trip, the token flow initiates remotely and later resolves an opaque
/// token. Unit scaling between gateway amounts and `Order.total_price`
/// happens inside the adapter and nowhere else.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Build whatever the caller needs to start the external flow. For a
    /// redirect gateway this is purely local; for a token gateway it is a
    /// remote call that may fail with `Remote`/`MalformedResponse`.
    async fn initiate_payment(&self, order: &Order) -> PaymentResult<InitiatedPayment>;

    /// Resolve a callback into a normalized [`Verification`]. Missing
    /// callback fields fail with `Validation`; remote resolution failures
    /// with `Remote`/`MalformedResponse`. Errors are never swallowed; the
    /// engine records them in the audit trail.
    async fn verify_payment(&self, callback: &CallbackData) -> PaymentResult<Verification>;
}
