//! Error taxonomy for the payment reconciliation core
//!
//! Every failure a gateway interaction can produce is classified here so the
//! engine can decide what is logged, what mutates the ledger, and what is
//! surfaced to the caller.

use thiserror::Error;

use crate::store::error::StoreError;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// Missing or malformed request/callback parameters. Never mutates state.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Callback referenced an order the ledger does not know about.
    #[error("order not found: {order_ref}")]
    OrderNotFound { order_ref: String },

    /// The payment method string resolved to no registered gateway.
    #[error("unsupported payment method: {method}")]
    UnknownMethod { method: String },

    /// The gateway confirmed an amount that does not match the order total.
    /// The order is left untouched and stays eligible for a legitimate retry.
    #[error("amount mismatch for order {order_ref}: expected {expected}, gateway reported {reported}")]
    AmountMismatch {
        order_ref: String,
        expected: i64,
        reported: i64,
    },

    /// The order cannot accept the event in its current status.
    #[error("order {order_ref} cannot accept {event} while {status}")]
    InvalidState {
        order_ref: String,
        event: &'static str,
        status: String,
    },

    /// Gateway unreachable, timed out, or replied non-2xx.
    #[error("{gateway} request failed: {message}")]
    Remote {
        gateway: String,
        status: Option<u16>,
        message: String,
    },

    /// Gateway replied 2xx but the payload was unparsable or incomplete.
    #[error("{gateway} returned an unreadable response: {message}")]
    MalformedResponse { gateway: String, message: String },

    #[error(transparent)]
    Store(StoreError),
}

impl PaymentError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn missing_param(name: &str) -> Self {
        Self::Validation {
            message: format!("missing required parameter: {}", name),
        }
    }

    pub fn remote(gateway: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = match status {
            Some(code) => format!("HTTP {}: {}", code, message),
            None => message,
        };
        Self::Remote {
            gateway: gateway.to_string(),
            status,
            message,
        }
    }

    pub fn malformed(gateway: &str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            gateway: gateway.to_string(),
            message: message.into(),
        }
    }

    /// Map a transport failure into the taxonomy, keeping the timeout case
    /// distinguishable in the message.
    pub fn from_reqwest(gateway: &str, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        Self::remote(gateway, err.status().map(|s| s.as_u16()), message)
    }

    /// Store errors cross into the taxonomy here; a missing row becomes
    /// `OrderNotFound` so callers never see storage internals.
    pub fn from_store(order_ref: &str, err: StoreError) -> Self {
        if err.is_not_found() {
            Self::OrderNotFound {
                order_ref: order_ref.to_string(),
            }
        } else {
            Self::Store(err)
        }
    }

    /// Remote failures are the only class the caller may blindly retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl From<StoreError> for PaymentError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}
