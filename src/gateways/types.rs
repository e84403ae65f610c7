//! Shared gateway types: requests, callbacks and verification results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag selecting a gateway implementation at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Esewa,
    Khalti,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Esewa => "esewa",
            Self::Khalti => "khalti",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "esewa" => Some(Self::Esewa),
            "khalti" => Some(Self::Khalti),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized shape of an inbound payment callback.
///
/// Redirect-style gateways fill `order_ref`/`amount`/`reference_id` from
/// query parameters; token-style gateways fill `token`. Adapters validate
/// presence of the fields their protocol requires.
#[derive(Debug, Clone, Default)]
pub struct CallbackData {
    pub order_ref: Option<String>,
    pub amount: Option<String>,
    pub reference_id: Option<String>,
    pub token: Option<String>,
    /// The callback payload as received, kept for the audit trail.
    pub raw: serde_json::Value,
}

/// What the rendering layer needs to start the external flow.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentInstructions {
    /// Parameters for a client-submitted form posting straight to the
    /// gateway (redirect protocol).
    RedirectForm {
        action_url: String,
        fields: BTreeMap<String, String>,
    },
    /// Hosted payment page plus the opaque token that later resolves the
    /// final status (token protocol).
    RedirectUrl { payment_url: String, token: String },
}

/// Result of a successful `initiate_payment` call.
#[derive(Debug, Clone, Serialize)]
pub struct InitiatedPayment {
    pub payment_method: PaymentMethod,
    /// Gateway-side transaction identifier, when the protocol assigns one at
    /// initiation time.
    pub transaction_id: Option<String>,
    pub instructions: PaymentInstructions,
    #[serde(skip_serializing)]
    pub raw_response: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success,
    Pending,
    Failed,
    Cancelled,
}

/// Adapter-normalized verification result. `amount` is always expressed in
/// the same unit as `Order.total_price`; any gateway-specific scaling has
/// already been applied.
#[derive(Debug, Clone)]
pub struct Verification {
    pub outcome: VerificationOutcome,
    pub order_ref: String,
    pub amount: i64,
    pub transaction_id: Option<String>,
    pub raw_response: serde_json::Value,
}
