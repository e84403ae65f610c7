//! Gateway adapters and their dispatch registry.
//!
//! Two protocols are supported: the redirect flow ([`esewa`]) and the
//! token-initiate-then-poll flow ([`khalti`]). Both are normalized behind
//! [`PaymentGateway`].

pub mod esewa;
pub mod khalti;
pub mod traits;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{PaymentError, PaymentResult};

pub use esewa::{EsewaConfig, EsewaGateway};
pub use khalti::{KhaltiConfig, KhaltiGateway};
pub use traits::PaymentGateway;
pub use types::{
    CallbackData, InitiatedPayment, PaymentInstructions, PaymentMethod, Verification,
    VerificationOutcome,
};

/// Maps payment method tags to gateway adapters. Dispatch happens on the
/// method string carried by the inbound request.
#[derive(Default, Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build both production adapters from configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EsewaGateway::new(config.esewa.clone())));
        registry.register(Arc::new(KhaltiGateway::new(config.khalti.clone())));
        registry
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.method(), gateway);
    }

    pub fn resolve(&self, method: &str) -> PaymentResult<Arc<dyn PaymentGateway>> {
        let tag = PaymentMethod::parse(method).ok_or_else(|| PaymentError::UnknownMethod {
            method: method.to_string(),
        })?;
        self.gateways
            .get(&tag)
            .cloned()
            .ok_or_else(|| PaymentError::UnknownMethod {
                method: method.to_string(),
            })
    }
}
