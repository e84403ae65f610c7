//! Khalti gateway adapter (token protocol).
//!
//! Initiation is an authenticated API call returning a hosted payment URL
//! and an opaque `pidx` token; verification resolves that token through the
//! lookup endpoint. Khalti amounts are in paisa, scaled 100x relative to
//! `Order.total_price`; this adapter is the only place that scaling is
//! applied.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use crate::error::{PaymentError, PaymentResult};
use crate::gateways::traits::PaymentGateway;
use crate::gateways::types::{
    CallbackData, InitiatedPayment, PaymentInstructions, PaymentMethod, Verification,
    VerificationOutcome,
};
use crate::store::Order;

const GATEWAY: &str = "khalti";

const PAISA_PER_RUPEE: i64 = 100;

#[derive(Debug, Clone)]
pub struct KhaltiConfig {
    /// Merchant secret, sent as `Authorization: Key <secret>`.
    pub secret_key: String,
    /// Payment initiation endpoint.
    pub payment_url: String,
    /// Token lookup endpoint.
    pub verify_url: String,
    /// Where Khalti redirects the customer after payment.
    pub return_url: String,
    pub website_url: String,
    pub timeout_secs: u64,
}

impl Default for KhaltiConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            payment_url: "https://a.khalti.com/api/v2/epayment/initiate/".to_string(),
            verify_url: "https://a.khalti.com/api/v2/epayment/lookup/".to_string(),
            return_url: String::new(),
            website_url: "http://127.0.0.1:8000/".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    pidx: String,
    payment_url: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    purchase_order_id: Option<String>,
    #[serde(default)]
    total_amount: i64,
    #[serde(default)]
    transaction_id: Option<String>,
}

pub struct KhaltiGateway {
    config: KhaltiConfig,
    client: Client,
}

impl KhaltiGateway {
    pub fn new(config: KhaltiConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    /// Initiation payload. Khalti expects the amount in paisa.
    fn initiate_payload(&self, order: &Order) -> Value {
        json!({
            "return_url": self.config.return_url,
            "website_url": self.config.website_url,
            "amount": order.total_price * PAISA_PER_RUPEE,
            "purchase_order_id": order.order_ref,
            "purchase_order_name": format!("Order - {}", order.name),
            "customer_info": {
                "name": order.name,
                "email": order.email.as_deref().unwrap_or("customer@example.com"),
                "phone": order.phone.as_deref().unwrap_or("9800000000"),
            },
        })
    }

    fn map_status(status: &str) -> VerificationOutcome {
        match status {
            "Completed" => VerificationOutcome::Success,
            "Pending" | "Initiated" => VerificationOutcome::Pending,
            "User canceled" => VerificationOutcome::Cancelled,
            _ => VerificationOutcome::Failed,
        }
    }

    /// Normalize a lookup payload into a [`Verification`]. The lookup does
    /// not always echo `purchase_order_id`; the callback's claim is the
    /// fallback.
    fn map_lookup(raw: Value, fallback_ref: Option<&str>) -> PaymentResult<Verification> {
        let parsed: LookupResponse = serde_json::from_value(raw.clone())
            .map_err(|e| PaymentError::malformed(GATEWAY, e.to_string()))?;

        let order_ref = parsed
            .purchase_order_id
            .or_else(|| fallback_ref.map(str::to_string))
            .ok_or_else(|| {
                PaymentError::malformed(GATEWAY, "lookup response carries no purchase_order_id")
            })?;

        Ok(Verification {
            outcome: Self::map_status(&parsed.status),
            order_ref,
            amount: parsed.total_amount / PAISA_PER_RUPEE,
            transaction_id: parsed.transaction_id,
            raw_response: raw,
        })
    }

    async fn post_json(&self, url: &str, payload: &Value) -> PaymentResult<Value> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Key {}", self.config.secret_key))
            .json(payload)
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

        serde_json::from_str(&body).map_err(|e| PaymentError::malformed(GATEWAY, e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for KhaltiGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Khalti
    }

    async fn initiate_payment(&self, order: &Order) -> PaymentResult<InitiatedPayment> {
        let payload = self.initiate_payload(order);
        let raw = self.post_json(&self.config.payment_url, &payload).await?;

        let parsed: InitiateResponse = serde_json::from_value(raw.clone())
            .map_err(|e| PaymentError::malformed(GATEWAY, e.to_string()))?;

        info!(
            order_ref = %order.order_ref,
            pidx = %parsed.pidx,
            "Khalti payment initiated"
        );

        Ok(InitiatedPayment {
            payment_method: PaymentMethod::Khalti,
            transaction_id: Some(parsed.pidx.clone()),
            instructions: PaymentInstructions::RedirectUrl {
                payment_url: parsed.payment_url,
                token: parsed.pidx,
            },
            raw_response: raw,
        })
    }

    async fn verify_payment(&self, callback: &CallbackData) -> PaymentResult<Verification> {
        let pidx = callback
            .token
            .as_deref()
            .ok_or_else(|| PaymentError::missing_param("pidx"))?;

        let raw = self
            .post_json(&self.config.verify_url, &json!({ "pidx": pidx }))
            .await?;

        let verification = Self::map_lookup(raw, callback.order_ref.as_deref())?;
        info!(
            order_ref = %verification.order_ref,
            pidx,
            outcome = ?verification.outcome,
            "Khalti lookup resolved"
        );
        Ok(verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::store::{OrderStatus, DEFAULT_CURRENCY};

    fn order(total_price: i64) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            order_ref: "ORD-KH1234567890".to_string(),
            name: "Maya Gurung".to_string(),
            email: Some("maya@example.com".to_string()),
            phone: Some("9841234567".to_string()),
            address: None,
            total_price,
            currency: DEFAULT_CURRENCY.to_string(),
            status: OrderStatus::Pending,
            is_paid: false,
            paid_amount: None,
            payment_method: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn gateway() -> KhaltiGateway {
        KhaltiGateway::new(KhaltiConfig {
            secret_key: "test_secret_key".to_string(),
            return_url: "http://127.0.0.1:8000/callbacks/khalti/success".to_string(),
            ..KhaltiConfig::default()
        })
    }

    #[test]
    fn initiate_payload_scales_rupees_to_paisa() {
        let payload = gateway().initiate_payload(&order(500));
        assert_eq!(payload["amount"], 50000);
        assert_eq!(payload["purchase_order_id"], "ORD-KH1234567890");
        assert_eq!(payload["customer_info"]["name"], "Maya Gurung");
        assert_eq!(payload["customer_info"]["phone"], "9841234567");
    }

    #[test]
    fn lookup_scales_paisa_back_to_rupees() {
        let raw = json!({
            "status": "Completed",
            "purchase_order_id": "ORD-KH1234567890",
            "total_amount": 50000,
            "transaction_id": "TXN1",
        });
        let verification = KhaltiGateway::map_lookup(raw, None).unwrap();
        assert_eq!(verification.outcome, VerificationOutcome::Success);
        assert_eq!(verification.amount, 500);
        assert_eq!(verification.transaction_id.as_deref(), Some("TXN1"));
    }

    #[test]
    fn lookup_falls_back_to_callback_order_ref() {
        let raw = json!({
            "status": "Pending",
            "total_amount": 50000,
        });
        let verification = KhaltiGateway::map_lookup(raw.clone(), Some("ORD-FALLBACK1")).unwrap();
        assert_eq!(verification.outcome, VerificationOutcome::Pending);
        assert_eq!(verification.order_ref, "ORD-FALLBACK1");

        let err = KhaltiGateway::map_lookup(raw, None).unwrap_err();
        assert!(matches!(err, PaymentError::MalformedResponse { .. }));
    }

    #[test]
    fn status_mapping_covers_the_lookup_vocabulary() {
        assert_eq!(
            KhaltiGateway::map_status("Completed"),
            VerificationOutcome::Success
        );
        assert_eq!(
            KhaltiGateway::map_status("Pending"),
            VerificationOutcome::Pending
        );
        assert_eq!(
            KhaltiGateway::map_status("Initiated"),
            VerificationOutcome::Pending
        );
        assert_eq!(
            KhaltiGateway::map_status("User canceled"),
            VerificationOutcome::Cancelled
        );
        assert_eq!(
            KhaltiGateway::map_status("Expired"),
            VerificationOutcome::Failed
        );
        assert_eq!(
            KhaltiGateway::map_status("Refunded"),
            VerificationOutcome::Failed
        );
    }

    #[tokio::test]
    async fn verify_requires_the_token() {
        let err = gateway()
            .verify_payment(&CallbackData::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation { .. }));
        assert!(err.to_string().contains("pidx"));
    }
}
