//! External PG Adapter: the boundary to the
//! payment gateway. Every call carries a deadline; non-200 responses and
//! connection faults are folded into `success=false` rather than
//! propagated as transport errors, so the saga step can treat "gateway
//! declined" and "gateway unreachable" uniformly. Grounded on the
//! teacher's `reqwest`-based external calls pattern (`services/song.rs`
//! storage client) for timeout/deadline handling.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::payment::PaymentMethod;
use crate::money::Money;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub payment_key: Option<String>,
    pub error_message: Option<String>,
}

impl PgResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self { success: false, transaction_id: None, payment_key: None, error_message: Some(message.into()) }
    }
}

/// Response shape for a refund call. Kept distinct from `PgResponse`
/// because a refund carries a `pg_refund_id`, not a transaction/payment key
/// pair; the spec's §4.7 adapter contract names three operations, this
/// fourth one is a direct, same-shape extension for the refund flow in §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub success: bool,
    pub pg_refund_id: Option<String>,
    pub error_message: Option<String>,
}

impl RefundResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self { success: false, pg_refund_id: None, error_message: Some(message.into()) }
    }
}

#[async_trait]
pub trait PaymentGatewayAdapter: Send + Sync {
    async fn request_approval(&self, order_id: Uuid, amount: &Money, method: &PaymentMethod) -> PgResponse;
    async fn confirm_payment(&self, payment_key: &str, order_id: Uuid, amount: &Money) -> PgResponse;
    async fn cancel_payment(&self, payment_key: &str, reason: &str) -> PgResponse;
    async fn process_refund(&self, payment_key: &str, amount: &Money, reason: &str) -> RefundResponse;
}

#[derive(Debug, Serialize)]
struct ApprovalRequest<'a> {
    order_id: Uuid,
    amount: String,
    currency: &'a str,
    method: &'a str,
}

#[derive(Debug, Serialize)]
struct ConfirmRequest<'a> {
    payment_key: &'a str,
    order_id: Uuid,
    amount: String,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    payment_key: &'a str,
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    payment_key: &'a str,
    amount: String,
    reason: &'a str,
}

pub struct HttpPaymentGatewayAdapter {
    client: Client,
    base_url: String,
}

impl HttpPaymentGatewayAdapter {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().expect("reqwest client build is infallible here");
        Self { client, base_url }
    }

    fn method_str(method: &PaymentMethod) -> &'static str {
        match method {
            PaymentMethod::Card => "CARD",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::VirtualAccount => "VIRTUAL_ACCOUNT",
        }
    }
}

#[async_trait]
impl PaymentGatewayAdapter for HttpPaymentGatewayAdapter {
    async fn request_approval(&self, order_id: Uuid, amount: &Money, method: &PaymentMethod) -> PgResponse {
        let body = ApprovalRequest {
            order_id,
            amount: amount.amount().to_string(),
            currency: amount.currency().code(),
            method: Self::method_str(method),
        };
        self.post("/approvals", &body).await
    }

    async fn confirm_payment(&self, payment_key: &str, order_id: Uuid, amount: &Money) -> PgResponse {
        let body = ConfirmRequest { payment_key, order_id, amount: amount.amount().to_string() };
        self.post("/confirmations", &body).await
    }

    async fn cancel_payment(&self, payment_key: &str, reason: &str) -> PgResponse {
        let body = CancelRequest { payment_key, reason };
        self.post("/cancellations", &body).await
    }

    async fn process_refund(&self, payment_key: &str, amount: &Money, reason: &str) -> RefundResponse {
        let body = RefundRequest { payment_key, amount: amount.amount().to_string(), reason };
        let url = format!("{}/refunds", self.base_url);
        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<RefundResponse>().await {
                Ok(parsed) => parsed,
                Err(e) => RefundResponse::failure(format!("malformed gateway response: {e}")),
            },
            Ok(resp) => RefundResponse::failure(format!("gateway returned HTTP {}", resp.status())),
            Err(e) => RefundResponse::failure(format!("gateway unreachable: {e}")),
        }
    }
}

impl HttpPaymentGatewayAdapter {
    async fn post<B: Serialize>(&self, path: &str, body: &B) -> PgResponse {
        let url = format!("{}{}", self.base_url, path);
        match self.client.post(&url).json(body).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<PgResponse>().await {
                Ok(parsed) => parsed,
                Err(e) => PgResponse::failure(format!("malformed gateway response: {e}")),
            },
            Ok(resp) => PgResponse::failure(format!("gateway returned HTTP {}", resp.status())),
            Err(e) => PgResponse::failure(format!("gateway unreachable: {e}")),
        }
    }
}

/// Deterministic in-memory adapter for tests: always approves/confirms.
pub struct MockPaymentGatewayAdapter {
    pub should_succeed: bool,
}

#[async_trait]
impl PaymentGatewayAdapter for MockPaymentGatewayAdapter {
    async fn request_approval(&self, _order_id: Uuid, _amount: &Money, _method: &PaymentMethod) -> PgResponse {
        if self.should_succeed {
            PgResponse { success: true, transaction_id: Some(format!("tx_{}", Uuid::new_v4())), payment_key: Some(format!("key_{}", Uuid::new_v4())), error_message: None }
        } else {
            PgResponse::failure("declined by mock gateway")
        }
    }

    async fn confirm_payment(&self, _payment_key: &str, _order_id: Uuid, _amount: &Money) -> PgResponse {
        if self.should_succeed {
            PgResponse { success: true, transaction_id: None, payment_key: None, error_message: None }
        } else {
            PgResponse::failure("confirmation declined by mock gateway")
        }
    }

    async fn cancel_payment(&self, _payment_key: &str, _reason: &str) -> PgResponse {
        PgResponse { success: true, transaction_id: None, payment_key: None, error_message: None }
    }

    async fn process_refund(&self, _payment_key: &str, _amount: &Money, _reason: &str) -> RefundResponse {
        if self.should_succeed {
            RefundResponse { success: true, pg_refund_id: Some(format!("pg_refund_{}", Uuid::new_v4())), error_message: None }
        } else {
            RefundResponse::failure("refund declined by mock gateway")
        }
    }
}
