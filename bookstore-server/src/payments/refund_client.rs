//! Gateway refund collaborator

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::models::PaymentMethod;
use std::time::Duration;

/// One refund to execute
#[derive(Debug, Clone, Serialize)]
pub struct RefundCall {
    pub refund_id: String,
    pub payment_id: String,
    pub method: PaymentMethod,
    pub txn_ref: String,
    pub transaction_no: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum RefundGatewayError {
    /// Network failure, timeout or 5xx; worth retrying
    #[error("refund gateway unavailable: {0}")]
    Unavailable(String),

    #[error("refund rejected by gateway: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait RefundGateway: Send + Sync {
    /// Returns the gateway's refund reference
    async fn refund(&self, call: &RefundCall) -> Result<String, RefundGatewayError>;
}

#[derive(Deserialize)]
struct RefundResponse {
    refund_ref: String,
}

/// JSON-over-HTTP refund endpoint
pub struct HttpRefundGateway {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpRefundGateway {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RefundGateway for HttpRefundGateway {
    async fn refund(&self, call: &RefundCall) -> Result<String, RefundGatewayError> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(call)
            .send()
            .await
            .map_err(|e| RefundGatewayError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RefundGatewayError::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RefundGatewayError::Rejected(format!("HTTP {status}: {body}")));
        }
        let body: RefundResponse = resp
            .json()
            .await
            .map_err(|e| RefundGatewayError::Rejected(format!("unreadable response: {e}")))?;
        Ok(body.refund_ref)
    }
}

/// Settles refunds without a remote call (development and manual
/// settlement)
pub struct LocalRefundGateway;

#[async_trait]
impl RefundGateway for LocalRefundGateway {
    async fn refund(&self, call: &RefundCall) -> Result<String, RefundGatewayError> {
        tracing::info!(refund_id = %call.refund_id, amount = %call.amount, "Refund settled locally");
        Ok(format!("local-{}", call.refund_id))
    }
}
