//! PesaPal 3.0 gateway client.
//!
//! Stateless request/response wrapper around the gateway's REST API: bearer-token
//! auth, order submission, and transaction status queries. Nothing here touches
//! the database; persistence and state transitions belong to the services.
//!
//! Authentication and status queries are retried with capped exponential backoff
//! because they are idempotent and the most failure-prone network hops. Order
//! submission is never retried at this layer: a duplicate submission would mint a
//! second tracking id for the same cart.

pub mod ipn;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::GatewayConfig;
use crate::errors::ServiceError;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 200;

/// Billing contact submitted with an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingAddress {
    pub email_address: Option<String>,
    pub phone_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub line_1: Option<String>,
    pub city: Option<String>,
    pub country_code: Option<String>,
}

/// Payment request submitted to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOrderRequest {
    /// Merchant-chosen reference; must be unique per submission.
    pub id: String,
    pub currency: String,
    pub amount: Decimal,
    pub description: String,
    pub callback_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    pub billing_address: BillingAddress,
}

/// Gateway response to an order submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitOrderResponse {
    pub order_tracking_id: String,
    /// Hosted payment page / iframe URL the customer is sent to.
    pub redirect_url: String,
}

/// Gateway-reported status of a transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionStatus {
    /// Numeric status code: 0 invalid/pending, 1 completed, 2 failed, 3 reversed.
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub payment_status_description: String,
    #[serde(default)]
    pub merchant_reference: String,
    #[serde(default)]
    pub amount: Decimal,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub confirmation_code: Option<String>,
}

/// Seam between the reconciliation services and the gateway; lets tests drive the
/// state machine with a scripted gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Exchanges configured credentials for a bearer token.
    async fn authenticate(&self) -> Result<String, ServiceError>;

    /// Submits a payment request; returns the gateway tracking id and the
    /// customer-facing redirect URL.
    async fn submit_order(
        &self,
        request: &SubmitOrderRequest,
    ) -> Result<SubmitOrderResponse, ServiceError>;

    /// Queries current transaction status by tracking id.
    async fn query_status(&self, tracking_id: &str) -> Result<TransactionStatus, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SubmitOrderWireResponse {
    order_tracking_id: Option<String>,
    redirect_url: Option<String>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TransactionStatusWireResponse {
    #[serde(flatten)]
    status: TransactionStatus,
    error: Option<serde_json::Value>,
}

fn error_is_set(error: &Option<serde_json::Value>) -> bool {
    match error {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Object(map)) => !map.is_empty(),
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Reqwest-backed gateway client.
#[derive(Clone)]
pub struct PesapalClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl PesapalClient {
    pub fn new(config: GatewayConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn request_token(&self) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "consumer_key": self.config.consumer_key,
            "consumer_secret": self.config.consumer_secret,
        });

        let response = self
            .http
            .post(self.url("/api/Auth/RequestToken"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayAuthError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::GatewayAuthError(format!(
                "token request returned {}",
                status
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayAuthError(format!("invalid token body: {}", e)))?;

        if error_is_set(&token.error) {
            return Err(ServiceError::GatewayAuthError(format!(
                "gateway rejected credentials: {:?}",
                token.error
            )));
        }

        token
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::GatewayAuthError("token missing from response".into()))
    }

    async fn fetch_status(
        &self,
        token: &str,
        tracking_id: &str,
    ) -> Result<TransactionStatus, ServiceError> {
        let response = self
            .http
            .get(self.url("/api/Transactions/GetTransactionStatus"))
            .query(&[("orderTrackingId", tracking_id)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayQueryError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::GatewayQueryError(format!(
                "status query returned {}",
                status
            )));
        }

        let wire: TransactionStatusWireResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayQueryError(format!("invalid status body: {}", e)))?;

        if error_is_set(&wire.error) {
            return Err(ServiceError::GatewayQueryError(format!(
                "gateway error: {:?}",
                wire.error
            )));
        }

        Ok(wire.status)
    }
}

/// Runs `operation` up to [`RETRY_ATTEMPTS`] times with doubling delay between
/// attempts.
async fn with_backoff<T, F, Fut>(what: &str, operation: F) -> Result<T, ServiceError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, ServiceError>>,
{
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
    let mut last_err = None;
    for attempt in 1..=RETRY_ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < RETRY_ATTEMPTS {
                    warn!(attempt, what, error = %err, "Gateway call failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ServiceError::InternalError(format!("{} failed", what))))
}

#[async_trait]
impl PaymentGateway for PesapalClient {
    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<String, ServiceError> {
        with_backoff("authenticate", || self.request_token()).await
    }

    #[instrument(skip(self, request), fields(merchant_reference = %request.id, amount = %request.amount))]
    async fn submit_order(
        &self,
        request: &SubmitOrderRequest,
    ) -> Result<SubmitOrderResponse, ServiceError> {
        let token = self.authenticate().await?;

        let response = self
            .http
            .post(self.url("/api/Transactions/SubmitOrderRequest"))
            .bearer_auth(&token)
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::GatewaySubmissionError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::GatewaySubmissionError(format!(
                "order submission returned {}",
                status
            )));
        }

        let wire: SubmitOrderWireResponse = response.json().await.map_err(|e| {
            ServiceError::GatewaySubmissionError(format!("invalid submission body: {}", e))
        })?;

        if error_is_set(&wire.error) {
            return Err(ServiceError::GatewaySubmissionError(format!(
                "gateway rejected order: {:?}",
                wire.error
            )));
        }

        match (wire.order_tracking_id, wire.redirect_url) {
            (Some(order_tracking_id), Some(redirect_url))
                if !order_tracking_id.is_empty() && !redirect_url.is_empty() =>
            {
                debug!(tracking_id = %order_tracking_id, "Order submitted to gateway");
                Ok(SubmitOrderResponse {
                    order_tracking_id,
                    redirect_url,
                })
            }
            _ => Err(ServiceError::GatewaySubmissionError(
                "tracking id or redirect URL missing from response".into(),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn query_status(&self, tracking_id: &str) -> Result<TransactionStatus, ServiceError> {
        let token = self.authenticate().await?;
        with_backoff("query_status", || self.fetch_status(&token, tracking_id)).await
    }
}
