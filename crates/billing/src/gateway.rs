//! Payment gateway interface and PayPal client
//!
//! The reconciliation core talks to the processor only through the
//! [`PaymentGateway`] trait; `PayPalGateway` is the production
//! implementation over the PayPal REST API. Webhook signatures are verified
//! server-side via PayPal's verify-webhook-signature endpoint, not locally.
//!
//! All requests carry a bounded timeout; a timeout is a retryable gateway
//! failure, never success.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::RwLock;

use crate::error::{BillingError, BillingResult};

/// Request timeout for all gateway calls
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Refresh the OAuth token this long before its reported expiry
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

// =============================================================================
// Gateway data types
// =============================================================================

/// Processor's view of a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSubscription {
    pub id: String,
    /// Raw processor status string (e.g. "ACTIVE", "CANCELLED")
    pub status: String,
    pub plan_id: String,
    pub subscriber_email: Option<String>,
    pub next_billing_time: Option<OffsetDateTime>,
}

/// Transport-level signature headers accompanying a webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookSignature {
    pub transmission_id: String,
    pub transmission_time: String,
    pub transmission_sig: String,
    pub cert_url: String,
    pub auth_algo: String,
}

/// Amount for a partial refund
#[derive(Debug, Clone)]
pub struct RefundAmount {
    pub value: String,
    pub currency: String,
}

/// Result of a capture refund
#[derive(Debug, Clone)]
pub struct RefundResult {
    pub refund_id: String,
    pub status: String,
}

/// A created (not yet captured) order
#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: String,
    pub status: String,
    pub approve_url: Option<String>,
}

/// Result of capturing an order
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub capture_id: String,
    pub status: String,
    pub amount_value: String,
    pub amount_currency: String,
}

// =============================================================================
// Gateway trait
// =============================================================================

/// Remote payment processor operations consumed by the reconciliation core
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Fetch the processor's current view of a subscription
    async fn fetch_subscription(&self, subscription_id: &str)
        -> BillingResult<ProcessorSubscription>;

    /// Verify a webhook delivery's signature; `Ok(false)` means the payload
    /// must be rejected without further processing
    async fn verify_webhook_signature(
        &self,
        signature: &WebhookSignature,
        body: &str,
    ) -> BillingResult<bool>;

    /// Cancel a subscription on the processor side
    async fn cancel_subscription(&self, subscription_id: &str, reason: &str) -> BillingResult<()>;

    /// Refund a capture, fully (`amount = None`) or partially
    async fn refund_capture(
        &self,
        capture_id: &str,
        amount: Option<RefundAmount>,
        note: &str,
    ) -> BillingResult<RefundResult>;

    /// Create a one-time order
    async fn create_order(&self, amount_value: &str, currency: &str) -> BillingResult<Order>;

    /// Capture a previously approved order
    async fn capture_order(&self, order_id: &str) -> BillingResult<CaptureResult>;
}

// =============================================================================
// PayPal implementation
// =============================================================================

/// Configuration for the PayPal gateway
#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Webhook id assigned by PayPal when the webhook endpoint was registered
    pub webhook_id: String,
    /// API base, e.g. https://api-m.paypal.com (or the sandbox host)
    pub api_base: String,
}

impl PayPalConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            client_id: std::env::var("PAYPAL_CLIENT_ID")
                .map_err(|_| BillingError::Config("PAYPAL_CLIENT_ID not set".to_string()))?,
            client_secret: std::env::var("PAYPAL_CLIENT_SECRET")
                .map_err(|_| BillingError::Config("PAYPAL_CLIENT_SECRET not set".to_string()))?,
            webhook_id: std::env::var("PAYPAL_WEBHOOK_ID")
                .map_err(|_| BillingError::Config("PAYPAL_WEBHOOK_ID not set".to_string()))?,
            api_base: std::env::var("PAYPAL_API_BASE")
                .unwrap_or_else(|_| "https://api-m.paypal.com".to_string()),
        })
    }
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: OffsetDateTime,
}

/// PayPal REST API client
pub struct PayPalGateway {
    config: PayPalConfig,
    client: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
}

impl PayPalGateway {
    /// Create a new gateway from config
    pub fn new(config: PayPalConfig) -> BillingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Self::new(PayPalConfig::from_env()?)
    }

    /// Get a valid OAuth access token, refreshing via the client-credentials
    /// grant when the cached one is missing or near expiry
    async fn access_token(&self) -> BillingResult<String> {
        let now = OffsetDateTime::now_utc();
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > now + TOKEN_EXPIRY_SLACK {
                    return Ok(token.access_token.clone());
                }
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.config.api_base))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Gateway(format!(
                "OAuth token request failed: {} {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("Malformed token response: {}", e)))?;

        let access_token = token.access_token.clone();
        *self.token.write().await = Some(CachedToken {
            access_token: token.access_token,
            expires_at: now + Duration::from_secs(token.expires_in.max(0) as u64),
        });

        Ok(access_token)
    }

    async fn check_status(response: reqwest::Response, context: &str) -> BillingResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(BillingError::Gateway(format!(
            "{} failed: {} {}",
            context, status, body
        )))
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProcessorSubscription> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!(
                "{}/v1/billing/subscriptions/{}",
                self.config.api_base, subscription_id
            ))
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BillingError::NotFound(format!(
                "Subscription {} not found at processor",
                subscription_id
            )));
        }
        let response = Self::check_status(response, "fetch_subscription").await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("Malformed subscription body: {}", e)))?;

        let next_billing_time = body
            .pointer("/billing_info/next_billing_time")
            .and_then(|v| v.as_str())
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());

        Ok(ProcessorSubscription {
            id: body
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or(subscription_id)
                .to_string(),
            status: body
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            plan_id: body
                .get("plan_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            subscriber_email: body
                .pointer("/subscriber/email_address")
                .and_then(|v| v.as_str())
                .map(String::from),
            next_billing_time,
        })
    }

    async fn verify_webhook_signature(
        &self,
        signature: &WebhookSignature,
        body: &str,
    ) -> BillingResult<bool> {
        let event: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| BillingError::Gateway(format!("Webhook body is not JSON: {}", e)))?;

        let token = self.access_token().await?;
        let request = serde_json::json!({
            "transmission_id": signature.transmission_id,
            "transmission_time": signature.transmission_time,
            "transmission_sig": signature.transmission_sig,
            "cert_url": signature.cert_url,
            "auth_algo": signature.auth_algo,
            "webhook_id": self.config.webhook_id,
            "webhook_event": event,
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.config.api_base
            ))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;
        let response = Self::check_status(response, "verify_webhook_signature").await?;

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("Malformed verification body: {}", e)))?;

        Ok(result
            .get("verification_status")
            .and_then(|v| v.as_str())
            .map(|s| s == "SUCCESS")
            .unwrap_or(false))
    }

    async fn cancel_subscription(&self, subscription_id: &str, reason: &str) -> BillingResult<()> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v1/billing/subscriptions/{}/cancel",
                self.config.api_base, subscription_id
            ))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await?;
        Self::check_status(response, "cancel_subscription").await?;
        Ok(())
    }

    async fn refund_capture(
        &self,
        capture_id: &str,
        amount: Option<RefundAmount>,
        note: &str,
    ) -> BillingResult<RefundResult> {
        let token = self.access_token().await?;
        let mut request = serde_json::json!({ "note_to_payer": note });
        if let Some(amount) = amount {
            request["amount"] = serde_json::json!({
                "value": amount.value,
                "currency_code": amount.currency,
            });
        }

        let response = self
            .client
            .post(format!(
                "{}/v2/payments/captures/{}/refund",
                self.config.api_base, capture_id
            ))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;
        let response = Self::check_status(response, "refund_capture").await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("Malformed refund body: {}", e)))?;

        Ok(RefundResult {
            refund_id: body
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            status: body
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn create_order(&self, amount_value: &str, currency: &str) -> BillingResult<Order> {
        let token = self.access_token().await?;
        let request = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": { "currency_code": currency, "value": amount_value }
            }]
        });

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.config.api_base))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;
        let response = Self::check_status(response, "create_order").await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("Malformed order body: {}", e)))?;

        let approve_url = body
            .get("links")
            .and_then(|v| v.as_array())
            .and_then(|links| {
                links.iter().find(|l| {
                    l.get("rel").and_then(|r| r.as_str()) == Some("approve")
                })
            })
            .and_then(|l| l.get("href"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Order {
            order_id: body
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            status: body
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            approve_url,
        })
    }

    async fn capture_order(&self, order_id: &str) -> BillingResult<CaptureResult> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.config.api_base, order_id
            ))
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let response = Self::check_status(response, "capture_order").await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("Malformed capture body: {}", e)))?;

        let capture = body
            .pointer("/purchase_units/0/payments/captures/0")
            .cloned()
            .unwrap_or_default();

        Ok(CaptureResult {
            capture_id: capture
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            status: body
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            amount_value: capture
                .pointer("/amount/value")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            amount_currency: capture
                .pointer("/amount/currency_code")
                .and_then(|v| v.as_str())
                .unwrap_or("USD")
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Mutates process environment; serialized against other env tests
    #[test]
    #[serial(env)]
    fn test_config_missing_env_is_config_error() {
        std::env::remove_var("PAYPAL_CLIENT_ID");
        let result = PayPalConfig::from_env();
        assert!(matches!(result, Err(BillingError::Config(_))));
    }
}
