//! Billing routes
//!
//! User actions (attach, cancel, history) and the PayPal webhook endpoint.
//! The webhook responds 400 only when signature verification fails;
//! processing errors after verification are logged with event context and
//! still acknowledged so PayPal stops redelivering.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use meetnotes_billing::gateway::WebhookSignature;
use meetnotes_billing::{BillingError, EntitlementBundle, SubscriptionRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AttachRequest {
    pub subscription_id: String,
}

/// Attach a PayPal subscription the user just approved
pub async fn attach(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<AttachRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    if request.subscription_id.trim().is_empty() {
        return Err(ApiError::BadRequest("subscription_id is required".to_string()));
    }

    let record = state
        .billing
        .attach_subscription(user.user_id, request.subscription_id.trim())
        .await?;

    Ok(Json(SubscriptionResponse::from_record(record)))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub reason: Option<String>,
}

/// Cancel the user's subscription, deferred to period end or immediately
pub async fn cancel(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let reason = request
        .reason
        .as_deref()
        .unwrap_or("Cancelled by user")
        .to_string();

    let record = state
        .billing
        .cancel_subscription(user.user_id, request.cancel_at_period_end, &reason)
        .await?;

    Ok(Json(SubscriptionResponse::from_record(record)))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: SubscriptionView,
    pub entitlements: EntitlementBundle,
}

/// User-facing slice of the subscription record
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub tier: String,
    pub status: String,
    pub subscription_id: Option<String>,
    pub next_billing_time: Option<time::OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub cancel_scheduled_at: Option<time::OffsetDateTime>,
}

impl SubscriptionResponse {
    fn from_record(record: SubscriptionRecord) -> Self {
        let entitlements = EntitlementBundle::for_tier(record.tier);
        Self {
            subscription: SubscriptionView {
                tier: record.tier.to_string(),
                status: record.status.to_string(),
                subscription_id: record.paypal_subscription_id,
                next_billing_time: record.next_billing_time,
                cancel_at_period_end: record.cancel_at_period_end,
                cancel_scheduled_at: record.cancel_scheduled_at,
            },
            entitlements,
        }
    }
}

/// Current subscription plus resolved entitlements
pub async fn get_subscription(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<SubscriptionResponse>> {
    let (record, _) = state.billing.subscription_overview(user.user_id).await?;
    Ok(Json(SubscriptionResponse::from_record(record)))
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

/// Transaction history, newest first
pub async fn transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(20);
    let entries = state.billing.transactions(user.user_id, limit).await?;

    Ok(Json(json!({ "transactions": entries })))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub amount: String,
    pub currency: Option<String>,
}

/// Create a one-time PayPal checkout order
pub async fn create_order(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let currency = request.currency.as_deref().unwrap_or("USD");
    let order = state.billing.create_order(&request.amount, currency).await?;

    Ok(Json(json!({
        "order_id": order.order_id,
        "status": order.status,
        "approve_url": order.approve_url,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CaptureOrderRequest {
    pub order_id: String,
}

/// Capture an approved one-time order
pub async fn capture_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CaptureOrderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let capture = state
        .billing
        .capture_order(user.user_id, &request.order_id)
        .await?;

    Ok(Json(json!({
        "capture_id": capture.capture_id,
        "status": capture.status,
        "amount": { "value": capture.amount_value, "currency_code": capture.amount_currency },
    })))
}

/// PayPal webhook endpoint
///
/// Signature verification happens against PayPal's verification API before
/// any parsing of consequence. Unknown event types and events matching no
/// record are classified and acknowledged with 200.
pub async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<StatusCode> {
    let signature = signature_from_headers(&headers)
        .ok_or_else(|| ApiError::BadRequest("Missing webhook signature headers".to_string()))?;

    let event = match state.normalizer.normalize(&signature, &body).await {
        Ok(event) => event,
        Err(BillingError::Unauthenticated) => {
            tracing::warn!("Webhook rejected: signature verification failed");
            return Err(ApiError::BadRequest("Invalid webhook signature".to_string()));
        }
        // Verification itself could not run; a non-2xx makes PayPal redeliver
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = state.billing.apply_webhook_event(&event).await {
        tracing::error!(
            event_id = %event.event_id,
            kind = %event.kind,
            subscription_id = ?event.subscription_id,
            error = %e,
            "Webhook processing failed after verification; acknowledging"
        );
    }

    Ok(StatusCode::OK)
}

fn signature_from_headers(headers: &HeaderMap) -> Option<WebhookSignature> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    Some(WebhookSignature {
        transmission_id: get("paypal-transmission-id")?,
        transmission_time: get("paypal-transmission-time")?,
        transmission_sig: get("paypal-transmission-sig")?,
        cert_url: get("paypal-cert-url")?,
        auth_algo: get("paypal-auth-algo")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_requires_all_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("paypal-transmission-id", "tx-1".parse().unwrap());
        headers.insert("paypal-transmission-time", "t".parse().unwrap());
        headers.insert("paypal-transmission-sig", "sig".parse().unwrap());
        headers.insert("paypal-cert-url", "https://api.paypal.com/cert".parse().unwrap());
        assert!(signature_from_headers(&headers).is_none());

        headers.insert("paypal-auth-algo", "SHA256withRSA".parse().unwrap());
        let signature = signature_from_headers(&headers).unwrap();
        assert_eq!(signature.transmission_id, "tx-1");
    }
}
