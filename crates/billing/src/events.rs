//! Webhook event normalization
//!
//! Turns a raw PayPal webhook delivery into one typed
//! [`NormalizedWebhookEvent`]. The event catalogue is a closed tagged enum so
//! the state machine's transition handling is exhaustive; anything outside
//! the catalogue lands in `Unrecognized` and is treated as bookkeeping only.
//!
//! Normalization verifies the delivery's signature first (via the gateway's
//! verification call) and is otherwise side-effect free.

use std::sync::Arc;

use meetnotes_shared::{SubscriptionStatus, Tier};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{PaymentGateway, WebhookSignature};
use crate::plans::PlanCatalog;

/// PayPal webhook event catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEventKind {
    SubscriptionCreated,
    SubscriptionActivated,
    SubscriptionUpdated,
    SubscriptionCancelled,
    SubscriptionExpired,
    SubscriptionSuspended,
    SubscriptionPaymentFailed,
    CycleCompleted,
    CaptureCompleted,
    CaptureRefunded,
    CaptureDenied,
    SaleCompleted,
    /// Event type outside the catalogue; carried verbatim for logging
    Unrecognized(String),
}

impl WebhookEventKind {
    /// Map a raw PayPal event type string
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "BILLING.SUBSCRIPTION.CREATED" => Self::SubscriptionCreated,
            "BILLING.SUBSCRIPTION.ACTIVATED" => Self::SubscriptionActivated,
            "BILLING.SUBSCRIPTION.UPDATED" => Self::SubscriptionUpdated,
            "BILLING.SUBSCRIPTION.CANCELLED" => Self::SubscriptionCancelled,
            "BILLING.SUBSCRIPTION.EXPIRED" => Self::SubscriptionExpired,
            "BILLING.SUBSCRIPTION.SUSPENDED" => Self::SubscriptionSuspended,
            "BILLING.SUBSCRIPTION.PAYMENT.FAILED" => Self::SubscriptionPaymentFailed,
            "BILLING.SUBSCRIPTION.CYCLE.COMPLETED" => Self::CycleCompleted,
            "PAYMENT.CAPTURE.COMPLETED" => Self::CaptureCompleted,
            "PAYMENT.CAPTURE.REFUNDED" => Self::CaptureRefunded,
            "PAYMENT.CAPTURE.DENIED" => Self::CaptureDenied,
            "PAYMENT.SALE.COMPLETED" => Self::SaleCompleted,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Events that record money movement in the transaction ledger
    pub fn is_payment(&self) -> bool {
        matches!(
            self,
            Self::CaptureCompleted | Self::SaleCompleted | Self::CaptureRefunded
        )
    }

    /// Events whose resource body is a capture or sale rather than a
    /// subscription; `resource.id` is the transaction id for these, and the
    /// subscription id rides in `billing_agreement_id` / supplementary data
    pub fn has_capture_resource(&self) -> bool {
        matches!(
            self,
            Self::CaptureCompleted
                | Self::SaleCompleted
                | Self::CaptureRefunded
                | Self::CaptureDenied
        )
    }
}

impl std::fmt::Display for WebhookEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SubscriptionCreated => "BILLING.SUBSCRIPTION.CREATED",
            Self::SubscriptionActivated => "BILLING.SUBSCRIPTION.ACTIVATED",
            Self::SubscriptionUpdated => "BILLING.SUBSCRIPTION.UPDATED",
            Self::SubscriptionCancelled => "BILLING.SUBSCRIPTION.CANCELLED",
            Self::SubscriptionExpired => "BILLING.SUBSCRIPTION.EXPIRED",
            Self::SubscriptionSuspended => "BILLING.SUBSCRIPTION.SUSPENDED",
            Self::SubscriptionPaymentFailed => "BILLING.SUBSCRIPTION.PAYMENT.FAILED",
            Self::CycleCompleted => "BILLING.SUBSCRIPTION.CYCLE.COMPLETED",
            Self::CaptureCompleted => "PAYMENT.CAPTURE.COMPLETED",
            Self::CaptureRefunded => "PAYMENT.CAPTURE.REFUNDED",
            Self::CaptureDenied => "PAYMENT.CAPTURE.DENIED",
            Self::SaleCompleted => "PAYMENT.SALE.COMPLETED",
            Self::Unrecognized(s) => s,
        };
        write!(f, "{}", s)
    }
}

/// A verified, typed webhook event
///
/// Ephemeral: constructed per delivery and persisted only through the record
/// and ledger writes it drives.
#[derive(Debug, Clone)]
pub struct NormalizedWebhookEvent {
    /// Processor-assigned event id, used for de-duplication
    pub event_id: String,
    pub kind: WebhookEventKind,
    pub subscription_id: Option<String>,
    /// Status as reported, mapped into the local catalogue
    pub reported_status: Option<SubscriptionStatus>,
    /// Raw status string as reported, kept for verbatim bookkeeping
    pub raw_status: Option<String>,
    pub plan_id: Option<String>,
    /// Tier the plan id maps to; `None` means "do not change tier"
    pub mapped_tier: Option<Tier>,
    pub next_billing_time: Option<OffsetDateTime>,
    pub subscriber_email: Option<String>,
    /// Transaction id for payment events (capture/sale/refund resource id)
    pub transaction_id: Option<String>,
    pub amount_value: Option<String>,
    pub amount_currency: Option<String>,
    /// Full payload, retained for audit logging only
    pub raw: serde_json::Value,
}

impl NormalizedWebhookEvent {
    /// Explicit "should-activate" classification: the only path that raises
    /// tier to a paid plan
    pub fn should_activate(&self) -> bool {
        match self.kind {
            WebhookEventKind::SubscriptionActivated => self.mapped_tier.is_some(),
            _ => {
                self.reported_status == Some(SubscriptionStatus::Active)
                    && self.mapped_tier.is_some()
            }
        }
    }

    /// Explicit "should-set-to-free" classification: the only path that
    /// lowers tier to free
    pub fn should_set_free(&self) -> bool {
        match self.kind {
            WebhookEventKind::SubscriptionCancelled
            | WebhookEventKind::SubscriptionExpired
            | WebhookEventKind::SubscriptionSuspended
            | WebhookEventKind::SubscriptionPaymentFailed
            | WebhookEventKind::CaptureDenied => true,
            _ => self
                .reported_status
                .map(|s| s.is_terminal())
                .unwrap_or(false),
        }
    }
}

/// Webhook event normalizer
///
/// Verifies authenticity through the gateway, then extracts the typed event.
pub struct Normalizer {
    gateway: Arc<dyn PaymentGateway>,
    plans: PlanCatalog,
}

impl Normalizer {
    pub fn new(gateway: Arc<dyn PaymentGateway>, plans: PlanCatalog) -> Self {
        Self { gateway, plans }
    }

    /// Verify and normalize a raw webhook delivery
    ///
    /// Returns `BillingError::Unauthenticated` on signature failure; the
    /// caller must reject the request without further processing.
    pub async fn normalize(
        &self,
        signature: &WebhookSignature,
        body: &str,
    ) -> BillingResult<NormalizedWebhookEvent> {
        let verified = self.gateway.verify_webhook_signature(signature, body).await?;
        if !verified {
            return Err(BillingError::Unauthenticated);
        }

        self.parse(body)
    }

    /// Extract the typed event from an already-verified payload
    pub fn parse(&self, body: &str) -> BillingResult<NormalizedWebhookEvent> {
        let raw: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| BillingError::Internal(format!("Webhook body is not JSON: {}", e)))?;

        let event_type = raw
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let kind = WebhookEventKind::from_event_type(event_type);

        let event_id = raw
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let resource = raw.get("resource").cloned().unwrap_or_default();

        // Subscription events carry the subscription id as resource.id;
        // capture-shaped events reference it via billing_agreement_id or
        // supplementary_data.
        let (subscription_id, transaction_id) = if kind.has_capture_resource() {
            let txn = resource.get("id").and_then(|v| v.as_str()).map(String::from);
            let sub = resource
                .get("billing_agreement_id")
                .and_then(|v| v.as_str())
                .or_else(|| {
                    resource
                        .pointer("/supplementary_data/related_ids/subscription_id")
                        .and_then(|v| v.as_str())
                })
                .map(String::from);
            (sub, txn)
        } else {
            (
                resource.get("id").and_then(|v| v.as_str()).map(String::from),
                None,
            )
        };

        // A capture resource's status ("COMPLETED", "DECLINED") describes the
        // payment, not the subscription; it must not feed status bookkeeping
        let raw_status = if kind.has_capture_resource() {
            None
        } else {
            resource
                .get("status")
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        let reported_status = raw_status
            .as_deref()
            .map(SubscriptionStatus::from_processor)
            // Subscription lifecycle events imply a status even when the
            // resource body omits one
            .or(match kind {
                WebhookEventKind::SubscriptionActivated => Some(SubscriptionStatus::Active),
                WebhookEventKind::SubscriptionCreated => Some(SubscriptionStatus::Created),
                WebhookEventKind::SubscriptionCancelled => Some(SubscriptionStatus::Cancelled),
                WebhookEventKind::SubscriptionExpired => Some(SubscriptionStatus::Expired),
                WebhookEventKind::SubscriptionSuspended => Some(SubscriptionStatus::Suspended),
                WebhookEventKind::SubscriptionPaymentFailed => Some(SubscriptionStatus::Failed),
                _ => None,
            });

        let plan_id = resource
            .get("plan_id")
            .and_then(|v| v.as_str())
            .map(String::from);
        let mapped_tier = plan_id
            .as_deref()
            .and_then(|id| self.plans.tier_for_plan_id(id));

        let next_billing_time = resource
            .pointer("/billing_info/next_billing_time")
            .and_then(|v| v.as_str())
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());

        let subscriber_email = resource
            .pointer("/subscriber/email_address")
            .and_then(|v| v.as_str())
            .map(String::from);

        // Capture events use amount.value / currency_code; legacy sale
        // events use amount.total / currency
        let amount_value = resource
            .pointer("/amount/value")
            .or_else(|| resource.pointer("/amount/total"))
            .and_then(|v| v.as_str())
            .map(String::from);
        let amount_currency = resource
            .pointer("/amount/currency_code")
            .or_else(|| resource.pointer("/amount/currency"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(NormalizedWebhookEvent {
            event_id,
            kind,
            subscription_id,
            reported_status,
            raw_status,
            plan_id,
            mapped_tier,
            next_billing_time,
            subscriber_email,
            transaction_id,
            amount_value,
            amount_currency,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockPaymentGateway;

    fn plans() -> PlanCatalog {
        PlanCatalog {
            pro: "P-PRO".to_string(),
            pro_plus: "P-PROPLUS".to_string(),
            pro_annual: None,
            pro_plus_annual: None,
        }
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(MockPaymentGateway::new()), plans())
    }

    fn signature() -> WebhookSignature {
        WebhookSignature {
            transmission_id: "tx-1".to_string(),
            transmission_time: "2026-01-01T00:00:00Z".to_string(),
            transmission_sig: "sig".to_string(),
            cert_url: "https://api.paypal.com/cert".to_string(),
            auth_algo: "SHA256withRSA".to_string(),
        }
    }

    const ACTIVATED: &str = r#"{
        "id": "WH-1",
        "event_type": "BILLING.SUBSCRIPTION.ACTIVATED",
        "resource": {
            "id": "I-SUB1",
            "status": "ACTIVE",
            "plan_id": "P-PRO",
            "subscriber": { "email_address": "alex@example.com" },
            "billing_info": { "next_billing_time": "2026-09-25T10:00:00Z" }
        }
    }"#;

    #[test]
    fn test_parse_activated_event() {
        let event = normalizer().parse(ACTIVATED).unwrap();
        assert_eq!(event.event_id, "WH-1");
        assert_eq!(event.kind, WebhookEventKind::SubscriptionActivated);
        assert_eq!(event.subscription_id.as_deref(), Some("I-SUB1"));
        assert_eq!(event.reported_status, Some(SubscriptionStatus::Active));
        assert_eq!(event.mapped_tier, Some(Tier::Pro));
        assert_eq!(event.subscriber_email.as_deref(), Some("alex@example.com"));
        assert!(event.next_billing_time.is_some());
        assert!(event.should_activate());
        assert!(!event.should_set_free());
    }

    #[test]
    fn test_parse_unmapped_plan_yields_no_tier() {
        let body = ACTIVATED.replace("P-PRO", "P-SOMETHING-ELSE");
        let event = normalizer().parse(&body).unwrap();
        assert_eq!(event.plan_id.as_deref(), Some("P-SOMETHING-ELSE"));
        assert_eq!(event.mapped_tier, None);
        // Without a resolvable plan there is nothing to activate
        assert!(!event.should_activate());
    }

    #[test]
    fn test_parse_cancelled_event_sets_free() {
        let body = r#"{
            "id": "WH-2",
            "event_type": "BILLING.SUBSCRIPTION.CANCELLED",
            "resource": { "id": "I-SUB1", "status": "CANCELLED" }
        }"#;
        let event = normalizer().parse(body).unwrap();
        assert_eq!(event.kind, WebhookEventKind::SubscriptionCancelled);
        assert_eq!(event.reported_status, Some(SubscriptionStatus::Cancelled));
        assert!(event.should_set_free());
        assert!(!event.should_activate());
    }

    #[test]
    fn test_parse_unknown_status_is_bookkeeping_only() {
        let body = r#"{
            "id": "WH-3",
            "event_type": "BILLING.SUBSCRIPTION.UPDATED",
            "resource": { "id": "I-SUB1", "status": "SOME_NEW_STATUS" }
        }"#;
        let event = normalizer().parse(body).unwrap();
        assert_eq!(event.reported_status, Some(SubscriptionStatus::Unknown));
        assert!(!event.should_activate());
        assert!(!event.should_set_free());
    }

    #[test]
    fn test_parse_capture_completed_payment_fields() {
        let body = r#"{
            "id": "WH-4",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAP-99",
                "status": "COMPLETED",
                "amount": { "value": "12.00", "currency_code": "USD" },
                "supplementary_data": { "related_ids": { "subscription_id": "I-SUB1" } }
            }
        }"#;
        let event = normalizer().parse(body).unwrap();
        assert_eq!(event.kind, WebhookEventKind::CaptureCompleted);
        assert_eq!(event.transaction_id.as_deref(), Some("CAP-99"));
        assert_eq!(event.subscription_id.as_deref(), Some("I-SUB1"));
        assert_eq!(event.amount_value.as_deref(), Some("12.00"));
        assert_eq!(event.amount_currency.as_deref(), Some("USD"));
        // Capture status is a payment status, not a subscription status
        assert_eq!(event.reported_status, None);
    }

    #[test]
    fn test_parse_capture_denied_targets_the_subscription() {
        let body = r#"{
            "id": "WH-7",
            "event_type": "PAYMENT.CAPTURE.DENIED",
            "resource": {
                "id": "CAP-77",
                "status": "DECLINED",
                "amount": { "value": "12.00", "currency_code": "USD" },
                "supplementary_data": { "related_ids": { "subscription_id": "I-SUB1" } }
            }
        }"#;
        let event = normalizer().parse(body).unwrap();
        assert_eq!(event.kind, WebhookEventKind::CaptureDenied);
        // The capture id must never be mistaken for the subscription id
        assert_eq!(event.subscription_id.as_deref(), Some("I-SUB1"));
        assert_eq!(event.transaction_id.as_deref(), Some("CAP-77"));
        assert!(event.should_set_free());
        assert!(!event.should_activate());
        // Denied captures do not record money movement
        assert!(!event.kind.is_payment());
    }

    #[test]
    fn test_parse_unrecognized_event_type() {
        let body = r#"{
            "id": "WH-5",
            "event_type": "CUSTOMER.DISPUTE.CREATED",
            "resource": { "id": "D-1" }
        }"#;
        let event = normalizer().parse(body).unwrap();
        assert_eq!(
            event.kind,
            WebhookEventKind::Unrecognized("CUSTOMER.DISPUTE.CREATED".to_string())
        );
        assert!(!event.should_activate());
        assert!(!event.should_set_free());
    }

    #[tokio::test]
    async fn test_normalize_rejects_bad_signature() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| Ok(false));
        let normalizer = Normalizer::new(Arc::new(gateway), plans());

        let result = normalizer.normalize(&signature(), ACTIVATED).await;
        assert!(matches!(result, Err(BillingError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_normalize_accepts_good_signature() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| Ok(true));
        let normalizer = Normalizer::new(Arc::new(gateway), plans());

        let event = normalizer.normalize(&signature(), ACTIVATED).await.unwrap();
        assert_eq!(event.kind, WebhookEventKind::SubscriptionActivated);
    }
}
