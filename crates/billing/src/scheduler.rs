//! Deferred cancellation
//!
//! "Cancel at period end" is recorded locally as a flag; no processor call
//! happens at scheduling time. The flag is converted into a real gateway
//! cancel only when a cycle-completed event arrives for the subscription
//! while the flag is still set. A failed gateway cancel leaves the flag in
//! place, so the next cycle event retries.

use meetnotes_shared::SubscriptionStatus;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::{NormalizedWebhookEvent, WebhookEventKind};
use crate::gateway::PaymentGateway;
use crate::record::SubscriptionRecord;

/// Compute the record state after scheduling a cancel-at-period-end
///
/// Only an active subscription can carry a pending cancellation. Tier is
/// untouched; the user keeps paid access until the period closes.
pub fn schedule_cancel_at_period_end(
    record: &SubscriptionRecord,
) -> BillingResult<SubscriptionRecord> {
    if record.status != SubscriptionStatus::Active {
        return Err(BillingError::InvalidState(format!(
            "Cannot schedule cancellation while subscription is {}",
            record.status
        )));
    }

    let mut next = record.clone();
    next.cancel_at_period_end = true;
    next.cancel_scheduled_at = Some(OffsetDateTime::now_utc());
    Ok(next)
}

/// Whether an event resolves a pending deferred cancellation
pub fn fires_deferred_cancel(record: &SubscriptionRecord, event: &NormalizedWebhookEvent) -> bool {
    event.kind == WebhookEventKind::CycleCompleted
        && record.cancel_at_period_end
        && record.status == SubscriptionStatus::Active
}

/// Resolve a pending deferred cancellation on a cycle-completed event
///
/// Issues exactly one gateway cancel per triggering event. Failure is
/// logged, never fatal: the flag stays set and the next cycle event
/// retries. The record itself is not touched here; the processor's own
/// CANCELLED webhook performs the local transition.
pub async fn resolve_cycle_completed(gateway: &dyn PaymentGateway, record: &SubscriptionRecord) {
    let Some(subscription_id) = record.paypal_subscription_id.as_deref() else {
        return;
    };

    match gateway
        .cancel_subscription(subscription_id, "Scheduled cancellation at period end")
        .await
    {
        Ok(()) => {
            tracing::info!(
                user_id = %record.user_id,
                subscription_id = %subscription_id,
                "Deferred cancellation executed at cycle boundary"
            );
        }
        Err(e) => {
            tracing::warn!(
                user_id = %record.user_id,
                subscription_id = %subscription_id,
                error = %e,
                "Deferred cancellation failed, will retry on next cycle event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetnotes_shared::Tier;
    use uuid::Uuid;

    fn active_record() -> SubscriptionRecord {
        let mut record = SubscriptionRecord::absent(Uuid::new_v4());
        record.tier = Tier::Pro;
        record.status = SubscriptionStatus::Active;
        record.paypal_subscription_id = Some("I-SUB1".to_string());
        record
    }

    #[test]
    fn test_schedule_sets_flag_and_keeps_tier() {
        let record = active_record();
        let next = schedule_cancel_at_period_end(&record).unwrap();
        assert!(next.cancel_at_period_end);
        assert!(next.cancel_scheduled_at.is_some());
        assert_eq!(next.tier, Tier::Pro);
        assert_eq!(next.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_schedule_rejected_when_not_active() {
        let mut record = active_record();
        record.status = SubscriptionStatus::Cancelled;
        let result = schedule_cancel_at_period_end(&record);
        assert!(matches!(result, Err(BillingError::InvalidState(_))));
    }

    #[test]
    fn test_cycle_event_fires_only_with_flag_set() {
        let body = r#"{
            "id": "WH-C",
            "event_type": "BILLING.SUBSCRIPTION.CYCLE.COMPLETED",
            "resource": { "id": "I-SUB1" }
        }"#;
        let plans = crate::plans::PlanCatalog {
            pro: "P-PRO".to_string(),
            pro_plus: "P-PROPLUS".to_string(),
            pro_annual: None,
            pro_plus_annual: None,
        };
        let normalizer = crate::events::Normalizer::new(
            std::sync::Arc::new(crate::gateway::MockPaymentGateway::new()),
            plans,
        );
        let event = normalizer.parse(body).unwrap();

        let without_flag = active_record();
        assert!(!fires_deferred_cancel(&without_flag, &event));

        let with_flag = schedule_cancel_at_period_end(&without_flag).unwrap();
        assert!(fires_deferred_cancel(&with_flag, &event));
    }
}
