//! Subscription reconciliation state machine
//!
//! One transition function serves every entry point: webhook deliveries and
//! user actions both read the current record, compute a [`TransitionPlan`],
//! and apply it through the store's conditional write. The record write
//! commits first; ledger appends, emails, and entitlement broadcasts run
//! after commit and are logged on failure, never rolled back into the
//! transition's result.
//!
//! Tier moves are deliberately conservative. Only an explicit activation
//! classification raises tier to a paid plan, and only an explicit
//! set-to-free classification lowers it. Every other event is bookkeeping:
//! status and billing timestamps update, tier does not.

use std::sync::Arc;

use meetnotes_shared::{SubscriptionStatus, Tier};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use crate::broadcast::{EntitlementBroadcaster, EntitlementChange};
use crate::email::{BillingNotifier, NotificationTemplate};
use crate::entitlement::EntitlementBundle;
use crate::error::{BillingError, BillingResult};
use crate::events::{NormalizedWebhookEvent, WebhookEventKind};
use crate::gateway::{CaptureResult, Order, PaymentGateway};
use crate::ledger::{
    TransactionLedger, TransactionLedgerEntry, TransactionStatus, TransactionType,
};
use crate::plans::PlanCatalog;
use crate::record::{SubscriptionRecord, SubscriptionStore};
use crate::scheduler;

/// Attempts for a conditional write before giving up on a contended record
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Outcome of planning a transition against the current record
#[derive(Debug, Clone)]
pub enum TransitionPlan {
    /// The record already reflects this event; nothing to write
    NoOp,
    /// Write `next`, conditional on the read record's `updated_at`
    Write {
        next: SubscriptionRecord,
        /// Set when tier moves; drives the entitlement broadcast
        tier_change: Option<(Tier, Tier)>,
        /// Email to send after the write commits
        notification: Option<NotificationTemplate>,
    },
}

/// Compute the next record state for a normalized webhook event
///
/// Pure: reads the current record and the event, produces the plan. Safe to
/// recompute after a stale-write rejection against a fresh read. Reapplying
/// an event whose effects are already recorded yields [`TransitionPlan::NoOp`].
pub fn plan_transition(
    current: &SubscriptionRecord,
    event: &NormalizedWebhookEvent,
) -> TransitionPlan {
    let mut next = current.clone();

    // Bookkeeping fields update regardless of tier classification
    if let Some(t) = event.next_billing_time {
        next.next_billing_time = Some(t);
    }
    if let Some(email) = &event.subscriber_email {
        next.subscriber_email = Some(email.clone());
    }
    if let Some(plan_id) = &event.plan_id {
        next.paypal_plan_id = Some(plan_id.clone());
    }

    // Status follows the report verbatim, with two one-way guards: a
    // terminal record is never walked back to active/created by a stale
    // event, and a free record never shows active (that would grant
    // access no classification has approved)
    if let Some(reported) = event.reported_status {
        let resurrects = current.status.is_terminal()
            && matches!(
                reported,
                SubscriptionStatus::Active | SubscriptionStatus::Created
            );
        let grants_access = reported == SubscriptionStatus::Active && !next.tier.is_paid();
        if !resurrects && !grants_access {
            next.status = reported;
        }
    }

    let mut notification = None;

    if event.should_activate() {
        if let Some(tier) = event.mapped_tier {
            next.status = SubscriptionStatus::Active;
            next.tier = tier;
            if let Some(subscription_id) = &event.subscription_id {
                next.paypal_subscription_id = Some(subscription_id.clone());
            }
            if current.tier != tier {
                notification = Some(NotificationTemplate::SubscriptionActivated {
                    tier: tier.to_string(),
                });
            }
        }
    } else if event.should_set_free() {
        next.tier = Tier::Free;
        next.status = terminal_status_for(current, event);
        next.cancel_at_period_end = false;
        next.cancel_scheduled_at = None;
        next.next_billing_time = None;
        if current.tier.is_paid() {
            notification = Some(match event.kind {
                WebhookEventKind::SubscriptionPaymentFailed | WebhookEventKind::CaptureDenied => {
                    NotificationTemplate::PaymentFailed
                }
                _ => NotificationTemplate::SubscriptionCancelled {
                    tier: current.tier.to_string(),
                },
            });
        }
    }

    if same_state(current, &next) {
        return TransitionPlan::NoOp;
    }

    let tier_change = (current.tier != next.tier).then_some((current.tier, next.tier));
    TransitionPlan::Write {
        next,
        tier_change,
        notification,
    }
}

/// Terminal status for a set-to-free transition
fn terminal_status_for(
    current: &SubscriptionRecord,
    event: &NormalizedWebhookEvent,
) -> SubscriptionStatus {
    if let Some(reported) = event.reported_status {
        if reported.is_terminal() {
            return reported;
        }
    }
    match event.kind {
        WebhookEventKind::SubscriptionCancelled => SubscriptionStatus::Cancelled,
        WebhookEventKind::SubscriptionExpired => SubscriptionStatus::Expired,
        WebhookEventKind::SubscriptionSuspended => SubscriptionStatus::Suspended,
        WebhookEventKind::SubscriptionPaymentFailed | WebhookEventKind::CaptureDenied => {
            SubscriptionStatus::Failed
        }
        _ if current.status.is_terminal() => current.status,
        _ => SubscriptionStatus::Cancelled,
    }
}

/// Field-level equality ignoring row timestamps
fn same_state(a: &SubscriptionRecord, b: &SubscriptionRecord) -> bool {
    a.tier == b.tier
        && a.status == b.status
        && a.paypal_subscription_id == b.paypal_subscription_id
        && a.paypal_plan_id == b.paypal_plan_id
        && a.subscriber_email == b.subscriber_email
        && a.next_billing_time == b.next_billing_time
        && a.cancel_at_period_end == b.cancel_at_period_end
        && a.cancel_scheduled_at == b.cancel_scheduled_at
}

/// Applies transitions and dispatches side effects
///
/// Webhook deliveries and user actions share this service; each call is an
/// independent, short-lived unit of work. Concurrent units for the same user
/// are reconciled by the store's conditional write, not by locking.
pub struct ReconciliationService {
    store: Arc<dyn SubscriptionStore>,
    ledger: Arc<dyn TransactionLedger>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn BillingNotifier>,
    broadcaster: Arc<dyn EntitlementBroadcaster>,
    plans: PlanCatalog,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        ledger: Arc<dyn TransactionLedger>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn BillingNotifier>,
        broadcaster: Arc<dyn EntitlementBroadcaster>,
        plans: PlanCatalog,
    ) -> Self {
        Self {
            store,
            ledger,
            gateway,
            notifier,
            broadcaster,
            plans,
        }
    }

    /// Apply a verified webhook event
    ///
    /// Returns `Ok(())` once the event is durably classified, including
    /// events that match no record or carry an unrecognized type; the
    /// webhook endpoint acknowledges those with 200 so the processor stops
    /// redelivering.
    pub async fn apply_webhook_event(&self, event: &NormalizedWebhookEvent) -> BillingResult<()> {
        if !event.event_id.is_empty() {
            match self.store.record_processed_event(&event.event_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(
                        event_id = %event.event_id,
                        kind = %event.kind,
                        "Duplicate webhook delivery, already processed"
                    );
                    return Ok(());
                }
                Err(e) => {
                    // Dedup is an optimization over an already idempotent
                    // pipeline; a failed check never blocks processing
                    tracing::warn!(error = %e, "Processed-event check failed, continuing");
                }
            }
        }

        let Some(subscription_id) = event.subscription_id.as_deref() else {
            tracing::info!(
                event_id = %event.event_id,
                kind = %event.kind,
                "Webhook event carries no subscription id, ignoring"
            );
            return Ok(());
        };

        let Some(mut current) = self.store.find_by_subscription_id(subscription_id).await? else {
            tracing::warn!(
                subscription_id = %subscription_id,
                kind = %event.kind,
                "No record owns this subscription, ignoring"
            );
            return Ok(());
        };

        let mut written: Option<SubscriptionRecord> = None;
        let mut tier_change = None;
        let mut notification = None;

        for attempt in 0..MAX_WRITE_ATTEMPTS {
            match plan_transition(&current, event) {
                TransitionPlan::NoOp => {
                    tracing::debug!(
                        subscription_id = %subscription_id,
                        kind = %event.kind,
                        "Event already reflected in record"
                    );
                    break;
                }
                TransitionPlan::Write {
                    next,
                    tier_change: tc,
                    notification: note,
                } => match self.store.upsert(&next, Some(current.updated_at)).await {
                    Ok(record) => {
                        tracing::info!(
                            user_id = %record.user_id,
                            subscription_id = %subscription_id,
                            kind = %event.kind,
                            status = %record.status,
                            tier = %record.tier,
                            "Subscription transition applied"
                        );
                        written = Some(record);
                        tier_change = tc;
                        notification = note;
                        break;
                    }
                    Err(BillingError::StaleWrite(_)) if attempt + 1 < MAX_WRITE_ATTEMPTS => {
                        // A concurrent unit won the write; replan against
                        // the fresh record
                        current = self
                            .store
                            .find_by_subscription_id(subscription_id)
                            .await?
                            .ok_or_else(|| {
                                BillingError::NotFound(format!(
                                    "Record for subscription {} disappeared mid-transition",
                                    subscription_id
                                ))
                            })?;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        let record = written.unwrap_or(current);

        if scheduler::fires_deferred_cancel(&record, event) {
            scheduler::resolve_cycle_completed(self.gateway.as_ref(), &record).await;
        }

        if event.kind.is_payment() {
            self.append_payment(&record, event).await;
        }

        if let Some((from, to)) = tier_change {
            self.broadcast_tier_change(record.user_id, from, to).await;
        }

        if let Some(template) = notification {
            self.notify(&record, template).await;
        }

        Ok(())
    }

    /// Attach a processor subscription to a user
    pub async fn attach_subscription(
        &self,
        user_id: Uuid,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionRecord> {
        let subscription = self.gateway.fetch_subscription(subscription_id).await?;

        let status = SubscriptionStatus::from_processor(&subscription.status);
        if status != SubscriptionStatus::Active {
            return Err(BillingError::InvalidState(format!(
                "Subscription is {} at the processor, expected ACTIVE",
                subscription.status
            )));
        }

        let tier = self
            .plans
            .tier_for_plan_id(&subscription.plan_id)
            .ok_or_else(|| BillingError::UnresolvedPlan(subscription.plan_id.clone()))?;

        let mut last_err = BillingError::Internal("Attach did not run".to_string());
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.store.get_for_user(user_id).await?;

            if let Some(record) = &current {
                if record.is_active() {
                    if let Some(existing) = &record.paypal_subscription_id {
                        if existing != subscription_id {
                            return Err(BillingError::Conflict(format!(
                                "User already holds active subscription {}",
                                existing
                            )));
                        }
                    }
                }
            }

            if let Some(owner) = self.store.find_by_subscription_id(subscription_id).await? {
                if owner.user_id != user_id {
                    return Err(BillingError::Conflict(
                        "Subscription is attached to another account".to_string(),
                    ));
                }
            }

            let previous_tier = current.as_ref().map(|r| r.tier).unwrap_or(Tier::Free);
            let mut next = current
                .clone()
                .unwrap_or_else(|| SubscriptionRecord::absent(user_id));
            next.tier = tier;
            next.status = SubscriptionStatus::Active;
            next.paypal_subscription_id = Some(subscription_id.to_string());
            next.paypal_plan_id = Some(subscription.plan_id.clone());
            next.subscriber_email = subscription
                .subscriber_email
                .clone()
                .or(next.subscriber_email);
            next.next_billing_time = subscription.next_billing_time;
            next.cancel_at_period_end = false;
            next.cancel_scheduled_at = None;

            let expected = current.as_ref().map(|r| r.updated_at);
            match self.store.upsert(&next, expected).await {
                Ok(record) => {
                    tracing::info!(
                        user_id = %user_id,
                        subscription_id = %subscription_id,
                        tier = %record.tier,
                        "Subscription attached"
                    );
                    if previous_tier != record.tier {
                        self.broadcast_tier_change(user_id, previous_tier, record.tier)
                            .await;
                        self.notify(
                            &record,
                            NotificationTemplate::SubscriptionActivated {
                                tier: record.tier.to_string(),
                            },
                        )
                        .await;
                    }
                    return Ok(record);
                }
                Err(BillingError::StaleWrite(msg)) => {
                    last_err = BillingError::StaleWrite(msg);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// Cancel a user's subscription, deferred or immediately
    pub async fn cancel_subscription(
        &self,
        user_id: Uuid,
        cancel_at_period_end: bool,
        reason: &str,
    ) -> BillingResult<SubscriptionRecord> {
        let record = self
            .store
            .get_for_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("No subscription record".to_string()))?;

        let subscription_id = record.paypal_subscription_id.clone().ok_or_else(|| {
            BillingError::InvalidState("No subscription attached to this account".to_string())
        })?;

        if cancel_at_period_end {
            if record.cancel_at_period_end {
                // Already scheduled; nothing to redo
                return Ok(record);
            }

            let next = scheduler::schedule_cancel_at_period_end(&record)?;
            let written = self.store.upsert(&next, Some(record.updated_at)).await?;
            tracing::info!(
                user_id = %user_id,
                subscription_id = %subscription_id,
                "Cancellation scheduled for period end"
            );
            self.notify(&written, NotificationTemplate::CancellationScheduled)
                .await;
            return Ok(written);
        }

        if record.status.is_terminal() {
            return Err(BillingError::InvalidState(format!(
                "Subscription is already {}",
                record.status
            )));
        }

        // Gateway errors propagate to the caller here; this is a user
        // action, not a webhook retry path
        self.gateway.cancel_subscription(&subscription_id, reason).await?;

        let previous_tier = record.tier;
        let mut next = record.clone();
        next.tier = Tier::Free;
        next.status = SubscriptionStatus::Cancelled;
        next.cancel_at_period_end = false;
        next.cancel_scheduled_at = None;
        next.next_billing_time = None;

        let written = self.store.upsert(&next, Some(record.updated_at)).await?;
        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            "Subscription cancelled immediately"
        );

        if previous_tier != written.tier {
            self.broadcast_tier_change(user_id, previous_tier, written.tier)
                .await;
        }
        self.notify(
            &written,
            NotificationTemplate::SubscriptionCancelled {
                tier: previous_tier.to_string(),
            },
        )
        .await;

        Ok(written)
    }

    /// Current record plus the entitlements it resolves to
    pub async fn subscription_overview(
        &self,
        user_id: Uuid,
    ) -> BillingResult<(SubscriptionRecord, EntitlementBundle)> {
        let record = self
            .store
            .get_for_user(user_id)
            .await?
            .unwrap_or_else(|| SubscriptionRecord::absent(user_id));
        let entitlements = EntitlementBundle::for_tier(record.tier);
        Ok((record, entitlements))
    }

    /// User-facing transaction history, newest first
    pub async fn transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<TransactionLedgerEntry>> {
        self.ledger.list_for_user(user_id, limit).await
    }

    /// Create a one-time checkout order on the processor
    pub async fn create_order(&self, amount_value: &str, currency: &str) -> BillingResult<Order> {
        self.gateway.create_order(amount_value, currency).await
    }

    /// Capture an approved order and record the payment
    pub async fn capture_order(
        &self,
        user_id: Uuid,
        order_id: &str,
    ) -> BillingResult<CaptureResult> {
        let capture = self.gateway.capture_order(order_id).await?;

        if !capture.capture_id.is_empty() {
            let now = OffsetDateTime::now_utc();
            let entry = TransactionLedgerEntry {
                user_id,
                subscription_id: None,
                transaction_id: capture.capture_id.clone(),
                transaction_type: TransactionType::Payment,
                status: TransactionStatus::Completed,
                amount_value: capture.amount_value.clone(),
                amount_currency: capture.amount_currency.clone(),
                plan: None,
                description: Some(format!("One-time order {}", order_id)),
                raw_event_type: "ORDER.CAPTURE".to_string(),
                raw_resource: serde_json::Value::Null,
                created_at: now,
            };
            if let Err(e) = self.ledger.append(&entry).await {
                tracing::error!(
                    user_id = %user_id,
                    order_id = %order_id,
                    error = %e,
                    "Ledger append for order capture failed"
                );
            }
        }

        Ok(capture)
    }

    /// Delete all billing data for a user as part of account deletion
    pub async fn delete_user_data(&self, user_id: Uuid) -> BillingResult<()> {
        self.ledger.delete_for_user(user_id).await?;
        self.store.delete_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, "Billing data deleted");
        Ok(())
    }

    /// Append a payment or refund ledger entry for a webhook event and send
    /// the matching receipt email. Best effort; failures are logged.
    async fn append_payment(&self, record: &SubscriptionRecord, event: &NormalizedWebhookEvent) {
        let Some(capture_id) = event.transaction_id.as_deref() else {
            tracing::warn!(
                kind = %event.kind,
                event_id = %event.event_id,
                "Payment event without a transaction id, ledger skipped"
            );
            return;
        };

        let refund = event.kind == WebhookEventKind::CaptureRefunded;
        let now = OffsetDateTime::now_utc();
        let amount_value = event.amount_value.clone().unwrap_or_else(|| "0.00".to_string());
        let amount_currency = event
            .amount_currency
            .clone()
            .unwrap_or_else(|| "USD".to_string());

        let entry = TransactionLedgerEntry {
            user_id: record.user_id,
            subscription_id: event.subscription_id.clone(),
            transaction_id: if refund {
                TransactionLedgerEntry::refund_transaction_id(capture_id, now)
            } else {
                capture_id.to_string()
            },
            transaction_type: if refund {
                TransactionType::Refund
            } else {
                TransactionType::Payment
            },
            status: if refund {
                TransactionStatus::Refunded
            } else {
                TransactionStatus::Completed
            },
            amount_value: amount_value.clone(),
            amount_currency: amount_currency.clone(),
            plan: record.paypal_plan_id.clone(),
            description: None,
            raw_event_type: event.kind.to_string(),
            raw_resource: event.raw.get("resource").cloned().unwrap_or_default(),
            created_at: now,
        };

        // Short retry with backoff; the unique transaction id makes a
        // repeated append harmless
        let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(2);
        if let Err(e) = Retry::spawn(strategy, || self.ledger.append(&entry)).await {
            tracing::error!(
                user_id = %record.user_id,
                transaction_id = %entry.transaction_id,
                error = %e,
                "Ledger append failed"
            );
        }

        let template = if refund {
            NotificationTemplate::RefundIssued {
                amount: amount_value,
                currency: amount_currency,
            }
        } else {
            NotificationTemplate::PaymentReceived {
                amount: amount_value,
                currency: amount_currency,
            }
        };
        self.notify(record, template).await;
    }

    async fn broadcast_tier_change(&self, user_id: Uuid, from: Tier, to: Tier) {
        let change = EntitlementChange::new(user_id, from, to);
        if let Err(e) = self.broadcaster.broadcast(change).await {
            tracing::warn!(user_id = %user_id, error = %e, "Entitlement broadcast failed");
        }
    }

    async fn notify(&self, record: &SubscriptionRecord, template: NotificationTemplate) {
        let Some(email) = record.subscriber_email.as_deref() else {
            return;
        };
        match self.notifier.send(email, template).await {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user_id = %record.user_id, error = %e, "Notification failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Normalizer;
    use crate::gateway::MockPaymentGateway;

    fn plans() -> PlanCatalog {
        PlanCatalog {
            pro: "P-PRO".to_string(),
            pro_plus: "P-PROPLUS".to_string(),
            pro_annual: None,
            pro_plus_annual: None,
        }
    }

    fn parse(body: &str) -> NormalizedWebhookEvent {
        Normalizer::new(Arc::new(MockPaymentGateway::new()), plans())
            .parse(body)
            .unwrap()
    }

    fn active_pro_record() -> SubscriptionRecord {
        let mut record = SubscriptionRecord::absent(Uuid::new_v4());
        record.tier = Tier::Pro;
        record.status = SubscriptionStatus::Active;
        record.paypal_subscription_id = Some("I-SUB1".to_string());
        record.paypal_plan_id = Some("P-PRO".to_string());
        record.subscriber_email = Some("alex@example.com".to_string());
        record
    }

    const CANCELLED: &str = r#"{
        "id": "WH-CAN",
        "event_type": "BILLING.SUBSCRIPTION.CANCELLED",
        "resource": { "id": "I-SUB1", "status": "CANCELLED" }
    }"#;

    const ACTIVATED: &str = r#"{
        "id": "WH-ACT",
        "event_type": "BILLING.SUBSCRIPTION.ACTIVATED",
        "resource": { "id": "I-SUB1", "status": "ACTIVE", "plan_id": "P-PRO" }
    }"#;

    #[test]
    fn test_cancelled_event_sets_free_and_clears_pending_cancel() {
        let mut record = active_pro_record();
        record.cancel_at_period_end = true;
        record.cancel_scheduled_at = Some(OffsetDateTime::now_utc());

        let plan = plan_transition(&record, &parse(CANCELLED));
        match plan {
            TransitionPlan::Write {
                next, tier_change, ..
            } => {
                assert_eq!(next.tier, Tier::Free);
                assert_eq!(next.status, SubscriptionStatus::Cancelled);
                assert!(!next.cancel_at_period_end);
                assert!(next.cancel_scheduled_at.is_none());
                assert!(next.next_billing_time.is_none());
                assert_eq!(tier_change, Some((Tier::Pro, Tier::Free)));
            }
            TransitionPlan::NoOp => panic!("expected a write"),
        }
    }

    #[test]
    fn test_reapplying_event_is_noop() {
        let record = active_pro_record();
        let event = parse(CANCELLED);

        let next = match plan_transition(&record, &event) {
            TransitionPlan::Write { next, .. } => next,
            TransitionPlan::NoOp => panic!("first application must write"),
        };

        // Second delivery of the same event against the resulting record
        assert!(matches!(plan_transition(&next, &event), TransitionPlan::NoOp));
    }

    #[test]
    fn test_activated_event_raises_tier() {
        let record = SubscriptionRecord::absent(Uuid::new_v4());
        match plan_transition(&record, &parse(ACTIVATED)) {
            TransitionPlan::Write {
                next,
                tier_change,
                notification,
            } => {
                assert_eq!(next.tier, Tier::Pro);
                assert_eq!(next.status, SubscriptionStatus::Active);
                assert_eq!(next.paypal_subscription_id.as_deref(), Some("I-SUB1"));
                assert_eq!(tier_change, Some((Tier::Free, Tier::Pro)));
                assert!(matches!(
                    notification,
                    Some(NotificationTemplate::SubscriptionActivated { .. })
                ));
            }
            TransitionPlan::NoOp => panic!("expected a write"),
        }
    }

    #[test]
    fn test_unknown_status_never_changes_tier() {
        let record = active_pro_record();
        let event = parse(
            r#"{
                "id": "WH-U",
                "event_type": "BILLING.SUBSCRIPTION.UPDATED",
                "resource": { "id": "I-SUB1", "status": "SOME_FUTURE_STATUS" }
            }"#,
        );
        match plan_transition(&record, &event) {
            TransitionPlan::Write {
                next, tier_change, ..
            } => {
                assert_eq!(next.tier, Tier::Pro);
                assert_eq!(next.status, SubscriptionStatus::Unknown);
                assert_eq!(tier_change, None);
            }
            TransitionPlan::NoOp => panic!("status bookkeeping should write"),
        }
    }

    #[test]
    fn test_stale_active_report_does_not_resurrect_cancelled_record() {
        let mut record = active_pro_record();
        record.tier = Tier::Free;
        record.status = SubscriptionStatus::Cancelled;

        // UPDATED with ACTIVE but no plan id: bookkeeping only, and the
        // one-way guard keeps the terminal status
        let event = parse(
            r#"{
                "id": "WH-S",
                "event_type": "BILLING.SUBSCRIPTION.UPDATED",
                "resource": { "id": "I-SUB1", "status": "ACTIVE" }
            }"#,
        );
        assert!(matches!(plan_transition(&record, &event), TransitionPlan::NoOp));
    }

    #[test]
    fn test_explicit_activation_can_reactivate_cancelled_record() {
        let mut record = active_pro_record();
        record.tier = Tier::Free;
        record.status = SubscriptionStatus::Cancelled;

        match plan_transition(&record, &parse(ACTIVATED)) {
            TransitionPlan::Write { next, .. } => {
                assert_eq!(next.tier, Tier::Pro);
                assert_eq!(next.status, SubscriptionStatus::Active);
            }
            TransitionPlan::NoOp => panic!("explicit activation must write"),
        }
    }

    #[test]
    fn test_cycle_completed_is_bookkeeping_only() {
        let mut record = active_pro_record();
        record.cancel_at_period_end = true;
        record.cancel_scheduled_at = Some(OffsetDateTime::now_utc());

        let event = parse(
            r#"{
                "id": "WH-CY",
                "event_type": "BILLING.SUBSCRIPTION.CYCLE.COMPLETED",
                "resource": { "id": "I-SUB1" }
            }"#,
        );
        // Flag and tier untouched; the gateway cancel is the scheduler's job
        assert!(matches!(plan_transition(&record, &event), TransitionPlan::NoOp));
        assert!(scheduler::fires_deferred_cancel(&record, &event));
    }

    #[test]
    fn test_payment_failed_drops_to_free() {
        let record = active_pro_record();
        let event = parse(
            r#"{
                "id": "WH-PF",
                "event_type": "BILLING.SUBSCRIPTION.PAYMENT.FAILED",
                "resource": { "id": "I-SUB1" }
            }"#,
        );
        match plan_transition(&record, &event) {
            TransitionPlan::Write {
                next, notification, ..
            } => {
                assert_eq!(next.tier, Tier::Free);
                assert_eq!(next.status, SubscriptionStatus::Failed);
                assert!(matches!(
                    notification,
                    Some(NotificationTemplate::PaymentFailed)
                ));
            }
            TransitionPlan::NoOp => panic!("expected a write"),
        }
    }

    #[test]
    fn test_capture_denied_drops_to_free() {
        let record = active_pro_record();
        let event = parse(
            r#"{
                "id": "WH-DEN",
                "event_type": "PAYMENT.CAPTURE.DENIED",
                "resource": {
                    "id": "CAP-77",
                    "status": "DECLINED",
                    "amount": { "value": "12.00", "currency_code": "USD" },
                    "supplementary_data": { "related_ids": { "subscription_id": "I-SUB1" } }
                }
            }"#,
        );
        // The event resolves to the subscription, not the capture
        assert_eq!(event.subscription_id.as_deref(), Some("I-SUB1"));
        match plan_transition(&record, &event) {
            TransitionPlan::Write {
                next, notification, ..
            } => {
                assert_eq!(next.tier, Tier::Free);
                assert_eq!(next.status, SubscriptionStatus::Failed);
                assert!(matches!(
                    notification,
                    Some(NotificationTemplate::PaymentFailed)
                ));
            }
            TransitionPlan::NoOp => panic!("expected a write"),
        }
    }

    #[test]
    fn test_reapplying_activation_is_noop() {
        let record = SubscriptionRecord::absent(Uuid::new_v4());
        let event = parse(ACTIVATED);

        let next = match plan_transition(&record, &event) {
            TransitionPlan::Write { next, .. } => next,
            TransitionPlan::NoOp => panic!("first application must write"),
        };
        assert_eq!(next.tier, Tier::Pro);

        // Redelivered activation against the already-active record
        assert!(matches!(plan_transition(&next, &event), TransitionPlan::NoOp));
    }

    #[test]
    fn test_created_event_updates_status_keeps_tier() {
        let record = SubscriptionRecord::absent(Uuid::new_v4());
        let event = parse(
            r#"{
                "id": "WH-CR",
                "event_type": "BILLING.SUBSCRIPTION.CREATED",
                "resource": { "id": "I-SUB1", "status": "APPROVAL_PENDING", "plan_id": "P-PRO" }
            }"#,
        );
        match plan_transition(&record, &event) {
            TransitionPlan::Write {
                next, tier_change, ..
            } => {
                assert_eq!(next.status, SubscriptionStatus::Created);
                assert_eq!(next.tier, Tier::Free);
                assert_eq!(tier_change, None);
            }
            TransitionPlan::NoOp => panic!("expected a write"),
        }
    }
}
